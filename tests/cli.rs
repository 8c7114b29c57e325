//! End-to-end tests for the `ferry` binary.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use ferry::snapshot::SnapshotManager;
use ferry::undo::UndoManager;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn ferry(project: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("ferry");
    cmd.current_dir(project)
        .env_remove("FERRY_DATA_DIR")
        .env_remove("FERRY_MODEL")
        .env_remove("FERRY_LOG");
    cmd
}

fn project() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    (dir, root)
}

mod cli_basics {
    use super::*;

    #[test]
    fn test_help_lists_commands() {
        let (_dir, root) = project();
        ferry(&root)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("rollback-points"))
            .stdout(predicate::str::contains("undo-history"));
    }

    #[test]
    fn test_missing_session_is_a_usage_error() {
        let (_dir, root) = project();
        ferry(&root).arg("undo").assert().failure();
    }
}

mod config_commands {
    use super::*;

    #[test]
    fn test_show_defaults() {
        let (_dir, root) = project();
        ferry(&root)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Using default configuration"))
            .stdout(predicate::str::contains("max_attempts = 10"));
    }

    #[test]
    fn test_init_then_validate() {
        let (_dir, root) = project();
        ferry(&root)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created"));
        assert!(root.join(".ferry/ferry.toml").exists());

        ferry(&root)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }

    #[test]
    fn test_validate_reports_bad_threshold() {
        let (_dir, root) = project();
        fs::create_dir_all(root.join(".ferry")).unwrap();
        fs::write(
            root.join(".ferry/ferry.toml"),
            "[compaction]\nthreshold = \"150%\"\n",
        )
        .unwrap();

        ferry(&root)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("compaction.threshold"));
    }
}

mod snapshot_commands {
    use super::*;

    fn committed_turn(root: &Path) {
        fs::write(root.join("a.txt"), "before").unwrap();
        let snapshots = SnapshotManager::new(root, &root.join(".ferry"), 1024 * 1024);
        snapshots.begin("s1", 1).unwrap();
        fs::write(root.join("a.txt"), "after").unwrap();
        fs::write(root.join("new.txt"), "created").unwrap();
        snapshots.commit("s1", Some(1)).unwrap().unwrap();
    }

    #[test]
    fn test_no_rollback_points() {
        let (_dir, root) = project();
        ferry(&root)
            .args(["rollback-points", "--session", "nobody"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No rollback points"));
    }

    #[test]
    fn test_list_and_roll_back() {
        let (_dir, root) = project();
        committed_turn(&root);

        ferry(&root)
            .args(["rollback-points", "--session", "s1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("turn   1"))
            .stdout(predicate::str::contains("new.txt"));

        ferry(&root)
            .args(["rollback", "--session", "s1", "--to", "1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("1 restored, 1 deleted, 0 failed"));

        assert_eq!(fs::read_to_string(root.join("a.txt")).unwrap(), "before");
        assert!(!root.join("new.txt").exists());
    }

    #[test]
    fn test_clear_snapshots() {
        let (_dir, root) = project();
        committed_turn(&root);

        ferry(&root)
            .args(["clear-snapshots", "--session", "s1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Removed 1 snapshot(s)"));
        ferry(&root)
            .args(["rollback-points", "--session", "s1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No rollback points"));
    }
}

mod undo_commands {
    use super::*;

    #[test]
    fn test_history_then_undo() {
        let (_dir, root) = project();
        fs::write(root.join("main.rs"), "fn main() {}").unwrap();
        let undo = UndoManager::new(&root, &root.join(".ferry"), 100);
        undo.capture_and_record("s1", "filesystem-edit", &["main.rs".to_string()])
            .unwrap();
        fs::write(root.join("main.rs"), "broken").unwrap();

        ferry(&root)
            .args(["undo-history", "--session", "s1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("filesystem-edit"))
            .stdout(predicate::str::contains("main.rs"));

        ferry(&root)
            .args(["undo", "--session", "s1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("restored"));
        assert_eq!(fs::read_to_string(root.join("main.rs")).unwrap(), "fn main() {}");

        ferry(&root)
            .args(["undo", "--session", "s1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Nothing to undo"));
    }
}
