use super::store::SnapshotStore;
use super::walk::{self, CacheLimits, WalkedFile};
use super::{
    DEFAULT_BASELINE_CACHE_BYTES, FileBackup, FileFailure, FileState, RollbackPoint,
    RollbackReport, SnapshotTurn, TurnFailure,
};
use crate::content::{self, ContentEncoding};
use crate::errors::SnapshotError;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

/// In-memory state of a turn between `begin` and `commit`.
struct Baseline {
    session_id: String,
    turn_index: u32,
    started_at: DateTime<Utc>,
    files: BTreeMap<String, FileState>,
    /// Pre-turn bytes cached during the walk, within the cache limits.
    contents: HashMap<String, Vec<u8>>,
    /// Pre-turn bytes captured just before an edit tool ran.
    captured: HashMap<String, Vec<u8>>,
}

impl Baseline {
    fn previous_content(&self, path: &str) -> Option<&[u8]> {
        self.contents
            .get(path)
            .or_else(|| self.captured.get(path))
            .map(Vec::as_slice)
    }
}

fn baseline_key(session_id: &str, turn_index: u32) -> String {
    format!("{}:{}", session_id, turn_index)
}

enum PathOutcome {
    Restored,
    Deleted,
    Failed(String),
}

/// Baselines, commits and rolls back workspace turns.
///
/// All methods do blocking file I/O; async callers should run them on a
/// blocking thread.
pub struct SnapshotManager {
    root: PathBuf,
    store: SnapshotStore,
    skip: Vec<PathBuf>,
    cache: CacheLimits,
    baselines: Mutex<HashMap<String, Baseline>>,
}

impl SnapshotManager {
    /// `data_dir` is excluded from walks when it lies inside the workspace.
    pub fn new(workspace_root: &Path, data_dir: &Path, max_file_bytes: u64) -> Self {
        Self {
            root: workspace_root.to_path_buf(),
            store: SnapshotStore::new(data_dir),
            skip: vec![data_dir.to_path_buf()],
            cache: CacheLimits {
                per_file: max_file_bytes,
                total: DEFAULT_BASELINE_CACHE_BYTES,
            },
            baselines: Mutex::new(HashMap::new()),
        }
    }

    /// Cap the pre-turn content one baseline keeps in memory.
    pub fn with_cache_budget(mut self, total_bytes: u64) -> Self {
        self.cache.total = total_bytes;
        self
    }

    pub fn workspace_root(&self) -> &Path {
        &self.root
    }

    pub fn has_baseline(&self, session_id: &str, turn_index: u32) -> bool {
        self.lock()
            .contains_key(&baseline_key(session_id, turn_index))
    }

    /// Hash every tracked file and hold the result until `commit`.
    ///
    /// Returns the number of files tracked. A second `begin` for the same key
    /// replaces the earlier baseline. Content beyond the cache budget is not
    /// kept; such files need [`SnapshotManager::capture`] before an edit.
    pub fn begin(&self, session_id: &str, turn_index: u32) -> Result<usize, SnapshotError> {
        let walked = walk::walk(&self.root, &self.skip, Some(self.cache))?;
        let mut files = BTreeMap::new();
        let mut contents = HashMap::new();
        for (path, WalkedFile { state, content }) in walked {
            if let Some(bytes) = content {
                contents.insert(path.clone(), bytes);
            }
            files.insert(path, state);
        }
        let tracked = files.len();
        let cached = contents.len();

        let baseline = Baseline {
            session_id: session_id.to_string(),
            turn_index,
            started_at: Utc::now(),
            files,
            contents,
            captured: HashMap::new(),
        };
        if self
            .lock()
            .insert(baseline_key(session_id, turn_index), baseline)
            .is_some()
        {
            warn!(session_id, turn_index, "Replaced an uncommitted baseline");
        }
        debug!(session_id, turn_index, tracked, cached, "Snapshot baseline taken");
        Ok(tracked)
    }

    /// Record pre-edit content for `paths` that the baseline walk did not cache.
    ///
    /// Only files still identical to their baseline hash are captured, so the
    /// stored bytes are always pre-turn content. Returns how many were captured.
    pub fn capture(
        &self,
        session_id: &str,
        turn_index: u32,
        paths: &[String],
    ) -> Result<usize, SnapshotError> {
        let mut baselines = self.lock();
        let Some(baseline) = baselines.get_mut(&baseline_key(session_id, turn_index)) else {
            debug!(session_id, turn_index, "No baseline to capture into");
            return Ok(0);
        };

        let mut captured = 0;
        for raw in paths {
            let Some(relative) = self.normalize(raw) else {
                warn!(path = %raw, "Ignoring edit target outside the workspace");
                continue;
            };
            if baseline.previous_content(&relative).is_some() {
                continue;
            }
            let Some(expected) = baseline.files.get(&relative) else {
                continue;
            };
            let full = walk::resolve(&self.root, &relative)?;
            let Some(current) = walk::read_file(&full, &relative, None)? else {
                continue;
            };
            if current.state.hash != expected.hash {
                warn!(path = %relative, "File changed before capture; pre-turn content lost");
                continue;
            }
            if let Some(bytes) = current.content {
                baseline.captured.insert(relative, bytes);
                captured += 1;
            }
        }
        Ok(captured)
    }

    /// Diff the workspace against the baseline and persist the change set.
    ///
    /// With `turn_index = None` the newest pending baseline of the session is
    /// committed. The baseline is freed either way. Returns `None` when nothing
    /// changed or there was no baseline; empty turns are never written.
    pub fn commit(
        &self,
        session_id: &str,
        turn_index: Option<u32>,
    ) -> Result<Option<SnapshotTurn>, SnapshotError> {
        let baseline = {
            let mut baselines = self.lock();
            let key = match turn_index {
                Some(index) => Some(baseline_key(session_id, index)),
                None => baselines
                    .values()
                    .filter(|b| b.session_id == session_id)
                    .max_by_key(|b| b.turn_index)
                    .map(|b| baseline_key(&b.session_id, b.turn_index)),
            };
            key.and_then(|k| baselines.remove(&k))
        };
        let Some(baseline) = baseline else {
            debug!(session_id, ?turn_index, "No baseline to commit");
            return Ok(None);
        };

        let current = walk::walk(&self.root, &self.skip, Some(CacheLimits::NONE))?;
        let backups = diff(&baseline, &current);
        if backups.is_empty() {
            debug!(session_id, turn_index = baseline.turn_index, "No changes in turn");
            return Ok(None);
        }

        let turn = SnapshotTurn {
            session_id: baseline.session_id.clone(),
            turn_index: baseline.turn_index,
            timestamp: baseline.started_at,
            workspace_root: self.root.clone(),
            backups,
        };
        let path = self.store.write(&turn)?;
        info!(
            session_id,
            turn_index = turn.turn_index,
            files = turn.backups.len(),
            path = %path.display(),
            "Snapshot committed"
        );
        Ok(Some(turn))
    }

    /// Undo every committed turn with index >= `target_turn`, newest first.
    ///
    /// With `selected_paths`, only those paths are touched and the turn files
    /// are kept so the other paths stay recoverable. Otherwise each turn file
    /// is deleted once all of its paths were handled. Failures are per file,
    /// or per turn when a turn file cannot be read; rollback continues past
    /// both.
    pub fn rollback(
        &self,
        session_id: &str,
        target_turn: u32,
        selected_paths: Option<&[String]>,
    ) -> Result<RollbackReport, SnapshotError> {
        let selected: Option<Vec<String>> = selected_paths.map(|paths| {
            paths
                .iter()
                .filter_map(|p| self.normalize(p))
                .collect()
        });

        let mut turns = self.store.list(session_id)?;
        turns.retain(|(index, _)| *index >= target_turn);
        turns.reverse();

        let mut report = RollbackReport::default();
        let mut outcomes: BTreeMap<String, PathOutcome> = BTreeMap::new();

        for (index, file) in turns {
            // One turn file in memory at a time.
            let turn = match self.store.read(&file) {
                Ok(turn) => turn,
                Err(e) => {
                    warn!(session_id, turn_index = index, error = %e, "Skipping unreadable turn");
                    report.failed_turns.push(TurnFailure {
                        turn_index: index,
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            let mut turn_failed = false;
            let mut touched = false;

            for backup in &turn.backups {
                if let Some(selected) = &selected
                    && !selected.contains(&backup.relative_path)
                {
                    continue;
                }
                touched = true;
                let outcome = self.restore(backup);
                if let PathOutcome::Failed(error) = &outcome {
                    warn!(path = %backup.relative_path, turn_index = index, %error, "Restore failed");
                    turn_failed = true;
                }
                outcomes.insert(backup.relative_path.clone(), outcome);
            }

            if !touched {
                continue;
            }
            report.turns.push(index);
            if selected.is_none()
                && !turn_failed
                && let Err(e) = self.store.remove(&file)
            {
                warn!(session_id, turn_index = index, error = %e, "Failed to remove consumed turn");
            }
        }

        for (path, outcome) in outcomes {
            match outcome {
                PathOutcome::Restored => report.restored.push(path),
                PathOutcome::Deleted => report.deleted.push(path),
                PathOutcome::Failed(error) => report.failed.push(FileFailure { path, error }),
            }
        }
        info!(session_id, target_turn, summary = %report.summary(), "Rollback finished");
        Ok(report)
    }

    fn restore(&self, backup: &FileBackup) -> PathOutcome {
        let full = match walk::resolve(&self.root, &backup.relative_path) {
            Ok(p) => p,
            Err(e) => return PathOutcome::Failed(e.to_string()),
        };

        if !backup.existed_before {
            return match fs::remove_file(&full) {
                Ok(()) => PathOutcome::Deleted,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => PathOutcome::Deleted,
                Err(e) => PathOutcome::Failed(format!("delete failed: {}", e)),
            };
        }

        let Some(text) = &backup.previous_content else {
            return PathOutcome::Failed("pre-turn content was not recoverable".to_string());
        };
        let Some(bytes) = content::decode(text, backup.encoding) else {
            return PathOutcome::Failed(
                SnapshotError::Decode {
                    path: PathBuf::from(&backup.relative_path),
                }
                .to_string(),
            );
        };
        if let Some(parent) = full.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            return PathOutcome::Failed(format!("create directory failed: {}", e));
        }
        match fs::write(&full, bytes) {
            Ok(()) => PathOutcome::Restored,
            Err(e) => PathOutcome::Failed(format!("write failed: {}", e)),
        }
    }

    /// Committed turns of a session, oldest first. Unreadable turn files are
    /// logged and left out.
    pub fn list_rollback_points(&self, session_id: &str) -> Result<Vec<RollbackPoint>, SnapshotError> {
        let points = self
            .store
            .list(session_id)?
            .into_iter()
            .filter_map(|(index, file)| match self.store.read(&file) {
                Ok(turn) => Some(RollbackPoint {
                    turn_index: turn.turn_index,
                    timestamp: turn.timestamp,
                    file_count: turn.backups.len(),
                    paths: turn.backups.into_iter().map(|b| b.relative_path).collect(),
                }),
                Err(e) => {
                    warn!(session_id, turn_index = index, error = %e, "Unreadable turn file");
                    None
                }
            })
            .collect();
        Ok(points)
    }

    /// Highest committed turn index of a session, readable or not.
    pub fn latest_turn(&self, session_id: &str) -> Result<Option<u32>, SnapshotError> {
        self.store.latest(session_id)
    }

    /// Drop pending baselines and every committed turn of a session.
    pub fn clear(&self, session_id: &str) -> Result<usize, SnapshotError> {
        self.lock().retain(|_, b| b.session_id != session_id);
        let removed = self.store.clear(session_id)?;
        info!(session_id, removed, "Cleared snapshots");
        Ok(removed)
    }

    /// Workspace-relative form of `path`, or None if it leaves the workspace.
    fn normalize(&self, path: &str) -> Option<String> {
        let p = Path::new(path);
        let relative = if p.is_absolute() {
            walk::relative_path(&self.root, p)?
        } else {
            path.trim_start_matches("./").replace('\\', "/")
        };
        walk::resolve(&self.root, &relative).ok()?;
        Some(relative)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Baseline>> {
        self.baselines.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Backups for every path that is new, modified, or deleted since `baseline`.
fn diff(baseline: &Baseline, current: &BTreeMap<String, WalkedFile>) -> Vec<FileBackup> {
    let mut backups = Vec::new();

    for (path, before) in &baseline.files {
        let changed = match current.get(path) {
            Some(now) => now.state.hash != before.hash,
            None => true,
        };
        if !changed {
            continue;
        }
        let (previous_content, encoding) = match baseline.previous_content(path) {
            Some(bytes) => {
                let (text, encoding) = content::encode(bytes);
                (Some(text), encoding)
            }
            None => {
                warn!(path = %path, "No pre-turn content for changed file; it cannot be restored");
                (None, ContentEncoding::Utf8)
            }
        };
        backups.push(FileBackup {
            relative_path: path.clone(),
            previous_content,
            existed_before: true,
            previous_hash: Some(before.hash.clone()),
            encoding,
        });
    }

    for path in current.keys() {
        if !baseline.files.contains_key(path) {
            backups.push(FileBackup {
                relative_path: path.clone(),
                previous_content: None,
                existed_before: false,
                previous_hash: None,
                encoding: ContentEncoding::Utf8,
            });
        }
    }

    backups.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    backups
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{TempDir, tempdir};

    fn setup() -> (TempDir, SnapshotManager) {
        let dir = tempdir().unwrap();
        let data = dir.path().join(".ferry");
        let manager = SnapshotManager::new(dir.path(), &data, 1024);
        (dir, manager)
    }

    #[test]
    fn unchanged_turn_is_not_persisted() {
        let (dir, manager) = setup();
        fs::write(dir.path().join("a.txt"), "one").unwrap();
        manager.begin("s", 1).unwrap();
        assert!(manager.commit("s", Some(1)).unwrap().is_none());
        assert!(!manager.has_baseline("s", 1));
        assert!(manager.list_rollback_points("s").unwrap().is_empty());
    }

    #[test]
    fn commit_without_index_picks_newest_pending_turn() {
        let (dir, manager) = setup();
        manager.begin("s", 1).unwrap();
        manager.begin("s", 2).unwrap();
        fs::write(dir.path().join("new.txt"), "x").unwrap();

        let turn = manager.commit("s", None).unwrap().unwrap();
        assert_eq!(turn.turn_index, 2);
        assert!(manager.has_baseline("s", 1));
    }

    #[test]
    fn baselines_are_session_scoped() {
        let (dir, manager) = setup();
        manager.begin("a", 1).unwrap();
        manager.begin("b", 1).unwrap();
        fs::write(dir.path().join("x.txt"), "x").unwrap();

        assert!(manager.commit("a", Some(1)).unwrap().is_some());
        assert!(manager.has_baseline("b", 1));
    }

    #[test]
    fn deleted_file_is_restored() {
        let (dir, manager) = setup();
        let nested = dir.path().join("src/deep");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("gone.rs"), "fn gone() {}").unwrap();

        manager.begin("s", 1).unwrap();
        fs::remove_dir_all(dir.path().join("src")).unwrap();
        let turn = manager.commit("s", Some(1)).unwrap().unwrap();
        assert_eq!(turn.backups[0].relative_path, "src/deep/gone.rs");

        let report = manager.rollback("s", 1, None).unwrap();
        assert_eq!(report.restored, vec!["src/deep/gone.rs".to_string()]);
        assert_eq!(fs::read_to_string(nested.join("gone.rs")).unwrap(), "fn gone() {}");
    }

    #[test]
    fn large_file_needs_capture() {
        let (dir, manager) = setup();
        let big = "b".repeat(4096);
        fs::write(dir.path().join("big.txt"), &big).unwrap();
        fs::write(dir.path().join("big2.txt"), &big).unwrap();

        manager.begin("s", 1).unwrap();
        assert_eq!(
            manager
                .capture("s", 1, &[dir.path().join("big.txt").to_string_lossy().into_owned()])
                .unwrap(),
            1
        );
        fs::write(dir.path().join("big.txt"), "small now").unwrap();
        fs::write(dir.path().join("big2.txt"), "also small").unwrap();

        let turn = manager.commit("s", Some(1)).unwrap().unwrap();
        assert_eq!(turn.backups[0].previous_content.as_deref(), Some(big.as_str()));
        assert!(turn.backups[1].previous_content.is_none());
        assert!(turn.backups[1].existed_before);

        let report = manager.rollback("s", 1, None).unwrap();
        assert_eq!(report.restored, vec!["big.txt".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].path, "big2.txt");
        // the turn file survives because one path failed
        assert_eq!(manager.list_rollback_points("s").unwrap().len(), 1);
    }

    #[test]
    fn second_commit_for_a_turn_keeps_the_first() {
        let (dir, manager) = setup();
        fs::write(dir.path().join("a.txt"), "a0").unwrap();
        manager.begin("s", 1).unwrap();
        fs::write(dir.path().join("a.txt"), "a1").unwrap();
        manager.commit("s", Some(1)).unwrap().unwrap();

        manager.begin("s", 1).unwrap();
        fs::write(dir.path().join("b.txt"), "new").unwrap();
        let err = manager.commit("s", Some(1)).unwrap_err();
        assert!(matches!(err, SnapshotError::TurnExists { turn_index: 1, .. }));
        assert!(!manager.has_baseline("s", 1));

        let points = manager.list_rollback_points("s").unwrap();
        assert_eq!(points[0].paths, vec!["a.txt".to_string()]);
        assert_eq!(manager.latest_turn("s").unwrap(), Some(1));
    }

    #[test]
    fn capture_skips_files_already_changed() {
        let (dir, manager) = setup();
        let big = "b".repeat(4096);
        fs::write(dir.path().join("big.txt"), &big).unwrap();
        manager.begin("s", 1).unwrap();
        fs::write(dir.path().join("big.txt"), "changed").unwrap();
        assert_eq!(manager.capture("s", 1, &["big.txt".to_string()]).unwrap(), 0);
    }

    #[test]
    fn binary_content_round_trips() {
        let (dir, manager) = setup();
        let bytes = vec![0u8, 159, 146, 150, 255];
        fs::write(dir.path().join("blob.bin"), &bytes).unwrap();
        manager.begin("s", 1).unwrap();
        fs::write(dir.path().join("blob.bin"), b"text").unwrap();

        let turn = manager.commit("s", Some(1)).unwrap().unwrap();
        assert_eq!(turn.backups[0].encoding, ContentEncoding::Base64);
        manager.rollback("s", 1, None).unwrap();
        assert_eq!(fs::read(dir.path().join("blob.bin")).unwrap(), bytes);
    }

    #[test]
    fn clear_drops_pending_and_committed() {
        let (dir, manager) = setup();
        manager.begin("s", 1).unwrap();
        fs::write(dir.path().join("n.txt"), "n").unwrap();
        manager.commit("s", Some(1)).unwrap();
        manager.begin("s", 2).unwrap();

        assert_eq!(manager.clear("s").unwrap(), 1);
        assert!(!manager.has_baseline("s", 2));
        assert!(manager.list_rollback_points("s").unwrap().is_empty());
    }

    #[test]
    fn normalize_rejects_outside_paths() {
        let (dir, manager) = setup();
        assert_eq!(manager.normalize("./src/a.rs").as_deref(), Some("src/a.rs"));
        assert_eq!(
            manager
                .normalize(&dir.path().join("b.rs").to_string_lossy())
                .as_deref(),
            Some("b.rs")
        );
        assert!(manager.normalize("/elsewhere/c.rs").is_none());
        assert!(manager.normalize("../c.rs").is_none());
    }
}
