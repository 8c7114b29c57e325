//! Flat-file storage for committed snapshot turns.
//!
//! Layout: `<data_dir>/snapshots/<session>/turn-<index>.json`, one document
//! per committed turn.

use super::SnapshotTurn;
use crate::errors::SnapshotError;
use crate::storage::{remove_if_exists, sanitize_segment, write_atomic};
use std::fs;
use std::path::{Path, PathBuf};

const TURN_FILE_PREFIX: &str = "turn-";
const TURN_FILE_SUFFIX: &str = ".json";

pub(crate) struct SnapshotStore {
    base_dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            base_dir: data_dir.join("snapshots"),
        }
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(sanitize_segment(session_id))
    }

    pub fn turn_path(&self, session_id: &str, turn_index: u32) -> PathBuf {
        self.session_dir(session_id).join(format!(
            "{}{}{}",
            TURN_FILE_PREFIX, turn_index, TURN_FILE_SUFFIX
        ))
    }

    /// Persist a new turn. An existing file for the same turn is left alone.
    pub fn write(&self, turn: &SnapshotTurn) -> Result<PathBuf, SnapshotError> {
        let dir = self.session_dir(&turn.session_id);
        fs::create_dir_all(&dir).map_err(|source| SnapshotError::Write {
            path: dir.clone(),
            source,
        })?;

        let path = self.turn_path(&turn.session_id, turn.turn_index);
        if path.exists() {
            return Err(SnapshotError::TurnExists {
                session_id: turn.session_id.clone(),
                turn_index: turn.turn_index,
            });
        }
        let json = serde_json::to_string_pretty(turn).map_err(SnapshotError::Serialize)?;

        write_atomic(&path, json.as_bytes()).map_err(|source| SnapshotError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    pub fn read(&self, path: &Path) -> Result<SnapshotTurn, SnapshotError> {
        let content = fs::read_to_string(path).map_err(|source| SnapshotError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| SnapshotError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Committed turn indices and their files, oldest first.
    pub fn list(&self, session_id: &str) -> Result<Vec<(u32, PathBuf)>, SnapshotError> {
        let dir = self.session_dir(session_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(SnapshotError::Read { path: dir, source }),
        };

        let mut turns: Vec<(u32, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                let index = parse_turn_file_name(name.to_str()?)?;
                Some((index, entry.path()))
            })
            .collect();
        turns.sort_by_key(|(index, _)| *index);
        Ok(turns)
    }

    pub fn latest(&self, session_id: &str) -> Result<Option<u32>, SnapshotError> {
        Ok(self.list(session_id)?.last().map(|(index, _)| *index))
    }

    pub fn remove(&self, path: &Path) -> Result<(), SnapshotError> {
        remove_if_exists(path)
            .map(|_| ())
            .map_err(|source| SnapshotError::Write {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Remove every committed turn of a session. Returns how many were removed.
    pub fn clear(&self, session_id: &str) -> Result<usize, SnapshotError> {
        let count = self.list(session_id)?.len();
        let dir = self.session_dir(session_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(count),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(source) => Err(SnapshotError::Write { path: dir, source }),
        }
    }
}

fn parse_turn_file_name(name: &str) -> Option<u32> {
    name.strip_prefix(TURN_FILE_PREFIX)?
        .strip_suffix(TURN_FILE_SUFFIX)?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn turn(session: &str, index: u32) -> SnapshotTurn {
        SnapshotTurn {
            session_id: session.to_string(),
            turn_index: index,
            timestamp: Utc::now(),
            workspace_root: PathBuf::from("/work"),
            backups: Vec::new(),
        }
    }

    #[test]
    fn lists_turns_in_numeric_order() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        for index in [10, 2, 1] {
            store.write(&turn("s1", index)).unwrap();
        }
        fs::write(store.session_dir("s1").join("notes.txt"), "x").unwrap();

        let indices: Vec<u32> = store.list("s1").unwrap().into_iter().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![1, 2, 10]);
        assert!(store.list("other").unwrap().is_empty());
    }

    #[test]
    fn write_then_read() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let path = store.write(&turn("s1", 3)).unwrap();
        assert!(path.ends_with("snapshots/s1/turn-3.json"));
        assert_eq!(store.read(&path).unwrap().turn_index, 3);
    }

    #[test]
    fn committed_turn_is_never_overwritten() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let path = store.write(&turn("s1", 1)).unwrap();
        let before = fs::read_to_string(&path).unwrap();

        let err = store.write(&turn("s1", 1)).unwrap_err();
        assert!(matches!(err, SnapshotError::TurnExists { turn_index: 1, .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
        assert_eq!(store.latest("s1").unwrap(), Some(1));
        assert_eq!(store.latest("s2").unwrap(), None);
    }

    #[test]
    fn clear_removes_session_only() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        store.write(&turn("a", 1)).unwrap();
        store.write(&turn("a", 2)).unwrap();
        store.write(&turn("b", 1)).unwrap();

        assert_eq!(store.clear("a").unwrap(), 2);
        assert!(store.list("a").unwrap().is_empty());
        assert_eq!(store.list("b").unwrap().len(), 1);
        assert_eq!(store.clear("a").unwrap(), 0);
    }
}
