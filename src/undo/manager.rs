use super::{FileRestoreResult, UndoOperation, UndoRecord, UndoReport};
use crate::content::{self, ContentEncoding};
use crate::errors::UndoError;
use crate::storage::{remove_if_exists, sanitize_segment, write_atomic};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Capacity-bounded, disk-backed undo stacks keyed by session.
///
/// All methods do blocking file I/O.
pub struct UndoManager {
    root: PathBuf,
    dir: PathBuf,
    capacity: usize,
    stacks: Mutex<HashMap<String, VecDeque<UndoOperation>>>,
}

impl UndoManager {
    /// An empty manager. Relative file paths resolve against `workspace_root`.
    pub fn new(workspace_root: &Path, data_dir: &Path, capacity: usize) -> Self {
        Self {
            root: workspace_root.to_path_buf(),
            dir: data_dir.join("undo"),
            capacity: capacity.max(1),
            stacks: Mutex::new(HashMap::new()),
        }
    }

    /// A manager with stacks reloaded from existing backing files.
    ///
    /// Entries are ordered by timestamp; unreadable files are skipped and a
    /// session over capacity loses its oldest entries.
    pub fn open(workspace_root: &Path, data_dir: &Path, capacity: usize) -> Result<Self, UndoError> {
        let manager = Self::new(workspace_root, data_dir, capacity);
        let sessions = match fs::read_dir(&manager.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(manager),
            Err(source) => {
                return Err(UndoError::Read {
                    path: manager.dir.clone(),
                    source,
                });
            }
        };

        let mut loaded = 0;
        for session_dir in sessions.filter_map(|e| e.ok()).map(|e| e.path()) {
            if !session_dir.is_dir() {
                continue;
            }
            let mut ops = load_session(&session_dir)?;
            ops.sort_by_key(|op| op.timestamp);
            let Some(session_id) = ops.first().map(|op| op.session_id.clone()) else {
                continue;
            };
            loaded += ops.len();

            let mut stack: VecDeque<UndoOperation> = ops.into();
            manager.evict_over_capacity(&mut stack);
            manager.lock().insert(session_id, stack);
        }
        debug!(loaded, dir = %manager.dir.display(), "Undo stacks reloaded");
        Ok(manager)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self, session_id: &str) -> usize {
        self.lock().get(session_id).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, session_id: &str) -> bool {
        self.len(session_id) == 0
    }

    /// Entries of a session, newest first.
    pub fn history(&self, session_id: &str) -> Vec<UndoOperation> {
        self.lock()
            .get(session_id)
            .map(|stack| stack.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    /// Persist pre-edit content and push the operation.
    ///
    /// `original_contents` maps each path to its bytes before the edit, or
    /// `None` if the file did not exist yet.
    pub fn record(
        &self,
        session_id: &str,
        tool_kind: &str,
        file_paths: &[String],
        original_contents: BTreeMap<String, Option<Vec<u8>>>,
    ) -> Result<UndoOperation, UndoError> {
        let mut contents = BTreeMap::new();
        let mut encodings = BTreeMap::new();
        for (path, bytes) in original_contents {
            let text = bytes.map(|b| {
                let (text, encoding) = content::encode(&b);
                if encoding != ContentEncoding::Utf8 {
                    encodings.insert(path.clone(), encoding);
                }
                text
            });
            contents.insert(path, text);
        }

        let record = UndoRecord {
            session_id: session_id.to_string(),
            tool: tool_kind.to_string(),
            file_paths: file_paths.to_vec(),
            original_contents: contents,
            encodings,
            timestamp: Utc::now(),
        };

        let id = Uuid::new_v4().to_string();
        let session_dir = self.dir.join(sanitize_segment(session_id));
        fs::create_dir_all(&session_dir).map_err(|source| UndoError::Write {
            path: session_dir.clone(),
            source,
        })?;
        let backup_ref = session_dir.join(format!("{}.json", id));
        let json = serde_json::to_string_pretty(&record).map_err(UndoError::Serialize)?;
        write_atomic(&backup_ref, json.as_bytes()).map_err(|source| UndoError::Write {
            path: backup_ref.clone(),
            source,
        })?;

        let op = UndoOperation {
            id,
            session_id: session_id.to_string(),
            tool_kind: record.tool,
            file_paths: record.file_paths,
            timestamp: record.timestamp,
            backup_ref,
        };

        let mut stacks = self.lock();
        let stack = stacks.entry(session_id.to_string()).or_default();
        stack.push_back(op.clone());
        self.evict_over_capacity(stack);
        debug!(session_id, tool = tool_kind, files = op.file_paths.len(), depth = stack.len(), "Recorded undo entry");
        Ok(op)
    }

    /// Read the current content of `file_paths` and record it.
    pub fn capture_and_record(
        &self,
        session_id: &str,
        tool_kind: &str,
        file_paths: &[String],
    ) -> Result<UndoOperation, UndoError> {
        let mut originals = BTreeMap::new();
        for path in file_paths {
            let full = self.resolve(path);
            let bytes = match fs::read(&full) {
                Ok(bytes) => Some(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(source) => return Err(UndoError::Read { path: full, source }),
            };
            originals.insert(path.clone(), bytes);
        }
        self.record(session_id, tool_kind, file_paths, originals)
    }

    /// Pop up to `steps` entries and restore their files, newest first.
    ///
    /// Every popped entry's backing file is deleted. A missing or corrupt
    /// backing file fails only that entry's files.
    pub fn undo(&self, session_id: &str, steps: usize) -> UndoReport {
        let popped: Vec<UndoOperation> = {
            let mut stacks = self.lock();
            let Some(stack) = stacks.get_mut(session_id) else {
                return UndoReport::default();
            };
            let n = steps.min(stack.len());
            (0..n).filter_map(|_| stack.pop_back()).collect()
        };

        let mut report = UndoReport::default();
        for op in popped {
            self.restore_operation(&op, &mut report.files);
            if let Err(e) = remove_if_exists(&op.backup_ref) {
                warn!(path = %op.backup_ref.display(), error = %e, "Failed to delete undo backing file");
            }
            report.operations.push(op);
        }
        info!(
            session_id,
            operations = report.operations.len(),
            restored = report.succeeded(),
            failed = report.failed(),
            "Undo finished"
        );
        report
    }

    fn restore_operation(&self, op: &UndoOperation, results: &mut Vec<FileRestoreResult>) {
        let record = match read_record(&op.backup_ref) {
            Ok(record) => record,
            Err(e) => {
                warn!(id = %op.id, error = %e, "Undo backing file unusable");
                results.extend(
                    op.file_paths
                        .iter()
                        .map(|p| FileRestoreResult::failed(p, e.to_string())),
                );
                return;
            }
        };

        for path in &record.file_paths {
            let result = match record.original_contents.get(path) {
                Some(Some(text)) => {
                    let encoding = record.encodings.get(path).copied().unwrap_or_default();
                    self.write_original(path, text, encoding)
                }
                Some(None) => self.remove_created(path),
                None => Err("no original content recorded".to_string()),
            };
            results.push(match result {
                Ok(()) => FileRestoreResult::ok(path),
                Err(error) => FileRestoreResult::failed(path, error),
            });
        }
    }

    fn write_original(&self, path: &str, text: &str, encoding: ContentEncoding) -> Result<(), String> {
        let bytes = content::decode(text, encoding).ok_or_else(|| {
            UndoError::Decode {
                path: PathBuf::from(path),
            }
            .to_string()
        })?;
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| format!("create directory failed: {}", e))?;
        }
        fs::write(&full, bytes).map_err(|e| format!("write failed: {}", e))
    }

    fn remove_created(&self, path: &str) -> Result<(), String> {
        remove_if_exists(&self.resolve(path))
            .map(|_| ())
            .map_err(|e| format!("delete failed: {}", e))
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }

    /// Drop oldest entries past capacity, deleting exactly their backing files.
    fn evict_over_capacity(&self, stack: &mut VecDeque<UndoOperation>) {
        while stack.len() > self.capacity {
            let Some(oldest) = stack.pop_front() else {
                break;
            };
            debug!(id = %oldest.id, "Evicting oldest undo entry");
            if let Err(e) = remove_if_exists(&oldest.backup_ref) {
                warn!(path = %oldest.backup_ref.display(), error = %e, "Failed to delete evicted undo file");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<UndoOperation>>> {
        self.stacks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn read_record(path: &Path) -> Result<UndoRecord, UndoError> {
    let json = match fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(UndoError::MissingBackup(path.to_path_buf()));
        }
        Err(source) => {
            return Err(UndoError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_str(&json).map_err(|source| UndoError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn load_session(dir: &Path) -> Result<Vec<UndoOperation>, UndoError> {
    let entries = fs::read_dir(dir).map_err(|source| UndoError::Read {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut ops = Vec::new();
    for path in entries.filter_map(|e| e.ok()).map(|e| e.path()) {
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
            continue;
        };
        match read_record(&path) {
            Ok(record) => ops.push(UndoOperation {
                id,
                session_id: record.session_id,
                tool_kind: record.tool,
                file_paths: record.file_paths,
                timestamp: record.timestamp,
                backup_ref: path,
            }),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable undo file"),
        }
    }
    Ok(ops)
}
