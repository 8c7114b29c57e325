//! Workspace walking and file hashing.

use super::FileState;
use crate::content::hash_bytes;
use crate::errors::SnapshotError;
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::debug;

/// A file seen by a walk, with its bytes when small enough to cache.
#[derive(Debug, Clone)]
pub(crate) struct WalkedFile {
    pub state: FileState,
    pub content: Option<Vec<u8>>,
}

/// How much file content a walk may keep in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CacheLimits {
    /// Files larger than this are hashed but not kept.
    pub per_file: u64,
    /// Total bytes kept across the whole walk.
    pub total: u64,
}

impl CacheLimits {
    /// Hash only.
    pub const NONE: CacheLimits = CacheLimits {
        per_file: 0,
        total: 0,
    };
}

/// Walk `root`, honoring `.gitignore`, and hash every regular file.
///
/// `.git` and every directory in `skip` are pruned. Content is kept while it
/// fits `limits`; without limits every file is kept.
pub(crate) fn walk(
    root: &Path,
    skip: &[PathBuf],
    limits: Option<CacheLimits>,
) -> Result<BTreeMap<String, WalkedFile>, SnapshotError> {
    if !root.is_dir() {
        return Err(SnapshotError::Walk {
            root: root.to_path_buf(),
            message: "not a directory".to_string(),
        });
    }

    let skip: Vec<PathBuf> = skip.to_vec();
    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(false)
        .follow_links(false)
        .git_ignore(true)
        .git_exclude(true)
        .require_git(false)
        .filter_entry(move |entry| {
            entry.file_name() != OsStr::new(".git")
                && !skip.iter().any(|s| entry.path() == s.as_path())
        });

    let mut remaining = limits.map(|l| l.total);
    let mut files = BTreeMap::new();
    for entry in builder.build() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let Some(relative) = relative_path(root, entry.path()) else {
            continue;
        };
        let cache_limit = limits
            .zip(remaining)
            .map(|(l, left)| l.per_file.min(left));
        match read_file(entry.path(), &relative, cache_limit) {
            Ok(Some(walked)) => {
                if let (Some(left), Some(bytes)) = (remaining.as_mut(), &walked.content) {
                    *left = left.saturating_sub(bytes.len() as u64);
                }
                files.insert(relative, walked);
            }
            Ok(None) => {}
            Err(e) => debug!(path = %relative, error = %e, "Skipping file"),
        }
    }
    Ok(files)
}

/// Hash one file. Returns None if it does not exist.
pub(crate) fn read_file(
    path: &Path,
    relative: &str,
    cache_limit: Option<u64>,
) -> Result<Option<WalkedFile>, SnapshotError> {
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(SnapshotError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let size = metadata.len();
    let mtime_ms = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default();

    let cache = cache_limit.is_none_or(|limit| size <= limit);
    let (hash, content) = if cache {
        let bytes = fs::read(path).map_err(|source| SnapshotError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        (hash_bytes(&bytes), Some(bytes))
    } else {
        (hash_large(path)?, None)
    };

    Ok(Some(WalkedFile {
        state: FileState {
            relative_path: relative.to_string(),
            hash,
            size,
            mtime_ms,
        },
        content,
    }))
}

fn hash_large(path: &Path) -> Result<String, SnapshotError> {
    let mut file = fs::File::open(path).map_err(|source| SnapshotError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(|source| SnapshotError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Workspace-relative path with forward slashes.
pub(crate) fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let rel = rel.to_string_lossy().replace('\\', "/");
    (!rel.is_empty()).then_some(rel)
}

/// Resolve a stored relative path, refusing anything that leaves `root`.
pub(crate) fn resolve(root: &Path, relative: &str) -> Result<PathBuf, SnapshotError> {
    let rel = Path::new(relative);
    let escapes = rel.components().any(|c| {
        !matches!(c, std::path::Component::Normal(_) | std::path::Component::CurDir)
    });
    if relative.is_empty() || escapes {
        return Err(SnapshotError::OutsideWorkspace(rel.to_path_buf()));
    }
    Ok(root.join(rel))
}
