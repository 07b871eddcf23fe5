//! Metadata scan of one directory tree.
//!
//! The scanner walks a root in pre-order and produces a [`TreeIndex`]: a flat
//! map from directory key to [`DirNode`]. The root is keyed by the
//! [`ROOT_MASK`] sentinel; every other directory is keyed by its relative
//! path from the root, so sibling subtrees that share a basename can never
//! collide. No absolute path is stored in a node; relative components are
//! joined to a mount point only when a plan is emitted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::trace;

use crate::errors::{Result, SyncError};

/// Reserved key for the root directory of an index. A scanned entry with
/// this exact name would collide with the root key, so the scanner rejects
/// such trees.
pub const ROOT_MASK: &str = "%-m-%";

/// Metadata recorded for one file, immutable once observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    /// Last modification time; ordering decisions are made on this alone.
    pub modified: DateTime<Utc>,
    /// Permission bits to apply when the file is copied.
    pub mode: u32,
}

/// One directory of a scanned tree.
#[derive(Debug, Clone)]
pub struct DirNode {
    /// On-disk basename. The root keeps its real basename here even though
    /// it is keyed by [`ROOT_MASK`].
    pub name: String,
    /// Path components relative to the scanned root; empty for the root.
    pub rel: Vec<String>,
    /// Permission bits of the directory itself.
    pub mode: u32,
    /// Files directly inside this directory, keyed by basename.
    pub files: HashMap<String, FileMeta>,
}

impl DirNode {
    /// Join the relative components onto a mount point, producing the
    /// absolute path of this directory under that root.
    pub fn abs_path(&self, mount_point: &Path) -> PathBuf {
        let mut path = mount_point.to_path_buf();
        for component in &self.rel {
            path.push(component);
        }
        path
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

/// Result of scanning one root: the mount point plus every directory found
/// under it.
#[derive(Debug, Clone)]
pub struct TreeIndex {
    pub mount_point: PathBuf,
    pub dirs: HashMap<String, DirNode>,
}

impl TreeIndex {
    /// Walk `root` and build the index. The root must exist and be a
    /// directory. Any I/O error aborts the scan; a partial index is never
    /// returned.
    pub async fn scan(root: impl AsRef<Path>) -> Result<TreeIndex> {
        let root = root.as_ref();

        let root_meta = match fs::metadata(root).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SyncError::RootNotFound(root.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        if !root_meta.is_dir() {
            return Err(SyncError::RootNotFound(root.to_path_buf()));
        }

        let root_name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut dirs = HashMap::new();
        let mut pending: Vec<(PathBuf, Vec<String>)> = vec![(root.to_path_buf(), Vec::new())];

        while let Some((abs, rel)) = pending.pop() {
            let meta = fs::metadata(&abs).await?;
            let mut files = HashMap::new();

            let mut entries = fs::read_dir(&abs).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name == ROOT_MASK {
                    return Err(SyncError::ReservedName(entry.path()));
                }

                if entry.file_type().await?.is_dir() {
                    let mut child_rel = rel.clone();
                    child_rel.push(name);
                    pending.push((entry.path(), child_rel));
                } else {
                    let file_meta = entry.metadata().await?;
                    let modified = DateTime::<Utc>::from(file_meta.modified()?);
                    files.insert(
                        name,
                        FileMeta {
                            modified,
                            mode: mode_bits(&file_meta),
                        },
                    );
                }
            }

            trace!(dir = %abs.display(), files = files.len(), "scanned directory");

            let (key, name) = if rel.is_empty() {
                (ROOT_MASK.to_string(), root_name.clone())
            } else {
                (rel.join("/"), rel.last().cloned().unwrap_or_default())
            };
            dirs.insert(
                key,
                DirNode {
                    name,
                    rel,
                    mode: mode_bits(&meta),
                    files,
                },
            );
        }

        Ok(TreeIndex {
            mount_point: root.to_path_buf(),
            dirs,
        })
    }

    /// Total file count aggregated over every directory.
    pub fn file_count(&self) -> usize {
        self.dirs.values().map(DirNode::file_count).sum()
    }
}

/// Scan two roots in parallel as sibling tasks and join on both. Each
/// individual scan stays single-threaded.
pub async fn scan_pair(src: &Path, dst: &Path) -> Result<(TreeIndex, TreeIndex)> {
    let src = src.to_path_buf();
    let dst = dst.to_path_buf();

    let (src_index, dst_index) = tokio::join!(
        tokio::spawn(async move { TreeIndex::scan(&src).await }),
        tokio::spawn(async move { TreeIndex::scan(&dst).await }),
    );

    let src_index =
        src_index.map_err(|e| SyncError::Invariant(format!("source scan task failed: {e}")))??;
    let dst_index = dst_index
        .map_err(|e| SyncError::Invariant(format!("destination scan task failed: {e}")))??;

    Ok((src_index, dst_index))
}

#[cfg(unix)]
fn mode_bits(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_bits(_meta: &std::fs::Metadata) -> u32 {
    0o644
}
