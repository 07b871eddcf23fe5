//! Error types for reconciliation operations

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sync root not found or not a directory: {0}")]
    RootNotFound(PathBuf),

    #[error(
        "too many files not in agreement: {src_files} source vs {dst_files} destination ({percent}%)"
    )]
    TooLargeDifference {
        src_files: usize,
        dst_files: usize,
        percent: u32,
    },

    #[error("invalid sync time: {0}")]
    InvalidSyncTime(String),

    #[error("reserved path component: {0}")]
    ReservedName(PathBuf),

    #[error("reconciliation cancelled")]
    Cancelled,

    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl SyncError {
    /// True for programmer-error conditions that must take the process down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Invariant(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
