//! Plan execution with a bounded worker pool.
//!
//! Phases run strictly in order: delete directories, delete files, create
//! directories, copy files. Work inside a phase runs on up to `P` workers
//! with no ordering guarantee. The first error of a phase stops the run;
//! later phases do not execute.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::errors::{Result, SyncError};
use crate::plan::{NewDirectory, SyncPair, SyncPlan};

/// Size of the intermediate copy buffer.
pub const COPY_BUFFER_SIZE: usize = 4096;

/// Worker-pool size for filesystem-bound work: one worker on a single-CPU
/// box, half the cores plus one otherwise.
pub fn default_pool_size() -> usize {
    let cpus = num_cpus::get();
    if cpus < 2 {
        1
    } else {
        cpus / 2 + 1
    }
}

/// Applies a [`SyncPlan`] against the filesystem.
#[derive(Debug, Clone, Copy)]
pub struct Executor {
    workers: usize,
}

impl Executor {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn with_default_pool() -> Self {
        Self::new(default_pool_size())
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run all four phases. Returns the first error encountered, or
    /// [`SyncError::Cancelled`] when the token fired before the plan was
    /// fully dispatched.
    pub async fn apply(&self, plan: SyncPlan, cancel: &CancelToken) -> Result<()> {
        debug!(stage = "remove_dirs", state = "processing", "deleting directories");
        self.run_phase(plan.dirs_to_delete, cancel, remove_dir).await?;

        debug!(stage = "remove_files", state = "processing", "deleting files");
        for (group, files) in plan.files_to_delete {
            debug!(group = %group, count = files.len(), "deleting file group");
            self.run_phase(files, cancel, remove_file).await?;
        }

        debug!(stage = "create_new_dirs", state = "processing", "creating directories");
        self.run_phase(plan.dirs_to_create, cancel, create_dir).await?;

        debug!(stage = "sync_files", state = "processing", "copying files");
        {
            let cancel_for_copy = cancel.clone();
            self.run_phase(plan.sync_pairs, cancel, move |pair| {
                let cancel = cancel_for_copy.clone();
                async move { copy_pair(pair, cancel).await }
            })
            .await?;
        }

        debug!(stage = "synchronized", state = "success", "plan applied");
        Ok(())
    }

    /// Dispatch `items` onto the pool. The cancellation token is checked
    /// before each dispatch; items already dispatched run to completion and
    /// their errors are still collected.
    async fn run_phase<T, F, Fut>(&self, items: Vec<T>, cancel: &CancelToken, op: F) -> Result<()>
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let op = Arc::new(op);
        let mut tasks = JoinSet::new();
        let mut first_err: Option<SyncError> = None;

        for item in items {
            if cancel.is_cancelled() {
                first_err.get_or_insert(SyncError::Cancelled);
                break;
            }

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| SyncError::Invariant("worker semaphore closed".to_string()))?;
            let op = op.clone();
            tasks.spawn(async move {
                let _permit = permit;
                op(item).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    first_err.get_or_insert(e);
                }
                Err(e) => {
                    first_err
                        .get_or_insert(SyncError::Invariant(format!("worker task failed: {e}")));
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Recursive remove; a path that is already gone is not an error.
async fn remove_dir(path: PathBuf) -> Result<()> {
    match fs::remove_dir_all(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Delete one file; a path that is already gone is not an error.
async fn remove_file(path: PathBuf) -> Result<()> {
    match fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Create the full path with parents, then apply the recorded mode.
async fn create_dir(dir: NewDirectory) -> Result<()> {
    fs::create_dir_all(&dir.path).await?;
    set_mode(&dir.path, dir.mode).await
}

/// Copy one pair through a fixed-size buffer. The cancellation check sits
/// before the files are opened; a copy past that point runs to completion
/// so the destination is never left torn.
async fn copy_pair(pair: SyncPair, cancel: CancelToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(SyncError::Cancelled);
    }

    let mut src = fs::OpenOptions::new().read(true).open(&pair.src).await?;

    let mut dst_options = fs::OpenOptions::new();
    dst_options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    dst_options.mode(pair.mode);
    let mut dst = dst_options.open(&pair.dst).await?;

    let mut buf = [0u8; COPY_BUFFER_SIZE];
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n]).await?;
    }
    dst.flush().await?;

    set_mode(&pair.dst, pair.mode).await
}

#[cfg(unix)]
async fn set_mode(path: &std::path::Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_mode(_path: &std::path::Path, _mode: u32) -> Result<()> {
    Ok(())
}
