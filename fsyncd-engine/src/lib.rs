//! Reconciliation engine for fsyncd
//!
//! This crate provides the core that keeps two directory trees in mutual
//! agreement:
//! - Parallel metadata scan of both trees
//! - Plan computation with bidirectional "newer wins" selection and a
//!   size-difference safety gate
//! - Bounded-concurrency plan execution with cooperative cancellation
//! - Daily schedule clock and the single-flight gate serializing runs

pub mod cancel;
pub mod clock;
pub mod errors;
pub mod executor;
pub mod gate;
pub mod plan;
pub mod scanner;

pub use cancel::CancelToken;
pub use clock::{ScheduleClock, WallTime};
pub use errors::{Result, SyncError};
pub use executor::{default_pool_size, Executor, COPY_BUFFER_SIZE};
pub use gate::{SyncGate, SyncGateGuard};
pub use plan::{NewDirectory, PlanBuilder, SyncPair, SyncPlan};
pub use scanner::{scan_pair, DirNode, FileMeta, TreeIndex, ROOT_MASK};

use std::path::Path;

use tracing::info;

/// One full reconciliation: scan both roots in parallel, build the plan,
/// apply it with the default worker pool.
///
/// The caller is responsible for holding the single-flight gate around this
/// call; the engine itself does not serialize runs.
pub async fn reconcile(
    src: &Path,
    dst: &Path,
    max_diff_percent: u8,
    cancel: &CancelToken,
) -> Result<()> {
    info!(
        src = %src.display(),
        dst = %dst.display(),
        "reconciliation started"
    );

    let (src_index, dst_index) = scan_pair(src, dst).await?;
    let plan = PlanBuilder::new(max_diff_percent).build(&src_index, &dst_index)?;
    let actions = plan.action_count();

    Executor::with_default_pool().apply(plan, cancel).await?;

    info!(actions, "reconciliation finished");
    Ok(())
}
