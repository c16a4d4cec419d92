//! Sync pipeline tasks.

mod bundle;
mod commit;
mod fetch;
mod load_inputs;
mod verify_lock;

pub use bundle::CopyBundleTask;
pub use commit::CommitTask;
pub use fetch::FetchPackageTask;
pub use load_inputs::LoadInputsTask;
pub use verify_lock::VerifyLockTask;

pub use super::types::SyncCtx;

use stevedore_shared::StevedoreError;
use ulid::Ulid;

/// Log task start and return the run id for later log lines.
async fn task_start(ctx: &SyncCtx, task_name: &str) -> Ulid {
    let run_id = ctx.lock().await.run_id;
    tracing::debug!(run = %run_id, task = task_name, "Task starting");
    run_id
}

fn log_task_error(run_id: &Ulid, task_name: &str, error: &StevedoreError) {
    tracing::error!(run = %run_id, task = task_name, error = %error, "Task failed");
}
