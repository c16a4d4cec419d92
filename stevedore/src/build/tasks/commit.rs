//! Task: record the installed set, then drop what the lock no longer pins.

use super::{SyncCtx, log_task_error, task_start};
use crate::pipeline::PipelineTask;
use async_trait::async_trait;
use std::path::Path;
use stevedore_shared::{StevedoreError, StevedoreResult};

pub struct CommitTask;

#[async_trait]
impl PipelineTask<SyncCtx> for CommitTask {
    async fn run(self: Box<Self>, ctx: SyncCtx) -> StevedoreResult<()> {
        let task_name = self.name();
        let run_id = task_start(&ctx, task_name).await;

        let mut guard = ctx.lock().await;
        let ctx = &mut *guard;
        let digest = ctx
            .inputs
            .as_ref()
            .map(|inputs| inputs.digest.clone())
            .ok_or_else(|| StevedoreError::Internal("load_inputs task must run first".into()))?;
        let extraneous = ctx
            .plan
            .as_ref()
            .map(|plan| plan.extraneous.clone())
            .ok_or_else(|| StevedoreError::Internal("verify_lock task must run first".into()))?;

        let mut receipts = ctx.previous.clone();
        let mut superseded = Vec::new();
        for receipt in &ctx.installed {
            if let Some(old) = receipts.insert(receipt.clone())
                && old.install_dir != receipt.install_dir
            {
                superseded.push(old.install_dir);
            }
        }

        let mut removed = Vec::new();
        if ctx.config.exact {
            for key in extraneous {
                if let Some(old) = receipts.remove(&key) {
                    superseded.push(old.install_dir);
                    removed.push(old.name);
                }
            }
        }
        receipts.inputs_digest = Some(digest);

        ctx.env
            .save_receipts(&receipts)
            .inspect_err(|e| log_task_error(&run_id, task_name, e))?;
        ctx.guard.disarm();

        // Receipts are committed; leftovers below are logged, not fatal.
        let packages_dir = ctx.env.packages_dir();
        for dir in &superseded {
            remove_dir_logged(&packages_dir.join(dir));
        }
        remove_dir_logged(ctx.staging_dir());

        ctx.removed = removed;
        Ok(())
    }

    fn name(&self) -> &str {
        "commit"
    }
}

fn remove_dir_logged(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!("Failed to remove {}: {}", dir.display(), e);
    }
}
