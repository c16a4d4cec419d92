//! Task: check the lock against the descriptor and plan the install.
//!
//! Nothing under the prefix is written until verification has passed.

use super::{SyncCtx, log_task_error, task_start};
use crate::build::types::InstallPlan;
use crate::environment::{InstallReceipts, RuntimeEnvironment};
use crate::lock::{PinnedPackage, verify_locked};
use crate::pipeline::PipelineTask;
use async_trait::async_trait;
use std::collections::BTreeSet;
use stevedore_shared::{StevedoreError, StevedoreResult};

pub struct VerifyLockTask;

#[async_trait]
impl PipelineTask<SyncCtx> for VerifyLockTask {
    async fn run(self: Box<Self>, ctx: SyncCtx) -> StevedoreResult<()> {
        let task_name = self.name();
        let run_id = task_start(&ctx, task_name).await;

        let mut guard = ctx.lock().await;
        let ctx = &mut *guard;
        let inputs = ctx
            .inputs
            .as_ref()
            .ok_or_else(|| StevedoreError::Internal("load_inputs task must run first".into()))?;

        verify_locked(&inputs.descriptor, &inputs.lock)
            .inspect_err(|e| log_task_error(&run_id, task_name, e))?;

        let plan = plan_install(&ctx.env, &ctx.previous, &inputs.lock.packages);
        tracing::info!(
            pending = plan.pending.len(),
            satisfied = plan.satisfied.len(),
            extraneous = plan.extraneous.len(),
            "Lock verified"
        );

        ctx.env
            .prepare()
            .inspect_err(|e| log_task_error(&run_id, task_name, e))?;
        if !plan.pending.is_empty() {
            let staging = ctx.staging_dir().to_path_buf();
            std::fs::create_dir_all(&staging)
                .map_err(|e| StevedoreError::env_write(&staging, e))
                .inspect_err(|e| log_task_error(&run_id, task_name, e))?;
        }

        ctx.plan = Some(plan);
        Ok(())
    }

    fn name(&self) -> &str {
        "verify_lock"
    }
}

/// Split the pins into satisfied and pending, and list installed keys the
/// lock no longer pins.
pub(crate) fn plan_install(
    env: &RuntimeEnvironment,
    receipts: &InstallReceipts,
    pins: &[PinnedPackage],
) -> InstallPlan {
    let mut plan = InstallPlan::default();
    for pin in pins {
        if env.is_satisfied(receipts, pin) {
            tracing::debug!(package = %pin.name, version = %pin.version, "Already installed");
            plan.satisfied.push(pin.clone());
        } else {
            plan.pending.push(pin.clone());
        }
    }

    let pinned: BTreeSet<String> = pins.iter().map(PinnedPackage::key).collect();
    plan.extraneous = receipts
        .iter()
        .filter(|(key, _)| !pinned.contains(*key))
        .map(|(key, _)| key.clone())
        .collect();
    plan
}
