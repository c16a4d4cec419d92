//! Build stage: install lock-pinned dependencies, then copy the bundle.
//!
//! ## Architecture
//!
//! ```text
//! Resolve (writes nothing):
//!   1. LoadInputs            (lock, descriptor, receipts)
//!   2. VerifyLock            (locked-mode check, install plan)
//!
//! Install:
//!   3. Fetch ─┬─ ... ─┬─     (one task per pending pin, bounded)
//!   4. Commit               (receipts, prune, drop staging)
//!   5. CopyBundle           (build only)
//! ```
//!
//! A [`CleanupGuard`](types::CleanupGuard) rolls back whatever a failed run
//! wrote; it is disarmed once the receipts are committed.

pub mod config;
mod tasks;
mod types;

pub use config::{
    BundleConfig, DEFAULT_CONCURRENCY, DEFAULT_DESCRIPTOR_FILE, DEFAULT_ENVIRONMENT_DIR,
    DEFAULT_LOCK_FILE, SyncConfig,
};
pub use types::{InstallPlan, PackageSummary, SyncReport};

use crate::lock::PinnedPackage;
use crate::pipeline::{BoxedTask, ExecutionPlan, PipelineExecutor, Stage};
use std::sync::Arc;
use stevedore_shared::{StevedoreError, StevedoreResult};
use tasks::{CommitTask, CopyBundleTask, FetchPackageTask, LoadInputsTask, SyncCtx, VerifyLockTask};
use tokio::sync::Mutex;
use types::SyncContext;

fn resolve_plan() -> ExecutionPlan<SyncCtx> {
    ExecutionPlan::new(vec![
        Stage::sequential(vec![Box::new(LoadInputsTask) as BoxedTask<SyncCtx>]),
        Stage::sequential(vec![Box::new(VerifyLockTask) as BoxedTask<SyncCtx>]),
    ])
}

fn install_plan(pending: Vec<PinnedPackage>, bundle: Option<BundleConfig>) -> ExecutionPlan<SyncCtx> {
    let fetches = pending
        .into_iter()
        .map(|pin| Box::new(FetchPackageTask::new(pin)) as BoxedTask<SyncCtx>)
        .collect();

    let mut stages = vec![
        Stage::parallel(fetches),
        Stage::sequential(vec![Box::new(CommitTask) as BoxedTask<SyncCtx>]),
    ];
    if let Some(bundle) = bundle {
        stages.push(Stage::sequential(vec![
            Box::new(CopyBundleTask::new(bundle)) as BoxedTask<SyncCtx>
        ]));
    }
    ExecutionPlan::new(stages)
}

/// Runs `sync-locked` and `build` against one [`SyncConfig`].
///
/// ```ignore
/// let stage = BuildStage::new(SyncConfig::for_project("."))?;
/// let report = stage.sync_locked().await?;
/// ```
pub struct BuildStage {
    config: SyncConfig,
}

impl BuildStage {
    pub fn new(config: SyncConfig) -> StevedoreResult<Self> {
        config.sanitize()?;
        Ok(Self { config })
    }

    /// Install exactly the lock-pinned versions into the environment prefix.
    ///
    /// Fails with `LockMismatch` before writing anything when the lock does
    /// not satisfy the descriptor, and with `DependencyUnavailable` when a
    /// pinned artifact cannot be fetched.
    pub async fn sync_locked(&self) -> StevedoreResult<SyncReport> {
        self.run(None).await
    }

    /// `sync_locked`, then copy the application bundle.
    ///
    /// The bundle destination is only touched after the sync committed.
    pub async fn build(&self, bundle: BundleConfig) -> StevedoreResult<SyncReport> {
        bundle.sanitize()?;
        self.run(Some(bundle)).await
    }

    async fn run(&self, bundle: Option<BundleConfig>) -> StevedoreResult<SyncReport> {
        let ctx = SyncContext::new(self.config.clone());
        let run_id = ctx.run_id;
        let ctx: SyncCtx = Arc::new(Mutex::new(ctx));
        tracing::info!(
            run = %run_id,
            environment = %self.config.environment.display(),
            exact = self.config.exact,
            "Sync starting"
        );

        let mut metrics = PipelineExecutor::execute(resolve_plan(), Arc::clone(&ctx)).await?;

        let pending = {
            let ctx = ctx.lock().await;
            ctx.plan
                .as_ref()
                .map(|plan| plan.pending.clone())
                .ok_or_else(|| StevedoreError::Internal("verify_lock task must run first".into()))?
        };
        metrics.extend(PipelineExecutor::execute(install_plan(pending, bundle), Arc::clone(&ctx)).await?);

        let ctx = ctx.lock().await;
        let inputs = ctx
            .inputs
            .as_ref()
            .ok_or_else(|| StevedoreError::Internal("load_inputs task must run first".into()))?;
        let skipped = ctx
            .plan
            .as_ref()
            .map(|plan| plan.satisfied.iter().map(PackageSummary::from).collect())
            .unwrap_or_default();

        let report = SyncReport {
            environment: ctx.env.prefix().to_path_buf(),
            inputs_digest: inputs.digest.clone(),
            installed: ctx.installed.iter().map(PackageSummary::from).collect(),
            skipped,
            removed: ctx.removed.clone(),
            metrics,
        };
        report.log();
        Ok(report)
    }
}
