//! Task: read the lock artifact, the project descriptor and the receipts.

use super::{SyncCtx, log_task_error, task_start};
use crate::build::types::BuildInputs;
use crate::environment::{InstallReceipts, RuntimeEnvironment};
use crate::lock::{LockArtifact, ProjectDescriptor, inputs_digest};
use crate::pipeline::PipelineTask;
use crate::source::ArtifactFetcher;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use stevedore_shared::StevedoreResult;

pub struct LoadInputsTask;

#[async_trait]
impl PipelineTask<SyncCtx> for LoadInputsTask {
    async fn run(self: Box<Self>, ctx: SyncCtx) -> StevedoreResult<()> {
        let task_name = self.name();
        let run_id = task_start(&ctx, task_name).await;

        let (lock_path, descriptor_path, env) = {
            let ctx = ctx.lock().await;
            (
                ctx.config.lock_path.clone(),
                ctx.config.descriptor_path.clone(),
                ctx.env.clone(),
            )
        };

        let (inputs, previous) = load(&lock_path, &descriptor_path, &env)
            .inspect_err(|e| log_task_error(&run_id, task_name, e))?;
        let fetcher = ArtifactFetcher::new(&inputs.lock.base_dir)
            .inspect_err(|e| log_task_error(&run_id, task_name, e))?;

        tracing::info!(
            lock = %lock_path.display(),
            project = %inputs.descriptor.name,
            pins = inputs.lock.packages.len(),
            installed = previous.len(),
            "Loaded build inputs"
        );

        let mut ctx = ctx.lock().await;
        ctx.inputs = Some(inputs);
        ctx.previous = previous;
        ctx.fetcher = Some(Arc::new(fetcher));

        Ok(())
    }

    fn name(&self) -> &str {
        "load_inputs"
    }
}

fn load(
    lock_path: &Path,
    descriptor_path: &Path,
    env: &RuntimeEnvironment,
) -> StevedoreResult<(BuildInputs, InstallReceipts)> {
    let (lock, lock_bytes) = LockArtifact::load(lock_path)?;
    let (descriptor, descriptor_bytes) = ProjectDescriptor::load(descriptor_path)?;
    let digest = inputs_digest(&lock_bytes, &descriptor_bytes);
    let previous = env.load_receipts()?;

    Ok((
        BuildInputs {
            lock,
            descriptor,
            digest,
        },
        previous,
    ))
}
