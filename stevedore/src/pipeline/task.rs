use async_trait::async_trait;
use stevedore_shared::StevedoreResult;

/// A unit of work in a pipeline stage.
///
/// Tasks consume themselves; the context is cloned per task, so shared state
/// needs interior mutability.
#[async_trait]
pub trait PipelineTask<Ctx>: Send + Sync {
    async fn run(self: Box<Self>, ctx: Ctx) -> StevedoreResult<()>;

    /// Stable name used in logs and metrics.
    fn name(&self) -> &str;
}

pub type BoxedTask<Ctx> = Box<dyn PipelineTask<Ctx>>;
