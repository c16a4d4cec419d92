//! Table-driven pipeline used by the build stage.
//!
//! ```text
//! Plan → Stages → Tasks
//!
//! - Plan: ordered list of stages, executed one after another
//! - Stage: tasks plus an execution mode (parallel/sequential)
//! - Task: atomic unit of work sharing a cloned context
//! ```
//!
//! A failing task aborts the plan; stages after it never start.
//!
//! ```ignore
//! let plan = ExecutionPlan::new(vec![
//!     Stage::sequential(vec![Box::new(LoadInputsTask)]),
//!     Stage::parallel(fetch_tasks),
//! ]);
//! let metrics = PipelineExecutor::execute(plan, ctx).await?;
//! ```

mod metrics;
#[allow(clippy::module_inception)]
mod pipeline;
mod stage;
mod task;

pub use metrics::{PipelineMetrics, StageMetrics, TaskMetrics};
pub use pipeline::{ExecutionPlan, PipelineExecutor};
pub use stage::{ExecutionMode, Stage};
pub use task::{BoxedTask, PipelineTask};
