use super::metrics::{PipelineMetrics, StageMetrics, TaskMetrics};
use super::stage::{ExecutionMode, Stage};
use super::task::BoxedTask;
use futures::future::join_all;
use std::time::Instant;
use stevedore_shared::StevedoreResult;

pub struct ExecutionPlan<Ctx> {
    stages: Vec<Stage<BoxedTask<Ctx>>>,
}

impl<Ctx> ExecutionPlan<Ctx> {
    /// Build a plan; empty stages are dropped.
    pub fn new(stages: Vec<Stage<BoxedTask<Ctx>>>) -> Self {
        Self {
            stages: stages.into_iter().filter(|s| !s.is_empty()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

pub struct PipelineExecutor;

impl PipelineExecutor {
    /// Run every stage of `plan` in order against `ctx`.
    ///
    /// Returns timing for each task that completed. The first task error stops
    /// the plan and is returned as-is.
    pub async fn execute<Ctx>(plan: ExecutionPlan<Ctx>, ctx: Ctx) -> StevedoreResult<PipelineMetrics>
    where
        Ctx: Clone,
    {
        let total_start = Instant::now();
        let mut stage_metrics = Vec::with_capacity(plan.stages.len());

        for (index, stage) in plan.stages.into_iter().enumerate() {
            let execution = stage.execution;
            let stage_start = Instant::now();
            tracing::debug!(stage = index, mode = ?execution, tasks = stage.tasks.len(), "Stage starting");

            let tasks = match execution {
                ExecutionMode::Parallel => {
                    let futures = stage.tasks.into_iter().map(|task| {
                        let ctx = ctx.clone();
                        async move { run_timed(task, ctx).await }
                    });
                    // Siblings run to completion so none is cancelled mid-write.
                    join_all(futures)
                        .await
                        .into_iter()
                        .collect::<StevedoreResult<Vec<_>>>()?
                }
                ExecutionMode::Sequential => {
                    let mut tasks = Vec::new();
                    for task in stage.tasks {
                        tasks.push(run_timed(task, ctx.clone()).await?);
                    }
                    tasks
                }
            };

            stage_metrics.push(StageMetrics {
                index,
                execution,
                duration_ms: stage_start.elapsed().as_millis(),
                tasks,
            });
        }

        Ok(PipelineMetrics {
            total_duration_ms: total_start.elapsed().as_millis(),
            stages: stage_metrics,
        })
    }
}

async fn run_timed<Ctx>(task: BoxedTask<Ctx>, ctx: Ctx) -> StevedoreResult<TaskMetrics> {
    let name = task.name().to_string();
    let start = Instant::now();
    task.run(ctx).await?;
    let duration_ms = start.elapsed().as_millis();
    tracing::debug!(task = %name, duration_ms = duration_ms as u64, "Task finished");
    Ok(TaskMetrics { name, duration_ms })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineTask;
    use async_trait::async_trait;
    use std::sync::Arc;
    use stevedore_shared::StevedoreError;
    use tokio::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Record(&'static str);

    #[async_trait]
    impl PipelineTask<Log> for Record {
        async fn run(self: Box<Self>, ctx: Log) -> StevedoreResult<()> {
            ctx.lock().await.push(self.0.to_string());
            Ok(())
        }

        fn name(&self) -> &str {
            self.0
        }
    }

    struct Fail;

    #[async_trait]
    impl PipelineTask<Log> for Fail {
        async fn run(self: Box<Self>, _ctx: Log) -> StevedoreResult<()> {
            Err(StevedoreError::Internal("boom".into()))
        }

        fn name(&self) -> &str {
            "fail"
        }
    }

    #[tokio::test]
    async fn test_stages_run_in_order() {
        let log: Log = Arc::default();
        let plan = ExecutionPlan::new(vec![
            Stage::sequential(vec![Box::new(Record("a")) as BoxedTask<Log>]),
            Stage::parallel(vec![
                Box::new(Record("b")) as BoxedTask<Log>,
                Box::new(Record("c")) as BoxedTask<Log>,
            ]),
            Stage::sequential(vec![Box::new(Record("d")) as BoxedTask<Log>]),
        ]);

        let metrics = PipelineExecutor::execute(plan, Arc::clone(&log)).await.unwrap();

        let seen = log.lock().await.clone();
        assert_eq!(seen.first().map(String::as_str), Some("a"));
        assert_eq!(seen.last().map(String::as_str), Some("d"));
        assert_eq!(seen.len(), 4);
        assert_eq!(metrics.stages.len(), 3);
        assert!(metrics.task_duration_ms("c").is_some());
    }

    #[tokio::test]
    async fn test_failure_stops_later_stages() {
        let log: Log = Arc::default();
        let plan = ExecutionPlan::new(vec![
            Stage::sequential(vec![Box::new(Fail) as BoxedTask<Log>]),
            Stage::sequential(vec![Box::new(Record("never")) as BoxedTask<Log>]),
        ]);

        let result = PipelineExecutor::execute(plan, Arc::clone(&log)).await;
        assert!(matches!(result, Err(StevedoreError::Internal(_))));
        assert!(log.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_parallel_failure_lets_siblings_finish() {
        let log: Log = Arc::default();
        let plan = ExecutionPlan::new(vec![Stage::parallel(vec![
            Box::new(Fail) as BoxedTask<Log>,
            Box::new(Record("sibling")) as BoxedTask<Log>,
        ])]);

        let result = PipelineExecutor::execute(plan, Arc::clone(&log)).await;
        assert!(result.is_err());
        assert_eq!(log.lock().await.as_slice(), ["sibling".to_string()]);
    }

    #[test]
    fn test_empty_stages_are_dropped() {
        let plan: ExecutionPlan<Log> = ExecutionPlan::new(vec![Stage::parallel(Vec::new())]);
        assert!(plan.is_empty());
    }
}
