//! Task execution: the `TaskExecutor` trait, the executor registry,
//! and the claim-execute-report worker loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use talentforge_core::{Result, ScheduledTask, TalentError};
use tracing::{debug, error, warn};

use crate::scheduler::TaskScheduler;

/// Outcome of a single execution attempt.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Completed { result: Option<String> },
    Failed { error: String },
}

/// Executes one kind of task. Implementations are registered by
/// `task_type` and invoked by the worker loop with a claimed task.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &ScheduledTask) -> ExecutionOutcome;
}

/// Maps `task_type` strings to executors.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn TaskExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task_type: impl Into<String>, executor: Arc<dyn TaskExecutor>) {
        self.executors.insert(task_type.into(), executor);
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.get(task_type).cloned()
    }
}

/// One worker pass: claim due tasks, execute each, report the outcome.
///
/// Every claimed task reaches a report call. Tasks with no registered
/// executor are failed with an unknown-type error so they enter the
/// normal retry path instead of sitting in `running` until the reaper
/// reclaims them.
pub async fn run_once(
    scheduler: &TaskScheduler,
    registry: &ExecutorRegistry,
    claim_limit: usize,
) -> Result<usize> {
    let claimed = scheduler.claim_due(claim_limit).await?;
    let count = claimed.len();

    for task in claimed {
        let Some(lease) = task.lease.clone() else {
            warn!(task_id = %task.id, "Claimed task missing lease, skipping");
            continue;
        };
        let token = lease.token;

        let Some(executor) = registry.get(&task.task_type) else {
            let err = TalentError::UnknownTaskType(task.task_type.clone());
            scheduler.fail(task.id, token, err.to_string()).await?;
            continue;
        };

        debug!(task_id = %task.id, task_type = %task.task_type, "Executing task");
        match executor.execute(&task).await {
            ExecutionOutcome::Completed { result } => {
                scheduler.complete(task.id, token, result).await?;
            }
            ExecutionOutcome::Failed { error } => {
                scheduler.fail(task.id, token, error).await?;
            }
        }
    }

    Ok(count)
}

/// Run the worker loop until the process exits. Errors in a pass are
/// logged and the loop keeps ticking.
pub async fn run_worker_loop(
    scheduler: Arc<TaskScheduler>,
    registry: Arc<ExecutorRegistry>,
    tick: Duration,
    claim_limit: usize,
) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if let Err(err) = run_once(&scheduler, &registry, claim_limit).await {
            error!(error = %err, "Worker pass failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::sync::Mutex;
    use talentforge_core::{
        Clock, LogAction, ManualClock, NewTask, RecurrenceSpec, TaskPayload, TaskStatus,
    };
    use talentforge_store::SqliteStore;

    use crate::retry::RetryPolicy;

    struct RecordingExecutor {
        outcome: ExecutionOutcome,
        seen: Mutex<Vec<String>>,
    }

    impl RecordingExecutor {
        fn completing() -> Self {
            Self {
                outcome: ExecutionOutcome::Completed {
                    result: Some("done".into()),
                },
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing(error: &str) -> Self {
            Self {
                outcome: ExecutionOutcome::Failed {
                    error: error.into(),
                },
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TaskExecutor for RecordingExecutor {
        async fn execute(&self, task: &ScheduledTask) -> ExecutionOutcome {
            self.seen.lock().unwrap().push(task.task_type.clone());
            self.outcome.clone()
        }
    }

    async fn fixture() -> (TaskScheduler, Arc<ManualClock>) {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let scheduler = TaskScheduler::new(
            store.clone(),
            store,
            clock.clone(),
            ChronoDuration::minutes(10),
            RetryPolicy {
                jitter: false,
                ..Default::default()
            },
        );
        (scheduler, clock)
    }

    #[tokio::test]
    async fn run_once_completes_claimed_task() {
        let (scheduler, clock) = fixture().await;
        let executor = Arc::new(RecordingExecutor::completing());
        let mut registry = ExecutorRegistry::new();
        registry.register("report", executor.clone());

        let id = scheduler
            .create(NewTask::once("report", clock.now(), TaskPayload::empty("report")))
            .await
            .unwrap();

        let count = run_once(&scheduler, &registry, 10).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(executor.seen.lock().unwrap().as_slice(), ["report"]);

        let task = scheduler.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn unknown_task_type_enters_retry_path() {
        let (scheduler, clock) = fixture().await;
        let registry = ExecutorRegistry::new();

        let id = scheduler
            .create(NewTask::once(
                "no_such_type",
                clock.now(),
                TaskPayload::empty("noop"),
            ))
            .await
            .unwrap();

        run_once(&scheduler, &registry, 10).await.unwrap();

        let task = scheduler.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.as_deref().unwrap().contains("no_such_type"));

        let logs = scheduler.recent_logs(id, 10).await.unwrap();
        assert!(logs.iter().any(|l| l.action == LogAction::Fail));
    }

    #[tokio::test]
    async fn recurring_task_rearms_after_pass() {
        let (scheduler, clock) = fixture().await;
        let executor = Arc::new(RecordingExecutor::completing());
        let mut registry = ExecutorRegistry::new();
        registry.register("sync", executor);

        let id = scheduler
            .create(NewTask::recurring(
                "sync",
                clock.now(),
                RecurrenceSpec::daily(1),
                TaskPayload::empty("sync"),
            ))
            .await
            .unwrap();

        run_once(&scheduler, &registry, 10).await.unwrap();

        let task = scheduler.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        let next = task.next_run.unwrap();
        assert_eq!(next, clock.now() + ChronoDuration::days(1));
    }

    #[tokio::test]
    async fn failing_executor_reports_failure() {
        let (scheduler, clock) = fixture().await;
        let executor = Arc::new(RecordingExecutor::failing("upstream 503"));
        let mut registry = ExecutorRegistry::new();
        registry.register("dispatch", executor);

        let id = scheduler
            .create(NewTask::recurring(
                "dispatch",
                clock.now(),
                RecurrenceSpec::hourly(1),
                TaskPayload::empty("dispatch"),
            ))
            .await
            .unwrap();

        run_once(&scheduler, &registry, 10).await.unwrap();

        let task = scheduler.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempt_count, 1);
        assert_eq!(task.error.as_deref(), Some("upstream 503"));
    }
}
