use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use talentforge_core::{
    Clock, LogAction, LogStore, NewTask, Result, ScheduledTask, SchedulerLogEntry, TalentError,
    TaskPatch, TaskStatus, TaskStore,
};

use crate::recurrence::next_occurrence;
use crate::retry::RetryPolicy;

/// Owns the task lifecycle state machine: creation, claiming,
/// completion/failure with re-arming, cancellation, and audit logging.
///
/// `pending → running → {completed, failed} → pending` while recurring
/// and attempts remain; terminal otherwise. One row is reused across a
/// recurring task's whole life.
pub struct TaskScheduler {
    tasks: Arc<dyn TaskStore>,
    logs: Arc<dyn LogStore>,
    clock: Arc<dyn Clock>,
    lease_duration: Duration,
    retry: RetryPolicy,
}

impl TaskScheduler {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        logs: Arc<dyn LogStore>,
        clock: Arc<dyn Clock>,
        lease_duration: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            tasks,
            logs,
            clock,
            lease_duration,
            retry,
        }
    }

    pub async fn create(&self, new: NewTask) -> Result<Uuid> {
        let now = self.clock.now();
        let task = ScheduledTask {
            id: Uuid::new_v4(),
            task_type: new.task_type,
            status: TaskStatus::Pending,
            scheduled_for: new.scheduled_for,
            recurrence: new.recurrence,
            config: new.config,
            entity_type: new.entity_type,
            entity_id: new.entity_id,
            next_run: Some(new.scheduled_for),
            last_run: None,
            attempt_count: 0,
            lease: None,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.tasks.insert_task(&task).await?;
        self.log(&task, LogAction::Start, None).await?;
        info!(
            task_id = %task.id,
            task_type = %task.task_type,
            next_run = %new.scheduled_for,
            "Task created"
        );
        Ok(task.id)
    }

    /// Atomically claim up to `limit` due tasks. Each returned task is
    /// running and carries a fresh lease; completion must present the
    /// lease token.
    pub async fn claim_due(&self, limit: usize) -> Result<Vec<ScheduledTask>> {
        let now = self.clock.now();
        let claimed = self.tasks.claim_due(now, limit, self.lease_duration).await?;
        if !claimed.is_empty() {
            debug!(count = claimed.len(), "Claimed due tasks");
        }
        Ok(claimed)
    }

    pub async fn complete(
        &self,
        id: Uuid,
        token: Uuid,
        result: Option<String>,
    ) -> Result<()> {
        let now = self.clock.now();
        let mut task = self.get_existing(id).await?;
        self.verify_lease(&task, token)?;

        task.result = result.clone();
        task.error = None;
        task.attempt_count = 0;
        task.lease = None;
        task.updated_at = now;

        if task.recurrence.is_recurring() {
            let base = task.last_run.unwrap_or(task.scheduled_for);
            match next_occurrence(&task.recurrence, base, now) {
                Ok(Some(next)) => {
                    task.status = TaskStatus::Pending;
                    task.next_run = Some(next);
                }
                Ok(None) => {
                    task.status = TaskStatus::Completed;
                    task.next_run = None;
                }
                Err(e) => return self.park_on_calc_error(task, e).await,
            }
        } else {
            task.status = TaskStatus::Completed;
            task.next_run = None;
        }

        self.tasks.update_task(&task).await?;
        self.log(&task, LogAction::Complete, result).await?;
        info!(
            task_id = %task.id,
            task_type = %task.task_type,
            status = %task.status,
            "Task completed"
        );
        Ok(())
    }

    pub async fn fail(&self, id: Uuid, token: Uuid, error: String) -> Result<()> {
        let now = self.clock.now();
        let mut task = self.get_existing(id).await?;
        self.verify_lease(&task, token)?;

        task.attempt_count += 1;
        task.error = Some(error.clone());
        task.lease = None;
        task.updated_at = now;

        if !task.recurrence.is_recurring() {
            task.status = TaskStatus::Failed;
            task.next_run = None;
        } else if !self.retry.should_retry(task.attempt_count) {
            task.status = TaskStatus::Failed;
            task.next_run = None;
            warn!(
                task_id = %task.id,
                attempts = task.attempt_count,
                "Retry attempts exhausted, parking task as failed"
            );
        } else {
            // Failure still advances the schedule so one bad run does
            // not stall it; the backoff delay floors the next attempt.
            let base = task.last_run.unwrap_or(task.scheduled_for);
            match next_occurrence(&task.recurrence, base, now) {
                Ok(Some(next)) => {
                    let floor = now + self.retry.delay_for(task.attempt_count);
                    task.status = TaskStatus::Pending;
                    task.next_run = Some(next.max(floor));
                }
                Ok(None) => {
                    task.status = TaskStatus::Failed;
                    task.next_run = None;
                }
                Err(e) => return self.park_on_calc_error(task, e).await,
            }
        }

        self.tasks.update_task(&task).await?;
        self.log(&task, LogAction::Fail, Some(error.clone())).await?;
        warn!(
            task_id = %task.id,
            task_type = %task.task_type,
            status = %task.status,
            error = %error,
            "Task failed"
        );
        Ok(())
    }

    /// Terminal and idempotent: cancelling an already-terminal task is
    /// a no-op, not an error.
    pub async fn cancel(&self, id: Uuid) -> Result<()> {
        let mut task = self.get_existing(id).await?;
        if task.status.is_terminal() {
            return Ok(());
        }
        task.status = TaskStatus::Cancelled;
        task.next_run = None;
        task.lease = None;
        task.updated_at = self.clock.now();
        self.tasks.update_task(&task).await?;
        self.log(&task, LogAction::Cancel, None).await?;
        info!(task_id = %task.id, task_type = %task.task_type, "Task cancelled");
        Ok(())
    }

    /// Generic field patch. Any patch re-logs a `start` row, not just
    /// status changes; callers rely on that audit trail.
    pub async fn update(&self, id: Uuid, patch: TaskPatch) -> Result<ScheduledTask> {
        let mut task = self.get_existing(id).await?;
        if let Some(scheduled_for) = patch.scheduled_for {
            task.scheduled_for = scheduled_for;
        }
        if let Some(recurrence) = patch.recurrence {
            task.recurrence = recurrence;
        }
        if let Some(config) = patch.config {
            task.config = config;
        }
        if let Some(next_run) = patch.next_run {
            task.next_run = next_run;
        }
        task.updated_at = self.clock.now();
        self.tasks.update_task(&task).await?;
        self.log(&task, LogAction::Start, Some("updated".into())).await?;
        Ok(task)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<ScheduledTask>> {
        self.tasks.get_task(id).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        self.tasks.delete_task(id).await
    }

    pub async fn find_by_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<ScheduledTask>> {
        self.tasks.find_task_by_entity(entity_type, entity_id).await
    }

    pub async fn recent_logs(&self, id: Uuid, limit: usize) -> Result<Vec<SchedulerLogEntry>> {
        self.logs.recent_for_task(id, limit).await
    }

    async fn get_existing(&self, id: Uuid) -> Result<ScheduledTask> {
        self.tasks
            .get_task(id)
            .await?
            .ok_or_else(|| TalentError::task_not_found(id))
    }

    fn verify_lease(&self, task: &ScheduledTask, token: Uuid) -> Result<()> {
        let lease = task
            .lease
            .as_ref()
            .ok_or(TalentError::LeaseMismatch { task_id: task.id })?;
        if lease.token != token {
            return Err(TalentError::LeaseMismatch { task_id: task.id });
        }
        if lease.expires_at <= self.clock.now() {
            return Err(TalentError::LeaseExpired { task_id: task.id });
        }
        Ok(())
    }

    /// A broken schedule must not leave the task running or silently
    /// degrade to one-shot behavior: park it as failed and surface the
    /// error to the caller.
    async fn park_on_calc_error(&self, mut task: ScheduledTask, e: TalentError) -> Result<()> {
        task.status = TaskStatus::Failed;
        task.next_run = None;
        task.error = Some(e.to_string());
        self.tasks.update_task(&task).await?;
        self.log(&task, LogAction::Fail, Some(e.to_string())).await?;
        warn!(
            task_id = %task.id,
            error = %e,
            "Recurrence calculation failed, parking task"
        );
        Err(e)
    }

    async fn log(
        &self,
        task: &ScheduledTask,
        action: LogAction,
        details: Option<String>,
    ) -> Result<()> {
        self.logs
            .append(&SchedulerLogEntry {
                id: Uuid::new_v4(),
                task_id: task.id,
                task_type: task.task_type.clone(),
                action,
                status: task.status,
                details,
                created_at: self.clock.now(),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use talentforge_core::{ManualClock, RecurrenceSpec, TaskPayload};
    use talentforge_store::SqliteStore;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap()
    }

    fn fixture(start: DateTime<Utc>, retry: RetryPolicy) -> (TaskScheduler, Arc<ManualClock>) {
        let store = Arc::new(SqliteStore::in_memory().expect("in-memory db"));
        let clock = Arc::new(ManualClock::new(start));
        let scheduler = TaskScheduler::new(
            store.clone(),
            store,
            clock.clone(),
            Duration::minutes(10),
            retry,
        );
        (scheduler, clock)
    }

    fn no_jitter(max_attempts: u32, base_delay_secs: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_secs,
            jitter: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_then_claim_carries_lease() {
        let (scheduler, clock) = fixture(t0(), no_jitter(3, 60));
        let id = scheduler
            .create(NewTask::once("job_post", t0(), TaskPayload::empty("post")))
            .await
            .unwrap();

        clock.advance(Duration::minutes(1));
        let claimed = scheduler.claim_due(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, id);
        assert_eq!(claimed[0].status, TaskStatus::Running);
        assert!(claimed[0].lease.is_some());
    }

    #[tokio::test]
    async fn test_complete_once_is_terminal() {
        let (scheduler, clock) = fixture(t0(), no_jitter(3, 60));
        let id = scheduler
            .create(NewTask::once("job_post", t0(), TaskPayload::empty("post")))
            .await
            .unwrap();
        clock.advance(Duration::minutes(1));
        let token = scheduler.claim_due(1).await.unwrap()[0]
            .lease
            .as_ref()
            .unwrap()
            .token;

        scheduler
            .complete(id, token, Some("posted".into()))
            .await
            .unwrap();
        let task = scheduler.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.next_run, None);
        assert_eq!(task.result.as_deref(), Some("posted"));

        let logs = scheduler.recent_logs(id, 10).await.unwrap();
        let actions: Vec<LogAction> = logs.iter().map(|l| l.action).collect();
        assert_eq!(actions, vec![LogAction::Complete, LogAction::Start]);
    }

    #[tokio::test]
    async fn test_complete_recurring_rearms_from_last_run() {
        let (scheduler, clock) = fixture(t0(), no_jitter(3, 60));
        let id = scheduler
            .create(NewTask::recurring(
                "job_sync",
                t0(),
                RecurrenceSpec::daily(1),
                TaskPayload::empty("sync"),
            ))
            .await
            .unwrap();

        // Claimed five minutes late; re-arm bases on that claim time.
        clock.advance(Duration::minutes(5));
        let token = scheduler.claim_due(1).await.unwrap()[0]
            .lease
            .as_ref()
            .unwrap()
            .token;
        scheduler.complete(id, token, None).await.unwrap();

        let task = scheduler.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(
            task.next_run,
            Some(Utc.with_ymd_and_hms(2025, 1, 2, 9, 5, 0).unwrap())
        );
        assert_eq!(task.attempt_count, 0);
        assert!(task.lease.is_none());
    }

    #[tokio::test]
    async fn test_fail_recurring_applies_backoff_floor() {
        // Backoff of two days dominates the daily recurrence step.
        let (scheduler, clock) = fixture(t0(), no_jitter(5, 2 * 86_400));
        let id = scheduler
            .create(NewTask::recurring(
                "job_sync",
                t0(),
                RecurrenceSpec::daily(1),
                TaskPayload::empty("sync"),
            ))
            .await
            .unwrap();
        clock.advance(Duration::minutes(5));
        let token = scheduler.claim_due(1).await.unwrap()[0]
            .lease
            .as_ref()
            .unwrap()
            .token;
        scheduler.fail(id, token, "portal timeout".into()).await.unwrap();

        let task = scheduler.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempt_count, 1);
        assert_eq!(task.error.as_deref(), Some("portal timeout"));
        assert_eq!(task.next_run, Some(clock.now() + Duration::days(2)));
    }

    #[tokio::test]
    async fn test_fail_exhaustion_parks_task() {
        let (scheduler, clock) = fixture(t0(), no_jitter(1, 60));
        let id = scheduler
            .create(NewTask::recurring(
                "job_sync",
                t0(),
                RecurrenceSpec::daily(1),
                TaskPayload::empty("sync"),
            ))
            .await
            .unwrap();
        clock.advance(Duration::minutes(5));
        let token = scheduler.claim_due(1).await.unwrap()[0]
            .lease
            .as_ref()
            .unwrap()
            .token;
        scheduler.fail(id, token, "boom".into()).await.unwrap();

        let task = scheduler.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.next_run, None);
        assert!(scheduler.claim_due(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_token_is_rejected_state_untouched() {
        let (scheduler, clock) = fixture(t0(), no_jitter(3, 60));
        let id = scheduler
            .create(NewTask::once("job_post", t0(), TaskPayload::empty("post")))
            .await
            .unwrap();
        clock.advance(Duration::minutes(1));
        scheduler.claim_due(1).await.unwrap();

        let err = scheduler
            .complete(id, Uuid::new_v4(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, TalentError::LeaseMismatch { .. }));
        let task = scheduler.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_expired_lease_is_rejected() {
        let (scheduler, clock) = fixture(t0(), no_jitter(3, 60));
        let id = scheduler
            .create(NewTask::once("job_post", t0(), TaskPayload::empty("post")))
            .await
            .unwrap();
        clock.advance(Duration::minutes(1));
        let token = scheduler.claim_due(1).await.unwrap()[0]
            .lease
            .as_ref()
            .unwrap()
            .token;

        clock.advance(Duration::minutes(30));
        let err = scheduler.complete(id, token, None).await.unwrap_err();
        assert!(matches!(err, TalentError::LeaseExpired { .. }));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let (scheduler, _clock) = fixture(t0(), no_jitter(3, 60));
        let id = scheduler
            .create(NewTask::once("job_post", t0(), TaskPayload::empty("post")))
            .await
            .unwrap();
        scheduler.cancel(id).await.unwrap();
        scheduler.cancel(id).await.unwrap();

        let task = scheduler.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(task.next_run, None);

        let logs = scheduler.recent_logs(id, 10).await.unwrap();
        let cancels = logs
            .iter()
            .filter(|l| l.action == LogAction::Cancel)
            .count();
        assert_eq!(cancels, 1);
    }

    #[tokio::test]
    async fn test_update_relogs_start() {
        let (scheduler, _clock) = fixture(t0(), no_jitter(3, 60));
        let id = scheduler
            .create(NewTask::once("job_post", t0(), TaskPayload::empty("post")))
            .await
            .unwrap();

        let patch = TaskPatch {
            scheduled_for: Some(t0() + Duration::hours(2)),
            ..Default::default()
        };
        let updated = scheduler.update(id, patch).await.unwrap();
        assert_eq!(updated.scheduled_for, t0() + Duration::hours(2));

        let logs = scheduler.recent_logs(id, 10).await.unwrap();
        let starts = logs.iter().filter(|l| l.action == LogAction::Start).count();
        assert_eq!(starts, 2);
    }
}
