//! Sync coordination: every enabled sync configuration owns exactly
//! one live scheduled task, matched by entity back-reference.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use talentforge_core::{
    clock::Clock, NewTask, Result, SyncSettings, SyncStore, TalentError, TaskPatch, TaskPayload,
    SYNC_SETTINGS_ENTITY,
};
use talentforge_scheduler::{next_occurrence, TaskScheduler};
use tracing::{debug, info};
use uuid::Uuid;

/// Task type for sync tasks, qualified by the synced entity type.
pub fn sync_task_type(entity_type: &str) -> String {
    format!("sync:{entity_type}")
}

pub struct SyncCoordinator {
    settings: Arc<dyn SyncStore>,
    scheduler: Arc<TaskScheduler>,
    clock: Arc<dyn Clock>,
}

impl SyncCoordinator {
    pub fn new(
        settings: Arc<dyn SyncStore>,
        scheduler: Arc<TaskScheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            scheduler,
            clock,
        }
    }

    /// Upsert a sync configuration and reconcile its linked task:
    /// enabled rows get a recurring task armed at the computed
    /// `next_sync`, disabled rows lose theirs.
    pub async fn save(&self, mut settings: SyncSettings) -> Result<SyncSettings> {
        let now = self.clock.now();
        settings.updated_at = now;

        if settings.enabled {
            let base = settings.last_sync.unwrap_or(now);
            let next = self.compute_next(&settings, base, now)?;
            settings.next_sync = Some(next);
            self.settings.upsert_sync_settings(&settings).await?;
            self.arm_task(&settings, next).await?;
        } else {
            settings.next_sync = None;
            self.settings.upsert_sync_settings(&settings).await?;
            self.remove_task(&settings).await?;
        }
        Ok(settings)
    }

    /// Record a completed sync and re-arm the schedule from the actual
    /// sync time.
    pub async fn update_last_sync(
        &self,
        entity_type: &str,
        entity_id: &str,
        at: DateTime<Utc>,
    ) -> Result<SyncSettings> {
        let mut settings = self.get_required(entity_type, entity_id).await?;
        let now = self.clock.now();
        settings.last_sync = Some(at);
        settings.updated_at = now;

        if settings.enabled {
            let next = self.compute_next(&settings, at, now)?;
            settings.next_sync = Some(next);
            self.settings.upsert_sync_settings(&settings).await?;
            self.arm_task(&settings, next).await?;
        } else {
            self.settings.upsert_sync_settings(&settings).await?;
        }
        Ok(settings)
    }

    pub async fn disable(&self, entity_type: &str, entity_id: &str) -> Result<SyncSettings> {
        let mut settings = self.get_required(entity_type, entity_id).await?;
        settings.enabled = false;
        self.save(settings).await
    }

    pub async fn get(&self, entity_type: &str, entity_id: &str) -> Result<Option<SyncSettings>> {
        self.settings.get_sync_settings(entity_type, entity_id).await
    }

    fn compute_next(
        &self,
        settings: &SyncSettings,
        base: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        next_occurrence(&settings.recurrence, base, now)?.ok_or_else(|| {
            TalentError::Config(format!(
                "sync settings for {}/{} need a recurring interval",
                settings.entity_type, settings.entity_id
            ))
        })
    }

    /// Create or update the linked task so exactly one live task backs
    /// this configuration.
    async fn arm_task(&self, settings: &SyncSettings, next: DateTime<Utc>) -> Result<Uuid> {
        let settings_id = settings.id.to_string();
        match self
            .scheduler
            .find_by_entity(SYNC_SETTINGS_ENTITY, &settings_id)
            .await?
        {
            Some(task) => {
                let patch = TaskPatch {
                    scheduled_for: Some(next),
                    recurrence: Some(settings.recurrence.clone()),
                    next_run: Some(Some(next)),
                    ..Default::default()
                };
                self.scheduler.update(task.id, patch).await?;
                debug!(task_id = %task.id, next_sync = %next, "Sync task re-armed");
                Ok(task.id)
            }
            None => {
                let payload = TaskPayload::new(
                    "entity_sync",
                    json!({
                        "entityType": settings.entity_type,
                        "entityId": settings.entity_id,
                    }),
                );
                let task_id = self
                    .scheduler
                    .create(
                        NewTask::recurring(
                            sync_task_type(&settings.entity_type),
                            next,
                            settings.recurrence.clone(),
                            payload,
                        )
                        .for_entity(SYNC_SETTINGS_ENTITY, settings_id),
                    )
                    .await?;
                info!(
                    task_id = %task_id,
                    entity_type = %settings.entity_type,
                    entity_id = %settings.entity_id,
                    "Sync task created"
                );
                Ok(task_id)
            }
        }
    }

    async fn remove_task(&self, settings: &SyncSettings) -> Result<()> {
        let settings_id = settings.id.to_string();
        if let Some(task) = self
            .scheduler
            .find_by_entity(SYNC_SETTINGS_ENTITY, &settings_id)
            .await?
        {
            self.scheduler.delete(task.id).await?;
            info!(
                task_id = %task.id,
                entity_type = %settings.entity_type,
                entity_id = %settings.entity_id,
                "Sync task removed"
            );
        }
        Ok(())
    }

    async fn get_required(&self, entity_type: &str, entity_id: &str) -> Result<SyncSettings> {
        self.get(entity_type, entity_id)
            .await?
            .ok_or_else(|| TalentError::NotFound {
                kind: "sync settings",
                id: format!("{entity_type}/{entity_id}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use talentforge_core::{ManualClock, RecurrenceSpec};
    use talentforge_scheduler::RetryPolicy;
    use talentforge_store::SqliteStore;

    async fn fixture() -> (SyncCoordinator, Arc<TaskScheduler>, Arc<ManualClock>) {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let scheduler = Arc::new(TaskScheduler::new(
            store.clone(),
            store.clone(),
            clock.clone(),
            Duration::minutes(10),
            RetryPolicy::default(),
        ));
        let coordinator = SyncCoordinator::new(store, scheduler.clone(), clock.clone());
        (coordinator, scheduler, clock)
    }

    fn settings(clock: &ManualClock, enabled: bool, recurrence: RecurrenceSpec) -> SyncSettings {
        SyncSettings {
            id: Uuid::new_v4(),
            entity_type: "job_board".to_string(),
            entity_id: "board-9".to_string(),
            enabled,
            recurrence,
            last_sync: None,
            next_sync: None,
            created_at: clock.now(),
            updated_at: clock.now(),
        }
    }

    #[tokio::test]
    async fn save_enabled_creates_exactly_one_task() {
        let (coordinator, scheduler, clock) = fixture().await;
        let saved = coordinator
            .save(settings(&clock, true, RecurrenceSpec::hourly(6)))
            .await
            .unwrap();

        let expected = clock.now() + Duration::hours(6);
        assert_eq!(saved.next_sync, Some(expected));

        let task = scheduler
            .find_by_entity(SYNC_SETTINGS_ENTITY, &saved.id.to_string())
            .await
            .unwrap()
            .expect("linked task exists");
        assert_eq!(task.next_run, Some(expected));
        assert_eq!(task.task_type, "sync:job_board");

        // Saving again must update the same task, not add a second:
        // deleting the survivor leaves nothing behind.
        coordinator.save(saved.clone()).await.unwrap();
        let task = scheduler
            .find_by_entity(SYNC_SETTINGS_ENTITY, &saved.id.to_string())
            .await
            .unwrap()
            .unwrap();
        scheduler.delete(task.id).await.unwrap();
        assert!(scheduler
            .find_by_entity(SYNC_SETTINGS_ENTITY, &saved.id.to_string())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn disable_removes_task_and_clears_next_sync() {
        let (coordinator, scheduler, clock) = fixture().await;
        let saved = coordinator
            .save(settings(&clock, true, RecurrenceSpec::daily(1)))
            .await
            .unwrap();

        let disabled = coordinator.disable("job_board", "board-9").await.unwrap();
        assert!(!disabled.enabled);
        assert_eq!(disabled.next_sync, None);
        assert!(scheduler
            .find_by_entity(SYNC_SETTINGS_ENTITY, &saved.id.to_string())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn update_last_sync_rearms_from_sync_time() {
        let (coordinator, scheduler, clock) = fixture().await;
        let saved = coordinator
            .save(settings(&clock, true, RecurrenceSpec::daily(1)))
            .await
            .unwrap();

        clock.advance(Duration::hours(25));
        let synced_at = clock.now() - Duration::minutes(5);
        let updated = coordinator
            .update_last_sync("job_board", "board-9", synced_at)
            .await
            .unwrap();

        let expected = synced_at + Duration::days(1);
        assert_eq!(updated.last_sync, Some(synced_at));
        assert_eq!(updated.next_sync, Some(expected));

        let task = scheduler
            .find_by_entity(SYNC_SETTINGS_ENTITY, &saved.id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.next_run, Some(expected));
    }

    #[tokio::test]
    async fn non_recurring_interval_is_config_error() {
        let (coordinator, _, clock) = fixture().await;
        let err = coordinator
            .save(settings(&clock, true, RecurrenceSpec::once()))
            .await
            .unwrap_err();
        assert!(matches!(err, TalentError::Config(_)));
    }
}
