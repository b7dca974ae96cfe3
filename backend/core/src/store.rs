use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::types::{
    PipelineItem, PipelineSettings, ScheduledTask, SchedulerLogEntry, SyncSettings,
};

/// Persistence interface for scheduled tasks.
///
/// `claim_due` is the correctness-critical operation: it must flip
/// pending rows to running atomically so that two concurrent callers
/// never receive the same task.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert_task(&self, task: &ScheduledTask) -> Result<()>;

    async fn get_task(&self, id: Uuid) -> Result<Option<ScheduledTask>>;

    async fn update_task(&self, task: &ScheduledTask) -> Result<()>;

    async fn delete_task(&self, id: Uuid) -> Result<bool>;

    /// Find the live (non-terminal) task back-referencing an entity.
    async fn find_task_by_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<ScheduledTask>>;

    /// Atomically claim up to `limit` due pending tasks, marking each
    /// running with a fresh lease expiring after `lease_duration`.
    /// Ordered by `next_run` ascending, tie-broken by `id` ascending.
    /// Claiming sets `last_run` to `now`.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease_duration: Duration,
    ) -> Result<Vec<ScheduledTask>>;

    /// Flip running tasks whose lease expired at or before `now` back to
    /// pending, clearing the lease. Returns the reclaimed tasks.
    async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>>;
}

/// Append-only audit log of task lifecycle transitions.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn append(&self, entry: &SchedulerLogEntry) -> Result<()>;

    async fn recent_for_task(
        &self,
        task_id: Uuid,
        limit: usize,
    ) -> Result<Vec<SchedulerLogEntry>>;

    /// Delete entries older than `cutoff`. Returns rows removed.
    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// Persistence for the outbound dispatch pipeline.
#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn insert_item(&self, item: &PipelineItem) -> Result<()>;

    async fn get_item(&self, id: Uuid) -> Result<Option<PipelineItem>>;

    async fn update_item(&self, item: &PipelineItem) -> Result<()>;

    /// Pending items for a pipeline, priority descending then created
    /// ascending.
    async fn pending_items(
        &self,
        pipeline_type: &str,
        platform: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PipelineItem>>;

    /// Count of items posted for a pipeline since `since`.
    async fn posted_count_since(
        &self,
        pipeline_type: &str,
        platform: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<u32>;

    async fn get_settings(
        &self,
        pipeline_type: &str,
        platform: Option<&str>,
    ) -> Result<Option<PipelineSettings>>;

    /// All settings rows, enabled or not.
    async fn list_settings(&self) -> Result<Vec<PipelineSettings>>;

    async fn upsert_settings(&self, settings: &PipelineSettings) -> Result<()>;
}

/// Persistence for sync configuration rows.
#[async_trait]
pub trait SyncStore: Send + Sync {
    async fn upsert_sync_settings(&self, settings: &SyncSettings) -> Result<()>;

    async fn get_sync_settings(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<SyncSettings>>;

    async fn delete_sync_settings(&self, id: Uuid) -> Result<bool>;

    async fn list_enabled_sync_settings(&self) -> Result<Vec<SyncSettings>>;
}
