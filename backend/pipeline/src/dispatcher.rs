//! Pipeline dispatcher: enqueues content items, applies the daily cap,
//! and materializes planned items into one-shot scheduled tasks.

use std::sync::Arc;

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use serde_json::json;
use talentforge_core::{
    clock::Clock, NewPipelineItem, NewTask, PipelineItem, PipelineItemStatus, PipelineSettings,
    PipelineStore, Result, TalentError, TaskPayload,
};
use talentforge_scheduler::TaskScheduler;
use tracing::{debug, info};
use uuid::Uuid;

use crate::throttle::plan_dispatch_times;

/// Entity type stored on tasks that back-reference a pipeline item.
pub const PIPELINE_ITEM_ENTITY: &str = "pipeline_item";

/// Task type prefix for dispatch tasks, completed by the pipeline type.
pub fn dispatch_task_type(pipeline_type: &str) -> String {
    format!("pipeline:{pipeline_type}")
}

pub struct PipelineDispatcher {
    items: Arc<dyn PipelineStore>,
    scheduler: Arc<TaskScheduler>,
    clock: Arc<dyn Clock>,
}

impl PipelineDispatcher {
    pub fn new(
        items: Arc<dyn PipelineStore>,
        scheduler: Arc<TaskScheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            items,
            scheduler,
            clock,
        }
    }

    /// Insert a pending item. Enqueueing into a missing or disabled
    /// pipeline is a configuration error, not a silent drop.
    pub async fn enqueue(&self, new: NewPipelineItem) -> Result<Uuid> {
        let settings = self
            .settings_for(&new.pipeline_type, new.platform.as_deref())
            .await?;
        if !settings.enabled {
            return Err(TalentError::Config(format!(
                "pipeline {} is disabled",
                describe(&new.pipeline_type, new.platform.as_deref())
            )));
        }

        let item = PipelineItem {
            id: Uuid::new_v4(),
            pipeline_type: new.pipeline_type,
            platform: new.platform,
            entity_type: new.entity_type,
            entity_id: new.entity_id,
            status: PipelineItemStatus::Pending,
            priority: new.priority,
            scheduled_for: None,
            scheduled_task_id: None,
            content_template: new.content_template,
            content_params: new.content_params,
            posted_at: None,
            result: None,
            error: None,
            created_at: self.clock.now(),
        };
        self.items.insert_item(&item).await?;
        debug!(
            item_id = %item.id,
            pipeline_type = %item.pipeline_type,
            "Pipeline item enqueued"
        );
        Ok(item.id)
    }

    pub async fn settings_for(
        &self,
        pipeline_type: &str,
        platform: Option<&str>,
    ) -> Result<PipelineSettings> {
        self.items
            .get_settings(pipeline_type, platform)
            .await?
            .ok_or_else(|| {
                TalentError::Config(format!(
                    "no settings for pipeline {}",
                    describe(pipeline_type, platform)
                ))
            })
    }

    /// Pending items eligible for dispatch right now, capped by what is
    /// left of today's budget. Empty when the pipeline is disabled or
    /// the cap is already spent.
    pub async fn next_dispatchable(
        &self,
        pipeline_type: &str,
        platform: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PipelineItem>> {
        let settings = self.settings_for(pipeline_type, platform).await?;
        if !settings.enabled {
            return Ok(Vec::new());
        }

        let today = start_of_day(self.clock.now());
        let posted_today = self
            .items
            .posted_count_since(pipeline_type, platform, today)
            .await?;
        let budget = settings.daily_limit.saturating_sub(posted_today) as usize;
        let limit = limit.min(budget);
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.items.pending_items(pipeline_type, platform, limit).await
    }

    /// Materialize one item into a one-shot task firing at `at` and
    /// mark the item scheduled.
    pub async fn schedule(&self, item_id: Uuid, at: DateTime<Utc>) -> Result<Uuid> {
        let mut item = self
            .items
            .get_item(item_id)
            .await?
            .ok_or_else(|| TalentError::NotFound {
                kind: "pipeline item",
                id: item_id.to_string(),
            })?;

        let payload = TaskPayload::new(
            "pipeline_dispatch",
            json!({
                "itemId": item.id,
                "pipelineType": item.pipeline_type,
                "platform": item.platform,
            }),
        );
        let task_id = self
            .scheduler
            .create(
                NewTask::once(dispatch_task_type(&item.pipeline_type), at, payload)
                    .for_entity(PIPELINE_ITEM_ENTITY, item.id.to_string()),
            )
            .await?;

        item.scheduled_task_id = Some(task_id);
        item.scheduled_for = Some(at);
        item.status = PipelineItemStatus::Scheduled;
        self.items.update_item(&item).await?;
        Ok(task_id)
    }

    /// Full throttling pass: pick dispatchable items, plan their slots,
    /// and schedule each. Returns the plan.
    pub async fn dispatch_pending(
        &self,
        pipeline_type: &str,
        platform: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(Uuid, DateTime<Utc>)>> {
        let items = self.next_dispatchable(pipeline_type, platform, limit).await?;
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let settings = self.settings_for(pipeline_type, platform).await?;
        let plan = plan_dispatch_times(&items, &settings, self.clock.now())?;
        for (item_id, at) in &plan {
            self.schedule(*item_id, *at).await?;
        }
        info!(
            pipeline_type,
            platform = platform.unwrap_or("-"),
            count = plan.len(),
            "Dispatch slots assigned"
        );
        Ok(plan)
    }

    /// Executor report-back: the item went out.
    pub async fn mark_posted(&self, item_id: Uuid, result: Option<String>) -> Result<()> {
        let mut item = self.get_required(item_id).await?;
        item.status = PipelineItemStatus::Posted;
        item.posted_at = Some(self.clock.now());
        item.result = result;
        item.error = None;
        self.items.update_item(&item).await
    }

    /// Executor report-back: dispatch failed.
    pub async fn mark_failed(&self, item_id: Uuid, error: String) -> Result<()> {
        let mut item = self.get_required(item_id).await?;
        item.status = PipelineItemStatus::Failed;
        item.error = Some(error);
        self.items.update_item(&item).await
    }

    pub async fn get_item(&self, item_id: Uuid) -> Result<Option<PipelineItem>> {
        self.items.get_item(item_id).await
    }

    async fn get_required(&self, item_id: Uuid) -> Result<PipelineItem> {
        self.items
            .get_item(item_id)
            .await?
            .ok_or_else(|| TalentError::NotFound {
                kind: "pipeline item",
                id: item_id.to_string(),
            })
    }
}

fn describe(pipeline_type: &str, platform: Option<&str>) -> String {
    match platform {
        Some(p) => format!("{pipeline_type}/{p}"),
        None => pipeline_type.to_string(),
    }
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::MIN))
}
