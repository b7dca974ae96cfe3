//! Lease reaper: returns tasks with expired leases to the pending
//! queue so another worker can pick them up.

use std::sync::Arc;
use std::time::Duration;

use talentforge_core::{
    clock::Clock, LogAction, LogStore, Result, SchedulerLogEntry, TaskStore,
};
use tracing::{error, info};
use uuid::Uuid;

/// Scans for `running` tasks whose lease expired and flips them back
/// to `pending` with the lease cleared. Each reclaimed task gets a
/// fail log row so the crash is visible in the task's history.
pub struct LeaseReaper {
    tasks: Arc<dyn TaskStore>,
    logs: Arc<dyn LogStore>,
    clock: Arc<dyn Clock>,
}

impl LeaseReaper {
    pub fn new(tasks: Arc<dyn TaskStore>, logs: Arc<dyn LogStore>, clock: Arc<dyn Clock>) -> Self {
        Self { tasks, logs, clock }
    }

    /// One reaper pass. Returns how many tasks were reclaimed.
    pub async fn reap(&self) -> Result<usize> {
        let now = self.clock.now();
        let reclaimed = self.tasks.reclaim_expired(now).await?;

        for task in &reclaimed {
            self.logs
                .append(&SchedulerLogEntry {
                    id: Uuid::new_v4(),
                    task_id: task.id,
                    task_type: task.task_type.clone(),
                    action: LogAction::Fail,
                    status: task.status,
                    details: Some("lease expired".to_string()),
                    created_at: now,
                })
                .await?;
        }

        if !reclaimed.is_empty() {
            info!(count = reclaimed.len(), "Reclaimed tasks with expired leases");
        }
        Ok(reclaimed.len())
    }
}

/// Run the reaper until the process exits. Pass errors are logged and
/// the loop keeps ticking.
pub async fn run_reaper_loop(reaper: Arc<LeaseReaper>, tick: Duration) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if let Err(err) = reaper.reap().await {
            error!(error = %err, "Reaper pass failed");
        }
    }
}
