use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A unit of deferred work. One row per logical task; recurring tasks
/// reuse the same row across fires by advancing `next_run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: Uuid,
    /// Tag identifying which external executor handles this task.
    pub task_type: String,
    pub status: TaskStatus,
    /// The originally intended first run.
    pub scheduled_for: DateTime<Utc>,
    pub recurrence: RecurrenceSpec,
    /// Opaque payload interpreted only by the executor.
    pub config: TaskPayload,
    /// Optional back-reference to the domain entity this task concerns.
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    /// When the task should fire next. Cleared once terminal.
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    /// Consecutive failures since the last success.
    pub attempt_count: u32,
    /// Present only while a worker holds the task.
    pub lease: Option<Lease>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states are never claimed or rescheduled.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a task repeats after completion or failure.
///
/// `schedule` carries the calendar constraints. For `Custom` it drives
/// the whole walk; for the simple interval kinds only its
/// `exclude_dates` apply (an interval landing on an excluded day slides
/// forward one day at a time).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecurrenceSpec {
    pub interval: IntervalKind,
    #[serde(default = "default_every")]
    pub every: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<CustomSchedule>,
}

fn default_every() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntervalKind {
    Once,
    Hourly,
    Daily,
    Weekly,
    /// Approximated as 30-day strides, not calendar months.
    Monthly,
    Custom,
}

impl RecurrenceSpec {
    pub fn once() -> Self {
        Self {
            interval: IntervalKind::Once,
            every: 1,
            schedule: None,
        }
    }

    pub fn hourly(every: u32) -> Self {
        Self {
            interval: IntervalKind::Hourly,
            every,
            schedule: None,
        }
    }

    pub fn daily(every: u32) -> Self {
        Self {
            interval: IntervalKind::Daily,
            every,
            schedule: None,
        }
    }

    pub fn weekly(every: u32) -> Self {
        Self {
            interval: IntervalKind::Weekly,
            every,
            schedule: None,
        }
    }

    pub fn monthly(every: u32) -> Self {
        Self {
            interval: IntervalKind::Monthly,
            every,
            schedule: None,
        }
    }

    pub fn custom(schedule: CustomSchedule) -> Self {
        Self {
            interval: IntervalKind::Custom,
            every: 1,
            schedule: Some(schedule),
        }
    }

    pub fn with_schedule(mut self, schedule: CustomSchedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn is_recurring(&self) -> bool {
        self.interval != IntervalKind::Once
    }
}

/// Calendar constraints for `RecurrenceSpec::Custom`.
///
/// Empty `hours`/`days` mean "any hour"/"any day". A future entry in
/// `specific_dates` overrides the hour/day walk entirely (earliest wins).
/// `exclude_dates` compares calendar days and always applies.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CustomSchedule {
    /// Allowed hours of day, 0-23.
    #[serde(default)]
    pub hours: Vec<u32>,
    /// Allowed days of week, 0 = Sunday through 6 = Saturday.
    #[serde(default)]
    pub days: Vec<u32>,
    #[serde(default)]
    pub specific_dates: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub exclude_dates: Vec<NaiveDate>,
}

/// Time-bounded claim on a task held by the worker executing it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lease {
    pub token: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Opaque executor payload, type-tagged and versioned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskPayload {
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    pub schema_version: u32,
}

impl TaskPayload {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            schema_version: 1,
        }
    }

    pub fn empty(kind: impl Into<String>) -> Self {
        Self::new(kind, Value::Null)
    }
}

/// Parameters for creating a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_type: String,
    pub scheduled_for: DateTime<Utc>,
    pub recurrence: RecurrenceSpec,
    pub config: TaskPayload,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
}

impl NewTask {
    pub fn once(
        task_type: impl Into<String>,
        scheduled_for: DateTime<Utc>,
        config: TaskPayload,
    ) -> Self {
        Self {
            task_type: task_type.into(),
            scheduled_for,
            recurrence: RecurrenceSpec::once(),
            config,
            entity_type: None,
            entity_id: None,
        }
    }

    pub fn recurring(
        task_type: impl Into<String>,
        scheduled_for: DateTime<Utc>,
        recurrence: RecurrenceSpec,
        config: TaskPayload,
    ) -> Self {
        Self {
            task_type: task_type.into(),
            scheduled_for,
            recurrence,
            config,
            entity_type: None,
            entity_id: None,
        }
    }

    pub fn for_entity(
        mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }
}

/// Partial update applied through `TaskScheduler::update`.
///
/// `next_run` is doubly optional: `None` leaves the column alone,
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub scheduled_for: Option<DateTime<Utc>>,
    pub recurrence: Option<RecurrenceSpec>,
    pub config: Option<TaskPayload>,
    pub next_run: Option<Option<DateTime<Utc>>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.scheduled_for.is_none()
            && self.recurrence.is_none()
            && self.config.is_none()
            && self.next_run.is_none()
    }
}

/// Append-only audit record of a task lifecycle transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerLogEntry {
    pub id: Uuid,
    pub task_id: Uuid,
    pub task_type: String,
    pub action: LogAction,
    pub status: TaskStatus,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    Start,
    Complete,
    Fail,
    Cancel,
}

impl LogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogAction::Start => "start",
            LogAction::Complete => "complete",
            LogAction::Fail => "fail",
            LogAction::Cancel => "cancel",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "start" => Some(LogAction::Start),
            "complete" => Some(LogAction::Complete),
            "fail" => Some(LogAction::Fail),
            "cancel" => Some(LogAction::Cancel),
            _ => None,
        }
    }
}

/// A unit of content awaiting a throttled dispatch slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineItem {
    pub id: Uuid,
    pub pipeline_type: String,
    /// Destination, absent for multi-target pipelines.
    pub platform: Option<String>,
    pub entity_type: String,
    pub entity_id: String,
    pub status: PipelineItemStatus,
    /// Higher dispatches first.
    pub priority: i32,
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Set once the item is materialized into a task.
    pub scheduled_task_id: Option<Uuid>,
    pub content_template: Option<String>,
    pub content_params: Value,
    pub posted_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineItemStatus {
    Pending,
    Scheduled,
    Posted,
    Failed,
}

impl PipelineItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineItemStatus::Pending => "pending",
            PipelineItemStatus::Scheduled => "scheduled",
            PipelineItemStatus::Posted => "posted",
            PipelineItemStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PipelineItemStatus::Pending),
            "scheduled" => Some(PipelineItemStatus::Scheduled),
            "posted" => Some(PipelineItemStatus::Posted),
            "failed" => Some(PipelineItemStatus::Failed),
            _ => None,
        }
    }
}

/// Parameters for enqueueing a pipeline item.
#[derive(Debug, Clone)]
pub struct NewPipelineItem {
    pub pipeline_type: String,
    pub platform: Option<String>,
    pub entity_type: String,
    pub entity_id: String,
    pub priority: i32,
    pub content_template: Option<String>,
    pub content_params: Value,
}

/// Throttle policy for one (`pipeline_type`, `platform?`) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineSettings {
    pub pipeline_type: String,
    pub platform: Option<String>,
    pub enabled: bool,
    pub daily_limit: u32,
    pub min_interval_minutes: u32,
    /// Allowed posting hours of day, 0-23. Absent means any hour.
    pub posting_hours: Option<Vec<u32>>,
    /// Allowed posting days of week, 0 = Sunday. Absent means any day.
    pub posting_days: Option<Vec<u32>>,
}

/// Entity type used as back-reference on tasks linked to sync settings.
pub const SYNC_SETTINGS_ENTITY: &str = "sync_settings";

/// Recurring-sync configuration for one (`entity_type`, `entity_id`).
///
/// Owns zero-or-one live `ScheduledTask`, found by back-reference
/// (`entity_type = "sync_settings"`, `entity_id = <id>`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub enabled: bool,
    pub recurrence: RecurrenceSpec,
    pub last_sync: Option<DateTime<Utc>>,
    pub next_sync: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
