pub mod clock;
pub mod error;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Result, TalentError};
pub use store::{LogStore, PipelineStore, SyncStore, TaskStore};
pub use types::{
    CustomSchedule, IntervalKind, Lease, LogAction, NewPipelineItem, NewTask, PipelineItem,
    PipelineItemStatus, PipelineSettings, RecurrenceSpec, ScheduledTask, SchedulerLogEntry,
    SyncSettings, TaskPatch, TaskPayload, TaskStatus, SYNC_SETTINGS_ENTITY,
};
