//! Keeps recurring sync schedules and their backing tasks in step.

pub mod coordinator;

pub use coordinator::{sync_task_type, SyncCoordinator};
