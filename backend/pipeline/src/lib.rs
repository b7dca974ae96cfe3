//! Rate-limited dispatch pipeline: throttle planning plus the
//! dispatcher that turns pending items into one-shot scheduled tasks.

pub mod dispatcher;
pub mod throttle;

pub use dispatcher::{dispatch_task_type, PipelineDispatcher, PIPELINE_ITEM_ENTITY};
pub use throttle::plan_dispatch_times;
