use thiserror::Error;
use uuid::Uuid;

/// Top-level error type for the TalentForge scheduling subsystem.
#[derive(Debug, Error)]
pub enum TalentError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("recurrence error: {0}")]
    Recurrence(String),

    #[error("lease mismatch for task {task_id}")]
    LeaseMismatch { task_id: Uuid },

    #[error("lease expired for task {task_id}")]
    LeaseExpired { task_id: Uuid },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TalentError {
    pub fn task_not_found(id: Uuid) -> Self {
        TalentError::NotFound {
            kind: "task",
            id: id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TalentError>;
