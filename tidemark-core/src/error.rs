//! Error taxonomy for the planner core.
//!
//! Every core operation is synchronous and returns these directly; there are
//! no hidden retries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlannerError {
    /// Required field missing or malformed. Core state is unchanged.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The id is unknown, or the task has no current (non-deleted) version.
    #[error("task not found: {0}")]
    NotFound(String),

    /// Writing a blob failed. The in-memory mutation has already happened;
    /// `task_id` names the task a failed create still produced.
    #[error("storage write failed for '{key}': {message}")]
    Storage {
        key: String,
        message: String,
        task_id: Option<String>,
    },

    /// A persisted blob failed structural validation on load.
    #[error("persisted store under '{key}' is malformed: {message}")]
    MalformedStore { key: String, message: String },

    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl PlannerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        PlannerError::Validation(msg.into())
    }

    pub fn storage(key: &str, err: impl std::fmt::Display) -> Self {
        PlannerError::Storage {
            key: key.to_string(),
            message: err.to_string(),
            task_id: None,
        }
    }

    /// Attach the id of a task that exists in memory but was not saved.
    pub fn with_task_id(self, id: &str) -> Self {
        match self {
            PlannerError::Storage { key, message, .. } => PlannerError::Storage {
                key,
                message,
                task_id: Some(id.to_string()),
            },
            other => other,
        }
    }

    /// The unsaved task a failed create left behind.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            PlannerError::Storage { task_id, .. } => task_id.as_deref(),
            _ => None,
        }
    }

    pub fn malformed(key: &str, msg: impl Into<String>) -> Self {
        PlannerError::MalformedStore {
            key: key.to_string(),
            message: msg.into(),
        }
    }

    /// True when the caller should warn that the change may not survive a reload.
    pub fn is_storage(&self) -> bool {
        matches!(self, PlannerError::Storage { .. })
    }
}

impl From<serde_json::Error> for PlannerError {
    fn from(e: serde_json::Error) -> Self {
        PlannerError::Serialization(e.to_string())
    }
}

impl From<csv::Error> for PlannerError {
    fn from(e: csv::Error) -> Self {
        PlannerError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PlannerError>;
