use thiserror::Error;

use crate::domain::types::JobState;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("domain entity `{entity}` not found")]
    NotFound { entity: &'static str },
    #[error("conflict: {message}")]
    Conflict { message: String },
    #[error("invalid job transition from {} to {}", from.as_str(), to.as_str())]
    InvalidTransition { from: JobState, to: JobState },
    #[error("render failed: {message}")]
    Render { message: String },
    #[error("render timed out after {seconds}s")]
    Timeout { seconds: u64 },
    #[error("job cancelled: {reason}")]
    Cancelled { reason: String },
}

impl DomainError {
    pub fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn render(message: impl Into<String>) -> Self {
        Self::Render {
            message: message.into(),
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }
}
