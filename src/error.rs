use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("transport error{}: {message}", .status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    Transport { status: Option<u16>, message: String },

    #[error("job {0} not found")]
    NotFound(String),

    #[error("result for job {0} is not ready")]
    NotReady(String),

    #[error("job failed: {0}")]
    BackendFailure(String),

    #[error("a poll loop is already active for job {0}")]
    AlreadyPolling(String),

    #[error("invalid transition: cannot {action} while in {phase}")]
    InvalidTransition { phase: String, action: &'static str },
}

impl JobError {
    pub fn transport(message: impl Into<String>) -> Self {
        JobError::Transport {
            status: None,
            message: message.into(),
        }
    }

    /// Message suitable for a blocking, user-visible alert.
    pub fn user_message(&self) -> String {
        match self {
            JobError::Transport { message, .. } => message.clone(),
            JobError::BackendFailure(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for JobError {
    fn from(e: reqwest::Error) -> Self {
        JobError::Transport {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, JobError>;
