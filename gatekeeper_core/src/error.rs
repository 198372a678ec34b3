use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Session lock already held: {0}")]
    LockContention(String),
    #[error("Unknown category: {0}")]
    UnknownCategory(String),
    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("Coordination store error: {0}")]
    Coordination(#[from] redis::RedisError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GateError {
    /// Faults local to one rule or upstream. The aggregator turns these into an
    /// ineligible item instead of failing the whole summary.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            GateError::Validation(_)
                | GateError::Transport(_)
                | GateError::NotFound(_)
                | GateError::UnknownCategory(_)
        )
    }

    /// Failures that may pass on a later attempt. Workers requeue jobs that
    /// fail with these and drop the rest.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GateError::Transport(_)
                | GateError::LockContention(_)
                | GateError::Storage(_)
                | GateError::Coordination(_)
                | GateError::Io(_)
        )
    }
}

impl From<reqwest::Error> for GateError {
    fn from(err: reqwest::Error) -> Self {
        GateError::Transport(err.to_string())
    }
}

pub type GateResult<T> = Result<T, GateError>;
