use gatekeeper_core::error::GateError;
use std::fmt;

#[derive(Debug)]
pub enum ConsumerError {
    Gate(GateError),
    ConnectionFailed(String),
    InvalidMessage(String),
}

impl fmt::Display for ConsumerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsumerError::Gate(err) => write!(f, "Gatekeeper error: {}", err),
            ConsumerError::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            ConsumerError::InvalidMessage(msg) => write!(f, "Invalid message: {}", msg),
        }
    }
}

impl std::error::Error for ConsumerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConsumerError::Gate(err) => Some(err),
            _ => None,
        }
    }
}

impl From<GateError> for ConsumerError {
    fn from(err: GateError) -> Self {
        ConsumerError::Gate(err)
    }
}

pub type ConsumerResult<T> = Result<T, ConsumerError>;
