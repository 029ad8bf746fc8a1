//! Client error types

use thiserror::Error;

/// Errors surfaced to the user through the request snapshot
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Wrong format for identity commitment")]
    Validation,

    #[error("A request is already in flight")]
    Busy,

    #[error("Something went wrong sending the cmix message: {reason}")]
    TransportDispatch { reason: String },

    #[error("Received unexpected message: {reason}")]
    UnexpectedMessage { reason: String, raw: String },

    #[error("Could not decode query response: {reason}")]
    Decode { reason: String },

    #[error("Timed out waiting for a response")]
    Timeout,
}

impl RequestError {
    /// Stable code for structured output
    pub fn code(&self) -> &'static str {
        match self {
            RequestError::Validation => "VALIDATION",
            RequestError::Busy => "BUSY",
            RequestError::TransportDispatch { .. } => "TRANSPORT_DISPATCH",
            RequestError::UnexpectedMessage { .. } => "UNEXPECTED_MESSAGE",
            RequestError::Decode { .. } => "DECODE",
            RequestError::Timeout => "TIMEOUT",
        }
    }
}

/// Failure reported by a transport when a send cannot be scheduled
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Network not ready: {0}")]
    NotReady(String),

    #[error("Send failed: {0}")]
    Send(String),
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("Request driver has stopped")]
    DriverClosed,

    #[error("Core error: {0}")]
    Core(#[from] inclusion_core::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
