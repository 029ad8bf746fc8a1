//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The identity commitment does not match `^0x[0-9a-fA-F]{64}$`
    #[error("wrong format")]
    Validation,

    /// A `QueryResponse` payload failed base64 or JSON decoding
    #[error("Decode error: {0}")]
    Decode(String),

    /// An inbound frame is not one of the known event shapes
    #[error("Unrecognized frame: {reason}")]
    Classification { reason: String, raw: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn classification(reason: impl Into<String>, raw: impl Into<String>) -> Self {
        Error::Classification {
            reason: reason.into(),
            raw: raw.into(),
        }
    }

    /// Raw frame text carried by a classification error, for diagnostics
    pub fn raw_frame(&self) -> Option<&str> {
        match self {
            Error::Classification { raw, .. } => Some(raw),
            _ => None,
        }
    }
}
