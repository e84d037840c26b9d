//! Client error taxonomy.
//!
//! Errors are `Clone` so one failed fetch can be handed to every coalesced waiter.

use sectorpulse_core::ValidationError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    /// The request never produced a response (DNS, connect, timeout, TLS...).
    #[error("network error: {0}")]
    Transport(String),

    #[error("server returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The response did not match the expected payload shape.
    #[error("unexpected response format: {0}")]
    Schema(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The fetch was cancelled. Callers treat this as "no result".
    #[error("request aborted")]
    Aborted,

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ClientError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, ClientError::Aborted)
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClientError::Schema(e.to_string())
        } else {
            ClientError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Schema(e.to_string())
    }
}
