//! Error handling for the gateway module

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error body some dispatcher endpoints return as JSON.
#[derive(Serialize, Deserialize)]
struct RawError {
    #[serde(alias = "error", alias = "message")]
    description: String,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Reqwest error, typically related to network issues or request failures.
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("HTTP error with status {status}: {message}")]
    Http { status: u16, message: String },

    /// The body could not be decoded into the expected shape.
    #[error("Decoding error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The service answered successfully but broke the protocol contract.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl GatewayError {
    pub async fn from_response(response: reqwest::Response) -> GatewayError {
        let status = response.status().as_u16();
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read response text".to_string());

        GatewayError::Http { status, message }
    }

    /// The service's own error description, when the body carries one.
    pub fn to_pretty(&self) -> Option<String> {
        match self {
            Self::Http { message: msg, .. } => serde_json::from_str::<RawError>(msg)
                .ok()
                .map(|parsed| parsed.description),
            _ => None,
        }
    }
}
