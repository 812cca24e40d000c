//! Error types surfaced by the coordinator.
//!
//! Rejected submissions are not errors: a non-leader answers with a
//! redirect (see [`crate::coordinator::WriteOutcome`]). Everything here is a
//! real failure the caller has to see.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Failures reported by a [`crate::consensus::ConsensusService`].
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// The service could not be reached or has shut down.
    #[error("consensus service unavailable: {0}")]
    Unavailable(String),

    /// A submission did not resolve within the configured wait.
    #[error("consensus service did not resolve the submission within {0:?}")]
    Timeout(Duration),
}

/// A payload that is not a valid encoded command.
#[derive(Debug, Error)]
#[error("invalid command payload: {0}")]
pub struct CodecError(#[from] pub bincode::Error);

/// Errors returned by the read and write paths.
#[derive(Debug, Error)]
pub enum KvError {
    /// Malformed client input (missing key, unparseable body).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    /// A command could not be encoded for submission.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A committed entry could not be decoded. The applier stops in front
    /// of it so the store never skips a log position.
    #[error("committed entry at position {position} is corrupt: {source}")]
    CorruptEntry {
        position: u64,
        #[source]
        source: CodecError,
    },

    /// A request task failed before producing an answer.
    #[error("internal error: {0}")]
    Internal(String),
}

impl KvError {
    pub fn invalid(message: impl Into<String>) -> Self {
        KvError::InvalidRequest(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            KvError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            KvError::Consensus(ConsensusError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            KvError::Consensus(ConsensusError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            KvError::Codec(_) | KvError::CorruptEntry { .. } | KvError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for KvError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_kind() {
        assert_eq!(KvError::invalid("no key").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            KvError::from(ConsensusError::Unavailable("down".into())).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            KvError::from(ConsensusError::Timeout(Duration::from_secs(1))).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn invalid_request_message_is_preserved() {
        let err = KvError::invalid("missing required query parameter `key`");
        assert_eq!(
            err.to_string(),
            "invalid request: missing required query parameter `key`"
        );
    }
}
