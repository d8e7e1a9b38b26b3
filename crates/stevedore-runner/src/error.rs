// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runner-specific error types.

use stevedore_protocol::{ClientError, status_code};
use thiserror::Error;

/// Errors surfaced by job stream and state client operations.
///
/// The variants mirror the failure taxonomy of the runner protocol:
/// [`StreamError::Unavailable`] and [`StreamError::NotFound`] are
/// transient and drive the reattach loop; everything else is terminal
/// for the current exchange.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The server (or the path to it) is temporarily gone; retryable.
    #[error("server unavailable: {0}")]
    Unavailable(String),

    /// The server no longer knows the referenced entity (e.g. a job
    /// stream lost across a restart); retryable via reattach.
    #[error("not found: {0}")]
    NotFound(String),

    /// Protocol violation. Continuing would corrupt job bookkeeping.
    #[error("protocol violation: {0}")]
    Aborted(String),

    /// Local invariant failure (e.g. cancelled while waiting to
    /// re-register).
    #[error("internal error: {0}")]
    Internal(String),

    /// A peer message failed to decode.
    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),
}

impl StreamError {
    /// Whether the reattach loop should retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, StreamError::Unavailable(_) | StreamError::NotFound(_))
    }

    /// Classify a server error frame by its status code.
    pub fn from_status(code: &str, message: &str) -> Self {
        match code {
            status_code::UNAVAILABLE => StreamError::Unavailable(message.to_string()),
            status_code::NOT_FOUND => StreamError::NotFound(message.to_string()),
            status_code::ABORTED => StreamError::Aborted(message.to_string()),
            _ => StreamError::Internal(format!("{}: {}", code, message)),
        }
    }
}

impl From<ClientError> for StreamError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Status { code, message } => StreamError::from_status(&code, &message),
            // Everything transport-level (dial failures, severed
            // connections, timeouts) is retryable once the server is
            // reachable again.
            other => StreamError::Unavailable(other.to_string()),
        }
    }
}

/// Errors produced while executing an operation locally.
///
/// These never abort the accept cycle: they are recorded in the
/// operation state and reported to the server as a job error event.
#[derive(Debug, Error)]
pub enum OperationError {
    /// A platform component (builder, platform, registry, releaser)
    /// failed to do its work.
    #[error("component error: {0}")]
    Component(String),

    /// Persisting operation state to the server failed.
    #[error("state persist error: {0}")]
    Persist(#[from] StreamError),

    /// The operation result could not be encoded into the state value.
    #[error("value encoding error: {0}")]
    Value(#[from] serde_json::Error),

    /// The job references an application this runner cannot resolve.
    #[error("unknown application: {0}")]
    UnknownApp(String),

    /// The job payload is missing or malformed.
    #[error("invalid job payload: {0}")]
    InvalidPayload(String),
}

impl OperationError {
    /// The status code recorded in the operation state and the job
    /// error event for this failure.
    pub fn status_code(&self) -> &'static str {
        match self {
            OperationError::Component(_) => "component",
            OperationError::Persist(_) => "persist",
            OperationError::Value(_) => "internal",
            OperationError::UnknownApp(_) => "unknown_app",
            OperationError::InvalidPayload(_) => "invalid_payload",
        }
    }
}

/// Errors that can occur in the runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Configuration error (missing or invalid environment variable)
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection to stevedore-core failed
    #[error("connection error: {0}")]
    Connection(#[from] ClientError),

    /// Job stream failure that aborted an accept cycle
    #[error("job stream error: {0}")]
    Stream(#[from] StreamError),

    /// The runner was shut down while an operation was in flight
    #[error("runner shut down")]
    Shutdown,
}

/// Type alias for runner results.
pub type Result<T> = std::result::Result<T, RunnerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StreamError::Unavailable("gone".into()).is_transient());
        assert!(StreamError::NotFound("job".into()).is_transient());
        assert!(!StreamError::Aborted("bad message".into()).is_transient());
        assert!(!StreamError::Internal("oops".into()).is_transient());
    }

    #[test]
    fn test_from_status_codes() {
        assert!(matches!(
            StreamError::from_status(status_code::UNAVAILABLE, "restarting"),
            StreamError::Unavailable(_)
        ));
        assert!(matches!(
            StreamError::from_status(status_code::NOT_FOUND, "no stream"),
            StreamError::NotFound(_)
        ));
        assert!(matches!(
            StreamError::from_status(status_code::ABORTED, "bad ack"),
            StreamError::Aborted(_)
        ));
        assert!(matches!(
            StreamError::from_status("something_else", "?"),
            StreamError::Internal(_)
        ));
    }

    #[test]
    fn test_client_error_status_mapping() {
        let err = ClientError::Status {
            code: status_code::NOT_FOUND.to_string(),
            message: "unknown job".to_string(),
        };
        assert!(matches!(StreamError::from(err), StreamError::NotFound(_)));

        let err = ClientError::NotConnected;
        assert!(matches!(
            StreamError::from(err),
            StreamError::Unavailable(_)
        ));
    }

    #[test]
    fn test_operation_error_status_codes() {
        assert_eq!(
            OperationError::Component("boom".into()).status_code(),
            "component"
        );
        assert_eq!(
            OperationError::UnknownApp("web".into()).status_code(),
            "unknown_app"
        );
    }
}
