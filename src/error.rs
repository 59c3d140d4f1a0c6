//! Typed failures for every layer that talks to the execution service.

use std::time::Duration;

use reqwest::StatusCode;

/// Coarse grouping used by the session loop to decide whether to keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Missing/invalid credentials or identifiers. Never retried.
    Configuration,
    /// Timeouts, 429 and 5xx. Retried by the transport before surfacing.
    Transient,
    /// Fatal HTTP answers and malformed payloads.
    Protocol,
    /// Problems with the submitted code itself.
    Execution,
    /// Resource or context not in a usable state.
    Lifecycle,
    /// The wait was cut short by the user or a deadline.
    Interrupted,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("bad request (400): {0}")]
    BadRequest(String),

    #[error("unauthorized (401): {0}")]
    Unauthorized(String),

    #[error("forbidden (403): {0}")]
    Forbidden(String),

    #[error("not found (404): {0}")]
    NotFound(String),

    #[error("rate limited (429): {0}")]
    RateLimited(String),

    #[error("service unavailable ({status}): {body}")]
    ServiceUnavailable { status: u16, body: String },

    #[error("connection error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("cluster {cluster_id} not ready after {waited:?} (state {state})")]
    ResourceNotReady {
        cluster_id: String,
        state: String,
        waited: Duration,
    },

    #[error("cluster {cluster_id} is {state}; start it before running commands")]
    ResourceUnavailable { cluster_id: String, state: String },

    #[error("failed to create execution context: {0}")]
    ContextCreationFailed(String),

    #[error("refusing to submit an empty command")]
    EmptyCommand,

    #[error("failed to submit command: {0}")]
    SubmissionFailed(Box<ExecError>),

    #[error("command {command_id} timed out after {timeout:?} and was cancelled")]
    TimedOut { command_id: String, timeout: Duration },

    #[error("command {command_id} was cancelled")]
    Cancelled { command_id: String },

    #[error("interrupted while {0}")]
    Interrupted(String),
}

pub type ExecResult<T> = std::result::Result<T, ExecError>;

impl ExecError {
    /// Maps a non-success HTTP status and its body to the matching variant.
    pub fn from_status(status: StatusCode, body: String) -> Self {
        match status.as_u16() {
            400 => ExecError::BadRequest(body),
            401 => ExecError::Unauthorized(body),
            403 => ExecError::Forbidden(body),
            404 => ExecError::NotFound(body),
            429 => ExecError::RateLimited(body),
            code if status.is_server_error() => ExecError::ServiceUnavailable { status: code, body },
            code => ExecError::Protocol(format!("HTTP {}: {}", code, body)),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            ExecError::Config(_) | ExecError::Unauthorized(_) | ExecError::Forbidden(_) => {
                ErrorClass::Configuration
            }
            ExecError::RateLimited(_) | ExecError::ServiceUnavailable { .. } | ExecError::Network(_) => {
                ErrorClass::Transient
            }
            ExecError::BadRequest(_) | ExecError::Protocol(_) => ErrorClass::Protocol,
            ExecError::EmptyCommand => ErrorClass::Execution,
            ExecError::NotFound(_)
            | ExecError::ResourceNotReady { .. }
            | ExecError::ResourceUnavailable { .. }
            | ExecError::ContextCreationFailed(_) => ErrorClass::Lifecycle,
            ExecError::SubmissionFailed(inner) => inner.class(),
            ExecError::TimedOut { .. } | ExecError::Cancelled { .. } | ExecError::Interrupted(_) => {
                ErrorClass::Interrupted
            }
        }
    }

    /// Whether the transport should try the same request again.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExecError::RateLimited(_) | ExecError::ServiceUnavailable { .. } => true,
            ExecError::Network(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// A REPL can survive this error and accept the next fragment.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ExecError::EmptyCommand | ExecError::TimedOut { .. } | ExecError::Cancelled { .. } => true,
            // the submit answer was unreadable; the context itself is fine
            ExecError::SubmissionFailed(inner) => matches!(**inner, ExecError::Protocol(_)),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_taxonomy() {
        assert!(matches!(ExecError::from_status(StatusCode::BAD_REQUEST, "x".into()), ExecError::BadRequest(_)));
        assert!(matches!(ExecError::from_status(StatusCode::UNAUTHORIZED, "x".into()), ExecError::Unauthorized(_)));
        assert!(matches!(ExecError::from_status(StatusCode::FORBIDDEN, "x".into()), ExecError::Forbidden(_)));
        assert!(matches!(ExecError::from_status(StatusCode::NOT_FOUND, "x".into()), ExecError::NotFound(_)));
        assert!(matches!(ExecError::from_status(StatusCode::TOO_MANY_REQUESTS, "x".into()), ExecError::RateLimited(_)));
        assert!(matches!(
            ExecError::from_status(StatusCode::BAD_GATEWAY, "x".into()),
            ExecError::ServiceUnavailable { status: 502, .. }
        ));
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(ExecError::RateLimited(String::new()).is_retryable());
        assert!(ExecError::ServiceUnavailable { status: 503, body: String::new() }.is_retryable());
        assert!(!ExecError::BadRequest(String::new()).is_retryable());
        assert!(!ExecError::Unauthorized(String::new()).is_retryable());
        assert!(!ExecError::NotFound(String::new()).is_retryable());
    }

    #[test]
    fn malformed_requests_are_not_retried() {
        let err = reqwest::Client::new().get("not a url").build().unwrap_err();
        assert!(!ExecError::Network(err).is_retryable());
    }

    #[tokio::test]
    async fn refused_connections_are_retried() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = reqwest::get(format!("http://{}/", addr)).await.unwrap_err();
        assert!(err.is_connect());
        assert!(ExecError::Network(err).is_retryable());
    }

    #[test]
    fn submission_failure_keeps_inner_class() {
        let err = ExecError::SubmissionFailed(Box::new(ExecError::Unauthorized("nope".into())));
        assert_eq!(err.class(), ErrorClass::Configuration);
        assert!(err.to_string().contains("failed to submit"));
    }

    #[test]
    fn unreadable_submit_answer_is_recoverable() {
        let unreadable = ExecError::SubmissionFailed(Box::new(ExecError::Protocol("no id".into())));
        assert!(unreadable.is_recoverable());
        let denied = ExecError::SubmissionFailed(Box::new(ExecError::Unauthorized("nope".into())));
        assert!(!denied.is_recoverable());
        assert!(!ExecError::Interrupted("waiting for cluster c-1".into()).is_recoverable());
    }
}
