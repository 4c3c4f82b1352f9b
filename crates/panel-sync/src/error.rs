use thiserror::Error;

use crate::reconcile::Summary;

/// Why a single candidate endpoint could not serve a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientReason {
    NotFound,
    MethodNotAllowed,
    Timeout,
    Connect,
    ServerError(u16),
}

impl TransientReason {
    /// Network-level failures say nothing about the route, only the panel.
    pub fn is_network(&self) -> bool {
        matches!(self, TransientReason::Timeout | TransientReason::Connect)
    }
}

impl std::fmt::Display for TransientReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransientReason::NotFound => f.write_str("not found"),
            TransientReason::MethodNotAllowed => f.write_str("method not allowed"),
            TransientReason::Timeout => f.write_str("timed out"),
            TransientReason::Connect => f.write_str("connection failed"),
            TransientReason::ServerError(status) => write!(f, "server error {}", status),
        }
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Endpoint {endpoint} unavailable: {reason}")]
    TransientEndpoint {
        endpoint: String,
        reason: TransientReason,
    },

    #[error("Authentication failed, token or session may have expired. Please login again")]
    AuthExpired,

    #[error("Already exists: {0}")]
    Conflict(String),

    #[error("Unrecognized response shape from {endpoint}")]
    UnrecognizedShape { endpoint: String, body: String },

    #[error("Record '{0}' has no usable identifier")]
    MissingIdentifier(String),

    #[error("Endpoint {endpoint} rejected the request with status {status}: {body}")]
    PermanentEndpointFailure {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("API error from {endpoint}: {message}")]
    Rejected { endpoint: String, message: String },

    #[error("Panel unreachable: {0}")]
    PanelUnreachable(String),

    #[error("All {attempts} candidate endpoints failed for {operation}. Last error: {last}")]
    EndpointsExhausted {
        operation: String,
        attempts: usize,
        last: Box<SyncError>,
    },

    #[error("Could not create user '{username}' after {attempts} attempts")]
    NameAttemptsExhausted { username: String, attempts: usize },

    #[error("Not authenticated. Please login first")]
    NotAuthenticated,

    #[error("Login failed: {0}")]
    LoginFailed(String),

    #[error("Run aborted: {cause}")]
    RunAborted {
        cause: Box<SyncError>,
        summary: Summary,
    },

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Conditions that end a whole run rather than a single record.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, SyncError::AuthExpired | SyncError::PanelUnreachable(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::Conflict(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
