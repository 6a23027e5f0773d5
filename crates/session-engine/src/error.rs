//! Session engine error types.

use thiserror::Error;

/// Failure to reach the identity provider at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_builder() {
            TransportError::InvalidRequest(err.to_string())
        } else {
            TransportError::Connect(err.to_string())
        }
    }
}

/// Authentication error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Transport failure reaching the identity provider
    #[error("Network error: {0}")]
    Network(#[from] TransportError),

    /// A protected resource answered 401
    #[error("Authorization expired for {path}")]
    AuthExpired { path: String },

    /// Missing, invalid or tampered CSRF pair. Never retried.
    #[error("CSRF check failed: {0}")]
    CsrfMismatch(String),

    /// The refresh call itself returned a non-success status
    #[error("Credential refresh rejected with HTTP {status}")]
    RefreshExhausted { status: u16 },

    /// Durable storage inaccessible
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] portal_storage::StorageError),

    /// Invalid state transition in the session FSM
    #[error("Invalid session state transition: {0}")]
    InvalidStateTransition(String),

    /// An OTP operation was requested without a pending challenge
    #[error("No verification challenge is pending")]
    ChallengeMissing,

    /// Unexpected status from the identity provider
    #[error("Unexpected HTTP {status} from {path}")]
    UnexpectedStatus { status: u16, path: String },

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AuthError {
    /// Returns true if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Network(_) => true,
            AuthError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    return true;
                }
                if let Some(status) = e.status() {
                    return status.is_server_error();
                }
                false
            }
            AuthError::UnexpectedStatus { status, .. } => *status >= 500,
            AuthError::RefreshExhausted { status } => *status >= 500,
            _ => false,
        }
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
