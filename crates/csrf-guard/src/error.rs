use thiserror::Error;

/// Reasons a CSRF pair is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CsrfError {
    #[error("CSRF cookie missing")]
    MissingCookie,

    #[error("CSRF header missing")]
    MissingHeader,

    #[error("CSRF cookie malformed")]
    Malformed,

    #[error("CSRF cookie signature invalid")]
    Tampered,

    #[error("CSRF header does not match cookie")]
    Mismatch,

    #[error("CSRF token expired")]
    Expired,

    #[error("CSRF signing secret must not be empty")]
    InvalidSecret,

    #[error("Random source unavailable: {0}")]
    Entropy(String),
}

pub type CsrfResult<T> = Result<T, CsrfError>;
