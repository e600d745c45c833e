use serde::Serialize;
use thiserror::Error;

/// Every failure the core surfaces outward. Messages carry root-relative or
/// already-known paths only; identity values and the signing secret never
/// appear in them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("root is not allowlisted: {0}")]
    RootNotAllowed(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("reparse points are blocked by policy: {0}")]
    IsReparsePoint(String),

    #[error("finding {id} is stale: {reason}")]
    FindingStale { id: String, reason: String },

    #[error("confirmation token is invalid")]
    TamperedToken,

    #[error("confirmation token has expired")]
    TokenExpired,

    #[error("target changed since it was planned: {0}")]
    IdentityMismatch(String),

    #[error("directory is not empty: {0}")]
    NotEmptyDirectory(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("target is in use by another process: {0}")]
    InUse(String),

    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    #[serde(rename = "E_ROOT_NOT_ALLOWED")]
    RootNotAllowed,
    #[serde(rename = "E_ACCESS_DENIED")]
    AccessDenied,
    #[serde(rename = "E_NOT_FOUND")]
    NotFound,
    #[serde(rename = "E_REPARSE_POLICY_BLOCKED")]
    IsReparsePoint,
    #[serde(rename = "E_FINDING_STALE")]
    FindingStale,
    #[serde(rename = "E_CONFIRM_TOKEN_INVALID")]
    TamperedToken,
    #[serde(rename = "E_CONFIRM_TOKEN_EXPIRED")]
    TokenExpired,
    #[serde(rename = "E_CHANGED_SINCE_PLAN")]
    IdentityMismatch,
    #[serde(rename = "E_DIR_NOT_EMPTY")]
    NotEmptyDirectory,
    #[serde(rename = "E_CONFIGURATION")]
    ConfigurationError,
    #[serde(rename = "E_IN_USE")]
    InUse,
    #[serde(rename = "E_IO_ERROR")]
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::RootNotAllowed(_) => ErrorKind::RootNotAllowed,
            Error::AccessDenied(_) => ErrorKind::AccessDenied,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::IsReparsePoint(_) => ErrorKind::IsReparsePoint,
            Error::FindingStale { .. } => ErrorKind::FindingStale,
            Error::TamperedToken => ErrorKind::TamperedToken,
            Error::TokenExpired => ErrorKind::TokenExpired,
            Error::IdentityMismatch(_) => ErrorKind::IdentityMismatch,
            Error::NotEmptyDirectory(_) => ErrorKind::NotEmptyDirectory,
            Error::Configuration(_) => ErrorKind::ConfigurationError,
            Error::InUse(_) => ErrorKind::InUse,
            Error::Io { .. } => ErrorKind::Io,
        }
    }

    /// True for the token-level failures that make up a rejected confirmation.
    pub fn is_confirmation_rejected(&self) -> bool {
        matches!(self, Error::TamperedToken | Error::TokenExpired)
    }

    pub(crate) fn stale(id: impl ToString, reason: impl Into<String>) -> Self {
        Error::FindingStale {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::RootNotAllowed => "E_ROOT_NOT_ALLOWED",
            ErrorKind::AccessDenied => "E_ACCESS_DENIED",
            ErrorKind::NotFound => "E_NOT_FOUND",
            ErrorKind::IsReparsePoint => "E_REPARSE_POLICY_BLOCKED",
            ErrorKind::FindingStale => "E_FINDING_STALE",
            ErrorKind::TamperedToken => "E_CONFIRM_TOKEN_INVALID",
            ErrorKind::TokenExpired => "E_CONFIRM_TOKEN_EXPIRED",
            ErrorKind::IdentityMismatch => "E_CHANGED_SINCE_PLAN",
            ErrorKind::NotEmptyDirectory => "E_DIR_NOT_EMPTY",
            ErrorKind::ConfigurationError => "E_CONFIGURATION",
            ErrorKind::InUse => "E_IN_USE",
            ErrorKind::Io => "E_IO_ERROR",
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Configuration(err.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
