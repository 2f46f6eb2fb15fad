//! Error types for sync and ledger operations.

use std::time::Duration;
use thiserror::Error;

/// Status code attached to a failure reported by the remote store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureCode {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    Unauthenticated,
    ResourceExhausted,
    FailedPrecondition,
    /// A concurrent writer invalidated a transactional read.
    Aborted,
    Unavailable,
    Internal,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::Cancelled => "cancelled",
            FailureCode::Unknown => "unknown",
            FailureCode::InvalidArgument => "invalid-argument",
            FailureCode::DeadlineExceeded => "deadline-exceeded",
            FailureCode::NotFound => "not-found",
            FailureCode::AlreadyExists => "already-exists",
            FailureCode::PermissionDenied => "permission-denied",
            FailureCode::Unauthenticated => "unauthenticated",
            FailureCode::ResourceExhausted => "resource-exhausted",
            FailureCode::FailedPrecondition => "failed-precondition",
            FailureCode::Aborted => "aborted",
            FailureCode::Unavailable => "unavailable",
            FailureCode::Internal => "internal",
        }
    }
}

/// A raw failure reported by the remote store, either from a push channel or
/// from an RPC-style call.
///
/// This never crosses the public mutation boundary; see [`SyncError`].
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{} ({})", .code.as_str(), .message)]
pub struct StoreFailure {
    pub code: FailureCode,
    pub message: String,
}

impl StoreFailure {
    pub fn new(code: FailureCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(FailureCode::Unavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureCode::Internal, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(FailureCode::Aborted, message)
    }

    pub fn is_conflict(&self) -> bool {
        self.code == FailureCode::Aborted
    }
}

/// Result type for remote store calls.
pub type StoreResult<T> = std::result::Result<T, StoreFailure>;

/// Main error type surfaced to callers of this crate.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Bad local input, rejected before any remote call.
    #[error("{0}")]
    Validation(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Pocket is full")]
    PocketFull,

    #[error("Already a member of this pocket")]
    AlreadyMember,

    #[error("Not a member of this pocket")]
    NotMember,

    #[error("Pocket has been deleted")]
    PocketDeleted,

    #[error("Concurrent update conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Channel terminated; reload required")]
    ChannelTerminated,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    /// The fixed message shown to end users for this error.
    ///
    /// Validation messages pass through verbatim; everything else collapses
    /// into a small set of stable strings.
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Validation(msg) => msg.clone(),
            SyncError::RateLimited { .. } => {
                "Too many requests. Please wait a moment and try again.".to_string()
            }
            SyncError::PermissionDenied(_) | SyncError::NotMember => {
                "You don't have access to this pocket.".to_string()
            }
            SyncError::NotFound(_) => "Pocket not found. Check the invite code.".to_string(),
            SyncError::PocketFull => "This pocket already has two members.".to_string(),
            SyncError::AlreadyMember => "You are already a member of this pocket.".to_string(),
            SyncError::PocketDeleted => "This pocket has been deleted.".to_string(),
            SyncError::Conflict(_) => {
                "Someone else updated this pocket at the same time. Please try again.".to_string()
            }
            SyncError::ChannelTerminated => {
                "Connection lost. Please reload the app.".to_string()
            }
            SyncError::Unavailable(_)
            | SyncError::Serialization(_)
            | SyncError::Deserialization(_)
            | SyncError::Config(_) => "Something went wrong. Please try again.".to_string(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, SyncError::Validation(_))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            SyncError::Deserialization(e.to_string())
        } else {
            SyncError::Serialization(e.to_string())
        }
    }
}

/// Result type for sync and ledger operations.
pub type Result<T> = std::result::Result<T, SyncError>;
