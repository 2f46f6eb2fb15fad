//! Failure classification.
//!
//! The single branch point between plain retry and recovery escalation.
//! Corruption is only ever recognised by an explicit signature, never by a
//! generic substring such as "internal" or "error".

use crate::error::{FailureCode, StoreFailure, SyncError};

/// Signatures the store's subscription machinery emits when its own state is
/// inconsistent. Matched case-insensitively against the failure message.
pub const CORRUPTION_SIGNATURES: &[&str] = &[
    "internal assertion failed",
    "unexpected state (id: ca9)",
    "unexpected state (id: b815)",
    "unexpected internal state",
    "target id already exists",
    "watch stream is in an unexpected state",
];

/// What kind of failure a store error represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Network blip or unspecified remote error; retried with backoff.
    Transient,
    /// Access denied or channel unreachable.
    Permission,
    /// The store reported inconsistent internal subscription state.
    InternalCorruption,
    /// Rejected local or remote input.
    Validation,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transient => "transient",
            FailureKind::Permission => "permission",
            FailureKind::InternalCorruption => "internal-corruption",
            FailureKind::Validation => "validation",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `message` carries a known corruption signature.
pub fn is_corruption_signature(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    CORRUPTION_SIGNATURES.iter().any(|sig| lower.contains(sig))
}

/// Classify a failure reported by the store.
///
/// Signature matching runs before code matching: the store reports
/// corruption under several codes, including `Internal` and `Unknown`.
pub fn classify(failure: &StoreFailure) -> FailureKind {
    if is_corruption_signature(&failure.message) {
        return FailureKind::InternalCorruption;
    }
    match failure.code {
        FailureCode::PermissionDenied | FailureCode::Unauthenticated | FailureCode::Unavailable => {
            FailureKind::Permission
        }
        FailureCode::InvalidArgument => FailureKind::Validation,
        _ => FailureKind::Transient,
    }
}

/// Classify a crate-level error, for callers that only hold a [`SyncError`].
pub fn classify_error(error: &SyncError) -> FailureKind {
    match error {
        SyncError::Validation(_) => FailureKind::Validation,
        SyncError::PermissionDenied(_)
        | SyncError::NotMember
        | SyncError::Unavailable(_)
        | SyncError::ChannelTerminated => FailureKind::Permission,
        _ => FailureKind::Transient,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_signatures_are_corruption() {
        let failure = StoreFailure::new(
            FailureCode::Unknown,
            "FIRESTORE (10.7.0) INTERNAL ASSERTION FAILED: Unexpected state (ID: ca9)",
        );
        assert_eq!(classify(&failure), FailureKind::InternalCorruption);

        let failure = StoreFailure::internal("Unexpected state (ID: b815)");
        assert_eq!(classify(&failure), FailureKind::InternalCorruption);
    }

    #[test]
    fn test_generic_internal_is_not_corruption() {
        let failure = StoreFailure::internal("internal error while streaming");
        assert_eq!(classify(&failure), FailureKind::Transient);

        let failure = StoreFailure::internal("unexpected EOF");
        assert_eq!(classify(&failure), FailureKind::Transient);
    }

    #[test]
    fn test_permission_and_unavailable_codes() {
        for code in [
            FailureCode::PermissionDenied,
            FailureCode::Unauthenticated,
            FailureCode::Unavailable,
        ] {
            assert_eq!(
                classify(&StoreFailure::new(code, "denied")),
                FailureKind::Permission
            );
        }
    }

    #[test]
    fn test_signature_wins_over_code() {
        let failure = StoreFailure::new(
            FailureCode::PermissionDenied,
            "INTERNAL ASSERTION FAILED: target id already exists",
        );
        assert_eq!(classify(&failure), FailureKind::InternalCorruption);
    }

    #[test]
    fn test_other_codes_are_transient() {
        for code in [
            FailureCode::DeadlineExceeded,
            FailureCode::Cancelled,
            FailureCode::Aborted,
            FailureCode::ResourceExhausted,
        ] {
            assert_eq!(
                classify(&StoreFailure::new(code, "try again")),
                FailureKind::Transient
            );
        }
        assert_eq!(
            classify(&StoreFailure::new(FailureCode::InvalidArgument, "bad field")),
            FailureKind::Validation
        );
    }

    #[test]
    fn test_classify_local_errors() {
        let err = SyncError::Validation("Amount must be greater than zero".into());
        assert_eq!(classify_error(&err), FailureKind::Validation);
        assert_eq!(classify_error(&SyncError::NotMember), FailureKind::Permission);
    }
}
