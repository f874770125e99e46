//! Error types for lease operations.

use std::fmt;
use thiserror::Error;

/// Boxed error carried as the underlying cause of a lease failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur during lease operations.
///
/// Every backend maps its own failures onto these three variants, so callers
/// can react to contention, backend faults and bad input uniformly.
#[derive(Error, Debug)]
pub enum LeaseError {
    /// Another live holder exists, or the caller no longer holds the lease.
    ///
    /// Expected during normal contention; not fatal.
    #[error("lease conflict: {reason}")]
    Conflict {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Backend-level failure (network, authentication, unexpected status).
    ///
    /// The lease state is unknown after this error.
    #[error("backend error: {context}")]
    Unknown {
        context: String,
        #[source]
        source: BoxError,
    },

    /// Malformed lock identity or call arguments. Raised before any I/O.
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },
}

/// The failure category of a [`LeaseError`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeaseFailureReason {
    Conflict,
    Unknown,
    Validation,
}

impl fmt::Display for LeaseFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Conflict => "conflict",
            Self::Unknown => "unknown",
            Self::Validation => "validation",
        };
        f.write_str(s)
    }
}

impl LeaseError {
    /// Conflict with no underlying backend error.
    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
            source: None,
        }
    }

    /// Conflict reported by the backend itself (e.g. an HTTP 409).
    pub fn conflict_from(
        reason: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Conflict {
            reason: reason.into(),
            source: Some(source.into()),
        }
    }

    pub fn unknown(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Unknown {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn failure_reason(&self) -> LeaseFailureReason {
        match self {
            Self::Conflict { .. } => LeaseFailureReason::Conflict,
            Self::Unknown { .. } => LeaseFailureReason::Unknown,
            Self::Validation { .. } => LeaseFailureReason::Validation,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

/// Result type for lease operations.
pub type LeaseResult<T> = Result<T, LeaseError>;
