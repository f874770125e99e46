//! Lease request, token and snapshot types.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{LeaseError, LeaseResult};
use crate::identity::LockIdentity;

/// Opaque proof of lease ownership.
///
/// What the string means is backend-specific: the server-issued lease id for
/// object storage, the requestor id for the relational backend, the candidate
/// file name for the file backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseToken(String);

impl LeaseToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for LeaseToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for LeaseToken {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

/// Longest lease period any backend accepts.
///
/// Periods are added to clock readings when computing deadlines; the ceiling
/// keeps those additions far from overflow on every platform.
pub const MAX_LEASE_PERIOD: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Rejects a zero period or one longer than [`MAX_LEASE_PERIOD`].
pub fn validate_period(period: Duration) -> LeaseResult<()> {
    if period.is_zero() {
        return Err(LeaseError::validation("period", "lease period must be non-zero"));
    }
    if period > MAX_LEASE_PERIOD {
        return Err(LeaseError::validation(
            "period",
            format!(
                "lease period of {}s exceeds the maximum of {}s",
                period.as_secs(),
                MAX_LEASE_PERIOD.as_secs()
            ),
        ));
    }
    Ok(())
}

/// Parameters of an acquisition attempt.
#[derive(Debug, Clone)]
pub struct LeaseRequest {
    identity: LockIdentity,
    period: Duration,
    proposed_token: Option<String>,
    requestor_id: String,
}

impl LeaseRequest {
    /// Creates a request for `identity` held for `period` by `requestor_id`.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Validation`] if `period` is zero or above
    /// [`MAX_LEASE_PERIOD`], or if `requestor_id` is empty.
    pub fn new(
        identity: LockIdentity,
        period: Duration,
        requestor_id: impl Into<String>,
    ) -> LeaseResult<Self> {
        let requestor_id = requestor_id.into();
        validate_period(period)?;
        if requestor_id.trim().is_empty() {
            return Err(LeaseError::validation("requestor_id", "cannot be empty"));
        }
        Ok(Self {
            identity,
            period,
            proposed_token: None,
            requestor_id,
        })
    }

    /// Suggests a token to backends that accept caller-chosen lease ids.
    pub fn proposed_token(mut self, token: impl Into<String>) -> Self {
        self.proposed_token = Some(token.into());
        self
    }

    pub fn identity(&self) -> &LockIdentity {
        &self.identity
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn proposed(&self) -> Option<&str> {
        self.proposed_token.as_deref()
    }

    pub fn requestor_id(&self) -> &str {
        &self.requestor_id
    }
}

/// Point-in-time view of a lease.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaseSnapshot {
    /// `true` when no live (non-expired) holder exists.
    pub is_available: bool,
    /// Out-of-band coordination data; survives lease expiry.
    pub metadata: HashMap<String, String>,
}

impl LeaseSnapshot {
    /// Snapshot of a lock that was never created.
    pub fn never_created() -> Self {
        Self {
            is_available: true,
            metadata: HashMap::new(),
        }
    }
}

/// The backend families a lease can be stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Object storage with native leases.
    Blob,
    /// Relational database with atomic stored functions.
    Sql,
    /// Shared filesystem with file arbitration.
    File,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Sql => "sql",
            Self::File => "file",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = LeaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blob" | "storage" => Ok(Self::Blob),
            "sql" => Ok(Self::Sql),
            "file" => Ok(Self::File),
            other => Err(LeaseError::validation(
                "backend",
                format!("unknown backend kind '{other}' (expected blob, sql or file)"),
            )),
        }
    }
}

/// Rejects metadata keys no backend can store.
pub fn validate_metadata_key(key: &str) -> LeaseResult<()> {
    if key.trim().is_empty() {
        return Err(LeaseError::validation("metadata key", "cannot be empty"));
    }
    Ok(())
}
