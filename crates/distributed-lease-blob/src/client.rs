//! The object store operations the lease backend consumes.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::ops::RangeInclusive;
use std::time::Duration;

use distributed_lease_core::{BoxError, MAX_LEASE_PERIOD};
use reqwest::StatusCode;
use thiserror::Error;

/// Location of a blob: container plus `/`-separated blob name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobPath {
    pub container: String,
    pub blob: String,
}

impl fmt::Display for BlobPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.blob)
    }
}

/// A failed object store call.
///
/// `status` is the HTTP status the service answered with; `None` means the
/// request never produced a response (transport failure, bad input).
#[derive(Error, Debug)]
#[error("{message}")]
pub struct StoreError {
    status: Option<StatusCode>,
    code: Option<String>,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl StoreError {
    /// Error reported by the service.
    pub fn status(status: StatusCode, code: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            message: format!("{} {}", status.as_u16(), code),
            status: Some(status),
            code: Some(code),
            source: None,
        }
    }

    /// Request that never got a response.
    pub fn transport(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Request rejected before it was sent.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn status_code(&self) -> Option<StatusCode> {
        self.status
    }

    /// Service error code (`x-ms-error-code`), e.g. `LeaseAlreadyPresent`.
    pub fn error_code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn is_status(&self, status: StatusCode) -> bool {
        self.status == Some(status)
    }
}

/// Whether a blob is currently under an active lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseStatus {
    Locked,
    Unlocked,
}

/// Lifecycle state of a blob's lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Available,
    Leased,
    Expired,
    Breaking,
    Broken,
}

impl LeaseStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "locked" => Some(Self::Locked),
            "unlocked" => Some(Self::Unlocked),
            _ => None,
        }
    }
}

impl LeaseState {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "available" => Some(Self::Available),
            "leased" => Some(Self::Leased),
            "expired" => Some(Self::Expired),
            "breaking" => Some(Self::Breaking),
            "broken" => Some(Self::Broken),
            _ => None,
        }
    }
}

/// Lease fields and user metadata of a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobProperties {
    pub lease_status: LeaseStatus,
    pub lease_state: LeaseState,
    pub metadata: HashMap<String, String>,
}

/// Blob operations with Azure Blob Storage lease semantics.
///
/// Failures carry the HTTP status the lease algorithm branches on: `404` for
/// a missing container or blob, `409` for lease conflicts and existing
/// resources, `412` for failed lease conditions on writes.
pub trait BlobStore: Send + Sync {
    /// Lease periods the store accepts.
    fn lease_period_range(&self) -> RangeInclusive<Duration> {
        Duration::ZERO..=MAX_LEASE_PERIOD
    }

    /// Acquires a lease on an existing blob and returns its lease id.
    ///
    /// Re-acquiring with the current lease id as `proposed_id` extends the
    /// lease instead of failing.
    fn acquire_lease(
        &self,
        path: &BlobPath,
        period: Duration,
        proposed_id: Option<&str>,
    ) -> impl Future<Output = Result<String, StoreError>> + Send;

    /// Renews the lease identified by `lease_id` for its original period.
    fn renew_lease(
        &self,
        path: &BlobPath,
        lease_id: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn release_lease(
        &self,
        path: &BlobPath,
        lease_id: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Uploads an empty block blob unless one already exists
    /// (`If-None-Match: *`).
    fn create_empty_blob(
        &self,
        path: &BlobPath,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Returns `true` if the container was created by this call.
    fn create_container_if_not_exists(
        &self,
        container: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn get_properties(
        &self,
        path: &BlobPath,
    ) -> impl Future<Output = Result<BlobProperties, StoreError>> + Send;

    /// Replaces the blob's metadata.
    ///
    /// A leased blob only accepts the write with its active `lease_id`.
    fn set_metadata(
        &self,
        path: &BlobPath,
        lease_id: Option<&str>,
        metadata: &HashMap<String, String>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
