//! In-process blob store with Azure lease semantics.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use uuid::Uuid;

use crate::client::{BlobPath, BlobProperties, BlobStore, LeaseState, LeaseStatus, StoreError};

#[derive(Debug, Clone)]
struct Lease {
    id: String,
    period: Duration,
    expires_at: Instant,
    released: bool,
}

impl Lease {
    fn is_active(&self, now: Instant) -> bool {
        !self.released && self.expires_at > now
    }
}

#[derive(Debug, Default)]
struct Blob {
    lease: Option<Lease>,
    metadata: HashMap<String, String>,
}

impl Blob {
    fn active_lease(&self, now: Instant) -> Option<&Lease> {
        self.lease.as_ref().filter(|lease| lease.is_active(now))
    }
}

#[derive(Debug, Default)]
struct State {
    containers: HashMap<String, HashMap<String, Blob>>,
}

impl State {
    fn blob_mut(&mut self, path: &BlobPath) -> Result<&mut Blob, StoreError> {
        let container = self
            .containers
            .get_mut(&path.container)
            .ok_or_else(|| StoreError::status(StatusCode::NOT_FOUND, "ContainerNotFound"))?;
        container
            .get_mut(&path.blob)
            .ok_or_else(|| StoreError::status(StatusCode::NOT_FOUND, "BlobNotFound"))
    }
}

/// Rejects periods the clock cannot add, as the service rejects a malformed
/// lease duration header.
fn lease_deadline(now: Instant, period: Duration) -> Result<Instant, StoreError> {
    now.checked_add(period)
        .ok_or_else(|| StoreError::status(StatusCode::BAD_REQUEST, "InvalidHeaderValue"))
}

/// A [`BlobStore`] kept in memory.
///
/// Mirrors the service's lease state machine: an expired lease can still be
/// renewed or released with its id until someone else acquires the blob.
/// Clones share the same state, so several backends built over clones contend
/// as if they talked to one storage account.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    state: Arc<Mutex<State>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether `path` exists.
    pub fn contains(&self, path: &BlobPath) -> bool {
        self.state()
            .containers
            .get(&path.container)
            .is_some_and(|c| c.contains_key(&path.blob))
    }
}

impl BlobStore for MemoryBlobStore {
    async fn acquire_lease(
        &self,
        path: &BlobPath,
        period: Duration,
        proposed_id: Option<&str>,
    ) -> Result<String, StoreError> {
        let now = Instant::now();
        let mut state = self.state();
        let blob = state.blob_mut(path)?;

        if let Some(active) = blob.active_lease(now)
            && proposed_id != Some(active.id.as_str())
        {
            return Err(StoreError::status(StatusCode::CONFLICT, "LeaseAlreadyPresent"));
        }

        let expires_at = lease_deadline(now, period)?;
        let id = proposed_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        blob.lease = Some(Lease {
            id: id.clone(),
            period,
            expires_at,
            released: false,
        });
        Ok(id)
    }

    async fn renew_lease(&self, path: &BlobPath, lease_id: &str) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut state = self.state();
        let blob = state.blob_mut(path)?;

        match blob.lease.as_mut() {
            Some(lease) if lease.id == lease_id && !lease.released => {
                lease.expires_at = lease_deadline(now, lease.period)?;
                Ok(())
            }
            Some(lease) if !lease.released => Err(StoreError::status(
                StatusCode::CONFLICT,
                "LeaseIdMismatchWithLeaseOperation",
            )),
            _ => Err(StoreError::status(
                StatusCode::CONFLICT,
                "LeaseNotPresentWithLeaseOperation",
            )),
        }
    }

    async fn release_lease(&self, path: &BlobPath, lease_id: &str) -> Result<(), StoreError> {
        let mut state = self.state();
        let blob = state.blob_mut(path)?;

        match blob.lease.as_mut() {
            Some(lease) if lease.id == lease_id => {
                lease.released = true;
                Ok(())
            }
            Some(lease) if !lease.released => Err(StoreError::status(
                StatusCode::CONFLICT,
                "LeaseIdMismatchWithLeaseOperation",
            )),
            _ => Err(StoreError::status(
                StatusCode::CONFLICT,
                "LeaseNotPresentWithLeaseOperation",
            )),
        }
    }

    async fn create_empty_blob(&self, path: &BlobPath) -> Result<(), StoreError> {
        let mut state = self.state();
        let container = state
            .containers
            .get_mut(&path.container)
            .ok_or_else(|| StoreError::status(StatusCode::NOT_FOUND, "ContainerNotFound"))?;

        if container.contains_key(&path.blob) {
            return Err(StoreError::status(StatusCode::CONFLICT, "BlobAlreadyExists"));
        }
        container.insert(path.blob.clone(), Blob::default());
        Ok(())
    }

    async fn create_container_if_not_exists(&self, container: &str) -> Result<bool, StoreError> {
        let mut state = self.state();
        if state.containers.contains_key(container) {
            return Ok(false);
        }
        state
            .containers
            .insert(container.to_string(), HashMap::new());
        Ok(true)
    }

    async fn get_properties(&self, path: &BlobPath) -> Result<BlobProperties, StoreError> {
        let now = Instant::now();
        let mut state = self.state();
        let blob = state.blob_mut(path)?;

        let (lease_status, lease_state) = match &blob.lease {
            Some(lease) if lease.is_active(now) => (LeaseStatus::Locked, LeaseState::Leased),
            Some(lease) if !lease.released => (LeaseStatus::Unlocked, LeaseState::Expired),
            _ => (LeaseStatus::Unlocked, LeaseState::Available),
        };

        Ok(BlobProperties {
            lease_status,
            lease_state,
            metadata: blob.metadata.clone(),
        })
    }

    async fn set_metadata(
        &self,
        path: &BlobPath,
        lease_id: Option<&str>,
        metadata: &HashMap<String, String>,
    ) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut state = self.state();
        let blob = state.blob_mut(path)?;

        match (blob.active_lease(now), lease_id) {
            (Some(_), None) => {
                return Err(StoreError::status(
                    StatusCode::PRECONDITION_FAILED,
                    "LeaseIdMissing",
                ));
            }
            (Some(active), Some(id)) if active.id != id => {
                return Err(StoreError::status(
                    StatusCode::PRECONDITION_FAILED,
                    "LeaseIdMismatchWithBlobOperation",
                ));
            }
            (None, Some(_)) => {
                return Err(StoreError::status(
                    StatusCode::PRECONDITION_FAILED,
                    "LeaseNotPresentWithBlobOperation",
                ));
            }
            _ => {}
        }

        blob.metadata = metadata.clone();
        Ok(())
    }
}
