//! The lease contract every backend implements.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::LeaseResult;
use crate::handle::LockHandle;
use crate::identity::LockIdentity;
use crate::lease::{BackendKind, LeaseRequest, LeaseSnapshot, LeaseToken};

// ============================================================================
// Lease Backend Trait
// ============================================================================

/// A remote store able to arbitrate exclusive, time-bounded leases.
///
/// Implementations must guarantee at most one live holder per
/// [`LockIdentity`]. Exclusivity is enforced by the backend itself (native
/// lease, atomic SQL upsert, deterministic file winner), never by in-process
/// coordination, so every method is safe to call concurrently.
///
/// # Failure mapping
///
/// * [`LeaseError::Conflict`](crate::LeaseError::Conflict) - another holder is
///   live, or the caller lost ownership
/// * [`LeaseError::Unknown`](crate::LeaseError::Unknown) - backend fault; the
///   lease state is unknown
/// * [`LeaseError::Validation`](crate::LeaseError::Validation) - rejected
///   before any I/O
///
/// # Example
///
/// ```rust,ignore
/// let request = LeaseRequest::new(identity, Duration::from_secs(15), instance_id)?;
/// if let Some(token) = backend.try_acquire(&request).await {
///     backend.renew(request.identity(), &token, request.period()).await?;
///     backend.release(request.identity(), &token).await?;
/// }
/// ```
pub trait LeaseBackend: Send + Sync {
    /// Which backend family this is.
    fn kind(&self) -> BackendKind;

    /// Best-effort acquisition.
    ///
    /// Never fails: conflicts, backend errors and validation errors all come
    /// back as `None`.
    fn try_acquire(
        &self,
        request: &LeaseRequest,
    ) -> impl Future<Output = Option<LeaseToken>> + Send {
        async move {
            match self.acquire(request).await {
                Ok(token) => Some(token),
                Err(e) => {
                    debug!(
                        lock.key = %request.identity(),
                        backend = %self.kind(),
                        reason = %e.failure_reason(),
                        "lease not acquired: {e}"
                    );
                    None
                }
            }
        }
    }

    /// Acquires the lease or reports why not.
    ///
    /// # Returns
    ///
    /// * `Ok(token)` - the caller now holds the lease for `request.period()`
    /// * `Err(Conflict)` - another live holder exists
    /// * `Err(Unknown)` - any other backend error
    fn acquire(
        &self,
        request: &LeaseRequest,
    ) -> impl Future<Output = LeaseResult<LeaseToken>> + Send;

    /// Extends a held lease by `period` from now.
    ///
    /// Fails with `Conflict` if `token` no longer identifies the live holder.
    fn renew(
        &self,
        identity: &LockIdentity,
        token: &LeaseToken,
        period: Duration,
    ) -> impl Future<Output = LeaseResult<()>> + Send;

    /// Gives up a lease.
    ///
    /// Idempotent: releasing an expired, stolen or already released lease
    /// succeeds silently.
    fn release(
        &self,
        identity: &LockIdentity,
        token: &LeaseToken,
    ) -> impl Future<Output = LeaseResult<()>> + Send;

    /// Merges `key = value` into the lease metadata.
    ///
    /// The caller must hold the lease identified by `token`; otherwise the
    /// write fails with `Conflict`.
    fn write_metadata(
        &self,
        identity: &LockIdentity,
        token: &LeaseToken,
        key: &str,
        value: &str,
    ) -> impl Future<Output = LeaseResult<()>> + Send;

    /// Reads availability and metadata regardless of who holds the lease.
    ///
    /// A lock that was never created reads as available with no metadata.
    fn read_info(
        &self,
        identity: &LockIdentity,
    ) -> impl Future<Output = LeaseResult<LeaseSnapshot>> + Send;
}

impl<B: LeaseBackend> LeaseBackend for Arc<B> {
    fn kind(&self) -> BackendKind {
        (**self).kind()
    }

    fn try_acquire(
        &self,
        request: &LeaseRequest,
    ) -> impl Future<Output = Option<LeaseToken>> + Send {
        (**self).try_acquire(request)
    }

    fn acquire(
        &self,
        request: &LeaseRequest,
    ) -> impl Future<Output = LeaseResult<LeaseToken>> + Send {
        (**self).acquire(request)
    }

    fn renew(
        &self,
        identity: &LockIdentity,
        token: &LeaseToken,
        period: Duration,
    ) -> impl Future<Output = LeaseResult<()>> + Send {
        (**self).renew(identity, token, period)
    }

    fn release(
        &self,
        identity: &LockIdentity,
        token: &LeaseToken,
    ) -> impl Future<Output = LeaseResult<()>> + Send {
        (**self).release(identity, token)
    }

    fn write_metadata(
        &self,
        identity: &LockIdentity,
        token: &LeaseToken,
        key: &str,
        value: &str,
    ) -> impl Future<Output = LeaseResult<()>> + Send {
        (**self).write_metadata(identity, token, key, value)
    }

    fn read_info(
        &self,
        identity: &LockIdentity,
    ) -> impl Future<Output = LeaseResult<LeaseSnapshot>> + Send {
        (**self).read_info(identity)
    }
}

// ============================================================================
// Convenience Extensions
// ============================================================================

/// Extension trait wrapping acquisitions in a [`LockHandle`].
pub trait LeaseBackendExt: LeaseBackend + Clone {
    /// Best-effort acquisition returning a handle.
    fn try_lock(
        &self,
        request: &LeaseRequest,
    ) -> impl Future<Output = Option<LockHandle<Self>>> + Send {
        LockHandle::try_acquire(self.clone(), request)
    }

    /// Acquisition returning a handle or the failure.
    fn lock(
        &self,
        request: &LeaseRequest,
    ) -> impl Future<Output = LeaseResult<LockHandle<Self>>> + Send {
        LockHandle::acquire(self.clone(), request)
    }

    /// Retries on conflict until acquired or `timeout` elapses.
    ///
    /// `None` waits indefinitely.
    fn lock_timeout(
        &self,
        request: &LeaseRequest,
        timeout: Option<Duration>,
    ) -> impl Future<Output = LeaseResult<LockHandle<Self>>> + Send {
        LockHandle::acquire_timeout(self.clone(), request, timeout)
    }
}

// Blanket implementation for all cloneable backends
impl<T: LeaseBackend + Clone> LeaseBackendExt for T {}
