//! Process-local handle to a held lease.

use std::time::{Duration, Instant, SystemTime};

use tokio::sync::watch;
use tracing::{Span, debug, instrument, warn};

use crate::error::{LeaseError, LeaseResult};
use crate::identity::LockIdentity;
use crate::lease::{LeaseRequest, LeaseSnapshot, LeaseToken, validate_period};
use crate::timeout::{Backoff, TimeoutValue};
use crate::traits::LeaseBackend;

/// Handle for a held lease.
///
/// Created only by a successful acquisition. A successful [`renew`] pushes the
/// expiry deadline forward; a renew that reports `Conflict` marks the handle
/// lost and every later renew fails fast. [`release`] consumes the handle.
///
/// Dropping a handle does not release the lease; it expires after its period.
/// Renewal cadence is up to the caller, who must renew strictly before
/// [`expires_at`].
///
/// [`renew`]: LockHandle::renew
/// [`release`]: LockHandle::release
/// [`expires_at`]: LockHandle::expires_at
///
/// # Example
///
/// ```rust,ignore
/// let mut handle = LockHandle::acquire(backend, &request).await?;
/// tokio::select! {
///     _ = handle.lost_token().changed() => eprintln!("lease lost"),
///     _ = do_work() => {}
/// }
/// handle.release().await?;
/// ```
pub struct LockHandle<B: LeaseBackend> {
    backend: B,
    identity: LockIdentity,
    token: LeaseToken,
    acquired_at: SystemTime,
    period: Duration,
    expires_at: Instant,
    lost_sender: watch::Sender<bool>,
    lost_receiver: watch::Receiver<bool>,
}

impl<B: LeaseBackend> LockHandle<B> {
    fn new(backend: B, request: &LeaseRequest, token: LeaseToken, started: Instant) -> Self {
        let (lost_sender, lost_receiver) = watch::channel(false);
        Self {
            backend,
            identity: request.identity().clone(),
            token,
            acquired_at: SystemTime::now(),
            period: request.period(),
            // Measured from before the call went out, so the local deadline
            // never outlives the backend's.
            expires_at: deadline(started, request.period()),
            lost_sender,
            lost_receiver,
        }
    }

    /// Attempts to acquire without waiting; `None` on any failure.
    pub async fn try_acquire(backend: B, request: &LeaseRequest) -> Option<Self> {
        let started = Instant::now();
        let token = backend.try_acquire(request).await?;
        Some(Self::new(backend, request, token, started))
    }

    /// Acquires the lease or returns why it could not.
    #[instrument(skip_all, fields(lock.key = %request.identity(), backend = %backend.kind()))]
    pub async fn acquire(backend: B, request: &LeaseRequest) -> LeaseResult<Self> {
        let started = Instant::now();
        let token = backend.acquire(request).await?;
        Ok(Self::new(backend, request, token, started))
    }

    /// Acquires, retrying conflicts with exponential backoff.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Maximum time to wait. `None` means wait indefinitely.
    ///
    /// # Returns
    ///
    /// * `Ok(handle)` - Lease acquired
    /// * `Err(LeaseError::Conflict)` - Still contended when the timeout expired
    /// * `Err(...)` - Validation or backend failure, returned immediately
    #[instrument(
        skip_all,
        fields(
            lock.key = %request.identity(),
            backend = %backend.kind(),
            timeout = ?timeout,
            acquired = tracing::field::Empty,
            elapsed_ms = tracing::field::Empty,
            error = tracing::field::Empty,
        )
    )]
    pub async fn acquire_timeout(
        backend: B,
        request: &LeaseRequest,
        timeout: Option<Duration>,
    ) -> LeaseResult<Self> {
        let timeout_value = TimeoutValue::from(timeout);
        let start = Instant::now();
        let mut backoff = Backoff::new();

        loop {
            let attempt_started = Instant::now();
            match backend.acquire(request).await {
                Ok(token) => {
                    Span::current().record("acquired", true);
                    Span::current().record("elapsed_ms", start.elapsed().as_millis() as u64);
                    return Ok(Self::new(backend, request, token, attempt_started));
                }
                Err(e) if e.is_conflict() => {
                    let remaining = timeout_value.remaining(start);
                    if remaining.is_some_and(|r| r.is_zero()) {
                        Span::current().record("acquired", false);
                        Span::current().record("error", "timeout");
                        return Err(LeaseError::conflict(format!(
                            "lease still held after waiting {:?}",
                            timeout_value.as_duration().unwrap_or_default()
                        )));
                    }
                    let delay = backoff.next_delay(remaining);
                    debug!(delay_ms = delay.as_millis() as u64, "lease held, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn identity(&self) -> &LockIdentity {
        &self.identity
    }

    pub fn token(&self) -> &LeaseToken {
        &self.token
    }

    /// Wall-clock time of the acquisition.
    pub fn acquired_at(&self) -> SystemTime {
        self.acquired_at
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Local deadline by which the lease must be renewed.
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Time left before [`expires_at`](Self::expires_at).
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Whether a renew has reported that ownership was lost.
    pub fn is_lost(&self) -> bool {
        *self.lost_receiver.borrow()
    }

    /// Returns a receiver that yields `true` once ownership is lost.
    ///
    /// Flips only when [`renew`](Self::renew) observes a conflict; no
    /// background task watches the lease.
    pub fn lost_token(&self) -> &watch::Receiver<bool> {
        &self.lost_receiver
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Renews for the original period.
    pub async fn renew(&mut self) -> LeaseResult<()> {
        self.renew_for(self.period).await
    }

    /// Renews for `period` from now.
    #[instrument(skip(self), fields(lock.key = %self.identity, backend = %self.backend.kind()))]
    pub async fn renew_for(&mut self, period: Duration) -> LeaseResult<()> {
        if self.is_lost() {
            return Err(LeaseError::conflict("lease ownership was already lost"));
        }
        validate_period(period)?;

        let started = Instant::now();
        match self.backend.renew(&self.identity, &self.token, period).await {
            Ok(()) => {
                self.period = period;
                self.expires_at = deadline(started, period);
                Ok(())
            }
            Err(e) => {
                if e.is_conflict() {
                    warn!("lease lost on renew: {e}");
                    self.lost_sender.send_replace(true);
                }
                Err(e)
            }
        }
    }

    /// Merges `key = value` into the lease metadata.
    pub async fn write_metadata(&self, key: &str, value: &str) -> LeaseResult<()> {
        self.backend
            .write_metadata(&self.identity, &self.token, key, value)
            .await
    }

    /// Reads the current snapshot of this lease.
    pub async fn read_info(&self) -> LeaseResult<LeaseSnapshot> {
        self.backend.read_info(&self.identity).await
    }

    /// Releases the lease. Succeeds even if it already expired or was taken.
    #[instrument(skip(self), fields(lock.key = %self.identity, backend = %self.backend.kind()))]
    pub async fn release(self) -> LeaseResult<()> {
        self.backend.release(&self.identity, &self.token).await
    }
}

/// Local deadline `period` after `started`. A sum the clock cannot represent
/// yields `started`, so the handle reports itself expired rather than
/// claiming a lease it cannot track.
fn deadline(started: Instant, period: Duration) -> Instant {
    started.checked_add(period).unwrap_or(started)
}

impl<B: LeaseBackend> std::fmt::Debug for LockHandle<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("identity", &self.identity)
            .field("token", &self.token)
            .field("backend", &self.backend.kind())
            .field("period", &self.period)
            .field("lost", &self.is_lost())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_does_not_overflow() {
        let now = Instant::now();
        assert_eq!(deadline(now, Duration::from_secs(30)), now + Duration::from_secs(30));
        assert_eq!(deadline(now, Duration::MAX), now);
    }
}
