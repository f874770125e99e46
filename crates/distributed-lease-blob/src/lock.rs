//! Blob lease implementation.

use std::time::Duration;

use distributed_lease_core::error::{LeaseError, LeaseResult};
use distributed_lease_core::traits::LeaseBackend;
use distributed_lease_core::{
    BackendKind, LeaseRequest, LeaseSnapshot, LeaseToken, LockIdentity, validate_metadata_key,
};
use reqwest::StatusCode;
use tracing::{Span, debug, instrument};

use crate::client::{BlobPath, BlobStore, LeaseStatus, StoreError};
use crate::key::{blob_path, validate_metadata_name};
use crate::provider::BlobLeaseBackend;

fn is_any(err: &StoreError, statuses: &[StatusCode]) -> bool {
    err.status_code().is_some_and(|s| statuses.contains(&s))
}

fn lost_ownership(err: &StoreError) -> bool {
    is_any(
        err,
        &[
            StatusCode::NOT_FOUND,
            StatusCode::CONFLICT,
            StatusCode::PRECONDITION_FAILED,
        ],
    )
}

impl<S: BlobStore> BlobLeaseBackend<S> {
    fn check_period(&self, period: Duration) -> LeaseResult<()> {
        let range = self.store.lease_period_range();
        if range.contains(&period) {
            Ok(())
        } else {
            Err(LeaseError::validation(
                "period",
                format!(
                    "{period:?} is outside the supported lease range {:?}..={:?}",
                    range.start(),
                    range.end()
                ),
            ))
        }
    }

    /// Makes sure the lock blob exists.
    ///
    /// Someone else creating it first (409/412) is not an error; the lease
    /// attempt that follows decides who is ahead.
    async fn ensure_blob(&self, path: &BlobPath) -> LeaseResult<()> {
        match self.store.create_empty_blob(path).await {
            Ok(()) => return Ok(()),
            Err(e) if is_any(&e, &[StatusCode::CONFLICT, StatusCode::PRECONDITION_FAILED]) => {
                return Ok(());
            }
            Err(e) if e.is_status(StatusCode::NOT_FOUND) => {}
            Err(e) => return Err(LeaseError::unknown(format!("failed to create blob '{path}'"), e)),
        }

        // Directories are virtual; only the container has to exist.
        let created = self
            .store
            .create_container_if_not_exists(&path.container)
            .await
            .map_err(|e| {
                LeaseError::unknown(format!("failed to create container '{}'", path.container), e)
            })?;
        debug!(container = %path.container, created, "lease container ensured");

        match self.store.create_empty_blob(path).await {
            Ok(()) => Ok(()),
            Err(e) if is_any(&e, &[StatusCode::CONFLICT, StatusCode::PRECONDITION_FAILED]) => Ok(()),
            Err(e) => Err(LeaseError::unknown(format!("failed to create blob '{path}'"), e)),
        }
    }

    async fn acquire_internal(&self, request: &LeaseRequest) -> LeaseResult<LeaseToken> {
        self.check_scope(request.identity())?;
        self.check_period(request.period())?;
        let path = blob_path(request.identity())?;

        // The blob usually exists; only a 404 pays for creating it.
        match self
            .store
            .acquire_lease(&path, request.period(), request.proposed())
            .await
        {
            Ok(lease_id) => return Ok(LeaseToken::new(lease_id)),
            Err(e) if e.is_status(StatusCode::NOT_FOUND) => {
                debug!(blob = %path, "lock blob missing, creating it");
            }
            Err(e) if e.is_status(StatusCode::CONFLICT) => {
                return Err(LeaseError::conflict_from(
                    format!("blob '{path}' is leased by another holder"),
                    e,
                ));
            }
            Err(e) => {
                return Err(LeaseError::unknown(format!("failed to lease blob '{path}'"), e));
            }
        }

        self.ensure_blob(&path).await?;

        match self
            .store
            .acquire_lease(&path, request.period(), request.proposed())
            .await
        {
            Ok(lease_id) => Ok(LeaseToken::new(lease_id)),
            Err(e) if e.is_status(StatusCode::CONFLICT) => Err(LeaseError::conflict_from(
                format!("blob '{path}' is leased by another holder"),
                e,
            )),
            Err(e) => Err(LeaseError::unknown(format!("failed to lease blob '{path}'"), e)),
        }
    }
}

impl<S: BlobStore> LeaseBackend for BlobLeaseBackend<S> {
    fn kind(&self) -> BackendKind {
        BackendKind::Blob
    }

    #[instrument(
        skip(self, request),
        fields(
            lock.key = %request.identity(),
            backend = "blob",
            acquired = tracing::field::Empty,
            error = tracing::field::Empty,
        )
    )]
    async fn acquire(&self, request: &LeaseRequest) -> LeaseResult<LeaseToken> {
        let result = self.acquire_internal(request).await;
        Span::current().record("acquired", result.is_ok());
        if let Err(e) = &result
            && !e.is_conflict()
        {
            Span::current().record("error", e.to_string());
        }
        result
    }

    /// Renews for the period fixed at acquisition; the store has no way to
    /// change it, so `period` is only range-checked.
    #[instrument(skip(self, token), fields(lock.key = %identity, backend = "blob"))]
    async fn renew(
        &self,
        identity: &LockIdentity,
        token: &LeaseToken,
        period: Duration,
    ) -> LeaseResult<()> {
        self.check_scope(identity)?;
        self.check_period(period)?;
        let path = blob_path(identity)?;

        match self.store.renew_lease(&path, token.as_str()).await {
            Ok(()) => Ok(()),
            Err(e) if lost_ownership(&e) => Err(LeaseError::conflict_from(
                format!("lease on '{path}' is no longer held by this token"),
                e,
            )),
            Err(e) => Err(LeaseError::unknown(format!("failed to renew lease on '{path}'"), e)),
        }
    }

    #[instrument(skip(self, token), fields(lock.key = %identity, backend = "blob"))]
    async fn release(&self, identity: &LockIdentity, token: &LeaseToken) -> LeaseResult<()> {
        self.check_scope(identity)?;
        let path = blob_path(identity)?;

        match self.store.release_lease(&path, token.as_str()).await {
            Ok(()) => Ok(()),
            // Blob gone, or another lease is active: nothing left to release.
            Err(e) if is_any(&e, &[StatusCode::NOT_FOUND, StatusCode::CONFLICT]) => {
                debug!(blob = %path, "release ignored: {e}");
                Ok(())
            }
            Err(e) => Err(LeaseError::unknown(format!("failed to release lease on '{path}'"), e)),
        }
    }

    #[instrument(skip(self, token, value), fields(lock.key = %identity, backend = "blob"))]
    async fn write_metadata(
        &self,
        identity: &LockIdentity,
        token: &LeaseToken,
        key: &str,
        value: &str,
    ) -> LeaseResult<()> {
        self.check_scope(identity)?;
        validate_metadata_key(key)?;
        validate_metadata_name(key)?;
        // The service hands metadata names back lowercased; store them that way
        // so every store reads back the key it was given.
        let key = key.to_ascii_lowercase();
        let path = blob_path(identity)?;

        let conflict_or_unknown = |e: StoreError| {
            if lost_ownership(&e) {
                LeaseError::conflict_from(format!("metadata write on '{path}' by a non-holder"), e)
            } else {
                LeaseError::unknown(format!("failed to write metadata of '{path}'"), e)
            }
        };

        // Set Blob Metadata replaces everything; merge into what is there.
        let mut metadata = self
            .store
            .get_properties(&path)
            .await
            .map_err(conflict_or_unknown)?
            .metadata;
        metadata.insert(key, value.to_string());

        self.store
            .set_metadata(&path, Some(token.as_str()), &metadata)
            .await
            .map_err(conflict_or_unknown)
    }

    #[instrument(skip(self), fields(lock.key = %identity, backend = "blob"))]
    async fn read_info(&self, identity: &LockIdentity) -> LeaseResult<LeaseSnapshot> {
        self.check_scope(identity)?;
        let path = blob_path(identity)?;

        match self.store.get_properties(&path).await {
            Ok(properties) => Ok(LeaseSnapshot {
                is_available: properties.lease_status == LeaseStatus::Unlocked,
                metadata: properties.metadata,
            }),
            Err(e) if e.is_status(StatusCode::NOT_FOUND) => Ok(LeaseSnapshot::never_created()),
            Err(e) => Err(LeaseError::unknown(format!("failed to read blob '{path}'"), e)),
        }
    }
}
