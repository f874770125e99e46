//! PostgreSQL lease implementation over the stored lease functions.

use std::collections::HashMap;
use std::time::Duration;

use distributed_lease_core::error::{LeaseError, LeaseResult};
use distributed_lease_core::traits::LeaseBackend;
use distributed_lease_core::{
    BackendKind, LeaseRequest, LeaseSnapshot, LeaseToken, LockIdentity, validate_metadata_key,
    validate_period,
};
use sqlx::Row;
use tracing::{Span, instrument};

use crate::key::lease_name;
use crate::provider::SqlLeaseBackend;

/// Row returned by `leases_get_info`.
struct LeaseRow {
    is_available: bool,
    holder: Option<String>,
    metadata: HashMap<String, String>,
}

fn period_millis(period: Duration) -> i64 {
    i64::try_from(period.as_millis()).unwrap_or(i64::MAX).max(1)
}

impl SqlLeaseBackend {
    /// Calls the acquire-or-renew primitive; `true` if `requestor` now holds
    /// the lease until `now + period`.
    async fn try_acquire_or_renew(
        &self,
        name: &str,
        requestor: &str,
        period: Duration,
    ) -> LeaseResult<bool> {
        let row = sqlx::query(&self.statements.try_acquire_or_renew)
            .bind(name)
            .bind(requestor)
            .bind(period_millis(period))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| LeaseError::unknown(format!("acquire-or-renew failed for '{name}'"), e))?;

        row.try_get::<bool, _>(0)
            .map_err(|e| LeaseError::unknown("unexpected acquire-or-renew result", e))
    }

    /// Extends the lease only while `requestor` is still recorded as holder.
    ///
    /// An expired lease nobody else has taken can still be renewed; a
    /// released or taken-over one cannot.
    async fn renew_held(&self, name: &str, requestor: &str, period: Duration) -> LeaseResult<bool> {
        let row = sqlx::query(&self.statements.renew)
            .bind(name)
            .bind(requestor)
            .bind(period_millis(period))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| LeaseError::unknown(format!("renew failed for '{name}'"), e))?;

        row.try_get::<bool, _>(0)
            .map_err(|e| LeaseError::unknown("unexpected renew result", e))
    }

    async fn fetch_info(&self, name: &str) -> LeaseResult<Option<LeaseRow>> {
        let row = sqlx::query(&self.statements.get_info)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LeaseError::unknown(format!("failed to read lease '{name}'"), e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let is_available: bool = row
            .try_get("is_available")
            .map_err(|e| LeaseError::unknown("unexpected lease info row", e))?;
        let holder: Option<String> = row
            .try_get("holder")
            .map_err(|e| LeaseError::unknown("unexpected lease info row", e))?;
        let raw: Option<String> = row
            .try_get("metadata")
            .map_err(|e| LeaseError::unknown("unexpected lease info row", e))?;

        let metadata = match raw.as_deref() {
            None | Some("") => HashMap::new(),
            Some(json) => serde_json::from_str(json).map_err(|e| {
                LeaseError::unknown(format!("malformed metadata stored for '{name}'"), e)
            })?,
        };

        Ok(Some(LeaseRow {
            is_available,
            holder,
            metadata,
        }))
    }

    /// Returns the requestor id of the live holder, if any.
    #[instrument(skip(self), fields(lock.key = %identity, backend = "sql"))]
    pub async fn owner(&self, identity: &LockIdentity) -> LeaseResult<Option<String>> {
        self.check_scope(identity)?;
        let row = self.fetch_info(&lease_name(identity)).await?;
        Ok(row.and_then(|row| if row.is_available { None } else { row.holder }))
    }
}

impl LeaseBackend for SqlLeaseBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sql
    }

    #[instrument(
        skip(self, request),
        fields(
            lock.key = %request.identity(),
            backend = "sql",
            acquired = tracing::field::Empty,
        )
    )]
    async fn acquire(&self, request: &LeaseRequest) -> LeaseResult<LeaseToken> {
        self.check_scope(request.identity())?;
        validate_period(request.period())?;
        let name = lease_name(request.identity());

        let acquired = self
            .try_acquire_or_renew(&name, request.requestor_id(), request.period())
            .await?;
        Span::current().record("acquired", acquired);

        if acquired {
            Ok(LeaseToken::new(request.requestor_id()))
        } else {
            Err(LeaseError::conflict(format!(
                "lease '{name}' is held by another requestor"
            )))
        }
    }

    #[instrument(skip(self, token), fields(lock.key = %identity, backend = "sql"))]
    async fn renew(
        &self,
        identity: &LockIdentity,
        token: &LeaseToken,
        period: Duration,
    ) -> LeaseResult<()> {
        self.check_scope(identity)?;
        validate_period(period)?;
        let name = lease_name(identity);

        if self.renew_held(&name, token.as_str(), period).await? {
            Ok(())
        } else {
            Err(LeaseError::conflict(format!(
                "lease '{name}' is no longer held by '{token}'"
            )))
        }
    }

    #[instrument(skip(self, token), fields(lock.key = %identity, backend = "sql"))]
    async fn release(&self, identity: &LockIdentity, token: &LeaseToken) -> LeaseResult<()> {
        self.check_scope(identity)?;
        let name = lease_name(identity);

        sqlx::query(&self.statements.release)
            .bind(&name)
            .bind(token.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| LeaseError::unknown(format!("failed to release lease '{name}'"), e))?;
        Ok(())
    }

    #[instrument(skip(self, token, value), fields(lock.key = %identity, backend = "sql"))]
    async fn write_metadata(
        &self,
        identity: &LockIdentity,
        token: &LeaseToken,
        key: &str,
        value: &str,
    ) -> LeaseResult<()> {
        self.check_scope(identity)?;
        validate_metadata_key(key)?;
        let name = lease_name(identity);

        let row = sqlx::query(&self.statements.update_metadata)
            .bind(&name)
            .bind(token.as_str())
            .bind(key)
            .bind(value)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                LeaseError::unknown(format!("failed to update metadata of '{name}'"), e)
            })?;
        let updated: bool = row
            .try_get(0)
            .map_err(|e| LeaseError::unknown("unexpected metadata update result", e))?;

        if updated {
            Ok(())
        } else {
            Err(LeaseError::conflict(format!(
                "metadata write on '{name}' by '{token}', which does not hold the lease"
            )))
        }
    }

    #[instrument(skip(self), fields(lock.key = %identity, backend = "sql"))]
    async fn read_info(&self, identity: &LockIdentity) -> LeaseResult<LeaseSnapshot> {
        self.check_scope(identity)?;
        Ok(match self.fetch_info(&lease_name(identity)).await? {
            Some(row) => LeaseSnapshot {
                is_available: row.is_available,
                metadata: row.metadata,
            },
            None => LeaseSnapshot::never_created(),
        })
    }
}
