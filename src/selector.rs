//! Per-account backend selection and caching.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use distributed_lease_blob::{BlobConnectionString, BlobLeaseBackend};
use distributed_lease_core::error::{LeaseError, LeaseResult};
use distributed_lease_core::traits::LeaseBackend;
use distributed_lease_core::{BackendKind, LeaseRequest, LeaseSnapshot, LockHandle, LockIdentity};
use distributed_lease_file::FileLeaseBackend;
use distributed_lease_sql::{SqlConnection, SqlLeaseBackend};
use tracing::{Span, debug, info, instrument, warn};

use crate::any::AnyLeaseBackend;
use crate::settings::LeaseSettings;

/// Handle over whichever backend serves the lock's account.
pub type AnyLockHandle = LockHandle<Arc<AnyLeaseBackend>>;

/// Picks the backend for each account once and reuses it.
///
/// Resolution order for an account:
///
/// 1. a cached backend;
/// 2. the file backend when the settings force `file`;
/// 3. PostgreSQL when the account's connection string is a PostgreSQL URL
///    (or `sql` is forced) and a connection can be opened;
/// 4. object storage when the connection string is a storage connection
///    string;
/// 5. the file backend, with a warning.
///
/// Probing failures never surface as errors; they move on to the next
/// candidate. Concurrent first resolutions of one account may both probe, but
/// only the first backend to be inserted is kept.
pub struct BackendSelector {
    settings: LeaseSettings,
    backends: DashMap<String, Arc<AnyLeaseBackend>>,
}

impl BackendSelector {
    pub fn new(settings: LeaseSettings) -> Self {
        Self {
            settings,
            backends: DashMap::new(),
        }
    }

    /// Selector configured from `LEASE_*` environment variables.
    pub fn from_env() -> LeaseResult<Self> {
        Ok(Self::new(LeaseSettings::from_env()?))
    }

    pub fn settings(&self) -> &LeaseSettings {
        &self.settings
    }

    /// Returns the backend serving `account`, creating it on first use.
    #[instrument(skip(self), fields(account = %account, backend = tracing::field::Empty))]
    pub async fn resolve(&self, account: &str) -> LeaseResult<Arc<AnyLeaseBackend>> {
        let key = account.to_ascii_lowercase();
        let cached = self.backends.get(&key).map(|entry| Arc::clone(entry.value()));
        if let Some(backend) = cached {
            Span::current().record("backend", backend.kind().as_str());
            return Ok(backend);
        }

        let created = Arc::new(self.create(account).await?);
        let backend = Arc::clone(self.backends.entry(key).or_insert(created).value());
        Span::current().record("backend", backend.kind().as_str());
        Ok(backend)
    }

    async fn create(&self, account: &str) -> LeaseResult<AnyLeaseBackend> {
        let connection_string = self.settings.connection_string(account);

        match self.settings.backend_override() {
            Some(BackendKind::File) => return self.file_backend(),
            Some(BackendKind::Blob) => {
                let connection_string = connection_string.ok_or_else(|| {
                    LeaseError::validation(
                        "account",
                        format!("no storage connection string configured for '{account}'"),
                    )
                })?;
                return Ok(BlobLeaseBackend::from_connection_string(connection_string, account)?.into());
            }
            Some(BackendKind::Sql) | None => {}
        }

        if let Some(connection_string) = connection_string {
            let forced_sql = self.settings.backend_override() == Some(BackendKind::Sql);
            if (forced_sql || SqlConnection::is_valid_connection_string(connection_string))
                && let Some(backend) = self.probe_sql(account, connection_string).await?
            {
                return Ok(backend.into());
            }

            if BlobConnectionString::parse(connection_string).is_ok() {
                let backend = BlobLeaseBackend::from_connection_string(connection_string, account)?;
                info!(account, "using object storage leases");
                return Ok(backend.into());
            }
        }

        warn!(
            account,
            root = %self.settings.file_root_path().display(),
            "no usable coordination store configured, falling back to file leases"
        );
        self.file_backend()
    }

    async fn probe_sql(
        &self,
        account: &str,
        connection_string: &str,
    ) -> LeaseResult<Option<SqlLeaseBackend>> {
        let timeout: Duration = self.settings.probe_timeout_value();
        let Some(backend) = SqlLeaseBackend::probe(
            connection_string,
            timeout,
            account,
            self.settings.sql_schema_name(),
        )
        .await
        else {
            debug!(account, "relational probe failed");
            return Ok(None);
        };

        if self.settings.installs_sql_schema() {
            backend.install_schema().await?;
        }
        info!(account, schema = backend.schema(), "using relational leases");
        Ok(Some(backend))
    }

    fn file_backend(&self) -> LeaseResult<AnyLeaseBackend> {
        Ok(FileLeaseBackend::new(self.settings.file_root_path())?.into())
    }

    /// Best-effort acquisition on the backend serving the lock's account.
    pub async fn try_acquire(&self, request: &LeaseRequest) -> Option<AnyLockHandle> {
        let backend = match self.resolve(request.identity().scope()).await {
            Ok(backend) => backend,
            Err(e) => {
                debug!(lock.key = %request.identity(), "backend resolution failed: {e}");
                return None;
            }
        };
        LockHandle::try_acquire(backend, request).await
    }

    pub async fn acquire(&self, request: &LeaseRequest) -> LeaseResult<AnyLockHandle> {
        let backend = self.resolve(request.identity().scope()).await?;
        LockHandle::acquire(backend, request).await
    }

    /// Retries conflicts until acquired or `timeout` elapses.
    pub async fn acquire_timeout(
        &self,
        request: &LeaseRequest,
        timeout: Option<Duration>,
    ) -> LeaseResult<AnyLockHandle> {
        let backend = self.resolve(request.identity().scope()).await?;
        LockHandle::acquire_timeout(backend, request, timeout).await
    }

    pub async fn read_info(&self, identity: &LockIdentity) -> LeaseResult<LeaseSnapshot> {
        self.resolve(identity.scope()).await?.read_info(identity).await
    }

    /// Number of accounts with a resolved backend.
    pub fn cached_accounts(&self) -> usize {
        self.backends.len()
    }

    /// Forgets every resolved backend; the next call re-probes.
    pub fn clear(&self) {
        self.backends.clear();
    }
}

impl Default for BackendSelector {
    fn default() -> Self {
        Self::new(LeaseSettings::default())
    }
}

impl std::fmt::Debug for BackendSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSelector")
            .field("settings", &self.settings)
            .field("cached_accounts", &self.backends.len())
            .finish()
    }
}
