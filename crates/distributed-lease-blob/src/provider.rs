//! Object store lease backend configuration.

use std::fmt;
use std::sync::Arc;

use distributed_lease_core::error::{LeaseError, LeaseResult};
use distributed_lease_core::identity::LockIdentity;

use crate::azure::AzureBlobClient;
use crate::client::BlobStore;

/// Lease backend over an object store's native blob lease.
///
/// Generic over the transport so the same lease algorithm runs against the
/// Azure REST API or an in-memory store.
pub struct BlobLeaseBackend<S = AzureBlobClient> {
    pub(crate) store: Arc<S>,
    pub(crate) account: Option<Arc<str>>,
}

impl<S: BlobStore> BlobLeaseBackend<S> {
    /// Creates a backend over `store` serving any scope.
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
            account: None,
        }
    }

    /// Binds the backend to one storage account.
    ///
    /// Identities whose scope names another account are rejected, since the
    /// store can only reach this one.
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into().into());
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    pub(crate) fn check_scope(&self, identity: &LockIdentity) -> LeaseResult<()> {
        match self.account.as_deref() {
            Some(account) if !account.eq_ignore_ascii_case(identity.scope()) => {
                Err(LeaseError::validation(
                    "scope",
                    format!(
                        "backend serves account '{account}', not '{}'",
                        identity.scope()
                    ),
                ))
            }
            _ => Ok(()),
        }
    }
}

impl BlobLeaseBackend<AzureBlobClient> {
    /// Creates a backend for `account` from a storage connection string.
    pub fn from_connection_string(
        connection_string: &str,
        account: impl Into<String>,
    ) -> LeaseResult<Self> {
        let client = AzureBlobClient::from_connection_string(connection_string)?;
        Ok(Self::new(client).with_account(account))
    }
}

impl<S> Clone for BlobLeaseBackend<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            account: self.account.clone(),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for BlobLeaseBackend<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobLeaseBackend")
            .field("store", &self.store)
            .field("account", &self.account)
            .finish()
    }
}
