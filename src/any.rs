//! A lease backend chosen at runtime.

use std::time::Duration;

use distributed_lease_blob::BlobLeaseBackend;
use distributed_lease_core::error::LeaseResult;
use distributed_lease_core::traits::LeaseBackend;
use distributed_lease_core::{BackendKind, LeaseRequest, LeaseSnapshot, LeaseToken, LockIdentity};
use distributed_lease_file::FileLeaseBackend;
use distributed_lease_sql::SqlLeaseBackend;

/// One of the concrete backends, dispatching every call to it.
#[derive(Debug, Clone)]
pub enum AnyLeaseBackend {
    Blob(BlobLeaseBackend),
    Sql(SqlLeaseBackend),
    File(FileLeaseBackend),
}

impl AnyLeaseBackend {
    pub fn as_file(&self) -> Option<&FileLeaseBackend> {
        match self {
            Self::File(backend) => Some(backend),
            _ => None,
        }
    }

    pub fn as_sql(&self) -> Option<&SqlLeaseBackend> {
        match self {
            Self::Sql(backend) => Some(backend),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&BlobLeaseBackend> {
        match self {
            Self::Blob(backend) => Some(backend),
            _ => None,
        }
    }
}

impl From<BlobLeaseBackend> for AnyLeaseBackend {
    fn from(backend: BlobLeaseBackend) -> Self {
        Self::Blob(backend)
    }
}

impl From<SqlLeaseBackend> for AnyLeaseBackend {
    fn from(backend: SqlLeaseBackend) -> Self {
        Self::Sql(backend)
    }
}

impl From<FileLeaseBackend> for AnyLeaseBackend {
    fn from(backend: FileLeaseBackend) -> Self {
        Self::File(backend)
    }
}

impl LeaseBackend for AnyLeaseBackend {
    fn kind(&self) -> BackendKind {
        match self {
            Self::Blob(b) => b.kind(),
            Self::Sql(b) => b.kind(),
            Self::File(b) => b.kind(),
        }
    }

    async fn acquire(&self, request: &LeaseRequest) -> LeaseResult<LeaseToken> {
        match self {
            Self::Blob(b) => b.acquire(request).await,
            Self::Sql(b) => b.acquire(request).await,
            Self::File(b) => b.acquire(request).await,
        }
    }

    async fn renew(
        &self,
        identity: &LockIdentity,
        token: &LeaseToken,
        period: Duration,
    ) -> LeaseResult<()> {
        match self {
            Self::Blob(b) => b.renew(identity, token, period).await,
            Self::Sql(b) => b.renew(identity, token, period).await,
            Self::File(b) => b.renew(identity, token, period).await,
        }
    }

    async fn release(&self, identity: &LockIdentity, token: &LeaseToken) -> LeaseResult<()> {
        match self {
            Self::Blob(b) => b.release(identity, token).await,
            Self::Sql(b) => b.release(identity, token).await,
            Self::File(b) => b.release(identity, token).await,
        }
    }

    async fn write_metadata(
        &self,
        identity: &LockIdentity,
        token: &LeaseToken,
        key: &str,
        value: &str,
    ) -> LeaseResult<()> {
        match self {
            Self::Blob(b) => b.write_metadata(identity, token, key, value).await,
            Self::Sql(b) => b.write_metadata(identity, token, key, value).await,
            Self::File(b) => b.write_metadata(identity, token, key, value).await,
        }
    }

    async fn read_info(&self, identity: &LockIdentity) -> LeaseResult<LeaseSnapshot> {
        match self {
            Self::Blob(b) => b.read_info(identity).await,
            Self::Sql(b) => b.read_info(identity).await,
            Self::File(b) => b.read_info(identity).await,
        }
    }
}
