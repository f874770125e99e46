//! Object storage backend for lease-based distributed locks.
//!
//! Each lock is a zero-length blob; holding the lock means holding the blob's
//! native lease. The lease algorithm is written against [`BlobStore`], with
//! [`AzureBlobClient`] talking to Azure Blob Storage and [`MemoryBlobStore`]
//! emulating it in-process.

pub mod azure;
pub mod client;
pub mod key;
pub mod lock;
pub mod memory;
pub mod provider;

pub use azure::{AzureBlobClient, AzureBlobClientBuilder, BlobConnectionString};
pub use client::{BlobPath, BlobProperties, BlobStore, LeaseState, LeaseStatus, StoreError};
pub use key::blob_path;
pub use memory::MemoryBlobStore;
pub use provider::BlobLeaseBackend;
