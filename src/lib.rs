//! Lease-based distributed locks.
//!
//! Mutual exclusion across processes and machines that share nothing but a
//! durable coordination store. Three interchangeable backends implement the
//! same [`LeaseBackend`] contract:
//!
//! - [`blob`]: object storage (Azure Blob) native leases
//! - [`sql`]: PostgreSQL with an atomic acquire-or-renew function
//! - [`file`]: deterministic arbitration among candidate files on a shared
//!   filesystem, used when nothing else is configured
//!
//! [`BackendSelector`] picks a backend per account from [`LeaseSettings`] and
//! caches it.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use distributed_lease::prelude::*;
//!
//! # async fn example() -> LeaseResult<()> {
//! let selector = BackendSelector::new(LeaseSettings::from_env()?);
//!
//! let identity = LockIdentity::new("storage", ["webjobs-hosts", "singleton"], "nightly-report")?;
//! let request = LeaseRequest::new(identity, Duration::from_secs(30), "instance-42")?;
//!
//! if let Some(mut handle) = selector.try_acquire(&request).await {
//!     // ... do the singleton work, renewing before `handle.expires_at()` ...
//!     handle.renew().await?;
//!     handle.release().await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod any;
pub mod selector;
pub mod settings;

pub use distributed_lease_core::{
    BackendKind, BoxError, LeaseBackend, LeaseBackendExt, LeaseError, LeaseFailureReason,
    LeaseRequest, LeaseResult, LeaseSnapshot, LeaseToken, LockHandle, LockIdentity,
    MAX_LEASE_PERIOD,
};

pub use distributed_lease_blob as blob;
pub use distributed_lease_file as file;
pub use distributed_lease_sql as sql;

pub use any::AnyLeaseBackend;
pub use selector::{AnyLockHandle, BackendSelector};
pub use settings::LeaseSettings;

/// Everything needed to take a lock through the selector.
pub mod prelude {
    pub use crate::any::AnyLeaseBackend;
    pub use crate::selector::{AnyLockHandle, BackendSelector};
    pub use crate::settings::LeaseSettings;
    pub use distributed_lease_core::prelude::*;
}
