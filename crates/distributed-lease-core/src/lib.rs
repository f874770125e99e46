//! Core contract, identity and error types for lease-based distributed locks.

pub mod error;
pub mod handle;
pub mod identity;
pub mod lease;
pub mod prelude;
pub mod timeout;
pub mod traits;

pub use error::{BoxError, LeaseError, LeaseFailureReason, LeaseResult};
pub use handle::LockHandle;
pub use identity::{KEY_DELIMITER, LockIdentity};
pub use lease::{
    BackendKind, LeaseRequest, LeaseSnapshot, LeaseToken, MAX_LEASE_PERIOD, validate_metadata_key,
    validate_period,
};
pub use traits::{LeaseBackend, LeaseBackendExt};
