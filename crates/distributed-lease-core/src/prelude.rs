//! Convenience prelude for lease types.

pub use crate::error::{LeaseError, LeaseFailureReason, LeaseResult};
pub use crate::handle::LockHandle;
pub use crate::identity::LockIdentity;
pub use crate::lease::{BackendKind, LeaseRequest, LeaseSnapshot, LeaseToken};
pub use crate::traits::{LeaseBackend, LeaseBackendExt};
