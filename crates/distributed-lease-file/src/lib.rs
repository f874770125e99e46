//! Shared-filesystem backend for lease-based distributed locks.
//!
//! Each lock is a directory; each acquisition attempt drops a uniquely named
//! candidate file into it, and a deterministic winner-selection rule picks the
//! holder. See [`arbitration`] for the rule.

pub mod arbitration;
pub mod lock;
pub mod metadata;
pub mod name;
pub mod provider;

pub use arbitration::{LockFileInfo, select_winner};
pub use provider::{DEFAULT_SETTLE_DELAY, FileLeaseBackend, FileLeaseBackendBuilder};
