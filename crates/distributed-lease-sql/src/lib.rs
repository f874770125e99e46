//! PostgreSQL backend for lease-based distributed locks.
//!
//! Exclusivity comes from a single atomic stored function that inserts or
//! takes over the lease row only when it is absent, expired, or already held
//! by the same requestor.

pub mod connection;
pub mod key;
pub mod lock;
pub mod provider;
pub mod schema;

pub use connection::SqlConnection;
pub use key::lease_name;
pub use provider::{SqlLeaseBackend, SqlLeaseBackendBuilder};
pub use schema::{DEFAULT_SCHEMA, install_script, validate_schema_name};
