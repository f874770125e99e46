//! Connection pool management for the PostgreSQL lease backend.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use distributed_lease_core::error::{LeaseError, LeaseResult};
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

/// Default upper bound on pooled connections.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Default time to wait for a pooled connection.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// PostgreSQL connection source.
#[derive(Clone)]
pub enum SqlConnection {
    /// Connection string; the backend owns the pool.
    ConnectionString(String),
    /// Externally managed pool.
    Pool(PgPool),
}

impl SqlConnection {
    /// Whether `connection_string` parses as PostgreSQL connect options.
    ///
    /// Purely syntactic; nothing is opened.
    pub fn is_valid_connection_string(connection_string: &str) -> bool {
        let trimmed = connection_string.trim();
        (trimmed.starts_with("postgres://") || trimmed.starts_with("postgresql://"))
            && PgConnectOptions::from_str(trimmed).is_ok()
    }

    /// Gets or creates a pool.
    pub async fn get_pool(
        &self,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> LeaseResult<PgPool> {
        match self {
            Self::ConnectionString(conn_str) => {
                let options = PgConnectOptions::from_str(conn_str).map_err(|e| {
                    LeaseError::validation("connection_string", format!("not a PostgreSQL connection string: {e}"))
                })?;
                PgPoolOptions::new()
                    .max_connections(max_connections)
                    .acquire_timeout(acquire_timeout)
                    .connect_with(options)
                    .await
                    .map_err(|e| LeaseError::unknown("failed to connect to PostgreSQL", e))
            }
            Self::Pool(pool) => Ok(pool.clone()),
        }
    }

    /// Opens a one-connection pool, giving up after `timeout`.
    ///
    /// Any failure (malformed string, refused connection, timeout) yields
    /// `None`.
    pub async fn probe(connection_string: &str, timeout: Duration) -> Option<PgPool> {
        if !Self::is_valid_connection_string(connection_string) {
            return None;
        }
        let options = PgConnectOptions::from_str(connection_string.trim()).ok()?;
        let connect = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(timeout)
            .connect_with(options);

        match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(pool)) => Some(pool),
            Ok(Err(e)) => {
                tracing::debug!("PostgreSQL probe failed: {e}");
                None
            }
            Err(_) => {
                tracing::debug!(timeout_ms = timeout.as_millis() as u64, "PostgreSQL probe timed out");
                None
            }
        }
    }
}

impl fmt::Debug for SqlConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionString(_) => write!(f, "SqlConnection::ConnectionString([REDACTED])"),
            Self::Pool(_) => write!(f, "SqlConnection::Pool([POOL])"),
        }
    }
}
