//! PostgreSQL lease backend configuration.

use std::sync::Arc;
use std::time::Duration;

use distributed_lease_core::error::{LeaseError, LeaseResult};
use distributed_lease_core::identity::LockIdentity;
use sqlx::PgPool;
use tracing::{info, instrument};

use crate::connection::{DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_MAX_CONNECTIONS, SqlConnection};
use crate::schema::{DEFAULT_SCHEMA, Statements, install_script, validate_schema_name};

/// Builder for PostgreSQL lease backend configuration.
pub struct SqlLeaseBackendBuilder {
    connection: Option<SqlConnection>,
    schema: String,
    account: Option<String>,
    max_connections: u32,
    acquire_timeout: Duration,
    install_schema: bool,
}

impl SqlLeaseBackendBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self {
            connection: None,
            schema: DEFAULT_SCHEMA.to_string(),
            account: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            install_schema: false,
        }
    }

    /// Sets the PostgreSQL connection string.
    pub fn connection_string(mut self, conn_str: impl Into<String>) -> Self {
        self.connection = Some(SqlConnection::ConnectionString(conn_str.into()));
        self
    }

    /// Sets an existing connection pool.
    pub fn pool(mut self, pool: PgPool) -> Self {
        self.connection = Some(SqlConnection::Pool(pool));
        self
    }

    /// Sets the schema holding the lease table and functions.
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Binds the backend to one account.
    ///
    /// Row keys do not include the scope, so a bound backend rejects
    /// identities from any other account instead of letting them collide.
    pub fn account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    /// Upper bound on pooled connections when the backend owns the pool.
    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// How long an operation waits for a pooled connection.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Runs [`SqlLeaseBackend::install_schema`] during `build`.
    pub fn install_schema(mut self, install: bool) -> Self {
        self.install_schema = install;
        self
    }

    /// Builds the backend.
    pub async fn build(self) -> LeaseResult<SqlLeaseBackend> {
        let connection = self
            .connection
            .ok_or_else(|| LeaseError::validation("connection", "connection not specified"))?;
        validate_schema_name(&self.schema)?;

        let pool = connection
            .get_pool(self.max_connections, self.acquire_timeout)
            .await?;

        let backend = SqlLeaseBackend::from_parts(pool, self.schema, self.account);
        if self.install_schema {
            backend.install_schema().await?;
        }
        Ok(backend)
    }
}

impl Default for SqlLeaseBackendBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Lease backend over an atomic acquire-or-renew stored function.
///
/// The lease token is the requestor id: ownership is proven by matching the
/// row's holder column, so any process presenting the same requestor id is
/// treated as the holder.
#[derive(Debug, Clone)]
pub struct SqlLeaseBackend {
    pub(crate) pool: PgPool,
    pub(crate) schema: Arc<str>,
    pub(crate) account: Option<Arc<str>>,
    pub(crate) statements: Arc<Statements>,
}

impl SqlLeaseBackend {
    /// Returns a new builder for configuring the backend.
    pub fn builder() -> SqlLeaseBackendBuilder {
        SqlLeaseBackendBuilder::new()
    }

    /// Creates a backend using the specified connection string.
    pub async fn new(connection_string: impl Into<String>) -> LeaseResult<Self> {
        Self::builder()
            .connection_string(connection_string)
            .build()
            .await
    }

    /// Attempts a lightweight connection open for `account`.
    ///
    /// Returns a backend reusing the probe's pool on success and `None` on any
    /// failure; probing never surfaces an error.
    pub async fn probe(
        connection_string: &str,
        timeout: Duration,
        account: impl Into<String>,
        schema: &str,
    ) -> Option<Self> {
        if validate_schema_name(schema).is_err() {
            return None;
        }
        let pool = SqlConnection::probe(connection_string, timeout).await?;
        Some(Self::from_parts(pool, schema.to_string(), Some(account.into())))
    }

    pub(crate) fn from_parts(pool: PgPool, schema: String, account: Option<String>) -> Self {
        let statements = Arc::new(Statements::new(&schema));
        Self {
            pool,
            schema: schema.into(),
            account: account.map(Into::into),
            statements,
        }
    }

    /// Creates the lease table and functions if they do not exist yet.
    #[instrument(skip(self), fields(schema = %self.schema, backend = "sql"))]
    pub async fn install_schema(&self) -> LeaseResult<()> {
        let script = install_script(&self.schema);
        sqlx::raw_sql(&script)
            .execute(&self.pool)
            .await
            .map_err(|e| LeaseError::unknown("failed to install lease schema", e))?;
        info!("lease schema installed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// The account this backend is bound to, if any.
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
