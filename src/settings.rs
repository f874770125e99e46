//! Settings the backend selector resolves accounts with.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use distributed_lease_core::BackendKind;
use distributed_lease_core::error::{LeaseError, LeaseResult};
use distributed_lease_sql::DEFAULT_SCHEMA;

/// Environment variable forcing a backend (`blob`, `sql` or `file`).
pub const BACKEND_VAR: &str = "LEASE_BACKEND";
/// Environment variable naming the file backend's root directory.
pub const FILE_ROOT_VAR: &str = "LEASE_FILE_ROOT";
/// Environment variable bounding the relational probe, in milliseconds.
pub const PROBE_TIMEOUT_VAR: &str = "LEASE_PROBE_TIMEOUT_MS";
/// Environment variable naming the lease schema.
pub const SQL_SCHEMA_VAR: &str = "LEASE_SQL_SCHEMA";
/// Environment variable (`true`/`false`) installing the lease schema on first use.
pub const SQL_INSTALL_SCHEMA_VAR: &str = "LEASE_SQL_INSTALL_SCHEMA";
/// Prefix of per-account connection string variables.
pub const CONNECTION_VAR_PREFIX: &str = "LEASE_CONNECTION_";

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Which backend serves which account, and how to reach it.
#[derive(Clone)]
pub struct LeaseSettings {
    backend_override: Option<BackendKind>,
    connections: HashMap<String, String>,
    file_root: PathBuf,
    probe_timeout: Duration,
    sql_schema: String,
    install_sql_schema: bool,
}

impl LeaseSettings {
    pub fn new() -> Self {
        Self {
            backend_override: None,
            connections: HashMap::new(),
            file_root: env::temp_dir().join("distributed-lease"),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            sql_schema: DEFAULT_SCHEMA.to_string(),
            install_sql_schema: false,
        }
    }

    /// Reads settings from `LEASE_*` environment variables.
    ///
    /// `LEASE_CONNECTION_<ACCOUNT>` registers a connection string for
    /// `<account>` (names compare case-insensitively).
    pub fn from_env() -> LeaseResult<Self> {
        Self::from_vars(env::vars())
    }

    /// Same as [`from_env`](Self::from_env) over an explicit variable list.
    pub fn from_vars<I, K, V>(vars: I) -> LeaseResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut settings = Self::new();
        for (key, value) in vars {
            let key = key.as_ref();
            let value: String = value.into();
            match key {
                BACKEND_VAR => {
                    let kind = value.parse::<BackendKind>()?;
                    settings = settings.backend(kind);
                }
                FILE_ROOT_VAR => settings = settings.file_root(value),
                PROBE_TIMEOUT_VAR => {
                    let millis = value.trim().parse::<u64>().map_err(|e| {
                        LeaseError::validation("probe_timeout", format!("'{value}': {e}"))
                    })?;
                    settings = settings.probe_timeout(Duration::from_millis(millis));
                }
                SQL_SCHEMA_VAR => settings = settings.sql_schema(value),
                SQL_INSTALL_SCHEMA_VAR => {
                    let install = value.trim().parse::<bool>().map_err(|e| {
                        LeaseError::validation("install_sql_schema", format!("'{value}': {e}"))
                    })?;
                    settings = settings.install_sql_schema(install);
                }
                _ => {
                    if let Some(account) = key.strip_prefix(CONNECTION_VAR_PREFIX)
                        && !account.is_empty()
                    {
                        settings = settings.connection(account, value);
                    }
                }
            }
        }
        Ok(settings)
    }

    /// Forces one backend for every account.
    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.backend_override = Some(kind);
        self
    }

    /// Registers the connection string of `account`.
    pub fn connection(mut self, account: impl AsRef<str>, connection_string: impl Into<String>) -> Self {
        self.connections
            .insert(account.as_ref().to_ascii_lowercase(), connection_string.into());
        self
    }

    pub fn file_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.file_root = root.into();
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn sql_schema(mut self, schema: impl Into<String>) -> Self {
        self.sql_schema = schema.into();
        self
    }

    /// Creates the lease table and functions when a relational backend is
    /// first resolved.
    pub fn install_sql_schema(mut self, install: bool) -> Self {
        self.install_sql_schema = install;
        self
    }

    pub fn backend_override(&self) -> Option<BackendKind> {
        self.backend_override
    }

    /// Connection string registered for `account`, if any.
    pub fn connection_string(&self, account: &str) -> Option<&str> {
        self.connections
            .get(&account.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn file_root_path(&self) -> &Path {
        &self.file_root
    }

    pub fn probe_timeout_value(&self) -> Duration {
        self.probe_timeout
    }

    pub fn sql_schema_name(&self) -> &str {
        &self.sql_schema
    }

    pub fn installs_sql_schema(&self) -> bool {
        self.install_sql_schema
    }
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LeaseSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut accounts: Vec<&str> = self.connections.keys().map(String::as_str).collect();
        accounts.sort_unstable();
        f.debug_struct("LeaseSettings")
            .field("backend_override", &self.backend_override)
            .field("accounts", &accounts)
            .field("file_root", &self.file_root)
            .field("probe_timeout", &self.probe_timeout)
            .field("sql_schema", &self.sql_schema)
            .field("install_sql_schema", &self.install_sql_schema)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars() {
        let settings = LeaseSettings::from_vars([
            ("LEASE_BACKEND", "sql"),
            ("LEASE_FILE_ROOT", "/mnt/share/leases"),
            ("LEASE_PROBE_TIMEOUT_MS", "250"),
            ("LEASE_SQL_SCHEMA", "runtime"),
            ("LEASE_SQL_INSTALL_SCHEMA", "true"),
            ("LEASE_CONNECTION_Storage", "postgres://localhost/db"),
            ("PATH", "/usr/bin"),
        ])
        .unwrap();

        assert_eq!(settings.backend_override(), Some(BackendKind::Sql));
        assert_eq!(settings.file_root_path(), Path::new("/mnt/share/leases"));
        assert_eq!(settings.probe_timeout_value(), Duration::from_millis(250));
        assert_eq!(settings.sql_schema_name(), "runtime");
        assert!(settings.installs_sql_schema());
        assert_eq!(
            settings.connection_string("STORAGE"),
            Some("postgres://localhost/db")
        );
        assert_eq!(settings.connection_string("other"), None);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(LeaseSettings::from_vars([("LEASE_BACKEND", "redis")]).is_err());
        assert!(LeaseSettings::from_vars([("LEASE_PROBE_TIMEOUT_MS", "soon")]).is_err());
    }

    #[test]
    fn test_debug_hides_connection_strings() {
        let settings = LeaseSettings::new().connection("acct", "sig=secret");
        let debug = format!("{settings:?}");
        assert!(debug.contains("acct"));
        assert!(!debug.contains("secret"));
    }
}
