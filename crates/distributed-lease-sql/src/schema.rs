//! Lease table and stored functions.

use distributed_lease_core::error::{LeaseError, LeaseResult};

/// Default schema holding the lease table and functions.
pub const DEFAULT_SCHEMA: &str = "public";

const SCHEMA_PLACEHOLDER: &str = "__SCHEMA__";

/// Serializes concurrent installs; `CREATE OR REPLACE FUNCTION` is not safe
/// to run in parallel.
const INSTALL_LOCK_KEY: i64 = 0x6c65_6173_6573_0001;

const INSTALL_SQL: &str = r#"
CREATE SCHEMA IF NOT EXISTS __SCHEMA__;

CREATE TABLE IF NOT EXISTS __SCHEMA__.leases (
    lease_name       TEXT PRIMARY KEY,
    requestor_name   TEXT NULL,
    lease_expiration TIMESTAMPTZ NULL,
    metadata         JSONB NOT NULL DEFAULT '{}'::jsonb
);

CREATE OR REPLACE FUNCTION __SCHEMA__.leases_try_acquire_or_renew(
    p_lease_name     TEXT,
    p_requestor_name TEXT,
    p_period_ms      BIGINT
) RETURNS BOOLEAN
LANGUAGE plpgsql AS $$
DECLARE
    v_has_lease BOOLEAN;
BEGIN
    INSERT INTO __SCHEMA__.leases AS l (lease_name, requestor_name, lease_expiration)
    VALUES (p_lease_name, p_requestor_name, clock_timestamp() + p_period_ms * INTERVAL '1 millisecond')
    ON CONFLICT (lease_name) DO UPDATE
        SET requestor_name   = EXCLUDED.requestor_name,
            lease_expiration = EXCLUDED.lease_expiration
        WHERE l.requestor_name IS NULL
           OR l.lease_expiration IS NULL
           OR l.lease_expiration <= clock_timestamp()
           OR l.requestor_name = EXCLUDED.requestor_name
    RETURNING TRUE INTO v_has_lease;

    RETURN COALESCE(v_has_lease, FALSE);
END;
$$;

CREATE OR REPLACE FUNCTION __SCHEMA__.leases_renew(
    p_lease_name     TEXT,
    p_requestor_name TEXT,
    p_period_ms      BIGINT
) RETURNS BOOLEAN
LANGUAGE plpgsql AS $$
BEGIN
    UPDATE __SCHEMA__.leases
       SET lease_expiration = clock_timestamp() + p_period_ms * INTERVAL '1 millisecond'
     WHERE lease_name = p_lease_name
       AND requestor_name = p_requestor_name;

    RETURN FOUND;
END;
$$;

CREATE OR REPLACE FUNCTION __SCHEMA__.leases_update_metadata(
    p_lease_name     TEXT,
    p_requestor_name TEXT,
    p_key            TEXT,
    p_value          TEXT
) RETURNS BOOLEAN
LANGUAGE plpgsql AS $$
BEGIN
    UPDATE __SCHEMA__.leases
       SET metadata = metadata || jsonb_build_object(p_key, p_value)
     WHERE lease_name = p_lease_name
       AND requestor_name = p_requestor_name
       AND lease_expiration > clock_timestamp();

    RETURN FOUND;
END;
$$;

CREATE OR REPLACE FUNCTION __SCHEMA__.leases_release(
    p_lease_name     TEXT,
    p_requestor_name TEXT
) RETURNS VOID
LANGUAGE plpgsql AS $$
BEGIN
    UPDATE __SCHEMA__.leases
       SET requestor_name = NULL,
           lease_expiration = NULL
     WHERE lease_name = p_lease_name
       AND requestor_name = p_requestor_name;
END;
$$;

CREATE OR REPLACE FUNCTION __SCHEMA__.leases_get_info(
    p_lease_name TEXT
) RETURNS TABLE (is_available BOOLEAN, holder TEXT, metadata TEXT)
LANGUAGE sql AS $$
    SELECT (l.requestor_name IS NULL
            OR l.lease_expiration IS NULL
            OR l.lease_expiration <= clock_timestamp()),
           l.requestor_name,
           l.metadata::text
      FROM __SCHEMA__.leases l
     WHERE l.lease_name = p_lease_name;
$$;
"#;

/// Validates a schema name so it can be spliced into SQL text.
pub fn validate_schema_name(schema: &str) -> LeaseResult<()> {
    let mut chars = schema.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !valid_start || !valid_rest || schema.len() > 63 {
        return Err(LeaseError::validation(
            "schema",
            format!("'{schema}' is not a plain SQL identifier"),
        ));
    }
    Ok(())
}

/// DDL creating the lease table and functions in `schema`.
///
/// Idempotent; safe to run on every start-up.
pub fn install_script(schema: &str) -> String {
    format!(
        "SELECT pg_advisory_xact_lock({INSTALL_LOCK_KEY});\n{}",
        INSTALL_SQL.replace(SCHEMA_PLACEHOLDER, schema)
    )
}

/// Calls into the stored functions, with the schema resolved.
#[derive(Debug, Clone)]
pub(crate) struct Statements {
    pub try_acquire_or_renew: String,
    pub renew: String,
    pub update_metadata: String,
    pub release: String,
    pub get_info: String,
}

impl Statements {
    pub(crate) fn new(schema: &str) -> Self {
        Self {
            try_acquire_or_renew: format!(
                "SELECT {schema}.leases_try_acquire_or_renew($1, $2, $3)"
            ),
            renew: format!("SELECT {schema}.leases_renew($1, $2, $3)"),
            update_metadata: format!("SELECT {schema}.leases_update_metadata($1, $2, $3, $4)"),
            release: format!("SELECT {schema}.leases_release($1, $2)"),
            get_info: format!(
                "SELECT is_available, holder, metadata FROM {schema}.leases_get_info($1)"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_names() {
        assert!(validate_schema_name("public").is_ok());
        assert!(validate_schema_name("_runtime2").is_ok());
        assert!(validate_schema_name("").is_err());
        assert!(validate_schema_name("2fast").is_err());
        assert!(validate_schema_name("x; DROP TABLE y").is_err());
        assert!(validate_schema_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_install_script_substitutes_schema() {
        let script = install_script("runtime");
        assert!(script.contains("CREATE TABLE IF NOT EXISTS runtime.leases"));
        assert!(script.contains("runtime.leases_try_acquire_or_renew"));
        assert!(script.contains("runtime.leases_renew("));
        assert!(!script.contains(SCHEMA_PLACEHOLDER));
        assert!(script.starts_with("SELECT pg_advisory_xact_lock("));
    }

    #[test]
    fn test_statements_use_schema() {
        let statements = Statements::new("runtime");
        assert_eq!(
            statements.release,
            "SELECT runtime.leases_release($1, $2)"
        );
    }
}
