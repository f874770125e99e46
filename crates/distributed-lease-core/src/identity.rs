//! Lock identity validation and canonical naming.

use std::fmt;

use crate::error::{LeaseError, LeaseResult};

/// Delimiter used by backends that join an identity into a single key.
pub const KEY_DELIMITER: char = '|';

/// Minimum number of namespace segments.
pub const MIN_NAMESPACE_SEGMENTS: usize = 1;

/// Maximum number of namespace segments.
pub const MAX_NAMESPACE_SEGMENTS: usize = 2;

/// The canonical name of a lock.
///
/// An identity is `scope` (the account the lock lives in), one or two ordered
/// namespace segments, and the lock `name`. Construction rejects anything a
/// backend could not map to a unique resource, so two distinct identities
/// never derive the same object path, table key or directory.
///
/// # Example
///
/// ```rust
/// use distributed_lease_core::LockIdentity;
///
/// let id = LockIdentity::new("storage", ["webjobs-hosts", "singleton"], "partition-0").unwrap();
/// assert_eq!(id.to_string(), "storage/webjobs-hosts/singleton/partition-0");
///
/// assert!(LockIdentity::new("storage", ["a|b"], "lock").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockIdentity {
    scope: String,
    namespace: Vec<String>,
    name: String,
}

impl LockIdentity {
    /// Validates and builds an identity.
    pub fn new<I, S>(scope: impl Into<String>, namespace: I, name: impl Into<String>) -> LeaseResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let scope = scope.into();
        let namespace: Vec<String> = namespace.into_iter().map(Into::into).collect();
        let name = name.into();

        validate_segment("scope", &scope)?;

        if namespace.len() < MIN_NAMESPACE_SEGMENTS || namespace.len() > MAX_NAMESPACE_SEGMENTS {
            return Err(LeaseError::validation(
                "namespace",
                format!(
                    "expected {}-{} segments, got {}",
                    MIN_NAMESPACE_SEGMENTS,
                    MAX_NAMESPACE_SEGMENTS,
                    namespace.len()
                ),
            ));
        }
        for segment in &namespace {
            validate_segment("namespace", segment)?;
        }

        validate_segment("name", &name)?;

        Ok(Self {
            scope,
            namespace,
            name,
        })
    }

    /// The account or scope the lock belongs to.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Ordered namespace segments (one or two).
    pub fn namespace(&self) -> &[String] {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Joins namespace segments and name with [`KEY_DELIMITER`].
    ///
    /// The scope is not part of the key; it selects the backend instance.
    pub fn delimited_key(&self) -> String {
        let delimiter = KEY_DELIMITER.to_string();
        let mut key = self.namespace.join(delimiter.as_str());
        key.push(KEY_DELIMITER);
        key.push_str(&self.name);
        key
    }

    /// Iterates `scope`, namespace segments, then `name`.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.scope.as_str())
            .chain(self.namespace.iter().map(String::as_str))
            .chain(std::iter::once(self.name.as_str()))
    }
}

impl fmt::Display for LockIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for segment in self.segments() {
            if !first {
                f.write_str("/")?;
            }
            f.write_str(segment)?;
            first = false;
        }
        Ok(())
    }
}

fn validate_segment(field: &'static str, value: &str) -> LeaseResult<()> {
    if value.trim().is_empty() {
        return Err(LeaseError::validation(field, "cannot be empty"));
    }

    if value == "." || value == ".." {
        return Err(LeaseError::validation(
            field,
            format!("'{value}' is not a valid segment"),
        ));
    }

    if let Some(ch) = value
        .chars()
        .find(|ch| *ch == KEY_DELIMITER || *ch == '/' || *ch == '\\' || ch.is_control())
    {
        return Err(LeaseError::validation(
            field,
            format!("'{}' contains reserved character {:?}", value, ch),
        ));
    }

    Ok(())
}
