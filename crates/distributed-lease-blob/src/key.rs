//! Mapping lock identities onto blob paths.

use distributed_lease_core::error::{LeaseError, LeaseResult};
use distributed_lease_core::identity::LockIdentity;

use crate::client::BlobPath;

const MIN_CONTAINER_LENGTH: usize = 3;
const MAX_CONTAINER_LENGTH: usize = 63;
const MAX_BLOB_NAME_LENGTH: usize = 1024;

/// Blob path for `identity`.
///
/// The first namespace segment is the container; the optional second segment
/// becomes a virtual directory in front of the lock name.
pub fn blob_path(identity: &LockIdentity) -> LeaseResult<BlobPath> {
    let namespace = identity.namespace();
    let container = namespace[0].as_str();
    validate_container_name(container)?;

    let blob = match namespace.get(1) {
        Some(directory) => format!("{directory}/{}", identity.name()),
        None => identity.name().to_string(),
    };
    if blob.len() > MAX_BLOB_NAME_LENGTH {
        return Err(LeaseError::validation(
            "name",
            format!("blob name longer than {MAX_BLOB_NAME_LENGTH} characters"),
        ));
    }

    Ok(BlobPath {
        container: container.to_string(),
        blob,
    })
}

/// Container names: 3-63 lowercase letters, digits and single hyphens,
/// starting and ending with a letter or digit.
pub fn validate_container_name(container: &str) -> LeaseResult<()> {
    let invalid = |message: &str| {
        Err(LeaseError::validation(
            "namespace",
            format!("'{container}' is not a valid container name: {message}"),
        ))
    };

    if container.len() < MIN_CONTAINER_LENGTH || container.len() > MAX_CONTAINER_LENGTH {
        return invalid("must be 3-63 characters");
    }
    if !container
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return invalid("only lowercase letters, digits and hyphens are allowed");
    }
    if container.starts_with('-') || container.ends_with('-') {
        return invalid("must start and end with a letter or digit");
    }
    if container.contains("--") {
        return invalid("consecutive hyphens are not allowed");
    }
    Ok(())
}

/// Blob metadata names follow C# identifier rules.
pub fn validate_metadata_name(key: &str) -> LeaseResult<()> {
    let mut chars = key.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(LeaseError::validation(
            "key",
            format!("'{key}' is not a valid blob metadata name"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_path_with_directory() {
        let id = LockIdentity::new("acct", ["azure-webjobs-hosts", "locks"], "job.run").unwrap();
        let path = blob_path(&id).unwrap();
        assert_eq!(path.container, "azure-webjobs-hosts");
        assert_eq!(path.blob, "locks/job.run");
    }

    #[test]
    fn test_blob_path_without_directory() {
        let id = LockIdentity::new("acct", ["leases"], "partition-3").unwrap();
        let path = blob_path(&id).unwrap();
        assert_eq!(path.to_string(), "leases/partition-3");
    }

    #[test]
    fn test_container_rules() {
        assert!(validate_container_name("abc").is_ok());
        assert!(validate_container_name("web-jobs-1").is_ok());
        assert!(validate_container_name("ab").is_err());
        assert!(validate_container_name("Upper").is_err());
        assert!(validate_container_name("-lead").is_err());
        assert!(validate_container_name("trail-").is_err());
        assert!(validate_container_name("dou--ble").is_err());
        assert!(validate_container_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_invalid_container_is_validation_error() {
        let id = LockIdentity::new("acct", ["Not_Valid"], "x").unwrap();
        let err = blob_path(&id).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_metadata_names() {
        assert!(validate_metadata_name("owner").is_ok());
        assert!(validate_metadata_name("_x9").is_ok());
        assert!(validate_metadata_name("9x").is_err());
        assert!(validate_metadata_name("has-dash").is_err());
        assert!(validate_metadata_name("").is_err());
    }
}
