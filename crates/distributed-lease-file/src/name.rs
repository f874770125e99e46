//! Lock directory and candidate file naming.

use std::path::{Path, PathBuf};

use distributed_lease_core::error::{LeaseError, LeaseResult};
use distributed_lease_core::{LeaseToken, LockIdentity};
use uuid::Uuid;

/// Extension of candidate lock files. Only these take part in arbitration.
pub const LOCK_FILE_EXTENSION: &str = "lock";

/// Extension of files still being written.
pub const TEMP_FILE_EXTENSION: &str = "tmp";

/// Name of the metadata document inside a lock directory.
pub const METADATA_FILE_NAME: &str = "metadata.json";

/// Returns the directory holding all candidate files for `identity`.
///
/// Layout: `root/scope/namespace[0][/namespace[1]]/name`. Identity validation
/// guarantees no segment contains a path separator or is `.`/`..`, so the
/// mapping is injective.
pub fn lock_directory(root: &Path, identity: &LockIdentity) -> PathBuf {
    let mut path = root.to_path_buf();
    for segment in identity.segments() {
        path.push(segment);
    }
    path
}

/// Generates a fresh candidate file name.
pub fn new_candidate_name() -> String {
    format!("{}.{}", Uuid::new_v4(), LOCK_FILE_EXTENSION)
}

/// Resolves a lease token to its candidate file path.
///
/// # Errors
///
/// Returns [`LeaseError::Validation`] if the token is not a plain candidate
/// file name (e.g. contains a path separator).
pub fn candidate_path(directory: &Path, token: &LeaseToken) -> LeaseResult<PathBuf> {
    let name = token.as_str();
    let is_plain = !name.is_empty()
        && !name.contains(['/', '\\'])
        && name != "."
        && name != ".."
        && is_candidate_name(name);

    if !is_plain {
        return Err(LeaseError::validation(
            "token",
            format!("'{name}' is not a lock file token"),
        ));
    }

    Ok(directory.join(name))
}

/// Whether `file_name` names a candidate lock file.
pub fn is_candidate_name(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .is_some_and(|ext| ext == LOCK_FILE_EXTENSION)
}
