//! Metadata document stored next to the candidate files.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use distributed_lease_core::error::{LeaseError, LeaseResult};
use uuid::Uuid;

use crate::name::{METADATA_FILE_NAME, TEMP_FILE_EXTENSION};

/// Reads the metadata of a lock directory; empty if none was ever written.
pub fn read_metadata(directory: &Path) -> LeaseResult<HashMap<String, String>> {
    let path = directory.join(METADATA_FILE_NAME);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => {
            return Err(LeaseError::unknown(
                format!("failed to read metadata '{}'", path.display()),
                e,
            ));
        }
    };

    serde_json::from_str(&content).map_err(|e| {
        LeaseError::unknown(format!("malformed metadata '{}'", path.display()), e)
    })
}

/// Merges one entry into the metadata and persists it atomically.
pub fn merge_metadata(directory: &Path, key: &str, value: &str) -> LeaseResult<()> {
    let mut metadata = read_metadata(directory)?;
    metadata.insert(key.to_string(), value.to_string());

    let serialized = serde_json::to_string(&metadata)
        .map_err(|e| LeaseError::unknown("failed to serialize metadata", e))?;

    let temp = directory.join(format!("{}.{}", Uuid::new_v4(), TEMP_FILE_EXTENSION));
    let target = directory.join(METADATA_FILE_NAME);

    fs::write(&temp, serialized).map_err(|e| {
        LeaseError::unknown(format!("failed to write metadata '{}'", temp.display()), e)
    })?;
    fs::rename(&temp, &target).map_err(|e| {
        let _ = fs::remove_file(&temp);
        LeaseError::unknown(format!("failed to replace metadata '{}'", target.display()), e)
    })
}
