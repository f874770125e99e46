//! Winner selection among candidate lock files.
//!
//! Every process that wants a lock drops a candidate file into the lock's
//! directory. The live holder is whichever unexpired candidate was modified
//! first; equal timestamps fall back to ordinal comparison of the full path.
//! The rule depends only on what is on disk, so racing processes converge on
//! the same winner without talking to each other.

use std::cmp::Ordering;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::warn;

use distributed_lease_core::error::{LeaseError, LeaseResult};

use crate::name::is_candidate_name;

/// Contents of a candidate lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockFileContent {
    /// Lease period in seconds.
    pub duration: f64,
    /// Requestor that wrote the candidate.
    pub owner: String,
}

/// A candidate lock file as seen on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockFileInfo {
    pub path: PathBuf,
    pub modified: SystemTime,
    pub duration: Duration,
    pub owner: String,
}

impl LockFileInfo {
    /// `modified + duration`; the candidate is stale at or after this instant.
    ///
    /// `None` when the sum is beyond what the clock can represent, i.e. the
    /// candidate never goes stale.
    pub fn expires_at(&self) -> Option<SystemTime> {
        self.modified.checked_add(self.duration)
    }

    pub fn is_live(&self, now: SystemTime) -> bool {
        self.expires_at().is_none_or(|expires_at| expires_at > now)
    }

    /// File name component, which doubles as the lease token.
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}

/// Orders candidates: earlier modification first, then ordinal full path.
fn arbitration_order(a: &LockFileInfo, b: &LockFileInfo) -> Ordering {
    a.modified
        .cmp(&b.modified)
        .then_with(|| a.path.as_os_str().cmp(b.path.as_os_str()))
}

/// Picks the live holder among `files`, independent of their order.
pub fn select_winner(files: &[LockFileInfo], now: SystemTime) -> Option<&LockFileInfo> {
    files
        .iter()
        .filter(|f| f.is_live(now))
        .min_by(|a, b| arbitration_order(a, b))
}

/// Reads every candidate in `directory`.
///
/// A missing directory yields no candidates. Files that disappear between
/// listing and reading (deleted by losers) or that cannot be parsed are
/// skipped.
pub fn read_lock_files(directory: &Path) -> LeaseResult<Vec<LockFileInfo>> {
    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(LeaseError::unknown(
                format!("failed to list lock directory '{}'", directory.display()),
                e,
            ));
        }
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| {
            LeaseError::unknown(
                format!("failed to list lock directory '{}'", directory.display()),
                e,
            )
        })?;

        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if !is_candidate_name(file_name) {
            continue;
        }

        if let Some(info) = read_lock_file(&entry.path())? {
            files.push(info);
        }
    }

    Ok(files)
}

/// Reads one candidate; `None` if it vanished or is unreadable.
pub fn read_lock_file(path: &Path) -> LeaseResult<Option<LockFileInfo>> {
    let modified = match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(LeaseError::unknown(
                format!("failed to stat lock file '{}'", path.display()),
                e,
            ));
        }
    };

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(LeaseError::unknown(
                format!("failed to read lock file '{}'", path.display()),
                e,
            ));
        }
    };

    // Created but not written yet.
    if content.is_empty() {
        return Ok(None);
    }

    let parsed: LockFileContent = match serde_json::from_str(&content) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(path = %path.display(), "ignoring malformed lock file: {e}");
            return Ok(None);
        }
    };

    let Ok(duration) = Duration::try_from_secs_f64(parsed.duration) else {
        warn!(path = %path.display(), duration = parsed.duration, "ignoring lock file with invalid duration");
        return Ok(None);
    };

    Ok(Some(LockFileInfo {
        path: path.to_path_buf(),
        modified,
        duration,
        owner: parsed.owner,
    }))
}
