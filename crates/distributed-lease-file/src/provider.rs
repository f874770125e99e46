//! File lease backend configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use distributed_lease_core::error::{LeaseError, LeaseResult};

/// Default grace added before a stale candidate is considered abandoned.
pub const DEFAULT_ABANDON_GRACE: Duration = Duration::from_secs(60);

/// Default wait between writing a candidate and deciding the winner.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(25);

/// Builder for file-based lease backend configuration.
pub struct FileLeaseBackendBuilder {
    directory: Option<PathBuf>,
    abandon_grace: Duration,
    settle_delay: Duration,
}

impl FileLeaseBackendBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self {
            directory: None,
            abandon_grace: DEFAULT_ABANDON_GRACE,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    /// Sets the root directory lock directories are created under.
    ///
    /// The directory will be created if it doesn't exist. For cross-machine
    /// exclusion it must be on a filesystem every participant shares.
    pub fn directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.directory = Some(path.into());
        self
    }

    /// Sets how long past twice its period a stale candidate must sit
    /// before an acquirer deletes it.
    pub fn abandon_grace(mut self, grace: Duration) -> Self {
        self.abandon_grace = grace;
        self
    }

    /// Sets how long an acquirer waits after writing its candidate before it
    /// checks whether it won.
    ///
    /// Must exceed the filesystem's modification-time granularity (and, on a
    /// network share, its attribute caching) or two contenders can both see
    /// themselves as first.
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Builds the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if no directory is specified or if the directory
    /// cannot be created.
    pub fn build(self) -> LeaseResult<FileLeaseBackend> {
        let root = self
            .directory
            .ok_or_else(|| LeaseError::validation("directory", "directory not specified"))?;

        std::fs::create_dir_all(&root).map_err(|e| {
            LeaseError::unknown(
                format!("failed to create lease root '{}'", root.display()),
                e,
            )
        })?;

        Ok(FileLeaseBackend {
            root,
            abandon_grace: self.abandon_grace,
            settle_delay: self.settle_delay,
        })
    }
}

impl Default for FileLeaseBackendBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Lease backend arbitrating ownership through files on a shared filesystem.
///
/// Needs no external service, which makes it the fallback when no remote
/// coordination store is configured. Assumes the local clock and the
/// filesystem's modification-time clock agree; persistent skew can make a
/// lease look expired early or let it outlive its period.
#[derive(Debug, Clone)]
pub struct FileLeaseBackend {
    pub(crate) root: PathBuf,
    pub(crate) abandon_grace: Duration,
    pub(crate) settle_delay: Duration,
}

impl FileLeaseBackend {
    /// Returns a new builder for configuring the backend.
    pub fn builder() -> FileLeaseBackendBuilder {
        FileLeaseBackendBuilder::new()
    }

    /// Creates a backend rooted at `directory`.
    ///
    /// Convenience method for simple use cases.
    pub fn new(directory: impl Into<PathBuf>) -> LeaseResult<Self> {
        Self::builder().directory(directory).build()
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }
}
