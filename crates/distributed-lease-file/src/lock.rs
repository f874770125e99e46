//! File arbitration lease implementation.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use distributed_lease_core::error::{LeaseError, LeaseResult};
use distributed_lease_core::traits::LeaseBackend;
use distributed_lease_core::{
    BackendKind, LeaseRequest, LeaseSnapshot, LeaseToken, LockIdentity, validate_metadata_key,
    validate_period,
};
use tracing::{Span, debug, instrument};
use uuid::Uuid;

use crate::arbitration::{LockFileContent, LockFileInfo, read_lock_file, read_lock_files, select_winner};
use crate::metadata::{merge_metadata, read_metadata};
use crate::name::{TEMP_FILE_EXTENSION, candidate_path, lock_directory, new_candidate_name};
use crate::provider::FileLeaseBackend;

impl FileLeaseBackend {
    /// Directory holding the candidates for `identity`.
    pub fn lock_directory(&self, identity: &LockIdentity) -> PathBuf {
        lock_directory(&self.root, identity)
    }

    /// Returns the requestor id of the live holder, if any.
    #[instrument(skip(self), fields(lock.key = %identity, backend = "file"))]
    pub async fn owner(&self, identity: &LockIdentity) -> LeaseResult<Option<String>> {
        let files = read_lock_files(&self.lock_directory(identity))?;
        Ok(select_winner(&files, SystemTime::now()).map(|winner| winner.owner.clone()))
    }

    /// Deletes candidates that have been stale far longer than their period.
    ///
    /// A candidate counts as abandoned once
    /// `modified + 2 * duration + abandon_grace` has passed. Each file is
    /// re-read right before deletion so a concurrent renew is not undone.
    /// Returns the number of files removed.
    pub fn prune_abandoned(&self, identity: &LockIdentity) -> LeaseResult<usize> {
        let files = read_lock_files(&self.lock_directory(identity))?;
        Ok(self.prune_files(&files, SystemTime::now()))
    }

    fn prune_files(&self, files: &[LockFileInfo], now: SystemTime) -> usize {
        let mut removed = 0;
        for file in files.iter().filter(|f| self.is_abandoned(f, now)) {
            // Re-read to avoid deleting a candidate that was just renewed.
            match read_lock_file(&file.path) {
                Ok(Some(current)) if self.is_abandoned(&current, now) => {
                    if remove_if_exists(&file.path).is_ok() {
                        debug!(path = %file.path.display(), owner = %file.owner, "pruned abandoned lock file");
                        removed += 1;
                    }
                }
                _ => {}
            }
        }
        removed
    }

    fn is_abandoned(&self, file: &LockFileInfo, now: SystemTime) -> bool {
        file.expires_at()
            .and_then(|t| t.checked_add(file.duration))
            .and_then(|t| t.checked_add(self.abandon_grace))
            .is_some_and(|abandoned_at| abandoned_at <= now)
    }

    /// Creates a fresh candidate in place.
    ///
    /// The file is visible before its last write lands, so its final
    /// modification time is never earlier than the moment other readers could
    /// first see it. Readers skip it until the content parses.
    fn create_candidate(&self, path: &Path, period: Duration, owner: &str) -> LeaseResult<()> {
        let serialized = serialize_candidate(period, owner)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                LeaseError::unknown(format!("failed to create lock file '{}'", path.display()), e)
            })?;
        file.write_all(serialized.as_bytes()).map_err(|e| {
            let _ = fs::remove_file(path);
            LeaseError::unknown(format!("failed to write lock file '{}'", path.display()), e)
        })
    }

    /// Replaces an existing candidate under a temporary name, then renames it
    /// into place so readers never observe the holder's file half-written.
    fn replace_candidate(
        &self,
        directory: &Path,
        path: &Path,
        period: Duration,
        owner: &str,
    ) -> LeaseResult<()> {
        let serialized = serialize_candidate(period, owner)?;
        let temp = directory.join(format!("{}.{}", Uuid::new_v4(), TEMP_FILE_EXTENSION));
        fs::write(&temp, serialized).map_err(|e| {
            LeaseError::unknown(format!("failed to write lock file '{}'", temp.display()), e)
        })?;
        fs::rename(&temp, path).map_err(|e| {
            let _ = fs::remove_file(&temp);
            LeaseError::unknown(format!("failed to place lock file '{}'", path.display()), e)
        })
    }

    /// Whether `path` is the current winner of `directory`.
    fn is_winner(&self, directory: &Path, path: &Path) -> LeaseResult<bool> {
        self.is_winner_at(directory, path, SystemTime::now())
    }

    /// Whether `path` wins among the candidates on disk that were live at `at`.
    fn is_winner_at(&self, directory: &Path, path: &Path, at: SystemTime) -> LeaseResult<bool> {
        let files = read_lock_files(directory)?;
        Ok(select_winner(&files, at).is_some_and(|winner| winner.path == path))
    }

    /// Drops a candidate unless a live holder already exists.
    ///
    /// Returns the candidate's file name, its path and when it was written.
    fn place_candidate(
        &self,
        request: &LeaseRequest,
    ) -> LeaseResult<Option<(String, PathBuf, SystemTime)>> {
        let directory = self.lock_directory(request.identity());
        fs::create_dir_all(&directory).map_err(|e| {
            LeaseError::unknown(
                format!("failed to create lock directory '{}'", directory.display()),
                e,
            )
        })?;

        let now = SystemTime::now();
        let files = read_lock_files(&directory)?;
        self.prune_files(&files, now);

        if let Some(active) = select_winner(&files, now) {
            debug!(owner = %active.owner, "lock held by live candidate");
            return Ok(None);
        }

        let file_name = new_candidate_name();
        let path = directory.join(&file_name);
        self.create_candidate(&path, request.period(), request.requestor_id())?;
        Ok(Some((file_name, path, now)))
    }

    async fn try_acquire_internal(&self, request: &LeaseRequest) -> LeaseResult<Option<LeaseToken>> {
        validate_period(request.period())?;
        let Some((file_name, path, placed_at)) = self.place_candidate(request)? else {
            return Ok(None);
        };
        let directory = self.lock_directory(request.identity());

        // Contenders that wrote at nearly the same instant may not be visible
        // yet, or may share our timestamp at the filesystem's granularity.
        // Decide only once every earlier candidate has had time to show up,
        // judging liveness as of our own write.
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        if self.is_winner_at(&directory, &path, placed_at)? {
            return Ok(Some(LeaseToken::new(file_name)));
        }

        // Lost the race; never leave a non-winning candidate behind.
        remove_if_exists(&path)?;
        Ok(None)
    }
}

fn serialize_candidate(period: Duration, owner: &str) -> LeaseResult<String> {
    let content = LockFileContent {
        duration: period.as_secs_f64(),
        owner: owner.to_string(),
    };
    serde_json::to_string(&content).map_err(|e| LeaseError::unknown("failed to serialize lock file", e))
}

fn remove_if_exists(path: &Path) -> LeaseResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(LeaseError::unknown(
            format!("failed to delete lock file '{}'", path.display()),
            e,
        )),
    }
}

impl LeaseBackend for FileLeaseBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    #[instrument(
        skip(self, request),
        fields(
            lock.key = %request.identity(),
            backend = "file",
            acquired = tracing::field::Empty,
            error = tracing::field::Empty,
        )
    )]
    async fn acquire(&self, request: &LeaseRequest) -> LeaseResult<LeaseToken> {
        match self.try_acquire_internal(request).await {
            Ok(Some(token)) => {
                Span::current().record("acquired", true);
                Ok(token)
            }
            Ok(None) => {
                Span::current().record("acquired", false);
                Err(LeaseError::conflict(format!(
                    "lock '{}' is held by another candidate",
                    request.identity()
                )))
            }
            Err(e) => {
                Span::current().record("acquired", false);
                Span::current().record("error", e.to_string());
                Err(e)
            }
        }
    }

    #[instrument(skip(self), fields(lock.key = %identity, backend = "file"))]
    async fn renew(
        &self,
        identity: &LockIdentity,
        token: &LeaseToken,
        period: Duration,
    ) -> LeaseResult<()> {
        validate_period(period)?;
        let directory = self.lock_directory(identity);
        let path = candidate_path(&directory, token)?;

        let current = read_lock_file(&path)?;
        let Some(current) = current else {
            return Err(LeaseError::conflict(format!(
                "lock file for '{identity}' no longer exists"
            )));
        };

        // Replacing the file gives it a fresh modification time.
        self.replace_candidate(&directory, &path, period, &current.owner)?;

        if self.is_winner(&directory, &path)? {
            return Ok(());
        }

        remove_if_exists(&path)?;
        Err(LeaseError::conflict(format!(
            "lock '{identity}' was taken over by another candidate"
        )))
    }

    #[instrument(skip(self), fields(lock.key = %identity, backend = "file"))]
    async fn release(&self, identity: &LockIdentity, token: &LeaseToken) -> LeaseResult<()> {
        let path = candidate_path(&self.lock_directory(identity), token)?;
        remove_if_exists(&path)
    }

    #[instrument(skip(self, value), fields(lock.key = %identity, backend = "file"))]
    async fn write_metadata(
        &self,
        identity: &LockIdentity,
        token: &LeaseToken,
        key: &str,
        value: &str,
    ) -> LeaseResult<()> {
        validate_metadata_key(key)?;
        let directory = self.lock_directory(identity);
        let path = candidate_path(&directory, token)?;

        if !self.is_winner(&directory, &path)? {
            return Err(LeaseError::conflict(format!(
                "metadata write on '{identity}' by a non-holder"
            )));
        }

        merge_metadata(&directory, key, value)
    }

    #[instrument(skip(self), fields(lock.key = %identity, backend = "file"))]
    async fn read_info(&self, identity: &LockIdentity) -> LeaseResult<LeaseSnapshot> {
        let directory = self.lock_directory(identity);
        let files = read_lock_files(&directory)?;
        let is_available = select_winner(&files, SystemTime::now()).is_none();
        let metadata = read_metadata(&directory)?;
        Ok(LeaseSnapshot {
            is_available,
            metadata,
        })
    }
}
