//! In-process lease backend that records how often it is called.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use distributed_lease::{
    BackendKind, LeaseBackend, LeaseError, LeaseRequest, LeaseResult, LeaseSnapshot, LeaseToken,
    LockIdentity,
};

#[derive(Debug, Clone)]
struct Entry {
    token: LeaseToken,
    expires_at: Instant,
    metadata: HashMap<String, String>,
}

/// Single-process lease table keyed by the identity's display form.
#[derive(Debug, Clone, Default)]
pub struct MockLeaseBackend {
    leases: Arc<Mutex<HashMap<String, Entry>>>,
    calls: Arc<AtomicUsize>,
}

impl MockLeaseBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of backend operations invoked so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Hands the lease to someone else, as if the holder's lease lapsed.
    pub fn steal(&self, identity: &LockIdentity) {
        let mut leases = self.leases.lock().unwrap();
        if let Some(entry) = leases.get_mut(&identity.to_string()) {
            entry.token = LeaseToken::new("thief");
        }
    }

    fn record(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl LeaseBackend for MockLeaseBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    async fn acquire(&self, request: &LeaseRequest) -> LeaseResult<LeaseToken> {
        self.record();
        let now = Instant::now();
        let mut leases = self.leases.lock().unwrap();
        let entry = leases
            .entry(request.identity().to_string())
            .or_insert_with(|| Entry {
                token: LeaseToken::new(""),
                expires_at: now,
                metadata: HashMap::new(),
            });

        if entry.expires_at > now {
            return Err(LeaseError::conflict("held"));
        }
        entry.token = LeaseToken::new(uuid::Uuid::new_v4().to_string());
        entry.expires_at = now + request.period();
        Ok(entry.token.clone())
    }

    async fn renew(
        &self,
        identity: &LockIdentity,
        token: &LeaseToken,
        period: Duration,
    ) -> LeaseResult<()> {
        self.record();
        let mut leases = self.leases.lock().unwrap();
        match leases.get_mut(&identity.to_string()) {
            Some(entry) if &entry.token == token => {
                entry.expires_at = Instant::now() + period;
                Ok(())
            }
            _ => Err(LeaseError::conflict("not the holder")),
        }
    }

    async fn release(&self, identity: &LockIdentity, token: &LeaseToken) -> LeaseResult<()> {
        self.record();
        let mut leases = self.leases.lock().unwrap();
        if let Some(entry) = leases.get_mut(&identity.to_string())
            && &entry.token == token
        {
            entry.token = LeaseToken::new("");
            entry.expires_at = Instant::now();
        }
        Ok(())
    }

    async fn write_metadata(
        &self,
        identity: &LockIdentity,
        token: &LeaseToken,
        key: &str,
        value: &str,
    ) -> LeaseResult<()> {
        self.record();
        if key.is_empty() {
            return Err(LeaseError::validation("key", "metadata key cannot be empty"));
        }
        let mut leases = self.leases.lock().unwrap();
        match leases.get_mut(&identity.to_string()) {
            Some(entry) if &entry.token == token && entry.expires_at > Instant::now() => {
                entry.metadata.insert(key.to_string(), value.to_string());
                Ok(())
            }
            _ => Err(LeaseError::conflict("not the holder")),
        }
    }

    async fn read_info(&self, identity: &LockIdentity) -> LeaseResult<LeaseSnapshot> {
        self.record();
        let leases = self.leases.lock().unwrap();
        Ok(match leases.get(&identity.to_string()) {
            Some(entry) => LeaseSnapshot {
                is_available: entry.expires_at <= Instant::now(),
                metadata: entry.metadata.clone(),
            },
            None => LeaseSnapshot::never_created(),
        })
    }
}
