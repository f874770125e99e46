//! Behavior every lease backend must show, written once and run per backend.

use std::sync::Arc;
use std::time::Duration;

use distributed_lease::{LeaseBackend, LeaseToken, LockIdentity};
use tokio::sync::Barrier;
use tokio::task::JoinSet;

use super::request;

/// Builds a fresh identity for each property.
pub trait IdentitySource {
    fn identity(&self, name: &str) -> LockIdentity;
}

impl<F: Fn(&str) -> LockIdentity> IdentitySource for F {
    fn identity(&self, name: &str) -> LockIdentity {
        self(name)
    }
}

const CONTENDERS: usize = 16;

/// Well-formed for every backend, held by nobody.
const FOREIGN_TOKEN: &str = "00000000-0000-0000-0000-000000000000.lock";

/// N concurrent `try_acquire` calls on a free lock produce exactly one token.
///
/// Run from a multi-threaded runtime so the contenders really overlap.
pub async fn mutual_exclusion<B>(backend: &B, ids: &impl IdentitySource, period: Duration)
where
    B: LeaseBackend + Clone + 'static,
{
    let identity = ids.identity("mutex");
    let start = Arc::new(Barrier::new(CONTENDERS));
    let mut tasks = JoinSet::new();
    for i in 0..CONTENDERS {
        let backend = backend.clone();
        let start = Arc::clone(&start);
        let req = request(&identity, &format!("contender-{i}"), period);
        tasks.spawn(async move {
            start.wait().await;
            backend.try_acquire(&req).await
        });
    }

    let mut winners = Vec::new();
    while let Some(result) = tasks.join_next().await {
        if let Some(token) = result.unwrap() {
            winners.push(token);
        }
    }
    assert_eq!(winners.len(), 1, "{} contenders acquired the lease", winners.len());

    // The winner keeps it exclusively.
    let late = request(&identity, "late", period);
    assert!(backend.try_acquire(&late).await.is_none());
    backend.release(&identity, &winners[0]).await.unwrap();
}

/// A held lease blocks a second requestor until released.
pub async fn exclusive_until_released<B: LeaseBackend>(
    backend: &B,
    ids: &impl IdentitySource,
    period: Duration,
) {
    let identity = ids.identity("exclusive");
    let first = request(&identity, "first", period);
    let second = request(&identity, "second", period);

    let token = backend.acquire(&first).await.unwrap();
    let err = backend.acquire(&second).await.unwrap_err();
    assert!(err.is_conflict(), "expected conflict, got {err}");
    assert!(backend.try_acquire(&second).await.is_none());

    backend.release(&identity, &token).await.unwrap();
    let token = backend.acquire(&second).await.unwrap();
    backend.release(&identity, &token).await.unwrap();
}

/// Renewing a released lease reports a conflict.
pub async fn renew_after_release_conflicts<B: LeaseBackend>(
    backend: &B,
    ids: &impl IdentitySource,
    period: Duration,
) {
    let identity = ids.identity("renew-released");
    let req = request(&identity, "holder", period);

    let token = backend.acquire(&req).await.unwrap();
    backend.renew(&identity, &token, period).await.unwrap();
    backend.release(&identity, &token).await.unwrap();

    let err = backend.renew(&identity, &token, period).await.unwrap_err();
    assert!(err.is_conflict(), "expected conflict, got {err}");
}

/// Once a lease lapses and someone else takes it, the old holder cannot renew.
pub async fn renew_after_expiry_conflicts<B: LeaseBackend>(
    backend: &B,
    ids: &impl IdentitySource,
    short_period: Duration,
) {
    let identity = ids.identity("renew-expired");
    let original = request(&identity, "original", short_period);
    let token = backend.acquire(&original).await.unwrap();

    tokio::time::sleep(short_period * 2).await;

    let usurper = request(&identity, "usurper", short_period * 20);
    let usurper_token = backend.acquire(&usurper).await.unwrap();

    let err = backend
        .renew(&identity, &token, short_period)
        .await
        .unwrap_err();
    assert!(err.is_conflict(), "expected conflict, got {err}");

    // The new holder is unaffected.
    backend
        .renew(&identity, &usurper_token, short_period * 20)
        .await
        .unwrap();
    backend.release(&identity, &usurper_token).await.unwrap();
}

/// Releasing twice, or releasing a lease that lapsed, never fails.
pub async fn release_is_idempotent<B: LeaseBackend>(
    backend: &B,
    ids: &impl IdentitySource,
    short_period: Duration,
) {
    let identity = ids.identity("release-twice");
    let req = request(&identity, "holder", short_period * 20);
    let token = backend.acquire(&req).await.unwrap();
    backend.release(&identity, &token).await.unwrap();
    backend.release(&identity, &token).await.unwrap();

    let identity = ids.identity("release-expired");
    let req = request(&identity, "holder", short_period);
    let token = backend.acquire(&req).await.unwrap();
    tokio::time::sleep(short_period * 2).await;
    backend.release(&identity, &token).await.unwrap();

    // Also after someone else took it over.
    let other = request(&identity, "other", short_period * 20);
    let other_token = backend.acquire(&other).await.unwrap();
    backend.release(&identity, &token).await.unwrap();
    assert!(!backend.read_info(&identity).await.unwrap().is_available);
    backend.release(&identity, &other_token).await.unwrap();
}

/// A lock nobody ever touched reads as available with no metadata.
pub async fn never_created_is_available<B: LeaseBackend>(backend: &B, ids: &impl IdentitySource) {
    let identity = ids.identity("never-created");
    let snapshot = backend.read_info(&identity).await.unwrap();
    assert!(snapshot.is_available);
    assert!(snapshot.metadata.is_empty());
}

/// Written metadata is visible to readers, held or not.
pub async fn metadata_round_trip<B: LeaseBackend>(
    backend: &B,
    ids: &impl IdentitySource,
    period: Duration,
) {
    let identity = ids.identity("metadata");
    let req = request(&identity, "writer", period);
    let token = backend.acquire(&req).await.unwrap();

    backend
        .write_metadata(&identity, &token, "k", "v")
        .await
        .unwrap();
    backend
        .write_metadata(&identity, &token, "epoch", "42")
        .await
        .unwrap();

    let snapshot = backend.read_info(&identity).await.unwrap();
    assert!(!snapshot.is_available);
    assert_eq!(snapshot.metadata.get("k").map(String::as_str), Some("v"));
    assert_eq!(snapshot.metadata.get("epoch").map(String::as_str), Some("42"));

    backend.release(&identity, &token).await.unwrap();

    // Metadata outlives the lease.
    let snapshot = backend.read_info(&identity).await.unwrap();
    assert!(snapshot.is_available);
    assert_eq!(snapshot.metadata.get("k").map(String::as_str), Some("v"));
}

/// Metadata writes by a non-holder are rejected.
pub async fn metadata_requires_ownership<B: LeaseBackend>(
    backend: &B,
    ids: &impl IdentitySource,
    period: Duration,
) {
    let identity = ids.identity("metadata-owner");
    let req = request(&identity, "holder", period);
    let token = backend.acquire(&req).await.unwrap();

    let err = backend
        .write_metadata(&identity, &LeaseToken::new(FOREIGN_TOKEN), "k", "v")
        .await
        .unwrap_err();
    assert!(err.is_conflict(), "expected conflict, got {err}");

    let err = backend
        .write_metadata(&identity, &token, "", "v")
        .await
        .unwrap_err();
    assert!(err.is_validation());

    backend.release(&identity, &token).await.unwrap();
}

/// Runs every property above.
pub async fn run_all<B>(
    backend: &B,
    ids: &impl IdentitySource,
    period: Duration,
    short_period: Duration,
) where
    B: LeaseBackend + Clone + 'static,
{
    mutual_exclusion(backend, ids, period).await;
    exclusive_until_released(backend, ids, period).await;
    renew_after_release_conflicts(backend, ids, period).await;
    renew_after_expiry_conflicts(backend, ids, short_period).await;
    release_is_idempotent(backend, ids, short_period).await;
    never_created_is_available(backend, ids).await;
    metadata_round_trip(backend, ids, period).await;
    metadata_requires_ownership(backend, ids, period).await;
}
