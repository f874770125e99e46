//! Integration tests for file-arbitrated leases.

use std::fs;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use distributed_lease::file::{FileLeaseBackend, LockFileInfo, select_winner};
use distributed_lease::{LeaseBackend, LeaseBackendExt, LockIdentity};

mod common;
use common::contract;

const PERIOD: Duration = Duration::from_secs(30);
const SHORT_PERIOD: Duration = Duration::from_millis(200);

fn backend(dir: &tempfile::TempDir) -> FileLeaseBackend {
    FileLeaseBackend::new(dir.path()).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_file_backend_contract() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let backend = backend(&dir);
    let ids = |name: &str| common::identity("storage", name);

    contract::run_all(&backend, &ids, PERIOD, SHORT_PERIOD).await;
}

#[tokio::test]
async fn test_two_processes_share_one_directory() {
    // Separate backend instances over the same root behave like separate
    // processes on a shared mount.
    let dir = tempfile::tempdir().unwrap();
    let first = backend(&dir);
    let second = backend(&dir);
    let identity = common::identity("storage", "shared");

    let token = first
        .acquire(&common::request(&identity, "process-a", PERIOD))
        .await
        .unwrap();
    assert!(
        second
            .try_acquire(&common::request(&identity, "process-b", PERIOD))
            .await
            .is_none()
    );
    assert_eq!(
        second.owner(&identity).await.unwrap().as_deref(),
        Some("process-a")
    );

    first.release(&identity, &token).await.unwrap();
    assert!(
        second
            .try_acquire(&common::request(&identity, "process-b", PERIOD))
            .await
            .is_some()
    );
}

fn candidate_count(dir: &tempfile::TempDir, identity: &LockIdentity) -> usize {
    let lock_dir = backend(dir).lock_directory(identity);
    fs::read_dir(&lock_dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "lock"))
        .count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_processes_leave_single_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let identity = common::identity("storage", "orphans");
    let start = Arc::new(tokio::sync::Barrier::new(8));

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..8 {
        let backend = backend(&dir);
        let start = Arc::clone(&start);
        let req = common::request(&identity, &format!("p{i}"), PERIOD);
        tasks.spawn(async move {
            start.wait().await;
            backend.try_acquire(&req).await
        });
    }
    let mut acquired = 0;
    while let Some(result) = tasks.join_next().await {
        acquired += usize::from(result.unwrap().is_some());
    }
    assert_eq!(acquired, 1);
    assert_eq!(candidate_count(&dir, &identity), 1, "losing candidates must be deleted");
}

/// Each thread stands in for a separate process: its own runtime and its own
/// backend over the shared directory, all released at once every round.
#[test]
fn test_threads_racing_for_fresh_locks_get_one_holder_per_round() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 40;

    let dir = tempfile::tempdir().unwrap();
    let identities: Vec<LockIdentity> = (0..ROUNDS)
        .map(|round| common::identity("storage", &format!("round-{round}")))
        .collect();
    let start = std::sync::Barrier::new(THREADS);

    let wins_per_thread: Vec<Vec<bool>> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..THREADS)
            .map(|t| {
                let backend = backend(&dir);
                let identities = &identities;
                let start = &start;
                scope.spawn(move || {
                    let runtime = tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .unwrap();
                    identities
                        .iter()
                        .map(|identity| {
                            let req = common::request(identity, &format!("thread-{t}"), PERIOD);
                            start.wait();
                            runtime.block_on(backend.try_acquire(&req)).is_some()
                        })
                        .collect::<Vec<bool>>()
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    for (round, identity) in identities.iter().enumerate() {
        let holders = wins_per_thread.iter().filter(|wins| wins[round]).count();
        assert_eq!(holders, 1, "round {round} had {holders} holders");
        assert_eq!(candidate_count(&dir, identity), 1, "round {round}");
    }
}

#[tokio::test]
async fn test_candidate_appearing_during_settle_wins_over_later_writer() {
    let dir = tempfile::tempdir().unwrap();
    let slow = FileLeaseBackend::builder()
        .directory(dir.path())
        .settle_delay(Duration::from_millis(300))
        .build()
        .unwrap();
    let identity = common::identity("storage", "late-visible");
    let lock_dir = slow.lock_directory(&identity);

    let req = common::request(&identity, "late-writer", PERIOD);
    let contender = tokio::spawn(async move { slow.try_acquire(&req).await });

    // Another process's candidate becomes visible only now, stamped earlier.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let earlier = lock_dir.join("0a1b2c3d-0000-4000-8000-000000000000.lock");
    fs::write(&earlier, r#"{"duration":30.0,"owner":"early-writer"}"#).unwrap();
    fs::File::options()
        .write(true)
        .open(&earlier)
        .unwrap()
        .set_modified(SystemTime::now() - Duration::from_secs(1))
        .unwrap();

    assert!(contender.await.unwrap().is_none());
    assert_eq!(
        backend(&dir).owner(&identity).await.unwrap().as_deref(),
        Some("early-writer")
    );
    assert_eq!(candidate_count(&dir, &identity), 1);
}

#[tokio::test]
async fn test_oversized_period_is_a_validation_error() {
    let dir = tempfile::tempdir().unwrap();
    let backend = backend(&dir);
    let identity = common::identity("storage", "huge");

    let token = backend
        .acquire(&common::request(&identity, "holder", PERIOD))
        .await
        .unwrap();
    let err = backend
        .renew(&identity, &token, Duration::from_secs(i64::MAX as u64))
        .await
        .unwrap_err();
    assert!(err.is_validation());

    // A candidate whose period runs past the clock's range never goes stale
    // and never panics a reader.
    let foreign = backend
        .lock_directory(&identity)
        .join("ffffffff-0000-4000-8000-000000000000.lock");
    fs::write(&foreign, r#"{"duration":1e19,"owner":"forever"}"#).unwrap();
    assert_eq!(backend.prune_abandoned(&identity).unwrap(), 0);
    assert!(!backend.read_info(&identity).await.unwrap().is_available);

    backend.release(&identity, &token).await.unwrap();
    assert_eq!(
        backend.owner(&identity).await.unwrap().as_deref(),
        Some("forever")
    );
}

#[test]
fn test_tie_break_is_independent_of_listing_order() {
    let modified = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    let now = modified + Duration::from_secs(1);
    let make = |name: &str| LockFileInfo {
        path: format!("/share/storage/a/b/lock/{name}").into(),
        modified,
        duration: PERIOD,
        owner: name.to_string(),
    };

    let smaller = make("3b0e.lock");
    let larger = make("c41f.lock");

    let seen_by_a = vec![smaller.clone(), larger.clone()];
    let seen_by_b = vec![larger.clone(), smaller.clone()];
    assert_eq!(select_winner(&seen_by_a, now).unwrap().path, smaller.path);
    assert_eq!(select_winner(&seen_by_b, now).unwrap().path, smaller.path);
}

#[tokio::test]
async fn test_handle_wait_for_release() {
    let dir = tempfile::tempdir().unwrap();
    let backend = backend(&dir);
    let identity = common::identity("storage", "waiting");

    let holder = backend
        .lock(&common::request(&identity, "holder", PERIOD))
        .await
        .unwrap();

    let waiter_backend = backend.clone();
    let waiter_identity = identity.clone();
    let waiter = tokio::spawn(async move {
        waiter_backend
            .lock_timeout(
                &common::request(&waiter_identity, "waiter", PERIOD),
                Some(Duration::from_secs(5)),
            )
            .await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    holder.release().await.unwrap();

    let handle = waiter.await.unwrap().unwrap();
    assert_eq!(
        backend.owner(&identity).await.unwrap().as_deref(),
        Some("waiter")
    );
    handle.release().await.unwrap();
}

#[tokio::test]
async fn test_handle_lock_timeout_expires() {
    let dir = tempfile::tempdir().unwrap();
    let backend = backend(&dir);
    let identity = common::identity("storage", "timeout");

    let _holder = backend
        .lock(&common::request(&identity, "holder", PERIOD))
        .await
        .unwrap();

    let err = backend
        .lock_timeout(
            &common::request(&identity, "impatient", PERIOD),
            Some(Duration::from_millis(150)),
        )
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn test_lock_directory_layout() {
    let dir = tempfile::tempdir().unwrap();
    let backend = backend(&dir);
    let identity = LockIdentity::new("storage", ["hosts", "singleton"], "job").unwrap();

    assert_eq!(
        backend.lock_directory(&identity),
        dir.path().join("storage").join("hosts").join("singleton").join("job")
    );
}
