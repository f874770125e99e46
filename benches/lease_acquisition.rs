//! Benchmarks for lease acquisition latency

use std::time::{Duration, SystemTime};

use criterion::{Criterion, criterion_group, criterion_main};
use distributed_lease::blob::{BlobLeaseBackend, MemoryBlobStore};
use distributed_lease::file::{FileLeaseBackend, LockFileInfo, select_winner};
use distributed_lease::prelude::*;
use tempfile::TempDir;

const PERIOD: Duration = Duration::from_secs(30);

fn request(scope: &str, name: &str) -> LeaseRequest {
    let identity = LockIdentity::new(scope, ["bench-locks", "singleton"], name).unwrap();
    LeaseRequest::new(identity, PERIOD, "bench-host").unwrap()
}

fn bench_file_lease(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    // Single contender; measure the I/O, not the settle wait.
    let backend = FileLeaseBackend::builder()
        .directory(temp_dir.path())
        .settle_delay(Duration::ZERO)
        .build()
        .unwrap();
    let request = request("storage", "bench-lock");

    let mut group = c.benchmark_group("file_lease");
    group.bench_function("acquire_release", |b| {
        b.to_async(tokio::runtime::Runtime::new().unwrap())
            .iter(|| async {
                if let Some(token) = backend.try_acquire(&request).await {
                    let _ = backend.release(request.identity(), &token).await;
                }
            });
    });

    group.bench_function("read_info", |b| {
        b.to_async(tokio::runtime::Runtime::new().unwrap())
            .iter(|| async {
                let _ = backend.read_info(request.identity()).await;
            });
    });

    group.finish();
}

fn bench_winner_selection(c: &mut Criterion) {
    let now = SystemTime::now();
    let candidates: Vec<LockFileInfo> = (0..100u64)
        .map(|i| LockFileInfo {
            path: format!("/share/storage/bench/lock/{i:04}.lock").into(),
            modified: now - Duration::from_millis(i % 7),
            duration: PERIOD,
            owner: format!("host-{i}"),
        })
        .collect();

    c.bench_function("select_winner_100", |b| {
        b.iter(|| select_winner(std::hint::black_box(&candidates), now));
    });
}

fn bench_blob_lease(c: &mut Criterion) {
    let backend = BlobLeaseBackend::new(MemoryBlobStore::new());
    let request = request("acct", "bench-lock");

    let mut group = c.benchmark_group("blob_lease");
    group.bench_function("acquire_release", |b| {
        b.to_async(tokio::runtime::Runtime::new().unwrap())
            .iter(|| async {
                if let Some(token) = backend.try_acquire(&request).await {
                    let _ = backend.release(request.identity(), &token).await;
                }
            });
    });

    group.bench_function("handle_renew", |b| {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let handle = runtime.block_on(backend.lock(&request)).unwrap();
        b.to_async(runtime).iter(|| async {
            let _ = backend
                .renew(handle.identity(), handle.token(), PERIOD)
                .await;
        });
    });

    group.finish();
}

criterion_group!(benches, bench_file_lease, bench_winner_selection, bench_blob_lease);
criterion_main!(benches);
