#![allow(dead_code)]

pub mod contract;
pub mod mock_backend;

use std::time::Duration;

use distributed_lease::{LeaseRequest, LockIdentity};

/// Identity under a fixed account and namespace, unique per test run.
pub fn identity(account: &str, name: &str) -> LockIdentity {
    LockIdentity::new(
        account,
        ["lease-tests", "contract"],
        format!("{name}-{}", uuid::Uuid::new_v4()),
    )
    .unwrap()
}

pub fn request(identity: &LockIdentity, requestor: &str, period: Duration) -> LeaseRequest {
    LeaseRequest::new(identity.clone(), period, requestor).unwrap()
}

/// Installs a test subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
