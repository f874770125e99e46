//! Example: taking a singleton lease through the backend selector
//!
//! Run with: `cargo run --example file_lease`
//!
//! With no `LEASE_CONNECTION_<ACCOUNT>` variable set the selector falls back
//! to file leases under the system temp directory. Start two copies to watch
//! the second one wait.

use std::time::Duration;

use distributed_lease::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let selector = BackendSelector::from_env()?;
    let requestor = format!("demo-{}", std::process::id());

    let identity = LockIdentity::new("storage", ["demo-hosts", "singleton"], "nightly-report")?;
    let request = LeaseRequest::new(identity, Duration::from_secs(15), requestor.as_str())?;

    let backend = selector.resolve(request.identity().scope()).await?;
    println!("Using {} leases for '{}'", backend.kind(), request.identity());

    println!("Acquiring lease with 30 second timeout...");
    let mut handle = selector
        .acquire_timeout(&request, Some(Duration::from_secs(30)))
        .await?;
    println!("Lease acquired by {requestor}");

    handle.write_metadata("holder", &requestor).await?;

    // Work in slices, renewing well before the lease runs out.
    for step in 1..=3 {
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.renew().await?;
        println!("Step {step} done, lease renewed ({:?} left)", handle.remaining());
    }

    let info = handle.read_info().await?;
    println!("Metadata: {:?}", info.metadata);

    handle.release().await?;
    println!("Lease released");

    Ok(())
}
