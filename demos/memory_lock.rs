//! Two workers contending for one lock and a small semaphore, in process.
//!
//! Run with `RUST_LOG=leasehold_engine=debug cargo run --example memory_lock`.

use std::time::Duration;

use leasehold::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let provider = LeaseLockProvider::builder(MemoryLeaseStore::new())
        .ttl_default(Duration::from_secs(2))
        .base_backoff(Duration::from_millis(20))
        .backoff_cap(Duration::from_millis(200))
        .max_attempts(50)
        .build()?;

    let guard = std::sync::Arc::new(FencingGuard::new());
    let mut workers = Vec::new();
    for worker in 0..2 {
        let provider = provider.clone();
        let guard = guard.clone();
        workers.push(tokio::spawn(async move {
            let holder = new_holder_id();
            let lock = provider.create_lock("report-job");
            let handle = lock.acquire(&holder, None, None).await?;
            info!(worker, token = handle.fencing_token(), "acquired");

            match guard.observe("report-job", handle.fencing_token()) {
                Ok(()) => tokio::time::sleep(Duration::from_millis(300)).await,
                Err(e) => warn!(worker, error = %e, "skipping write"),
            }

            handle.release().await?;
            info!(worker, "released");
            Ok::<_, LockError>(())
        }));
    }
    for worker in workers {
        worker.await??;
    }

    let pool = provider.create_semaphore("connections", 2);
    let a = pool.try_acquire("a", None).await?;
    let b = pool.try_acquire("b", None).await?;
    match pool.try_acquire("c", None).await {
        Err(LockError::Contention { .. }) => info!("pool full, as expected"),
        other => info!(?other, "unexpected outcome"),
    }
    let state = pool.state().await?;
    info!(
        available = state.available_permits(),
        holders = state.entries.len(),
        "pool state"
    );

    a.release().await?;
    b.release().await?;
    Ok(())
}
