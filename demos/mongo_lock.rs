//! Acquire a lease stored in MongoDB, hold it while renewal runs, release it.
//!
//! Expects a server at `MONGODB_URI` (default `mongodb://localhost:27017`).

use std::time::Duration;

use leasehold_core::prelude::*;
use leasehold_engine::{LeaseLockProvider, new_holder_id};
use leasehold_mongo::MongoLeaseStore;
use mongodb::Client;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let uri =
        std::env::var("MONGODB_URI").unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
    let client = Client::with_uri_str(&uri).await?;
    let store = MongoLeaseStore::new(&client.database("leasehold_demo"), None);

    let provider = LeaseLockProvider::builder(store)
        .ttl_default(Duration::from_secs(3))
        .build()?;
    let lock = provider.create_lock("nightly-export");

    let handle = lock
        .acquire(&new_holder_id(), None, Some(Duration::from_secs(10)))
        .await?;
    info!(token = handle.fencing_token(), "lease acquired");

    let mut lost = handle.lost_token().clone();
    tokio::select! {
        _ = lost.wait_for(|&l| l) => warn!("lease lost, stopping"),
        _ = tokio::time::sleep(Duration::from_secs(8)) => {
            info!(version = handle.lease().version, "work done");
            handle.release().await?;
        }
    }
    Ok(())
}
