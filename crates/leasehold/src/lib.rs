//! Store-backed distributed locks and semaphores for Rust.
//!
//! Leases with a ttl, fencing tokens and optimistic concurrency over any
//! store that can do an atomic conditional write on a single record. Locks
//! and semaphores coordinate independent processes purely through the store.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use leasehold::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Create a provider (example: in-memory store)
//!     let provider = LeaseLockProvider::builder(MemoryLeaseStore::new())
//!         .ttl_default(Duration::from_secs(10))
//!         .build()?;
//!
//!     // Create a lock by resource id
//!     let lock = provider.create_lock("job-42");
//!
//!     // Acquire it, retrying for at most five seconds
//!     let holder = new_holder_id();
//!     let handle = lock.acquire(&holder, None, Some(Duration::from_secs(5))).await?;
//!
//!     // Tag every write to the protected resource with the fencing token
//!     println!("token {}", handle.fencing_token());
//!
//!     handle.release().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Stores
//!
//! ## In-memory (`memory` feature, default)
//!
//! A process-local map. Useful in tests, with fault injection for exercising
//! retries.
//!
//! ## MongoDB (`mongo` feature)
//!
//! One document per lease key, guarded by a version field.
//!
//! ```rust,ignore
//! use leasehold::{LeaseLockProvider, MongoLeaseStore};
//!
//! let client = mongodb::Client::with_uri_str("mongodb://localhost:27017").await?;
//! let store = MongoLeaseStore::new(&client.database("app"), None);
//! let provider = LeaseLockProvider::new(store)?;
//! ```
//!
//! Other stores implement [`LeaseStore`]: `read` and `compare_and_swap_upsert`.
//!
//! # Crate Organization
//!
//! This is a meta-crate that re-exports types from:
//! - `leasehold-core`: traits, errors, records, configuration, store contract
//! - `leasehold-engine`: the lock/semaphore engine and provider
//! - `leasehold-memory`: in-memory store
//! - `leasehold-mongo`: MongoDB store

pub use leasehold_core::*;
pub use leasehold_engine::*;

#[cfg(feature = "memory")]
pub use leasehold_memory::{Fault, MemoryLeaseStore};

#[cfg(feature = "mongo")]
pub use leasehold_mongo::{MongoLeaseStore, MongoLeaseStoreOptions};
