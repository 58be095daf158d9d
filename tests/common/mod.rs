//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::time::Duration;

use leasehold_core::clock::ManualClock;
use leasehold_core::error::LockResult;
use leasehold_core::record::LeaseRecord;
use leasehold_core::store::{CasOutcome, LeaseStore};
use leasehold_engine::LeaseLockProvider;
use leasehold_memory::MemoryLeaseStore;

/// Everything a test needs to drive the engine deterministically.
pub struct Harness {
    pub store: MemoryLeaseStore,
    pub clock: ManualClock,
    pub provider: LeaseLockProvider<MemoryLeaseStore>,
}

/// A provider over an in-memory store and a manual clock, without background
/// renewal, and with backoff short enough for tests.
pub fn manual_harness() -> Harness {
    let store = MemoryLeaseStore::new();
    let clock = ManualClock::new(1_700_000_000_000);
    let provider = LeaseLockProvider::builder(store.clone())
        .clock(clock.clone())
        .auto_renew(false)
        .base_backoff(Duration::from_millis(1))
        .backoff_cap(Duration::from_millis(5))
        .max_attempts(5)
        .build()
        .unwrap();
    Harness {
        store,
        clock,
        provider,
    }
}

/// A provider over an in-memory store on the system clock with background
/// renewal enabled.
pub fn renewing_provider(store: &MemoryLeaseStore) -> LeaseLockProvider<MemoryLeaseStore> {
    LeaseLockProvider::builder(store.clone())
        .auto_renew(true)
        .base_backoff(Duration::from_millis(5))
        .backoff_cap(Duration::from_millis(20))
        .build()
        .unwrap()
}

/// A store that yields to the scheduler around every call, so concurrent
/// tasks interleave between each other's read and write.
#[derive(Debug, Clone)]
pub struct YieldingStore<S> {
    inner: S,
}

impl<S: LeaseStore> LeaseStore for YieldingStore<S> {
    fn backend(&self) -> &'static str {
        self.inner.backend()
    }

    async fn read(&self, key: &str) -> LockResult<Option<LeaseRecord>> {
        tokio::task::yield_now().await;
        let record = self.inner.read(key).await;
        tokio::task::yield_now().await;
        record
    }

    async fn compare_and_swap_upsert(
        &self,
        key: &str,
        expected_version: Option<u64>,
        record: &LeaseRecord,
    ) -> LockResult<CasOutcome> {
        tokio::task::yield_now().await;
        let outcome = self
            .inner
            .compare_and_swap_upsert(key, expected_version, record)
            .await;
        tokio::task::yield_now().await;
        outcome
    }
}

/// A provider over an interleaving in-memory store on the system clock,
/// without background renewal.
pub fn yielding_provider(
    store: &MemoryLeaseStore,
) -> LeaseLockProvider<YieldingStore<MemoryLeaseStore>> {
    LeaseLockProvider::builder(YieldingStore {
        inner: store.clone(),
    })
    .auto_renew(false)
    .base_backoff(Duration::from_millis(1))
    .backoff_cap(Duration::from_millis(5))
    .max_attempts(5)
    .build()
    .unwrap()
}

/// Installs a test log subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
