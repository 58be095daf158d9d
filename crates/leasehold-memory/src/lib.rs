//! In-memory lease store.
//!
//! Every conditional write happens under one mutex, which gives the same
//! atomicity a document store gives a single-document update. Useful for
//! tests and for coordinating tasks inside a single process.
//!
//! The store can inject faults to exercise retry and indeterminate-write
//! handling in the engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use leasehold_core::error::{LockResult, StorageError, StorageErrorKind};
use leasehold_core::record::LeaseRecord;
use leasehold_core::store::{CasOutcome, LeaseStore};
use tracing::trace;

/// Fault to inject into upcoming operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Fail with `StorageErrorKind::Unavailable` without touching the data.
    Unavailable,
    /// Apply the write, then report a timeout.
    TimeoutAfterApply,
    /// Report a timeout without applying the write.
    TimeoutBeforeApply,
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<String, LeaseRecord>,
    faults: Vec<(Fault, usize)>,
}

impl Inner {
    /// Pops the fault for the next operation, if any. Read-only calls only
    /// honour `Unavailable`.
    fn take_fault(&mut self, is_write: bool) -> Option<Fault> {
        let (fault, remaining) = self.faults.first_mut()?;
        let fault = *fault;
        if !is_write && fault != Fault::Unavailable {
            return None;
        }
        *remaining -= 1;
        if *remaining == 0 {
            self.faults.remove(0);
        }
        Some(fault)
    }
}

/// A [`LeaseStore`] backed by a process-local map. Clones share the data.
#[derive(Debug, Clone, Default)]
pub struct MemoryLeaseStore {
    inner: Arc<Mutex<Inner>>,
    mutations: Arc<AtomicU64>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes the next `count` eligible operations fail with `fault`.
    pub fn inject_fault(&self, fault: Fault, count: usize) {
        if count > 0 {
            self.lock().faults.push((fault, count));
        }
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Number of injected faults not yet consumed.
    pub fn pending_faults(&self) -> usize {
        self.lock().faults.iter().map(|(_, remaining)| remaining).sum()
    }

    /// Number of writes that were applied.
    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::SeqCst)
    }

    /// The stored record under `key`.
    pub fn get(&self, key: &str) -> Option<LeaseRecord> {
        self.lock().records.get(key).cloned()
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().records.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Overwrites a record unconditionally, bypassing the CAS discipline.
    pub fn force_put(&self, key: &str, record: LeaseRecord) {
        self.lock().records.insert(key.to_string(), record);
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

impl LeaseStore for MemoryLeaseStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn read(&self, key: &str) -> LockResult<Option<LeaseRecord>> {
        let mut inner = self.lock();
        if inner.take_fault(false).is_some() {
            return Err(
                StorageError::new(StorageErrorKind::Unavailable, "injected read fault").into(),
            );
        }
        Ok(inner.records.get(key).cloned())
    }

    async fn compare_and_swap_upsert(
        &self,
        key: &str,
        expected_version: Option<u64>,
        record: &LeaseRecord,
    ) -> LockResult<CasOutcome> {
        let mut inner = self.lock();
        let fault = inner.take_fault(true);
        match fault {
            Some(Fault::Unavailable) => {
                return Err(
                    StorageError::new(StorageErrorKind::Unavailable, "injected write fault").into(),
                );
            }
            Some(Fault::TimeoutBeforeApply) => {
                return Err(
                    StorageError::new(StorageErrorKind::TimedOut, "injected write timeout").into(),
                );
            }
            Some(Fault::TimeoutAfterApply) | None => {}
        }

        let current = inner.records.get(key).map(|r| r.version);
        if current != expected_version {
            trace!(key, ?expected_version, ?current, "version mismatch");
            return Ok(CasOutcome::VersionMismatch);
        }

        inner.records.insert(key.to_string(), record.clone());
        self.mutations.fetch_add(1, Ordering::SeqCst);
        trace!(key, version = record.version, "record written");

        if fault == Some(Fault::TimeoutAfterApply) {
            return Err(
                StorageError::new(StorageErrorKind::TimedOut, "injected write timeout").into(),
            );
        }
        Ok(CasOutcome::Applied)
    }
}
