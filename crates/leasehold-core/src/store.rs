//! Storage backend contract.

use std::future::Future;

use crate::error::LockResult;
use crate::record::LeaseRecord;

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The record was written.
    Applied,
    /// The stored record did not match the expected version (or absence).
    VersionMismatch,
}

impl CasOutcome {
    pub fn is_applied(self) -> bool {
        self == Self::Applied
    }
}

/// A keyed record store offering atomic conditional writes.
///
/// This is the only thing a backend has to provide. Mutual exclusion rests
/// entirely on `compare_and_swap_upsert` being atomic with respect to the
/// store's own concurrency control (a single-document conditional update, a
/// row update guarded by a version column, a key-value CAS, ...).
///
/// Records are returned as stored, expired or not; callers use
/// [`LeaseRecord::is_expired`] to treat lapsed leases as vacant while still
/// reading their fencing counter.
pub trait LeaseStore: Send + Sync + 'static {
    /// Short backend name used in logs.
    fn backend(&self) -> &'static str;

    /// Reads the record stored under `key`, or `None` if none was ever written.
    fn read(&self, key: &str) -> impl Future<Output = LockResult<Option<LeaseRecord>>> + Send;

    /// Writes `record` under `key` if the stored version equals `expected_version`.
    ///
    /// `expected_version = None` means the key must not exist yet.
    fn compare_and_swap_upsert(
        &self,
        key: &str,
        expected_version: Option<u64>,
        record: &LeaseRecord,
    ) -> impl Future<Output = LockResult<CasOutcome>> + Send;
}
