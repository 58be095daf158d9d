//! The lease protocol against a [`LeaseStore`].
//!
//! Every operation is a read followed by one conditional write guarded by the
//! version that was read. When a write times out its outcome is unknown, so
//! the record is read again and compared with what we tried to write before
//! anything is concluded.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use leasehold_core::clock::Clock;
use leasehold_core::config::LockOptions;
use leasehold_core::error::{LockError, LockResult, StorageError};
use leasehold_core::record::LeaseRecord;
use leasehold_core::store::{CasOutcome, LeaseStore};
use leasehold_core::timeout::Deadline;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::backoff::next_backoff;

/// Shared state behind every lock, semaphore and handle of one provider.
pub(crate) struct LeaseCoordinator<S: LeaseStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    options: LockOptions,
}

impl<S: LeaseStore> LeaseCoordinator<S> {
    pub(crate) fn new(store: Arc<S>, clock: Arc<dyn Clock>, options: LockOptions) -> Self {
        Self {
            store,
            clock,
            options,
        }
    }

    pub(crate) fn options(&self) -> &LockOptions {
        &self.options
    }

    pub(crate) fn backend(&self) -> &'static str {
        self.store.backend()
    }

    pub(crate) fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// The ttl to use for an operation, defaulting to `ttl_default`.
    pub(crate) fn resolve_ttl(&self, ttl: Option<Duration>) -> LockResult<Duration> {
        let ttl = ttl.unwrap_or(self.options.ttl_default);
        if ttl.is_zero() {
            return Err(LockError::InvalidConfig("ttl must be positive".to_string()));
        }
        Ok(ttl)
    }

    fn expiry_after(&self, now_ms: u64, ttl: Duration) -> u64 {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        now_ms.saturating_add(ttl_ms)
    }

    async fn bounded<T>(&self, op: impl Future<Output = LockResult<T>>) -> LockResult<T> {
        let limit = self.options.store_timeout;
        match tokio::time::timeout(limit, op).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::timed_out(limit).into()),
        }
    }

    pub(crate) async fn read(&self, key: &str) -> LockResult<Option<LeaseRecord>> {
        self.bounded(self.store.read(key)).await
    }

    async fn write(
        &self,
        key: &str,
        expected_version: Option<u64>,
        record: &LeaseRecord,
    ) -> LockResult<WriteOutcome> {
        match self
            .bounded(self.store.compare_and_swap_upsert(key, expected_version, record))
            .await
        {
            Ok(CasOutcome::Applied) => Ok(WriteOutcome::Applied),
            Ok(CasOutcome::VersionMismatch) => Ok(WriteOutcome::Superseded),
            Err(LockError::Storage(e)) if e.is_indeterminate() => {
                debug!(key, error = %e, "write outcome unknown, re-reading");
                let current = self.read(key).await?;
                Ok(classify_after_timeout(current.as_ref(), expected_version, record, e))
            }
            Err(e) => Err(e),
        }
    }

    /// One acquisition attempt: take `key` if it is absent or expired.
    pub(crate) async fn try_grant(
        &self,
        key: &str,
        resource_id: &str,
        holder_id: &str,
        ttl: Duration,
    ) -> LockResult<LeaseRecord> {
        let current = self.read(key).await?;
        let now = self.now_ms();

        if let Some(record) = &current
            && !record.is_expired(now)
        {
            trace!(key, holder = %record.holder_id, "lease held");
            return Err(LockError::contention(resource_id));
        }

        let granted = LeaseRecord::granted(
            resource_id,
            holder_id,
            current.as_ref(),
            self.expiry_after(now, ttl),
        );
        let expected = current.as_ref().map(|r| r.version);

        match self.write(key, expected, &granted).await? {
            WriteOutcome::Applied => Ok(granted),
            WriteOutcome::Superseded => Err(LockError::contention(resource_id)),
            WriteOutcome::Unknown(e) => Err(e.into()),
        }
    }

    /// Pushes the expiry of a lease held at `version` to `ttl` from now.
    pub(crate) async fn extend(
        &self,
        key: &str,
        resource_id: &str,
        holder_id: &str,
        version: u64,
        ttl: Duration,
    ) -> LockResult<LeaseRecord> {
        let current = self.read(key).await?;
        let now = self.now_ms();

        let current = match current {
            Some(record) if record.version == version && record.holder_id == holder_id => record,
            Some(record) => {
                return Err(LockError::InvalidHandle(format!(
                    "lease on '{resource_id}' moved to version {} (held at {version})",
                    record.version
                )));
            }
            None => {
                return Err(LockError::InvalidHandle(format!(
                    "lease record for '{resource_id}' no longer exists"
                )));
            }
        };

        if current.is_expired(now) {
            return Err(LockError::lease_expired(resource_id));
        }

        let renewed = current.renewed(self.expiry_after(now, ttl));
        match self.write(key, Some(version), &renewed).await? {
            WriteOutcome::Applied => Ok(renewed),
            WriteOutcome::Superseded => Err(LockError::InvalidHandle(format!(
                "lease on '{resource_id}' changed during renewal"
            ))),
            WriteOutcome::Unknown(e) => Err(e.into()),
        }
    }

    /// Marks a lease held at `version` as released, keeping its counters.
    pub(crate) async fn vacate(
        &self,
        key: &str,
        resource_id: &str,
        holder_id: &str,
        version: u64,
    ) -> LockResult<()> {
        let current = match self.read(key).await? {
            Some(record) if record.version == version && record.holder_id == holder_id => record,
            _ => {
                return Err(LockError::InvalidHandle(format!(
                    "lease on '{resource_id}' is no longer held at version {version}"
                )));
            }
        };

        match self.write(key, Some(version), &current.released()).await? {
            WriteOutcome::Applied => Ok(()),
            WriteOutcome::Superseded => Err(LockError::InvalidHandle(format!(
                "lease on '{resource_id}' changed during release"
            ))),
            WriteOutcome::Unknown(e) => Err(e.into()),
        }
    }

    /// Stores `record` under `key` unless something is already there. Returns
    /// whichever record ends up stored.
    pub(crate) async fn insert_or_read(
        &self,
        key: &str,
        record: &LeaseRecord,
    ) -> LockResult<LeaseRecord> {
        if let Some(existing) = self.read(key).await? {
            return Ok(existing);
        }

        match self.write(key, None, record).await? {
            WriteOutcome::Applied => Ok(record.clone()),
            WriteOutcome::Superseded => self.read(key).await?.ok_or_else(|| {
                StorageError::corrupt(format!("record '{key}' vanished after a competing insert"))
                    .into()
            }),
            WriteOutcome::Unknown(e) => Err(e.into()),
        }
    }

    /// Releases `key` if `holder_id` currently holds a live lease on it.
    pub(crate) async fn release_if_held(
        &self,
        key: &str,
        resource_id: &str,
        holder_id: &str,
    ) -> LockResult<bool> {
        let now = self.now_ms();
        match self.read(key).await? {
            Some(record) if record.is_held_by(holder_id, now) => {
                match self.vacate(key, resource_id, holder_id, record.version).await {
                    Ok(()) => Ok(true),
                    Err(LockError::InvalidHandle(_)) => Ok(false),
                    Err(e) => Err(e),
                }
            }
            _ => Ok(false),
        }
    }

    /// Runs `attempt` until it succeeds, fails terminally, or the retry policy
    /// gives up.
    ///
    /// Contention and storage errors are retried with backoff. Contention that
    /// outlasts the deadline or the attempt limit becomes `Timeout`; a storage
    /// error at that point is returned as is.
    pub(crate) async fn retry<T, F, Fut>(
        &self,
        resource_id: &str,
        deadline: Option<Duration>,
        mut cancel: Option<watch::Receiver<bool>>,
        mut attempt: F,
    ) -> LockResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LockResult<T>>,
    {
        let policy = &self.options.retry;
        let deadline = Deadline::after(deadline.or(policy.acquire_deadline));
        let mut failures: u32 = 0;

        loop {
            if cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
                return Err(LockError::Cancelled);
            }

            let result = match cancel.as_mut() {
                Some(rx) => tokio::select! {
                    result = attempt() => result,
                    _ = cancelled(rx) => return Err(LockError::Cancelled),
                },
                None => attempt().await,
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };

            failures = failures.saturating_add(1);
            if failures >= policy.max_attempts || deadline.is_expired() {
                debug!(resource = resource_id, attempts = failures, error = %error, "giving up");
                return Err(match error {
                    LockError::Contention { .. } => LockError::Timeout(deadline.elapsed()),
                    other => other,
                });
            }

            let delay = deadline.clamp(next_backoff(failures - 1, policy));
            debug!(
                resource = resource_id,
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying acquisition"
            );

            match cancel.as_mut() {
                Some(rx) => tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancelled(rx) => return Err(LockError::Cancelled),
                },
                None => tokio::time::sleep(delay).await,
            }
        }
    }
}

/// Resolves once `rx` reads `true`. Never resolves if the sender is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    let sender_gone = rx.wait_for(|&c| c).await.is_err();
    if sender_gone {
        std::future::pending::<()>().await;
    }
}

enum WriteOutcome {
    Applied,
    /// Someone else changed the record first.
    Superseded,
    /// The write may not have happened; the record still shows the old version.
    Unknown(StorageError),
}

/// Decides what a timed-out write did, from a fresh read of the record.
fn classify_after_timeout(
    current: Option<&LeaseRecord>,
    expected_version: Option<u64>,
    attempted: &LeaseRecord,
    error: StorageError,
) -> WriteOutcome {
    match current {
        Some(record) if record == attempted => WriteOutcome::Applied,
        Some(record) if Some(record.version) == expected_version => WriteOutcome::Unknown(error),
        None if expected_version.is_none() => WriteOutcome::Unknown(error),
        _ => WriteOutcome::Superseded,
    }
}
