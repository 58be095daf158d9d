//! Integration tests for store-backed locks.

use std::time::Duration;

use leasehold_core::error::LockError;
use leasehold_core::record::LeaseRecord;
use leasehold_core::traits::{DistributedLock, HandleState, LockHandle, LockProvider};
use leasehold_engine::LeaseLockProvider;
use leasehold_memory::{Fault, MemoryLeaseStore};
use tokio::sync::watch;

mod common;
use common::{init_tracing, manual_harness, renewing_provider, yielding_provider};

const TEN_SECONDS: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_expired_lease_passes_to_next_holder_with_higher_token() {
    let h = manual_harness();
    let lock = h.provider.create_lock("job-42");

    let a = lock.try_acquire("A", Some(TEN_SECONDS)).await.unwrap();
    assert_eq!(a.fencing_token(), 1);

    let denied = lock.try_acquire("B", Some(TEN_SECONDS)).await;
    assert!(matches!(denied, Err(LockError::Contention { .. })));

    h.clock.advance(TEN_SECONDS);
    let b = lock.try_acquire("B", Some(TEN_SECONDS)).await.unwrap();
    assert_eq!(b.fencing_token(), 2);
    assert_eq!(b.lease().holder_id, "B");
}

#[tokio::test]
async fn test_fencing_tokens_increase_across_release_and_expiry() {
    let h = manual_harness();
    let lock = h.provider.create_lock("ledger");

    let mut last = 0;
    for round in 0..6 {
        let handle = lock.try_acquire("worker", Some(TEN_SECONDS)).await.unwrap();
        assert!(handle.fencing_token() > last, "round {round}");
        last = handle.fencing_token();

        if round % 2 == 0 {
            handle.release().await.unwrap();
        } else {
            h.clock.advance(TEN_SECONDS);
        }
    }
    assert_eq!(last, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_only_one_concurrent_contender_wins() {
    let store = MemoryLeaseStore::new();
    let provider = yielding_provider(&store);

    for round in 0..50 {
        let name = format!("exclusive-{round}");
        let mut tasks = Vec::new();
        for i in 0..8 {
            let provider = provider.clone();
            let name = name.clone();
            tasks.push(tokio::spawn(async move {
                let lock = provider.create_lock(&name);
                lock.try_acquire(&format!("holder-{i}"), Some(TEN_SECONDS))
                    .await
            }));
        }

        let mut held = Vec::new();
        let mut contended = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(handle) => held.push(handle),
                Err(LockError::Contention { .. }) => contended += 1,
                Err(e) => panic!("round {round}: unexpected error: {e}"),
            }
        }
        assert_eq!(held.len(), 1, "round {round}");
        assert_eq!(contended, 7, "round {round}");
        assert_eq!(held[0].fencing_token(), 1, "round {round}");

        let stored = store.get(provider.create_lock(&name).key()).unwrap();
        assert_eq!(stored.holder_id, held[0].lease().holder_id);
        assert_eq!(stored.version, 1);
    }
}

#[tokio::test]
async fn test_renew_after_expiry_fails_without_touching_store() {
    let h = manual_harness();
    let lock = h.provider.create_lock("job");

    let handle = lock.try_acquire("A", Some(Duration::from_secs(5))).await.unwrap();
    let stored_expiry = h.store.get(lock.key()).unwrap().expires_at_ms;
    let mutations = h.store.mutation_count();

    h.clock.advance(Duration::from_secs(5));
    let result = handle.renew(None).await;
    assert!(matches!(result, Err(LockError::LeaseExpired { .. })));
    assert_eq!(handle.state(), HandleState::Expired);
    assert!(*handle.lost_token().borrow());

    assert_eq!(h.store.mutation_count(), mutations);
    assert_eq!(h.store.get(lock.key()).unwrap().expires_at_ms, stored_expiry);

    // Terminal handles reject everything.
    assert!(matches!(handle.renew(None).await, Err(LockError::InvalidHandle(_))));
    assert!(matches!(handle.release().await, Err(LockError::InvalidHandle(_))));
}

#[tokio::test]
async fn test_second_release_is_rejected_without_mutation() {
    let h = manual_harness();
    let lock = h.provider.create_lock("job");

    let handle = lock.try_acquire("A", None).await.unwrap();
    handle.release().await.unwrap();
    assert_eq!(handle.state(), HandleState::Released);

    let mutations = h.store.mutation_count();
    assert!(matches!(handle.release().await, Err(LockError::InvalidHandle(_))));
    assert_eq!(h.store.mutation_count(), mutations);

    // The vacated record keeps the counter for the next holder.
    let released = h.store.get(lock.key()).unwrap();
    assert!(released.holder_id.is_empty());
    assert_eq!(released.fencing_token, 1);
    assert_eq!(lock.current().await.unwrap(), None);
}

#[tokio::test]
async fn test_renewing_every_half_ttl_never_lapses() {
    let h = manual_harness();
    let lock = h.provider.create_lock("job");

    let handle = lock.try_acquire("A", Some(TEN_SECONDS)).await.unwrap();
    let token = handle.fencing_token();

    for cycle in 0..5 {
        h.clock.advance(TEN_SECONDS / 2);
        let lease = handle.renew(None).await.unwrap();
        assert_eq!(lease.fencing_token, token, "cycle {cycle}");

        let current = lock.current().await.unwrap().unwrap();
        assert_eq!(current.holder_id, "A");
        assert!(matches!(
            lock.try_acquire("B", Some(TEN_SECONDS)).await,
            Err(LockError::Contention { .. })
        ));
    }

    assert_eq!(handle.state(), HandleState::Held);
    assert_eq!(handle.lease().version, 6);
}

#[tokio::test]
async fn test_renew_with_explicit_ttl() {
    let h = manual_harness();
    let lock = h.provider.create_lock("job");

    let handle = lock.try_acquire("A", Some(TEN_SECONDS)).await.unwrap();
    let now = handle.lease().expires_at_ms - 10_000;
    let lease = handle.renew(Some(Duration::from_secs(60))).await.unwrap();
    assert_eq!(lease.expires_at_ms, now + 60_000);

    assert!(matches!(
        handle.renew(Some(Duration::ZERO)).await,
        Err(LockError::InvalidConfig(_))
    ));
}

#[tokio::test]
async fn test_dropped_handle_keeps_lease_until_expiry() {
    let h = manual_harness();
    let lock = h.provider.create_lock("job");

    drop(lock.try_acquire("A", Some(TEN_SECONDS)).await.unwrap());
    assert!(matches!(
        lock.try_acquire("B", None).await,
        Err(LockError::Contention { .. })
    ));

    h.clock.advance(TEN_SECONDS);
    assert_eq!(lock.try_acquire("B", None).await.unwrap().fencing_token(), 2);
}

#[tokio::test]
async fn test_acquire_times_out_under_contention() {
    let h = manual_harness();
    let lock = h.provider.create_lock("job");

    let _a = lock.try_acquire("A", None).await.unwrap();
    let result = lock.acquire("B", None, None).await;
    assert!(matches!(result, Err(LockError::Timeout(_))));
}

#[tokio::test]
async fn test_acquire_honours_deadline() {
    let store = MemoryLeaseStore::new();
    let provider = LeaseLockProvider::builder(store)
        .auto_renew(false)
        .max_attempts(u32::MAX)
        .base_backoff(Duration::from_millis(10))
        .backoff_cap(Duration::from_millis(10))
        .build()
        .unwrap();
    let lock = provider.create_lock("job");

    let _a = lock.try_acquire("A", Some(Duration::from_secs(60))).await.unwrap();
    match lock.acquire("B", None, Some(Duration::from_millis(100))).await {
        Err(LockError::Timeout(elapsed)) => assert!(elapsed >= Duration::from_millis(100)),
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn test_acquire_waits_for_release() {
    let store = MemoryLeaseStore::new();
    let provider = LeaseLockProvider::builder(store)
        .auto_renew(false)
        .max_attempts(100)
        .base_backoff(Duration::from_millis(5))
        .backoff_cap(Duration::from_millis(10))
        .build()
        .unwrap();
    let lock = provider.create_lock("job");

    let a = lock.try_acquire("A", Some(Duration::from_secs(60))).await.unwrap();
    let waiter = {
        let provider = provider.clone();
        tokio::spawn(async move {
            provider
                .create_lock("job")
                .acquire("B", None, Some(Duration::from_secs(5)))
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    a.release().await.unwrap();

    let b = waiter.await.unwrap().unwrap();
    assert_eq!(b.fencing_token(), 2);
    assert_eq!(b.lease().holder_id, "B");
}

#[tokio::test]
async fn test_cancelled_acquire_returns_promptly() {
    let store = MemoryLeaseStore::new();
    let provider = LeaseLockProvider::builder(store)
        .auto_renew(false)
        .max_attempts(u32::MAX)
        .base_backoff(Duration::from_millis(20))
        .backoff_cap(Duration::from_millis(20))
        .build()
        .unwrap();
    let lock = provider.create_lock("job");
    let _a = lock.try_acquire("A", Some(Duration::from_secs(60))).await.unwrap();

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = cancel_tx.send(true);
    });

    let result = tokio::time::timeout(
        Duration::from_secs(2),
        lock.acquire_cancellable("B", None, None, cancel_rx),
    )
    .await
    .expect("cancellation should end the acquire");
    assert!(matches!(result, Err(LockError::Cancelled)));

    // Nothing was committed for B, so the defensive release is a no-op.
    assert!(!lock.release_if_held("B").await.unwrap());
    assert_eq!(lock.current().await.unwrap().unwrap().holder_id, "A");
}

#[tokio::test]
async fn test_already_cancelled_acquire_never_writes() {
    let h = manual_harness();
    let lock = h.provider.create_lock("job");

    let (_cancel_tx, cancel_rx) = watch::channel(true);
    let result = lock.acquire_cancellable("A", None, None, cancel_rx).await;
    assert!(matches!(result, Err(LockError::Cancelled)));
    assert_eq!(h.store.mutation_count(), 0);
}

#[tokio::test]
async fn test_timed_out_write_is_resolved_by_rereading() {
    let h = manual_harness();
    let lock = h.provider.create_lock("job");

    // The write landed; the engine notices and hands out the lease.
    h.store.inject_fault(Fault::TimeoutAfterApply, 1);
    let handle = lock.try_acquire("A", None).await.unwrap();
    assert_eq!(handle.fencing_token(), 1);
    handle.release().await.unwrap();

    // The write did not land; a single attempt reports it, a retrying one recovers.
    h.store.inject_fault(Fault::TimeoutBeforeApply, 1);
    assert!(matches!(
        lock.try_acquire("B", None).await,
        Err(LockError::Storage(_))
    ));
    h.store.inject_fault(Fault::TimeoutBeforeApply, 1);
    let handle = lock.acquire("B", None, None).await.unwrap();
    assert_eq!(handle.fencing_token(), 2);
}

#[tokio::test]
async fn test_failed_release_keeps_handle_usable() {
    let h = manual_harness();
    let lock = h.provider.create_lock("job");
    let handle = lock.try_acquire("A", None).await.unwrap();

    h.store.inject_fault(Fault::Unavailable, 1);
    assert!(matches!(handle.release().await, Err(LockError::Storage(_))));
    assert_eq!(handle.state(), HandleState::Held);

    handle.release().await.unwrap();
    assert_eq!(handle.state(), HandleState::Released);
}

#[tokio::test]
async fn test_background_renewal_keeps_lease_alive() {
    init_tracing();
    let store = MemoryLeaseStore::new();
    let provider = renewing_provider(&store);
    let lock = provider.create_lock("job");

    let handle = lock.try_acquire("A", Some(Duration::from_millis(200))).await.unwrap();
    assert!(handle.is_renewing());

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(handle.state(), HandleState::Held);
    assert!(handle.lease().version > 1, "lease was never renewed");
    assert!(matches!(
        lock.try_acquire("B", None).await,
        Err(LockError::Contention { .. })
    ));

    handle.release().await.unwrap();
    assert!(!handle.is_renewing());
    assert!(lock.try_acquire("B", None).await.is_ok());
}

#[tokio::test]
async fn test_background_renewal_survives_transient_storage_errors() {
    init_tracing();
    let store = MemoryLeaseStore::new();
    let provider = renewing_provider(&store);
    let lock = provider.create_lock("job");

    let handle = lock.try_acquire("A", Some(Duration::from_millis(300))).await.unwrap();
    store.inject_fault(Fault::Unavailable, 1);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(store.pending_faults(), 0, "renewal never hit the store");
    assert_eq!(handle.state(), HandleState::Held);
    assert!(!*handle.lost_token().borrow());
    assert!(handle.lease().version > 1, "renewal did not recover");
    assert!(handle.is_renewing());
    assert!(matches!(
        lock.try_acquire("B", None).await,
        Err(LockError::Contention { .. })
    ));

    handle.release().await.unwrap();
}

#[tokio::test]
async fn test_lost_token_fires_when_lease_is_taken_over() {
    init_tracing();
    let store = MemoryLeaseStore::new();
    let provider = renewing_provider(&store);
    let lock = provider.create_lock("job");

    let handle = lock.try_acquire("A", Some(Duration::from_millis(200))).await.unwrap();
    let stored = store.get(lock.key()).unwrap();
    store.force_put(
        lock.key(),
        LeaseRecord {
            holder_id: "intruder".to_string(),
            fencing_token: stored.fencing_token + 1,
            version: stored.version + 1,
            ..stored
        },
    );

    let mut lost = handle.lost_token().clone();
    tokio::time::timeout(Duration::from_secs(2), lost.wait_for(|&l| l))
        .await
        .expect("renewal should notice the takeover")
        .unwrap();

    assert_eq!(handle.state(), HandleState::Lost);
    assert!(matches!(handle.release().await, Err(LockError::InvalidHandle(_))));
    assert_eq!(store.get(lock.key()).unwrap().holder_id, "intruder");
}
