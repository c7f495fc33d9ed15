//! Concurrent/Multi-threaded Tests for arbor-concurrency
//!
//! Each thread builds its own ChangeLog and RevisionCoordinator over a
//! shared store, the way independent processes would. These tests verify:
//!
//! 1. **Slot uniqueness** - every revision has exactly one writer
//! 2. **Density** - claimed revisions form a gap-free prefix
//! 3. **Contention recovery** - injected races retry the same revision
//! 4. **Monotonicity** - observed counters never move backward
//! 5. **Crash recovery** - an abandoned slot is expired by the next writer
//!
//! ## Running These Tests
//!
//! ```bash
//! cargo test --test concurrent_tests
//! ```

use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;

use arbor_concurrency::{ChangeLog, ChangeLogConfig, Clock, ManualClock, RevisionCoordinator, SystemClock};
use arbor_core::{ActorId, Address, CacheStore, ChangeStatus, ChangeStore, Interval, Locks};
use arbor_storage::testing::ContentionInjector;
use arbor_storage::{MemoryCache, MemoryStore};

// ============================================================================
// Test Helpers
// ============================================================================

fn model() -> Address {
    Address::model("repo", "m").unwrap()
}

fn lock(object: &str) -> Locks {
    Locks::from_addresses([model().child(object).unwrap()])
}

fn writer(
    store: Arc<dyn ChangeStore>,
    cache: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
) -> (ChangeLog, RevisionCoordinator) {
    let config = ChangeLogConfig {
        execution_budget_ms: 5_000,
        batch_size: 8,
        initial_backoff_ms: 1,
        max_backoff_ms: 4,
    };
    (
        ChangeLog::new(model(), store, clock, config),
        RevisionCoordinator::new(model(), cache, 5),
    )
}

// ============================================================================
// SECTION 1: Slot allocation
// ============================================================================

mod slot_allocation {
    use super::*;

    #[test]
    fn test_concurrent_writers_claim_unique_dense_revisions() {
        let store: Arc<dyn ChangeStore> = Arc::new(MemoryStore::new());
        let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
        let barrier = Arc::new(Barrier::new(6));

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let store = Arc::clone(&store);
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let (log, coordinator) = writer(store, cache, Arc::new(SystemClock));
                    let actor = ActorId::new(format!("writer-{}", i));
                    barrier.wait();
                    let mut claimed = Vec::new();
                    for _ in 0..20 {
                        let start = coordinator.info().last_taken() + 1;
                        let change = log
                            .grab_revision_and_register_locks(lock("o"), &actor, start, &coordinator)
                            .unwrap();
                        log.commit_and_clear_locks(&change, ChangeStatus::SuccessNoChange, Vec::new())
                            .unwrap();
                        claimed.push(change.revision);
                    }
                    claimed
                })
            })
            .collect();

        let mut all = BTreeSet::new();
        for handle in handles {
            for rev in handle.join().unwrap() {
                assert!(all.insert(rev), "revision {} claimed twice", rev);
            }
        }
        let expected: BTreeSet<i64> = (0..120).collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn test_contention_retries_same_revision() {
        let inner = Arc::new(MemoryStore::new());
        let injector = Arc::new(ContentionInjector::new(inner.clone()));
        injector.fail_next_creates(3);
        injector.timeout_next_creates(1);

        let clock = Arc::new(ManualClock::new(0));
        let (log, coordinator) = writer(injector.clone(), Arc::new(MemoryCache::new()), clock);
        let change = log
            .grab_revision_and_register_locks(lock("o"), &ActorId::from("a"), 0, &coordinator)
            .unwrap();

        assert_eq!(change.revision, 0);
        assert_eq!(injector.create_attempts(), 5);
        assert_eq!(inner.change_count(&model()), 1);
    }

    #[test]
    fn test_contention_past_budget_surfaces_error() {
        let injector = Arc::new(ContentionInjector::new(Arc::new(MemoryStore::new())));
        injector.fail_next_creates(10_000);

        let clock = Arc::new(ManualClock::new(0));
        let (log, coordinator) = writer(injector, Arc::new(MemoryCache::new()), clock);
        let err = log
            .grab_revision_and_register_locks(lock("o"), &ActorId::from("a"), 0, &coordinator)
            .unwrap_err();
        assert!(err.is_retryable());
    }
}

// ============================================================================
// SECTION 2: Revision counters
// ============================================================================

mod revision_counters {
    use super::*;

    #[test]
    fn test_observed_counters_are_monotone() {
        let store: Arc<dyn ChangeStore> = Arc::new(MemoryStore::new());
        let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
        let (log, coordinator) = writer(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::new(SystemClock),
        );
        let log = Arc::new(log);
        let coordinator = Arc::new(coordinator);

        let writers: Vec<_> = (0..4)
            .map(|i| {
                let log = Arc::clone(&log);
                let coordinator = Arc::clone(&coordinator);
                thread::spawn(move || {
                    let actor = ActorId::new(format!("w{}", i));
                    for _ in 0..25 {
                        let start = coordinator.info().last_taken() + 1;
                        let change = log
                            .grab_revision_and_register_locks(Locks::new(), &actor, start, &coordinator)
                            .unwrap();
                        let stored = log
                            .commit_and_clear_locks(&change, ChangeStatus::FailedPreconditions, Vec::new())
                            .unwrap();
                        coordinator.found_new_higher_committed_change(&stored);
                    }
                })
            })
            .collect();

        let observer = {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || {
                let mut previous = coordinator.info();
                for _ in 0..500 {
                    let current = coordinator.info();
                    assert!(current.is_consistent());
                    assert!(current.last_taken() >= previous.last_taken());
                    assert!(current.last_stable_committed() >= previous.last_stable_committed());
                    assert!(current.last_stable_success() >= previous.last_stable_success());
                    previous = current;
                }
            })
        };

        for handle in writers {
            handle.join().unwrap();
        }
        observer.join().unwrap();

        let info = log.catch_up(&coordinator).unwrap();
        assert_eq!(info.last_taken(), 99);
        assert_eq!(info.last_stable_committed(), 99);
    }
}

// ============================================================================
// SECTION 3: Crash recovery
// ============================================================================

mod crash_recovery {
    use super::*;

    #[test]
    fn test_abandoned_slot_expires_for_next_writer() {
        let store: Arc<dyn ChangeStore> = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(10_000));

        // First process claims revision 0 and dies
        let (crashed_log, crashed_coordinator) = writer(
            Arc::clone(&store),
            Arc::new(MemoryCache::new()),
            clock.clone(),
        );
        let abandoned = crashed_log
            .grab_revision_and_register_locks(lock("o"), &ActorId::from("crashed"), 0, &crashed_coordinator)
            .unwrap();
        drop(crashed_log);

        clock.advance(5_001);

        // Second process, with a fresh coordinator
        let (log, coordinator) = writer(Arc::clone(&store), Arc::new(MemoryCache::new()), clock);
        let change = log
            .grab_revision_and_register_locks(lock("o"), &ActorId::from("next"), 0, &coordinator)
            .unwrap();
        assert_eq!(change.revision, 1);

        let stored = log.get_change(abandoned.revision).unwrap().unwrap();
        assert_eq!(stored.status, ChangeStatus::FailedTimeout);
        assert!(stored.locks.is_empty());
        assert_eq!(coordinator.info().last_stable_committed(), 0);

        let changes = log.get_changes(Interval::new(0, 10)).unwrap();
        assert_eq!(changes.len(), 2);
    }
}
