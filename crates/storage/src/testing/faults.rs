//! Fault injection for stores and caches
//!
//! - [`ContentionInjector`] wraps any [`ChangeStore`] and makes the next N
//!   creates fail with contention or a datastore timeout
//! - [`UnavailableCache`] fails every call, for exercising cache fallbacks

use arbor_core::{
    Address, CacheStore, Change, ChangeStore, CreateOutcome, Error, Interval, Result,
};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Kind of injected failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFault {
    /// Report a write race
    Contention,
    /// Report a datastore timeout
    Timeout,
}

/// Change store wrapper that fails creates on demand
pub struct ContentionInjector {
    inner: Arc<dyn ChangeStore>,
    pending_contention: AtomicUsize,
    pending_timeouts: AtomicUsize,
    create_attempts: AtomicU64,
    injected: AtomicU64,
}

impl ContentionInjector {
    /// Wrap `inner`
    pub fn new(inner: Arc<dyn ChangeStore>) -> Self {
        ContentionInjector {
            inner,
            pending_contention: AtomicUsize::new(0),
            pending_timeouts: AtomicUsize::new(0),
            create_attempts: AtomicU64::new(0),
            injected: AtomicU64::new(0),
        }
    }

    /// Fail the next `n` creates with [`Error::Contention`]
    pub fn fail_next_creates(&self, n: usize) {
        self.pending_contention.fetch_add(n, Ordering::SeqCst);
    }

    /// Fail the next `n` creates with [`Error::DatastoreTimeout`]
    ///
    /// The write is not performed, as if the request never reached the store.
    pub fn timeout_next_creates(&self, n: usize) {
        self.pending_timeouts.fetch_add(n, Ordering::SeqCst);
    }

    /// Total create calls seen, including injected failures
    pub fn create_attempts(&self) -> u64 {
        self.create_attempts.load(Ordering::SeqCst)
    }

    /// Number of failures injected so far
    pub fn injected_failures(&self) -> u64 {
        self.injected.load(Ordering::SeqCst)
    }

    fn take_fault(&self) -> Option<InjectedFault> {
        let take = |counter: &AtomicUsize| {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        };
        if take(&self.pending_contention) {
            Some(InjectedFault::Contention)
        } else if take(&self.pending_timeouts) {
            Some(InjectedFault::Timeout)
        } else {
            None
        }
    }
}

impl ChangeStore for ContentionInjector {
    fn create_change(&self, change: &Change) -> Result<CreateOutcome> {
        self.create_attempts.fetch_add(1, Ordering::SeqCst);
        let slot = format!("{}@{}", change.model, change.revision);
        match self.take_fault() {
            Some(InjectedFault::Contention) => {
                self.injected.fetch_add(1, Ordering::SeqCst);
                Err(Error::Contention(slot))
            }
            Some(InjectedFault::Timeout) => {
                self.injected.fetch_add(1, Ordering::SeqCst);
                Err(Error::DatastoreTimeout(slot))
            }
            None => self.inner.create_change(change),
        }
    }

    fn get_change(&self, model: &Address, revision: i64) -> Result<Option<Change>> {
        self.inner.get_change(model, revision)
    }

    fn get_changes(&self, model: &Address, interval: Interval) -> Result<Vec<Change>> {
        self.inner.get_changes(model, interval)
    }

    fn update_change(
        &self,
        model: &Address,
        revision: i64,
        update: &mut dyn FnMut(&mut Change) -> bool,
    ) -> Result<Option<Change>> {
        self.inner.update_change(model, revision, update)
    }
}

/// Cache whose every call fails with [`Error::Datastore`]
#[derive(Debug, Default)]
pub struct UnavailableCache;

impl CacheStore for UnavailableCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Err(Error::Datastore(format!("cache unavailable: {}", key)))
    }

    fn put(&self, key: &str, _value: Vec<u8>) -> Result<()> {
        Err(Error::Datastore(format!("cache unavailable: {}", key)))
    }

    fn remove(&self, key: &str) -> Result<()> {
        Err(Error::Datastore(format!("cache unavailable: {}", key)))
    }
}
