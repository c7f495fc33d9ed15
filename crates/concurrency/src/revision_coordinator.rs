//! Revision coordinator
//!
//! Owns the in-memory [`RevisionInfo`] of one model and folds newly
//! observed facts into it. Every update is a monotone merge, so any number
//! of coordinators (in this process or others) can observe the same log in
//! any order and never move a counter backward.
//!
//! ## Persistence
//!
//! The info is a hint: the change log is the source of truth. It is written
//! to the cache only when the stable committed revision has advanced by at
//! least `persist_interval` since the last write, and read back once on
//! first use with [`Precision::Loaded`].

use arbor_core::traits::{decode, encode, revision_info_key};
use arbor_core::{Address, CacheStore, Change, ChangeStatus, Precision, RevisionInfo};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug)]
struct CoordinatorState {
    info: RevisionInfo,
    /// `last_stable_committed` at the last cache write
    persisted_at: i64,
}

/// Revision counters of one model
pub struct RevisionCoordinator {
    model: Address,
    state: Mutex<CoordinatorState>,
    cache: Arc<dyn CacheStore>,
    persist_interval: i64,
}

impl RevisionCoordinator {
    /// Coordinator for `model`, persisting through `cache`
    pub fn new(model: Address, cache: Arc<dyn CacheStore>, persist_interval: u64) -> Self {
        RevisionCoordinator {
            state: Mutex::new(CoordinatorState {
                info: RevisionInfo::new(model.clone()),
                persisted_at: -1,
            }),
            model,
            cache,
            persist_interval: persist_interval.max(1) as i64,
        }
    }

    /// The model whose revisions are tracked
    pub fn model(&self) -> &Address {
        &self.model
    }

    /// Current counters
    ///
    /// The first call loads the persisted copy; if there is none the model
    /// is reported as not existing.
    pub fn info(&self) -> RevisionInfo {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state);
        state.info.clone()
    }

    /// Fold in a change found in the log above what we knew
    ///
    /// A terminal change at exactly `last_stable_committed + 1` extends the
    /// stable prefix; if it executed, `last_stable_success` and model
    /// existence move with it. Anything else only raises the looser
    /// counters.
    pub fn found_new_higher_committed_change(&self, change: &Change) {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state);

        let info = &mut state.info;
        info.set_last_taken(change.revision);
        if !change.is_terminal() {
            return;
        }
        if change.status == ChangeStatus::SuccessExecuted {
            info.set_last_success(change.revision);
        }
        if change.revision != info.last_stable_committed() + 1 {
            return;
        }

        match change.model_exists_after() {
            Some(exists) => info.set_last_stable_success(change.revision, exists),
            None => info.set_last_stable_committed(change.revision),
        }
        debug!(
            target: "arbor::revisions",
            model = %self.model,
            revision = change.revision,
            status = %change.status,
            "Stable revision advanced"
        );
        self.persist_if_due(&mut state);
    }

    /// A slot at `revision` is known to be taken
    pub fn found_new_last_taken(&self, revision: i64) {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state);
        state.info.set_last_taken(revision);
    }

    /// Merge counters observed elsewhere
    pub fn increment_from(&self, other: &RevisionInfo) {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state);
        state.info.increment_from(other);
        self.persist_if_due(&mut state);
    }

    /// The counters were just confirmed against the log
    pub fn mark_precise(&self) {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state);
        state.info.set_precision(Precision::Precise);
    }

    /// Write the counters to the cache now
    pub fn persist(&self) {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state);
        self.write(&mut state);
    }

    fn ensure_loaded(&self, state: &mut CoordinatorState) {
        if state.info.precision() != Precision::None {
            return;
        }
        let key = revision_info_key(&self.model);
        let loaded = match self.cache.get(&key) {
            Ok(Some(bytes)) => match decode::<RevisionInfo>(&bytes) {
                Ok(info) if info.model() == &self.model && info.is_consistent() => Some(info),
                Ok(_) => {
                    warn!(target: "arbor::revisions", model = %self.model, "Ignoring inconsistent persisted revision info");
                    None
                }
                Err(e) => {
                    warn!(target: "arbor::revisions", model = %self.model, error = %e, "Undecodable persisted revision info");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(target: "arbor::revisions", model = %self.model, error = %e, "Revision info cache read failed");
                None
            }
        };
        if let Some(info) = loaded {
            debug!(
                target: "arbor::revisions",
                model = %self.model,
                last_stable_committed = info.last_stable_committed(),
                "Loaded persisted revision info"
            );
            state.persisted_at = info.last_stable_committed();
            state.info.increment_from(&info.with_precision(Precision::Loaded));
        }
        state.info.set_precision(Precision::Loaded);
    }

    fn persist_if_due(&self, state: &mut CoordinatorState) {
        if state.info.last_stable_committed() - state.persisted_at >= self.persist_interval {
            self.write(state);
        }
    }

    fn write(&self, state: &mut CoordinatorState) {
        let key = revision_info_key(&self.model);
        let result = encode(&state.info).and_then(|bytes| self.cache.put(&key, bytes));
        match result {
            Ok(()) => state.persisted_at = state.info.last_stable_committed(),
            Err(e) => {
                warn!(target: "arbor::revisions", model = %self.model, error = %e, "Revision info persist failed")
            }
        }
    }
}

impl std::fmt::Debug for RevisionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevisionCoordinator")
            .field("model", &self.model)
            .field("info", &self.state.lock().info)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{ActorId, AtomicEvent, EventKind, Locks};
    use arbor_storage::MemoryCache;

    fn model() -> Address {
        "/r/m".parse().unwrap()
    }

    fn committed(revision: i64, status: ChangeStatus, kind: Option<EventKind>) -> Change {
        let mut change = Change::creating(model(), revision, ActorId::from("a"), Locks::new(), 0);
        change.status = status;
        if let Some(kind) = kind {
            let address = match kind {
                EventKind::AddModel | EventKind::RemoveModel => model(),
                _ => model().child("o").unwrap(),
            };
            change.events.push(AtomicEvent::new(ActorId::from("a"), address, kind));
        }
        change
    }

    fn coordinator(cache: Arc<MemoryCache>, interval: u64) -> RevisionCoordinator {
        RevisionCoordinator::new(model(), cache, interval)
    }

    #[test]
    fn test_defaults_to_non_existent_model() {
        let coordinator = coordinator(Arc::new(MemoryCache::new()), 10);
        let info = coordinator.info();
        assert_eq!(info.last_taken(), -1);
        assert!(!info.model_exists());
        assert_eq!(info.precision(), Precision::Loaded);
    }

    #[test]
    fn test_stable_success_advances_in_order() {
        let coordinator = coordinator(Arc::new(MemoryCache::new()), 10);
        coordinator.found_new_higher_committed_change(&committed(
            0,
            ChangeStatus::SuccessExecuted,
            Some(EventKind::AddModel),
        ));
        let info = coordinator.info();
        assert_eq!(info.last_stable_success(), 0);
        assert!(info.model_exists());

        // Out of order: revision 2 arrives before 1
        coordinator.found_new_higher_committed_change(&committed(
            2,
            ChangeStatus::SuccessExecuted,
            Some(EventKind::AddObject),
        ));
        let info = coordinator.info();
        assert_eq!(info.last_success(), 2);
        assert_eq!(info.last_stable_committed(), 0);

        coordinator.found_new_higher_committed_change(&committed(
            1,
            ChangeStatus::FailedPreconditions,
            None,
        ));
        let info = coordinator.info();
        assert_eq!(info.last_stable_committed(), 1);
        assert_eq!(info.last_stable_success(), 0);
        assert_eq!(info.last_taken(), 2);
        assert!(info.is_consistent());
    }

    #[test]
    fn test_model_removal_clears_existence() {
        let coordinator = coordinator(Arc::new(MemoryCache::new()), 10);
        coordinator.found_new_higher_committed_change(&committed(
            0,
            ChangeStatus::SuccessExecuted,
            Some(EventKind::AddModel),
        ));
        coordinator.found_new_higher_committed_change(&committed(
            1,
            ChangeStatus::SuccessExecuted,
            Some(EventKind::RemoveModel),
        ));
        let info = coordinator.info();
        assert_eq!(info.last_stable_success(), 1);
        assert!(!info.model_exists());
    }

    #[test]
    fn test_creating_change_only_raises_taken() {
        let coordinator = coordinator(Arc::new(MemoryCache::new()), 10);
        let pending = Change::creating(model(), 0, ActorId::from("a"), Locks::new(), 0);
        coordinator.found_new_higher_committed_change(&pending);
        let info = coordinator.info();
        assert_eq!(info.last_taken(), 0);
        assert_eq!(info.last_stable_committed(), -1);
    }

    #[test]
    fn test_persist_is_throttled_and_reloaded() {
        let cache = Arc::new(MemoryCache::new());
        let key = revision_info_key(&model());
        let first = coordinator(cache.clone(), 3);

        first.found_new_higher_committed_change(&committed(
            0,
            ChangeStatus::SuccessExecuted,
            Some(EventKind::AddModel),
        ));
        // 0 - (-1) < 3
        assert!(!cache.contains(&key));
        for rev in 1..=2 {
            first.found_new_higher_committed_change(&committed(
                rev,
                ChangeStatus::SuccessNoChange,
                None,
            ));
        }
        assert!(cache.contains(&key));
        first.mark_precise();

        let second = coordinator(cache, 3);
        let info = second.info();
        assert_eq!(info.last_stable_committed(), 2);
        assert!(info.model_exists());
        assert_eq!(info.precision(), Precision::Loaded);
    }

    #[test]
    fn test_increment_from_merges() {
        let coordinator = coordinator(Arc::new(MemoryCache::new()), 10);
        let mut other = RevisionInfo::new(model());
        other.set_last_stable_success(4, true);
        other.set_last_taken(7);
        coordinator.increment_from(&other);
        coordinator.found_new_last_taken(5);

        let info = coordinator.info();
        assert_eq!(info.last_taken(), 7);
        assert_eq!(info.last_stable_success(), 4);
        assert!(info.model_exists());
    }
}
