//! Model snapshot materialization
//!
//! Reconstructs a model at any stable revision by replaying the change log
//! over the nearest cached snapshot.
//!
//! ## Cache points
//!
//! Snapshots are cached only at standard points, multiples of
//! `snapshot_interval`. A request probes at most `snapshot_probe_count`
//! points backward from the requested revision before falling back to an
//! empty base at revision -1, and caches every standard point it passes
//! while replaying. The cache is best-effort: lost or undecodable entries
//! are replayed again.
//!
//! ## Object states
//!
//! [`SnapshotCache::object_state`] serves the execution views. It starts
//! from whichever is newer, the object's tentative state or a cached model
//! snapshot, and replays only events touching the object.

use crate::state::ObjectLoader;
use arbor_concurrency::ChangeLog;
use arbor_core::traits::{decode, encode, snapshot_key, tentative_state_key};
use arbor_core::{
    apply_model_event, Address, CacheStore, Change, Error, Interval, Locks, ModelSnapshot, Result,
    TentativeObjectState,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};

/// Snapshot reconstruction and caching for one model
pub struct SnapshotCache {
    model: Address,
    change_log: Arc<ChangeLog>,
    cache: Arc<dyn CacheStore>,
    interval: i64,
    probe_count: usize,
    batch_size: usize,
}

impl SnapshotCache {
    /// Snapshots of the model of `change_log`, cached in `cache`
    pub fn new(
        change_log: Arc<ChangeLog>,
        cache: Arc<dyn CacheStore>,
        snapshot_interval: u64,
        probe_count: usize,
        batch_size: usize,
    ) -> Self {
        SnapshotCache {
            model: change_log.model().clone(),
            change_log,
            cache,
            interval: snapshot_interval.max(1) as i64,
            probe_count,
            batch_size: batch_size.max(1),
        }
    }

    /// True if `revision` is a standard cache point
    pub fn is_cache_point(&self, revision: i64) -> bool {
        revision >= 0 && revision % self.interval == 0
    }

    // ========================================================================
    // Full snapshots
    // ========================================================================

    /// The model as of `revision`; None if it does not exist there
    ///
    /// Every change up to `revision` must be terminal.
    pub fn get_model_snapshot(&self, revision: i64) -> Result<Option<ModelSnapshot>> {
        if revision < 0 {
            return Ok(None);
        }
        if let Some(cached) = self.cached_snapshot(revision) {
            debug!(target: "arbor::snapshot", model = %self.model, revision, "Snapshot cache hit");
            return Ok(cached);
        }

        let (base_revision, mut state) = self.nearest_cached_snapshot(revision);
        debug!(
            target: "arbor::snapshot",
            model = %self.model,
            revision,
            base_revision,
            "Replaying snapshot"
        );
        self.replay(&mut state, Interval::new(base_revision + 1, revision), None, true)?;
        Ok(state)
    }

    /// The model as of `revision`, restricted to objects overlapping `locks`
    ///
    /// Only events touching `locks` are replayed and nothing is cached.
    pub fn get_partial_snapshot(
        &self,
        revision: i64,
        locks: &Locks,
    ) -> Result<Option<ModelSnapshot>> {
        if revision < 0 {
            return Ok(None);
        }
        let (base_revision, base) = match self.cached_snapshot(revision) {
            Some(cached) => (revision, cached),
            None => self.nearest_cached_snapshot(revision),
        };
        let mut state = base.map(|snapshot| snapshot.restricted_to(locks.iter()));
        self.replay(
            &mut state,
            Interval::new(base_revision + 1, revision),
            Some(locks),
            false,
        )?;
        Ok(state)
    }

    fn nearest_cached_snapshot(&self, revision: i64) -> (i64, Option<ModelSnapshot>) {
        let mut point = revision - revision.rem_euclid(self.interval);
        if point == revision {
            point -= self.interval;
        }
        for _ in 0..self.probe_count {
            if point < 0 {
                break;
            }
            if let Some(cached) = self.cached_snapshot(point) {
                return (point, cached);
            }
            point -= self.interval;
        }
        (-1, None)
    }

    fn replay(
        &self,
        state: &mut Option<ModelSnapshot>,
        range: Interval,
        filter: Option<&Locks>,
        cache_points: bool,
    ) -> Result<()> {
        for batch in range.batches(self.batch_size) {
            let changes = self.change_log.get_changes(batch)?;
            if changes.len() as u64 != batch.size() {
                return Err(Error::internal(format!(
                    "change log of {} ends before revision {}",
                    self.model, batch.end
                )));
            }
            for change in &changes {
                if !change.is_terminal() {
                    return Err(Error::internal(format!(
                        "revision {} of {} is not stable",
                        change.revision, self.model
                    )));
                }
                self.apply_change(state, change, filter)?;
                if cache_points && self.is_cache_point(change.revision) {
                    self.put_snapshot(change.revision, state);
                }
            }
        }
        Ok(())
    }

    fn apply_change(
        &self,
        state: &mut Option<ModelSnapshot>,
        change: &Change,
        filter: Option<&Locks>,
    ) -> Result<()> {
        if !change.is_success_executed() {
            return Ok(());
        }
        for event in &change.events {
            if let Some(locks) = filter {
                if !locks.overlaps(&event.address) {
                    continue;
                }
            }
            apply_model_event(state, &self.model, event, change.revision)?;
        }
        if let Some(snapshot) = state {
            snapshot.revision = change.revision;
        }
        Ok(())
    }

    // ========================================================================
    // Object states
    // ========================================================================

    /// State of `object` as of `revision`
    ///
    /// Changes still running in the range are skipped; callers only ask for
    /// objects no running change below `revision` can touch.
    pub fn object_state(&self, object: &Address, revision: i64) -> Result<TentativeObjectState> {
        let object_id = object
            .object_id()
            .ok_or_else(|| Error::InvalidAddress(format!("{} is not an object", object)))?;

        let tentative = self
            .cached::<TentativeObjectState>(&tentative_state_key(object))
            .filter(|tos| tos.address() == object && tos.model_revision_at_update <= revision);
        let (snapshot_revision, snapshot) = if revision < 0 {
            (-1, None)
        } else {
            match self.cached_snapshot(revision) {
                Some(cached) => (revision, cached),
                None => self.nearest_cached_snapshot(revision),
            }
        };

        let mut state = match tentative {
            Some(tos) if tos.model_revision_at_update >= snapshot_revision => tos,
            _ => match snapshot.as_ref().and_then(|s| s.object(object_id)) {
                Some(o) => TentativeObjectState::present(o.clone(), snapshot_revision),
                None => TentativeObjectState::absent(object.clone(), snapshot_revision),
            },
        };

        let range = Interval::new(state.model_revision_at_update + 1, revision);
        for change in self.change_log.get_changes(range)? {
            if !change.is_success_executed() {
                continue;
            }
            for event in &change.events {
                state.apply_event(event, change.revision)?;
            }
        }
        state.model_revision_at_update = state.model_revision_at_update.max(revision);
        Ok(state)
    }

    /// Record the state of an object after a committed change
    pub fn put_object_state(&self, state: &TentativeObjectState) {
        let key = tentative_state_key(state.address());
        if let Err(e) = encode(state).and_then(|bytes| self.cache.put(&key, bytes)) {
            warn!(target: "arbor::snapshot", key = %key, error = %e, "Tentative state write failed");
        }
    }

    // ========================================================================
    // Cache access
    // ========================================================================

    fn cached_snapshot(&self, revision: i64) -> Option<Option<ModelSnapshot>> {
        self.cached(&snapshot_key(&self.model, revision))
    }

    fn put_snapshot(&self, revision: i64, state: &Option<ModelSnapshot>) {
        let key = snapshot_key(&self.model, revision);
        match encode(state).and_then(|bytes| self.cache.put(&key, bytes)) {
            Ok(()) => debug!(target: "arbor::snapshot", model = %self.model, revision, "Cached snapshot"),
            Err(e) => warn!(target: "arbor::snapshot", key = %key, error = %e, "Snapshot write failed"),
        }
    }

    fn cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.cache.get(key) {
            Ok(Some(bytes)) => match decode(&bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(target: "arbor::snapshot", key, error = %e, "Dropping undecodable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(target: "arbor::snapshot", key, error = %e, "Cache read failed");
                None
            }
        }
    }
}

impl ObjectLoader for SnapshotCache {
    fn load_object(&self, object: &Address, revision: i64) -> Result<TentativeObjectState> {
        self.object_state(object, revision)
    }

    fn load_model(&self, revision: i64) -> Result<Option<ModelSnapshot>> {
        self.get_model_snapshot(revision)
    }
}

impl std::fmt::Debug for SnapshotCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCache")
            .field("model", &self.model)
            .field("interval", &self.interval)
            .field("probe_count", &self.probe_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_concurrency::{ChangeLogConfig, ManualClock, RevisionCoordinator};
    use arbor_core::{ActorId, AtomicEvent, ChangeStatus, EventKind, Value};
    use arbor_storage::{MemoryCache, MemoryStore};

    struct Fixture {
        log: Arc<ChangeLog>,
        coordinator: RevisionCoordinator,
        cache: Arc<MemoryCache>,
        snapshots: SnapshotCache,
    }

    fn model() -> Address {
        "/r/m".parse().unwrap()
    }

    fn fixture() -> Fixture {
        let log = Arc::new(ChangeLog::new(
            model(),
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(0)),
            ChangeLogConfig::default(),
        ));
        let cache = Arc::new(MemoryCache::new());
        Fixture {
            snapshots: SnapshotCache::new(log.clone(), cache.clone(), 10, 3, 4),
            coordinator: RevisionCoordinator::new(model(), Arc::new(MemoryCache::new()), 10),
            log,
            cache,
        }
    }

    fn commit(f: &Fixture, events: Vec<(&str, EventKind)>) -> i64 {
        let actor = ActorId::from("a");
        let change = f
            .log
            .grab_revision_and_register_locks(Locks::new(), &actor, 0, &f.coordinator)
            .unwrap();
        let events: Vec<AtomicEvent> = events
            .into_iter()
            .map(|(a, kind)| AtomicEvent::new(actor.clone(), a.parse().unwrap(), kind))
            .collect();
        let status = if events.is_empty() {
            ChangeStatus::SuccessNoChange
        } else {
            ChangeStatus::SuccessExecuted
        };
        f.log.commit_and_clear_locks(&change, status, events).unwrap();
        change.revision
    }

    /// Model with objects o0..o{n-1}, one per revision after the AddModel
    fn populated(n: usize) -> Fixture {
        let f = fixture();
        commit(&f, vec![("/r/m", EventKind::AddModel)]);
        for i in 0..n {
            let object = format!("/r/m/o{}", i);
            let field = format!("{}/f", object);
            commit(
                &f,
                vec![
                    (object.as_str(), EventKind::AddObject),
                    (field.as_str(), EventKind::AddField),
                    (field.as_str(), EventKind::AddValue(Value::Int(i as i64))),
                ],
            );
        }
        f
    }

    #[test]
    fn test_negative_revision_is_absent() {
        let f = fixture();
        assert!(f.snapshots.get_model_snapshot(-1).unwrap().is_none());
    }

    #[test]
    fn test_revision_zero_is_empty_model() {
        let f = populated(0);
        let snapshot = f.snapshots.get_model_snapshot(0).unwrap().unwrap();
        assert_eq!(snapshot, ModelSnapshot::empty(model(), 0));
    }

    #[test]
    fn test_replay_caches_standard_points() {
        let f = populated(24);
        let snapshot = f.snapshots.get_model_snapshot(24).unwrap().unwrap();
        assert_eq!(snapshot.objects.len(), 24);
        assert_eq!(snapshot.revision, 24);
        for point in [0, 10, 20] {
            assert!(f.cache.contains(&snapshot_key(&model(), point)));
        }
        assert!(!f.cache.contains(&snapshot_key(&model(), 24)));
    }

    #[test]
    fn test_incremental_equals_scratch() {
        let f = populated(30);
        let scratch = f.snapshots.get_model_snapshot(27).unwrap();
        let incremental = f.snapshots.get_model_snapshot(27).unwrap();
        assert_eq!(scratch, incremental);

        f.cache.clear();
        assert_eq!(f.snapshots.get_model_snapshot(27).unwrap(), scratch);
    }

    #[test]
    fn test_partial_snapshot_keeps_locked_objects() {
        let f = populated(5);
        let locks = Locks::from_addresses(["/r/m/o3".parse().unwrap()]);
        let partial = f.snapshots.get_partial_snapshot(5, &locks).unwrap().unwrap();
        assert_eq!(partial.objects.keys().collect::<Vec<_>>(), vec!["o3"]);
        assert_eq!(partial.object("o3").unwrap().value("f"), Some(&Value::Int(3)));
        assert_eq!(partial.revision, 5);
    }

    #[test]
    fn test_object_state_prefers_newer_base() {
        let f = populated(12);
        let object: Address = "/r/m/o1".parse().unwrap();
        let state = f.snapshots.object_state(&object, 12).unwrap();
        assert!(state.exists);
        assert_eq!(state.object.value("f"), Some(&Value::Int(1)));

        // A tentative state newer than any snapshot is used as-is
        let mut stale = state.clone();
        stale.object.fields.clear();
        f.snapshots.put_object_state(&stale);
        let from_tos = f.snapshots.object_state(&object, 12).unwrap();
        assert!(from_tos.object.fields.is_empty());

        // A tentative state from the future is ignored
        let from_replay = f.snapshots.object_state(&object, 5).unwrap();
        assert_eq!(from_replay.object.value("f"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_object_removed_with_model() {
        let f = populated(2);
        commit(
            &f,
            vec![
                ("/r/m/o0/f", EventKind::RemoveValue),
                ("/r/m/o0/f", EventKind::RemoveField),
                ("/r/m/o0", EventKind::RemoveObject),
                ("/r/m/o1/f", EventKind::RemoveValue),
                ("/r/m/o1/f", EventKind::RemoveField),
                ("/r/m/o1", EventKind::RemoveObject),
                ("/r/m", EventKind::RemoveModel),
            ],
        );
        assert!(f.snapshots.get_model_snapshot(3).unwrap().is_none());
        let state = f
            .snapshots
            .object_state(&"/r/m/o0".parse().unwrap(), 3)
            .unwrap();
        assert!(!state.exists);
    }
}
