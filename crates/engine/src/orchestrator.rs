//! Command orchestration
//!
//! [`Engine::execute_command`] runs one command through four phases:
//!
//! 1. **Allocate**: claim the next free revision with the command's locks
//! 2. **Serialize**: wait until every conflicting change below ours is
//!    terminal, folding terminal ones into the revision coordinator
//! 3. **Decide**: run the [`ExecutionEngine`] over a [`BeforeView`] of the
//!    state just below our revision
//! 4. **Commit**: store the outcome and clear our locks
//!
//! Writers share nothing but the [`ChangeStore`]: any number of engines may
//! serve the same models. A writer that exceeds its execution budget
//! commits `FailedTimeout`; a writer that crashes is declared timed out by
//! the next writer that waits on it.
//!
//! # Example
//!
//! ```ignore
//! use arbor_engine::{Engine, EngineConfig};
//!
//! let engine = Engine::in_memory(EngineConfig::default())?;
//! let result = engine.execute_command(&add_model, &actor)?;
//! ```

use crate::config::EngineConfig;
use crate::execute::ExecutionEngine;
use crate::snapshot_cache::SnapshotCache;
use crate::state::BeforeView;
use arbor_concurrency::{ChangeLog, Clock, RevisionCoordinator, SystemClock};
use arbor_core::{
    ActorId, Address, AddressLevel, AtomicEvent, CacheStore, Change, ChangeStatus, ChangeStore,
    Command, Error, Event, Interval, Locks, ModelSnapshot, ObjectSnapshot, Result,
};
use arbor_storage::{MemoryCache, MemoryStore, TieredCache};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Revision code returned for a failed command
pub const FAILED: i64 = -1;

/// Revision code returned for a command that changed nothing
pub const NOCHANGE: i64 = -2;

// ============================================================================
// Results
// ============================================================================

/// Outcome of [`Engine::execute_command`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionResult {
    /// Events were committed at this revision
    Executed(i64),
    /// The command was legal but changed nothing
    NoChange,
    /// Precondition failure or timeout
    Failed,
}

impl ExecutionResult {
    fn from_status(status: ChangeStatus, revision: i64) -> Self {
        match status {
            ChangeStatus::SuccessExecuted => ExecutionResult::Executed(revision),
            ChangeStatus::SuccessNoChange => ExecutionResult::NoChange,
            _ => ExecutionResult::Failed,
        }
    }

    /// The revision, or [`FAILED`] / [`NOCHANGE`]
    pub fn as_revision_code(self) -> i64 {
        match self {
            ExecutionResult::Executed(revision) => revision,
            ExecutionResult::NoChange => NOCHANGE,
            ExecutionResult::Failed => FAILED,
        }
    }

    /// The committed revision, if any
    pub fn revision(self) -> Option<i64> {
        match self {
            ExecutionResult::Executed(revision) => Some(revision),
            _ => None,
        }
    }

    /// True for `Executed` and `NoChange`
    pub fn is_success(self) -> bool {
        !matches!(self, ExecutionResult::Failed)
    }
}

/// Revision state of a model as reported by [`Engine::get_model_revision`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelRevision {
    /// Highest stable revision that changed the model
    pub revision: i64,
    /// Whether the model exists at `revision`
    pub model_exists: bool,
    /// Highest claimed revision, possibly still running; only if requested
    pub tentative_revision: Option<i64>,
}

// ============================================================================
// Per-model state
// ============================================================================

/// Everything the engine keeps for one model
struct ModelHandle {
    coordinator: RevisionCoordinator,
    change_log: Arc<ChangeLog>,
    snapshots: SnapshotCache,
}

/// Where phase 2 left us
enum Serialized {
    Ready {
        model_exists: bool,
        model_revision: i64,
    },
    Expired,
}

// ============================================================================
// Engine
// ============================================================================

/// Entry point for executing commands against any number of models
pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn ChangeStore>,
    cache: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    executor: ExecutionEngine,
    models: DashMap<Address, Arc<ModelHandle>>,
}

impl Engine {
    /// Engine over the given store, cache and clock
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` does not validate.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn ChangeStore>,
        cache: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            target: "arbor::engine",
            execution_budget_ms = config.execution_budget_ms,
            snapshot_interval = config.snapshot_interval,
            "Engine started"
        );
        Ok(Engine {
            config,
            store,
            cache,
            clock,
            executor: ExecutionEngine::new(),
            models: DashMap::new(),
        })
    }

    /// Engine over a fresh in-memory store and two-tier in-memory cache
    pub fn in_memory(config: EngineConfig) -> Result<Self> {
        let cache = TieredCache::new(Arc::new(MemoryCache::new()), Arc::new(MemoryCache::new()));
        Self::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(cache),
            Arc::new(SystemClock),
        )
    }

    /// In-memory engine configured from `dir/arbor.toml`
    ///
    /// The file is created with defaults if missing.
    pub fn in_memory_with_config_dir(dir: &Path) -> Result<Self> {
        let path = dir.join(crate::config::CONFIG_FILE_NAME);
        EngineConfig::write_default_if_missing(&path)?;
        Self::in_memory(EngineConfig::from_file(&path)?)
    }

    /// The active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The change store commands are committed to
    pub fn store(&self) -> &Arc<dyn ChangeStore> {
        &self.store
    }

    fn handle(&self, model: &Address) -> Result<Arc<ModelHandle>> {
        if model.level() != AddressLevel::Model {
            return Err(Error::InvalidAddress(format!("{} is not a model address", model)));
        }
        if let Some(handle) = self.models.get(model) {
            return Ok(Arc::clone(handle.value()));
        }
        let entry = self.models.entry(model.clone()).or_insert_with(|| {
            let change_log = Arc::new(ChangeLog::new(
                model.clone(),
                Arc::clone(&self.store),
                Arc::clone(&self.clock),
                self.config.change_log_config(),
            ));
            Arc::new(ModelHandle {
                coordinator: RevisionCoordinator::new(
                    model.clone(),
                    Arc::clone(&self.cache),
                    self.config.revision_persist_interval,
                ),
                snapshots: SnapshotCache::new(
                    Arc::clone(&change_log),
                    Arc::clone(&self.cache),
                    self.config.snapshot_interval,
                    self.config.snapshot_probe_count,
                    self.config.change_batch_size,
                ),
                change_log,
            })
        });
        Ok(Arc::clone(entry.value()))
    }

    fn deadline_passed(&self, change: &Change) -> bool {
        self.clock.now_ms().saturating_sub(change.start_time_ms)
            > self.config.execution_budget_ms as i64
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Execute `command` on behalf of `actor`
    ///
    /// # Errors
    ///
    /// Semantic failures are reported as [`ExecutionResult::Failed`], not
    /// as errors. Errors are datastore failures, slot allocation giving up
    /// under contention, and [`Error::EventInvariant`].
    pub fn execute_command(&self, command: &Command, actor: &ActorId) -> Result<ExecutionResult> {
        let model = command.model_address()?;
        let handle = self.handle(&model)?;

        // Phase 1: allocate
        let locks = Locks::for_command(command);
        let start_revision = handle.coordinator.info().last_taken() + 1;
        let mut change = handle.change_log.grab_revision_and_register_locks(
            locks,
            actor,
            start_revision,
            &handle.coordinator,
        )?;
        let revision = change.revision;

        // Phase 2: serialize
        let (model_exists, model_revision) = match self.serialize(&handle, &mut change)? {
            Serialized::Ready {
                model_exists,
                model_revision,
            } => (model_exists, model_revision),
            Serialized::Expired => {
                return self.commit(&handle, &change, ChangeStatus::FailedTimeout, Vec::new(), None);
            }
        };

        // Phase 3: decide
        let mut view = BeforeView::new(
            model.clone(),
            revision,
            model_exists,
            model_revision,
            &handle.snapshots,
        );
        let outcome = self.executor.check_and_execute(command, &change, &mut view)?;
        if let Some(hint) = &outcome.debug_hint {
            debug!(target: "arbor::engine", model = %model, revision, hint = %hint, "Decision detail");
        }

        // Phase 4: commit
        if self.deadline_passed(&change) {
            warn!(
                target: "arbor::engine",
                model = %model,
                revision,
                "Execution budget exceeded, abandoning decision"
            );
            return self.commit(&handle, &change, ChangeStatus::FailedTimeout, Vec::new(), None);
        }
        self.commit(&handle, &change, outcome.status, outcome.events, Some(&view))
    }

    /// Restart our budget after waiting out a writer that timed out
    ///
    /// Returns false if our own change was terminated meanwhile.
    fn restart_budget(&self, handle: &ModelHandle, change: &mut Change) -> Result<bool> {
        let stored = handle.change_log.restart_budget(change)?;
        if stored.is_terminal() {
            return Ok(false);
        }
        change.start_time_ms = stored.start_time_ms;
        Ok(true)
    }

    /// Wait for every conflicting change below ours to terminate
    ///
    /// Time spent waiting on a change that ends in `FailedTimeout` is not
    /// charged to our own budget.
    fn serialize(&self, handle: &ModelHandle, change: &mut Change) -> Result<Serialized> {
        let info = handle.coordinator.info();
        if info.last_stable_committed() >= change.revision {
            // Someone already terminated our change
            return Ok(Serialized::Expired);
        }

        let mut model_exists = info.model_exists();
        let mut model_revision = info.last_stable_success();
        let mut next = info.last_stable_committed() + 1;
        let mut backoff = handle.change_log.backoff();
        let mut waiting_on = None;
        let batch_size = self.config.change_batch_size as i64;

        while next < change.revision {
            let batch = Interval::new(next, (next + batch_size - 1).min(change.revision - 1));
            let mut blocked = false;

            for other in handle.change_log.get_changes(batch)? {
                let was_blocking =
                    !other.is_terminal() && other.locks.conflicts_with(&change.locks);
                let other = if was_blocking {
                    match handle.change_log.poll_change(other.revision)? {
                        Some(polled) => polled,
                        None => other,
                    }
                } else {
                    other
                };

                if other.is_terminal() {
                    let waited_out = other.status == ChangeStatus::FailedTimeout
                        && (was_blocking || waiting_on == Some(other.revision));
                    if waited_out && !self.restart_budget(handle, change)? {
                        return Ok(Serialized::Expired);
                    }
                    handle.coordinator.found_new_higher_committed_change(&other);
                    if other.is_success_executed() {
                        model_revision = other.revision;
                        if let Some(exists) = other.model_exists_after() {
                            model_exists = exists;
                        }
                    }
                } else if other.locks.conflicts_with(&change.locks) {
                    debug!(
                        target: "arbor::engine",
                        model = %change.model,
                        revision = change.revision,
                        waiting_on = other.revision,
                        "Waiting on conflicting change"
                    );
                    waiting_on = Some(other.revision);
                    blocked = true;
                    break;
                } else {
                    handle.coordinator.found_new_last_taken(other.revision);
                }
                next = other.revision + 1;
                backoff.reset();
            }

            if blocked || next <= batch.end {
                // Conflicting change still running, or a slot not yet visible
                if self.deadline_passed(change) {
                    return Ok(Serialized::Expired);
                }
                self.clock.sleep(backoff.next_delay());
            }
        }
        Ok(Serialized::Ready {
            model_exists,
            model_revision,
        })
    }

    fn commit(
        &self,
        handle: &ModelHandle,
        change: &Change,
        status: ChangeStatus,
        events: Vec<AtomicEvent>,
        view: Option<&BeforeView<'_>>,
    ) -> Result<ExecutionResult> {
        let stored = handle
            .change_log
            .commit_and_clear_locks(change, status, events)?;
        handle.coordinator.found_new_higher_committed_change(&stored);
        if stored.status != status {
            return Ok(ExecutionResult::Failed);
        }

        if let (ChangeStatus::SuccessExecuted, Some(view)) = (stored.status, view) {
            let touched: BTreeSet<Address> = stored
                .events
                .iter()
                .filter_map(|e| e.address.object_address())
                .collect();
            for object in touched {
                match view.state_after(&object, &stored.events) {
                    Ok(Some(state)) => handle.snapshots.put_object_state(&state),
                    Ok(None) => {}
                    Err(e) => warn!(
                        target: "arbor::engine",
                        object = %object,
                        error = %e,
                        "Could not derive tentative state"
                    ),
                }
            }
        }
        Ok(ExecutionResult::from_status(stored.status, stored.revision))
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Current revision of `model`, brought up to date with the log
    pub fn get_model_revision(&self, model: &Address, include_tentative: bool) -> Result<ModelRevision> {
        let handle = self.handle(model)?;
        let info = handle.change_log.catch_up(&handle.coordinator)?;
        Ok(ModelRevision {
            revision: info.last_stable_success(),
            model_exists: info.model_exists(),
            tentative_revision: include_tentative.then(|| info.last_taken()),
        })
    }

    /// Events touching `address` committed in `[start, end]`
    ///
    /// `end` is capped at the last stable committed revision. Returns None
    /// if the model was never managed.
    pub fn get_events_between(
        &self,
        address: &Address,
        start: i64,
        end: i64,
    ) -> Result<Option<Vec<Event>>> {
        let model = address
            .model_address()
            .ok_or_else(|| Error::InvalidAddress(format!("{} is above model level", address)))?;
        let handle = self.handle(&model)?;
        if handle.change_log.get_change(0)?.is_none() {
            return Ok(None);
        }
        let info = handle.change_log.catch_up(&handle.coordinator)?;
        let end = end.min(info.last_stable_committed());
        if end < start.max(0) {
            return Ok(Some(Vec::new()));
        }
        let events = handle
            .change_log
            .get_events_between(start.max(0), end)?
            .into_iter()
            .filter(|event| event.touches(address))
            .collect();
        Ok(Some(events))
    }

    /// The model as of `revision`, or as of the current stable revision
    ///
    /// Revisions above the stable committed revision are clamped to it.
    pub fn get_model_snapshot(
        &self,
        model: &Address,
        revision: Option<i64>,
    ) -> Result<Option<ModelSnapshot>> {
        let handle = self.handle(model)?;
        let stable = handle
            .change_log
            .catch_up(&handle.coordinator)?
            .last_stable_committed();
        let revision = revision.map_or(stable, |r| r.min(stable));
        handle.snapshots.get_model_snapshot(revision)
    }

    /// One object at the current stable revision
    pub fn get_object_snapshot(&self, object: &Address) -> Result<Option<ObjectSnapshot>> {
        if object.level() != AddressLevel::Object {
            return Err(Error::InvalidAddress(format!("{} is not an object address", object)));
        }
        let model = object
            .model_address()
            .ok_or_else(|| Error::internal(format!("object {} has no model", object)))?;
        let handle = self.handle(&model)?;
        let stable = handle
            .change_log
            .catch_up(&handle.coordinator)?
            .last_stable_committed();
        let locks = Locks::from_addresses([object.clone()]);
        let snapshot = handle.snapshots.get_partial_snapshot(stable, &locks)?;
        let object_id = object.object_id().unwrap_or_default();
        Ok(snapshot.and_then(|s| s.object(object_id).cloned()))
    }

    /// The change stored at `revision` of `model`
    pub fn get_change(&self, model: &Address, revision: i64) -> Result<Option<Change>> {
        self.handle(model)?.change_log.get_change(revision)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("models", &self.models.len())
            .finish_non_exhaustive()
    }
}
