//! Change log of one model
//!
//! An append-only sequence of [`Change`] slots keyed by revision. Slots are
//! claimed with an atomic create-if-absent, so each revision has exactly one
//! writer. The log is dense: once revision `r` is claimed, every revision
//! below it is claimed too, which lets range reads stop at the first gap.
//!
//! ## Slot lifecycle
//!
//! ```text
//! grab_revision_and_register_locks() -> Creating
//!        |                                 |
//!        | commit_and_clear_locks()        | progress_change_if_timed_out()
//!        v                                 v   (any process, after the budget)
//!  SuccessExecuted / SuccessNoChange /   FailedTimeout
//!  FailedPreconditions
//! ```
//!
//! A terminal change is never modified again; both transitions are atomic
//! single-entity updates that refuse to touch a terminal change.

use crate::backoff::Backoff;
use crate::clock::Clock;
use crate::revision_coordinator::RevisionCoordinator;
use arbor_core::{
    ActorId, Address, AtomicEvent, Change, ChangeStatus, ChangeStore, CreateOutcome, Error,
    Event, Interval, Locks, Result, RevisionInfo,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one attempt to claim a slot
#[derive(Debug)]
enum SlotAttempt {
    Claimed,
    Taken(Change),
    Retry(Error),
}

/// Tunables of a [`ChangeLog`]
#[derive(Debug, Clone, Copy)]
pub struct ChangeLogConfig {
    /// Per-change execution budget
    pub execution_budget_ms: i64,
    /// Preferred number of revisions per range read
    pub batch_size: usize,
    /// First retry delay after contention
    pub initial_backoff_ms: u64,
    /// Retry delay cap
    pub max_backoff_ms: u64,
}

impl Default for ChangeLogConfig {
    fn default() -> Self {
        ChangeLogConfig {
            execution_budget_ms: 30_000,
            batch_size: 32,
            initial_backoff_ms: 10,
            max_backoff_ms: 1000,
        }
    }
}

/// Append-only change log of one model
pub struct ChangeLog {
    model: Address,
    store: Arc<dyn ChangeStore>,
    clock: Arc<dyn Clock>,
    config: ChangeLogConfig,
}

impl ChangeLog {
    /// Log of `model` stored in `store`
    pub fn new(
        model: Address,
        store: Arc<dyn ChangeStore>,
        clock: Arc<dyn Clock>,
        config: ChangeLogConfig,
    ) -> Self {
        ChangeLog {
            model,
            store,
            clock,
            config,
        }
    }

    /// The model this log belongs to
    pub fn model(&self) -> &Address {
        &self.model
    }

    /// The clock deadlines are measured with
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The tunables
    pub fn config(&self) -> &ChangeLogConfig {
        &self.config
    }

    /// A backoff configured like this log's retries
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.config.initial_backoff_ms, self.config.max_backoff_ms)
    }

    // ========================================================================
    // Slot allocation
    // ========================================================================

    /// Claim the first free revision at or above `start_revision`
    ///
    /// Taken slots are reported to `coordinator`, and overdue ones are
    /// declared timed out on the way. Contention and datastore timeouts
    /// retry the same revision until the change's own budget runs out.
    ///
    /// Returns the claimed change in status `Creating` with `locks`
    /// registered.
    pub fn grab_revision_and_register_locks(
        &self,
        locks: Locks,
        actor: &ActorId,
        start_revision: i64,
        coordinator: &RevisionCoordinator,
    ) -> Result<Change> {
        let start_ms = self.clock.now_ms();
        let mut revision = start_revision.max(0);
        let mut backoff = self.backoff();

        loop {
            let candidate = Change::creating(
                self.model.clone(),
                revision,
                actor.clone(),
                locks.clone(),
                start_ms,
            );
            match self.try_claim(&candidate)? {
                SlotAttempt::Claimed => {
                    coordinator.found_new_last_taken(revision);
                    debug!(
                        target: "arbor::changelog",
                        model = %self.model,
                        revision,
                        actor = %actor,
                        locks = locks.len(),
                        "Claimed revision"
                    );
                    return Ok(candidate);
                }
                SlotAttempt::Taken(existing) => {
                    let existing = self.expire_if_timed_out(&existing)?.1;
                    coordinator.found_new_higher_committed_change(&existing);
                    revision += 1;
                    backoff.reset();
                }
                SlotAttempt::Retry(e) => {
                    if self.clock.now_ms() - start_ms > self.config.execution_budget_ms {
                        warn!(
                            target: "arbor::changelog",
                            model = %self.model,
                            revision,
                            error = %e,
                            "Giving up on slot allocation"
                        );
                        return Err(e);
                    }
                    debug!(
                        target: "arbor::changelog",
                        model = %self.model,
                        revision,
                        error = %e,
                        "Retrying same revision"
                    );
                    self.clock.sleep(backoff.next_delay());
                }
            }
        }
    }

    fn try_claim(&self, candidate: &Change) -> Result<SlotAttempt> {
        match self.store.create_change(candidate) {
            Ok(CreateOutcome::Created) => Ok(SlotAttempt::Claimed),
            Ok(CreateOutcome::Exists(existing)) => Ok(SlotAttempt::Taken(existing)),
            Err(e) if e.is_retryable() => Ok(SlotAttempt::Retry(e)),
            Err(e) => Err(e),
        }
    }

    // ========================================================================
    // Timeouts
    // ========================================================================

    /// Declare `change` timed out if it is still running past its budget
    ///
    /// Returns true only if this call made the transition.
    pub fn progress_change_if_timed_out(&self, change: &Change) -> Result<bool> {
        Ok(self.expire_if_timed_out(change)?.0)
    }

    /// Re-read the slot at `revision`, expiring it if overdue
    pub fn poll_change(&self, revision: i64) -> Result<Option<Change>> {
        match self.store.get_change(&self.model, revision)? {
            Some(change) => Ok(Some(self.expire_if_timed_out(&change)?.1)),
            None => Ok(None),
        }
    }

    /// Restart the execution budget of a running change from now
    ///
    /// A terminal change is left untouched. Returns the change as stored.
    pub fn restart_budget(&self, change: &Change) -> Result<Change> {
        let now_ms = self.clock.now_ms();
        let stored = self
            .store
            .update_change(&self.model, change.revision, &mut |stored| {
                if stored.is_terminal() {
                    return false;
                }
                stored.start_time_ms = now_ms;
                true
            })?
            .ok_or_else(|| {
                Error::internal(format!(
                    "change {}@{} vanished",
                    self.model, change.revision
                ))
            })?;
        debug!(
            target: "arbor::changelog",
            model = %self.model,
            revision = change.revision,
            start_time_ms = stored.start_time_ms,
            "Restarted execution budget"
        );
        Ok(stored)
    }

    /// Returns (whether we expired it, the change as now stored)
    fn expire_if_timed_out(&self, change: &Change) -> Result<(bool, Change)> {
        let now_ms = self.clock.now_ms();
        let budget_ms = self.config.execution_budget_ms;
        if !change.is_timed_out(now_ms, budget_ms) {
            return Ok((false, change.clone()));
        }

        let mut expired = false;
        let stored = self
            .store
            .update_change(&self.model, change.revision, &mut |stored| {
                if !stored.is_timed_out(now_ms, budget_ms) {
                    return false;
                }
                stored.status = ChangeStatus::FailedTimeout;
                stored.locks.clear();
                stored.events.clear();
                expired = true;
                true
            })?
            .ok_or_else(|| {
                Error::internal(format!(
                    "change {}@{} vanished",
                    self.model, change.revision
                ))
            })?;

        if expired {
            warn!(
                target: "arbor::changelog",
                model = %self.model,
                revision = change.revision,
                actor = %change.actor,
                "Declared change timed out"
            );
        }
        Ok((expired, stored))
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Read one change
    pub fn get_change(&self, revision: i64) -> Result<Option<Change>> {
        self.store.get_change(&self.model, revision)
    }

    /// Read the changes in `interval`, stopping at the first missing revision
    pub fn get_changes(&self, interval: Interval) -> Result<Vec<Change>> {
        let mut changes = Vec::new();
        for batch in interval.batches(self.config.batch_size) {
            let fetched = self.store.get_changes(&self.model, batch)?;
            let complete = fetched.len() as u64 == batch.size();
            for (expected, change) in (batch.start..).zip(fetched) {
                if change.revision != expected {
                    return Ok(changes);
                }
                changes.push(change);
            }
            if !complete {
                break;
            }
        }
        Ok(changes)
    }

    /// Events of the executed changes in `[start, end]`, in revision order
    pub fn get_events_between(&self, start: i64, end: i64) -> Result<Vec<Event>> {
        Ok(self
            .get_changes(Interval::new(start, end))?
            .iter()
            .filter_map(Change::event)
            .collect())
    }

    // ========================================================================
    // Commit
    // ========================================================================

    /// Terminate `change` with `status` and `events`, dropping its locks
    ///
    /// Refuses to overwrite a change that is already terminal (for example
    /// one a waiter declared timed out). Returns the change as stored after
    /// the call; compare its status to learn whether the commit won.
    pub fn commit_and_clear_locks(
        &self,
        change: &Change,
        status: ChangeStatus,
        events: Vec<AtomicEvent>,
    ) -> Result<Change> {
        if !status.is_terminal() {
            return Err(Error::internal(format!(
                "cannot commit change {}@{} as {}",
                self.model, change.revision, status
            )));
        }
        if status != ChangeStatus::SuccessExecuted && !events.is_empty() {
            return Err(Error::internal(format!(
                "{} change {}@{} carries events",
                status, self.model, change.revision
            )));
        }

        let mut events = Some(events);
        let stored = self
            .store
            .update_change(&self.model, change.revision, &mut |stored| {
                if stored.is_terminal() {
                    return false;
                }
                stored.status = status;
                stored.locks.clear();
                stored.events = events.take().unwrap_or_default();
                true
            })?
            .ok_or_else(|| {
                Error::internal(format!(
                    "change {}@{} vanished before commit",
                    self.model, change.revision
                ))
            })?;

        if stored.status == status {
            info!(
                target: "arbor::changelog",
                model = %self.model,
                revision = change.revision,
                status = %status,
                events = stored.events.len(),
                "Committed change"
            );
        } else {
            warn!(
                target: "arbor::changelog",
                model = %self.model,
                revision = change.revision,
                wanted = %status,
                found = %stored.status,
                "Change was terminated by someone else"
            );
        }
        Ok(stored)
    }

    // ========================================================================
    // Catch-up
    // ========================================================================

    /// Scan forward from the last stable committed revision to the end of the log
    ///
    /// Folds every change met into `coordinator`, expiring overdue ones, and
    /// marks the counters precise.
    pub fn catch_up(&self, coordinator: &RevisionCoordinator) -> Result<RevisionInfo> {
        let mut next = coordinator.info().last_stable_committed() + 1;
        loop {
            let batch = Interval::new(next, next + self.config.batch_size as i64 - 1);
            let changes = self.get_changes(batch)?;
            let full = changes.len() as u64 == batch.size();
            for change in &changes {
                let change = self.expire_if_timed_out(change)?.1;
                coordinator.found_new_higher_committed_change(&change);
            }
            if !full {
                break;
            }
            next = batch.end + 1;
        }
        coordinator.mark_precise();
        Ok(coordinator.info())
    }
}

impl std::fmt::Debug for ChangeLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeLog")
            .field("model", &self.model)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
