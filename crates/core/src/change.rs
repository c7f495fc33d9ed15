//! Change-log entries
//!
//! One [`Change`] occupies one revision slot of a model's change log. It is
//! created `Creating` when the slot is claimed and becomes terminal exactly
//! once, either by the writer that claimed it or by a waiter that found it
//! past its deadline. Terminal changes never change again and hold no locks.

use crate::address::Address;
use crate::event::{AtomicEvent, Event, EventKind};
use crate::locks::Locks;
use crate::types::ActorId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeStatus {
    /// Slot claimed, execution in progress (the only non-terminal status)
    Creating,
    /// Executed and produced events
    SuccessExecuted,
    /// Legal, but the tree already had the requested state
    SuccessNoChange,
    /// The command's precondition did not hold
    FailedPreconditions,
    /// The owning writer exceeded its execution budget
    FailedTimeout,
}

impl ChangeStatus {
    /// True for every status except `Creating`
    pub fn is_terminal(self) -> bool {
        self != ChangeStatus::Creating
    }

    /// True for `SuccessExecuted` and `SuccessNoChange`
    pub fn is_success(self) -> bool {
        matches!(
            self,
            ChangeStatus::SuccessExecuted | ChangeStatus::SuccessNoChange
        )
    }

    /// True for `FailedPreconditions` and `FailedTimeout`
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            ChangeStatus::FailedPreconditions | ChangeStatus::FailedTimeout
        )
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeStatus::Creating => "creating",
            ChangeStatus::SuccessExecuted => "success-executed",
            ChangeStatus::SuccessNoChange => "success-nochange",
            ChangeStatus::FailedPreconditions => "failed-preconditions",
            ChangeStatus::FailedTimeout => "failed-timeout",
        };
        f.write_str(name)
    }
}

/// One slot of a model's change log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Model whose log this change belongs to
    pub model: Address,
    /// Revision slot
    pub revision: i64,
    /// Lifecycle state
    pub status: ChangeStatus,
    /// Who submitted the command
    pub actor: ActorId,
    /// Addresses the change reads or writes; cleared when terminal
    pub locks: Locks,
    /// Wall-clock creation time in milliseconds since the epoch
    pub start_time_ms: i64,
    /// Events; only non-empty for `SuccessExecuted`
    pub events: Vec<AtomicEvent>,
}

impl Change {
    /// A freshly claimed slot
    pub fn creating(
        model: Address,
        revision: i64,
        actor: ActorId,
        locks: Locks,
        start_time_ms: i64,
    ) -> Self {
        Change {
            model,
            revision,
            status: ChangeStatus::Creating,
            actor,
            locks,
            start_time_ms,
            events: Vec::new(),
        }
    }

    /// True once the status can no longer change
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// True if the change executed and produced events
    pub fn is_success_executed(&self) -> bool {
        self.status == ChangeStatus::SuccessExecuted
    }

    /// True if still running past `start_time_ms + budget_ms`
    pub fn is_timed_out(&self, now_ms: i64, budget_ms: i64) -> bool {
        !self.is_terminal() && now_ms.saturating_sub(self.start_time_ms) > budget_ms
    }

    /// The committed events as one [`Event`]
    pub fn event(&self) -> Option<Event> {
        if !self.is_success_executed() {
            return None;
        }
        Event::from_atomic_events(self.events.clone())
    }

    /// Model existence after this change, if the change decides it
    ///
    /// A successful change that is not a model removal leaves the model in
    /// existence; model removal leaves it absent. Non-successful changes and
    /// no-ops decide nothing.
    pub fn model_exists_after(&self) -> Option<bool> {
        if !self.is_success_executed() {
            return None;
        }
        let removes_model = self
            .events
            .iter()
            .any(|e| e.kind == EventKind::RemoveModel && !e.implied);
        Some(!removes_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change() -> Change {
        Change::creating(
            "/r/m".parse().unwrap(),
            3,
            ActorId::from("alice"),
            Locks::from_addresses(["/r/m/o".parse().unwrap()]),
            1_000,
        )
    }

    #[test]
    fn test_status_classification() {
        assert!(!ChangeStatus::Creating.is_terminal());
        assert!(ChangeStatus::FailedTimeout.is_terminal());
        assert!(ChangeStatus::SuccessNoChange.is_success());
        assert!(ChangeStatus::FailedPreconditions.is_failure());
        assert!(!ChangeStatus::SuccessExecuted.is_failure());
    }

    #[test]
    fn test_timeout_detection() {
        let c = change();
        assert!(!c.is_timed_out(1_500, 1_000));
        assert!(c.is_timed_out(2_001, 1_000));

        let mut done = change();
        done.status = ChangeStatus::SuccessNoChange;
        assert!(!done.is_timed_out(100_000, 1_000));
    }

    #[test]
    fn test_model_exists_after() {
        let mut c = change();
        assert_eq!(c.model_exists_after(), None);

        c.status = ChangeStatus::SuccessExecuted;
        c.events = vec![AtomicEvent::new(
            ActorId::from("alice"),
            "/r/m".parse().unwrap(),
            EventKind::AddModel,
        )];
        assert_eq!(c.model_exists_after(), Some(true));
        assert!(matches!(c.event(), Some(Event::Atomic(_))));

        c.events[0].kind = EventKind::RemoveModel;
        assert_eq!(c.model_exists_after(), Some(false));
    }

    #[test]
    fn test_json_form_is_readable() {
        let json = serde_json::to_value(change()).unwrap();
        assert_eq!(json["status"], "Creating");
        assert_eq!(json["revision"], 3);
        assert_eq!(json["actor"], "alice");
        let back: Change = serde_json::from_value(json).unwrap();
        assert_eq!(back, change());
    }
}
