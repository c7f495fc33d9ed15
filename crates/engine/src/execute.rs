//! Precondition checking and event synthesis
//!
//! [`ExecutionEngine::check_and_execute`] decides the outcome of one
//! command against a [`BeforeView`]. Every atomic command follows the same
//! pattern:
//!
//! 1. Look up the changed entity in the current view
//! 2. Check the intent's precondition
//!    - `Forced`: add of a present entity / remove of an absent one is a no-op
//!    - `SafeStateBound`: either of those fails
//!    - `SafeRevBound`: additionally the entity's revision (for an add, the
//!      nearest existing ancestor's) must equal the expected revision
//! 3. On success, mutate the view
//!
//! Setting a value to what it already is produces no event. It fails only
//! when a `SafeRevBound` command's expected revision is wrong. Events are synthesized from the final view and checked against
//! the minimal and implied invariants; a violation is a bug and surfaces
//! as [`Error::EventInvariant`].

use crate::state::{mark_in_transaction, object_removal, BeforeView, StateRead, TxnView};
use arbor_core::{
    verify_implied, verify_minimal, ActorId, AtomicCommand, AtomicEvent, Change, ChangeStatus,
    Command, CommandKind, Error, EventKind, FieldSnapshot, Intent, ObjectSnapshot, Result, Value,
    REVISION_OF_ENTITY_NOT_SET,
};
use tracing::{debug, error};

/// Decision for one command
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    /// Terminal status to commit
    pub status: ChangeStatus,
    /// Events to commit (empty unless `SuccessExecuted`)
    pub events: Vec<AtomicEvent>,
    /// Why the command failed or was a no-op
    pub debug_hint: Option<String>,
}

impl ExecutionOutcome {
    fn failed(hint: String) -> Self {
        ExecutionOutcome {
            status: ChangeStatus::FailedPreconditions,
            events: Vec::new(),
            debug_hint: Some(hint),
        }
    }

    fn no_change(hint: Option<String>) -> Self {
        ExecutionOutcome {
            status: ChangeStatus::SuccessNoChange,
            events: Vec::new(),
            debug_hint: hint,
        }
    }

    fn from_events(events: Vec<AtomicEvent>) -> Self {
        if events.is_empty() {
            ExecutionOutcome::no_change(None)
        } else {
            ExecutionOutcome {
                status: ChangeStatus::SuccessExecuted,
                events,
                debug_hint: None,
            }
        }
    }
}

/// Result of checking one atomic command
#[derive(Debug, Clone, PartialEq)]
enum Step {
    Changed,
    NoChange(String),
    Failed(String),
}

/// Stateless command executor
#[derive(Debug, Default, Clone, Copy)]
pub struct ExecutionEngine;

impl ExecutionEngine {
    /// New executor
    pub fn new() -> Self {
        ExecutionEngine
    }

    /// Decide `command` for `change` against `view`
    ///
    /// The view is only read; mutations happen in transaction layers that
    /// are dropped afterwards.
    pub fn check_and_execute(
        &self,
        command: &Command,
        change: &Change,
        view: &mut BeforeView<'_>,
    ) -> Result<ExecutionOutcome> {
        let actor = &change.actor;
        let outcome = match command {
            Command::Atomic(cmd) if cmd.kind().is_model_command() => {
                self.execute_model_command(cmd, actor, view)?
            }
            Command::Atomic(cmd) => {
                let mut txn = TxnView::new(view);
                match self.apply(cmd, &mut txn)? {
                    Step::Failed(hint) => ExecutionOutcome::failed(hint),
                    Step::NoChange(hint) => ExecutionOutcome::no_change(Some(hint)),
                    Step::Changed => ExecutionOutcome::from_events(txn.to_events(actor, false)?),
                }
            }
            Command::Transaction(transaction) => {
                let mut txn = TxnView::new(view);
                let mut failure = None;
                for (index, cmd) in transaction.commands().iter().enumerate() {
                    let mut step_view = TxnView::new(&mut txn);
                    match self.apply(cmd, &mut step_view)? {
                        Step::Failed(hint) => {
                            failure = Some(format!("command {}: {}", index, hint));
                            break;
                        }
                        Step::NoChange(_) | Step::Changed => {
                            let delta = step_view.into_delta();
                            txn.absorb(delta);
                        }
                    }
                }
                match failure {
                    Some(hint) => ExecutionOutcome::failed(hint),
                    None => ExecutionOutcome::from_events(txn.to_events(actor, false)?),
                }
            }
        };

        if outcome.status == ChangeStatus::SuccessExecuted {
            let verified =
                verify_minimal(&outcome.events).and_then(|_| verify_implied(&outcome.events));
            if let Err(e) = verified {
                error!(
                    target: "arbor::execute",
                    revision = change.revision,
                    error = %e,
                    "Synthesized events violate invariants"
                );
                return Err(e);
            }
        }
        debug!(
            target: "arbor::execute",
            revision = change.revision,
            status = %outcome.status,
            events = outcome.events.len(),
            hint = outcome.debug_hint.as_deref().unwrap_or(""),
            "Command decided"
        );
        Ok(outcome)
    }

    // ========================================================================
    // Model commands
    // ========================================================================

    fn execute_model_command(
        &self,
        cmd: &AtomicCommand,
        actor: &ActorId,
        view: &mut BeforeView<'_>,
    ) -> Result<ExecutionOutcome> {
        let model = view.model_address().clone();
        let model_revision = view.model_revision();
        match cmd.kind() {
            CommandKind::AddModel => {
                if view.model_exists() {
                    return Ok(match cmd.intent() {
                        Intent::Forced => ExecutionOutcome::no_change(Some(format!("{} exists", model))),
                        _ => ExecutionOutcome::failed(format!("{} exists", model)),
                    });
                }
                let event = AtomicEvent::new(actor.clone(), model, EventKind::AddModel)
                    .with_old_revisions(
                        model_revision,
                        REVISION_OF_ENTITY_NOT_SET,
                        REVISION_OF_ENTITY_NOT_SET,
                    );
                Ok(ExecutionOutcome::from_events(vec![event]))
            }
            CommandKind::RemoveModel => {
                if !view.model_exists() {
                    return Ok(match cmd.intent() {
                        Intent::Forced => ExecutionOutcome::no_change(Some(format!("{} absent", model))),
                        _ => ExecutionOutcome::failed(format!("{} absent", model)),
                    });
                }
                if let Some(hint) = revision_mismatch(cmd, model_revision, "model") {
                    return Ok(ExecutionOutcome::failed(hint));
                }
                let mut events = Vec::new();
                for object_id in view.object_ids()? {
                    if let Some(object) = view.object(&object_id)? {
                        events.extend(object_removal(actor, &object, model_revision, true));
                    }
                }
                events.push(
                    AtomicEvent::new(actor.clone(), model, EventKind::RemoveModel).with_old_revisions(
                        model_revision,
                        REVISION_OF_ENTITY_NOT_SET,
                        REVISION_OF_ENTITY_NOT_SET,
                    ),
                );
                mark_in_transaction(&mut events, false);
                Ok(ExecutionOutcome::from_events(events))
            }
            other => Err(Error::internal(format!("{:?} is not a model command", other))),
        }
    }

    // ========================================================================
    // Object, field and value commands
    // ========================================================================

    fn apply(&self, cmd: &AtomicCommand, view: &mut TxnView<'_>) -> Result<Step> {
        let address = cmd.address();
        if !view.model_exists() {
            return Ok(Step::Failed(format!(
                "model {} does not exist",
                view.model_address()
            )));
        }
        let object_id = address
            .object_id()
            .ok_or_else(|| Error::InvalidCommand(format!("{} is not inside an object", address)))?
            .to_string();
        let object = view.object(&object_id)?;

        match cmd.kind() {
            CommandKind::AddObject => {
                if object.is_some() {
                    return Ok(present(cmd, address));
                }
                if let Some(hint) =
                    revision_mismatch(cmd, view.committed_model_revision(), "model")
                {
                    return Ok(Step::Failed(hint));
                }
                view.add_object(&object_id)?;
                Ok(Step::Changed)
            }
            CommandKind::RemoveObject => {
                let Some(object) = object else {
                    return Ok(absent(cmd, address));
                };
                let bound = object_bound(view, &object)?;
                if let Some(hint) = revision_mismatch(cmd, bound, "object") {
                    return Ok(Step::Failed(hint));
                }
                view.remove_object(&object_id);
                Ok(Step::Changed)
            }
            kind => {
                let field_id = address
                    .field_id()
                    .ok_or_else(|| Error::InvalidCommand(format!("{} is not a field", address)))?
                    .to_string();
                let Some(object) = object else {
                    return Ok(match kind {
                        CommandKind::RemoveField | CommandKind::RemoveValue
                            if cmd.intent() == Intent::Forced =>
                        {
                            Step::NoChange(format!("object of {} absent", address))
                        }
                        _ => Step::Failed(format!("object of {} does not exist", address)),
                    });
                };
                let field = object.field(&field_id).cloned();

                match kind {
                    CommandKind::AddField => {
                        if field.is_some() {
                            return Ok(present(cmd, address));
                        }
                        let bound = object_bound(view, &object)?;
                        if let Some(hint) = revision_mismatch(cmd, bound, "object") {
                            return Ok(Step::Failed(hint));
                        }
                        view.add_field(&object_id, &field_id)?;
                        Ok(Step::Changed)
                    }
                    CommandKind::RemoveField => {
                        let Some(field) = field else {
                            return Ok(absent(cmd, address));
                        };
                        let bound = field_bound(view, &object, &field)?;
                        if let Some(hint) = revision_mismatch(cmd, bound, "field") {
                            return Ok(Step::Failed(hint));
                        }
                        view.remove_field(&object_id, &field_id)?;
                        Ok(Step::Changed)
                    }
                    CommandKind::AddValue(value) | CommandKind::ChangeValue(value) => {
                        let Some(field) = field else {
                            return Ok(Step::Failed(format!("field {} does not exist", address)));
                        };
                        let bound = field_bound(view, &object, &field)?;
                        self.set_value(cmd, view, &object_id, &field_id, field.value, bound, value)
                    }
                    CommandKind::RemoveValue => {
                        let Some(field) = field.filter(|f| f.value.is_some()) else {
                            return Ok(absent(cmd, address));
                        };
                        let bound = field_bound(view, &object, &field)?;
                        if let Some(hint) = revision_mismatch(cmd, bound, "field") {
                            return Ok(Step::Failed(hint));
                        }
                        view.set_value(&object_id, &field_id, None)?;
                        Ok(Step::Changed)
                    }
                    other => Err(Error::internal(format!(
                        "{:?} reached field dispatch",
                        other
                    ))),
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn set_value(
        &self,
        cmd: &AtomicCommand,
        view: &mut TxnView<'_>,
        object_id: &str,
        field_id: &str,
        current: Option<Value>,
        field_revision: i64,
        requested: &Value,
    ) -> Result<Step> {
        let address = cmd.address();
        let is_add = matches!(cmd.kind(), CommandKind::AddValue(_));
        if let Some(hint) = revision_mismatch(cmd, field_revision, "field") {
            return Ok(Step::Failed(hint));
        }
        match current {
            Some(ref existing) if existing == requested => {
                return Ok(Step::NoChange(format!("{} already holds {}", address, requested)));
            }
            // Add over an existing value: a Forced add overwrites
            Some(_) if is_add && cmd.intent() != Intent::Forced => {
                return Ok(Step::Failed(format!("{} already has a value", address)));
            }
            // Change of an empty field: a Forced change sets it
            None if !is_add && cmd.intent() != Intent::Forced => {
                return Ok(Step::Failed(format!("{} has no value", address)));
            }
            _ => {}
        }
        view.set_value(object_id, field_id, Some(requested.clone()))?;
        Ok(Step::Changed)
    }
}

/// Outcome of adding an entity that is already present
fn present(cmd: &AtomicCommand, address: &arbor_core::Address) -> Step {
    match cmd.intent() {
        Intent::Forced => Step::NoChange(format!("{} already present", address)),
        _ => Step::Failed(format!("{} already exists", address)),
    }
}

/// Outcome of removing an entity that is already absent
fn absent(cmd: &AtomicCommand, address: &arbor_core::Address) -> Step {
    match cmd.intent() {
        Intent::Forced => Step::NoChange(format!("{} already absent", address)),
        _ => Step::Failed(format!("{} does not exist", address)),
    }
}

/// Revision a `SafeRevBound` command on `object` is compared against
///
/// An object that existed before the command's transaction keeps its
/// revision from then, however often the transaction touched it.
fn object_bound(view: &mut TxnView<'_>, object: &ObjectSnapshot) -> Result<i64> {
    let Some(object_id) = object.address.object_id() else {
        return Ok(object.revision);
    };
    Ok(view
        .committed_object(object_id)?
        .map_or(object.revision, |committed| committed.revision))
}

/// Like [`object_bound`], for a field of `object`
fn field_bound(
    view: &mut TxnView<'_>,
    object: &ObjectSnapshot,
    field: &FieldSnapshot,
) -> Result<i64> {
    let (Some(object_id), Some(field_id)) = (object.address.object_id(), field.address.field_id())
    else {
        return Ok(field.revision);
    };
    Ok(view
        .committed_object(object_id)?
        .and_then(|committed| committed.field(field_id).map(|f| f.revision))
        .unwrap_or(field.revision))
}

/// Failure hint if a `SafeRevBound` command's expected revision is wrong
fn revision_mismatch(cmd: &AtomicCommand, actual: i64, what: &str) -> Option<String> {
    if cmd.intent() != Intent::SafeRevBound || cmd.expected_revision() == actual {
        return None;
    }
    Some(format!(
        "{} revision of {} is {}, expected {}",
        what,
        cmd.address(),
        actual,
        cmd.expected_revision()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ObjectLoader;
    use arbor_core::{
        Address, FieldSnapshot, Locks, ModelSnapshot, ObjectSnapshot, TentativeObjectState,
        TransactionCommand,
    };

    /// Model /r/m at revision 7 holding bob{age: 42 @5, name @3} (bob @5)
    struct Fixture {
        snapshot: ModelSnapshot,
    }

    impl ObjectLoader for Fixture {
        fn load_object(&self, object: &Address, revision: i64) -> Result<TentativeObjectState> {
            let id = object.object_id().unwrap_or_default();
            Ok(match self.snapshot.object(id) {
                Some(o) => TentativeObjectState::present(o.clone(), revision),
                None => TentativeObjectState::absent(object.clone(), revision),
            })
        }

        fn load_model(&self, _revision: i64) -> Result<Option<ModelSnapshot>> {
            Ok(Some(self.snapshot.clone()))
        }
    }

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn fixture() -> Fixture {
        let mut bob = ObjectSnapshot::empty(addr("/r/m/bob"), 5);
        bob.fields.insert(
            "age".to_string(),
            FieldSnapshot {
                address: addr("/r/m/bob/age"),
                revision: 5,
                value: Some(Value::Int(42)),
            },
        );
        bob.fields.insert(
            "name".to_string(),
            FieldSnapshot {
                address: addr("/r/m/bob/name"),
                revision: 3,
                value: None,
            },
        );
        let mut snapshot = ModelSnapshot::empty(addr("/r/m"), 7);
        snapshot.objects.insert("bob".to_string(), bob);
        Fixture { snapshot }
    }

    fn run(fixture: &Fixture, command: impl Into<Command>, model_exists: bool) -> ExecutionOutcome {
        let command = command.into();
        let change = Change::creating(
            addr("/r/m"),
            8,
            ActorId::from("alice"),
            Locks::for_command(&command),
            0,
        );
        let mut view = BeforeView::new(addr("/r/m"), 8, model_exists, 7, fixture);
        ExecutionEngine::new()
            .check_and_execute(&command, &change, &mut view)
            .unwrap()
    }

    fn cmd(intent: Intent, address: &str, kind: CommandKind, expected: i64) -> AtomicCommand {
        AtomicCommand::new(addr(address), kind, intent, expected).unwrap()
    }

    // ========================================================================
    // Intents
    // ========================================================================

    #[test]
    fn test_forced_add_of_present_object_is_no_change() {
        let f = fixture();
        let outcome = run(&f, cmd(Intent::Forced, "/r/m/bob", CommandKind::AddObject, 0), true);
        assert_eq!(outcome.status, ChangeStatus::SuccessNoChange);
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn test_safe_add_of_present_object_fails() {
        let f = fixture();
        let outcome = run(&f, cmd(Intent::SafeStateBound, "/r/m/bob", CommandKind::AddObject, 0), true);
        assert_eq!(outcome.status, ChangeStatus::FailedPreconditions);
        assert!(outcome.debug_hint.is_some());
    }

    #[test]
    fn test_safe_rev_add_checks_model_revision() {
        let f = fixture();
        let ok = run(&f, cmd(Intent::SafeRevBound, "/r/m/carol", CommandKind::AddObject, 7), true);
        assert_eq!(ok.status, ChangeStatus::SuccessExecuted);
        assert_eq!(ok.events.len(), 1);
        assert_eq!(ok.events[0].old_model_revision, 7);

        let wrong = run(&f, cmd(Intent::SafeRevBound, "/r/m/carol", CommandKind::AddObject, 6), true);
        assert_eq!(wrong.status, ChangeStatus::FailedPreconditions);
    }

    #[test]
    fn test_safe_rev_remove_checks_entity_revision() {
        let f = fixture();
        for expected in [0, 4, 6, 7] {
            let outcome = run(&f, cmd(Intent::SafeRevBound, "/r/m/bob", CommandKind::RemoveObject, expected), true);
            assert_eq!(outcome.status, ChangeStatus::FailedPreconditions, "expected {}", expected);
        }
        let outcome = run(&f, cmd(Intent::SafeRevBound, "/r/m/bob", CommandKind::RemoveObject, 5), true);
        assert_eq!(outcome.status, ChangeStatus::SuccessExecuted);
    }

    #[test]
    fn test_forced_remove_of_absent_is_no_change() {
        let f = fixture();
        for (address, kind) in [
            ("/r/m/nobody", CommandKind::RemoveObject),
            ("/r/m/bob/email", CommandKind::RemoveField),
            ("/r/m/bob/name", CommandKind::RemoveValue),
            ("/r/m/nobody/x", CommandKind::RemoveField),
        ] {
            let outcome = run(&f, cmd(Intent::Forced, address, kind.clone(), 0), true);
            assert_eq!(outcome.status, ChangeStatus::SuccessNoChange, "{:?} {}", kind, address);
            let outcome = run(&f, cmd(Intent::SafeStateBound, address, kind.clone(), 0), true);
            assert_eq!(outcome.status, ChangeStatus::FailedPreconditions, "{:?} {}", kind, address);
        }
    }

    #[test]
    fn test_commands_on_missing_model_fail() {
        let f = fixture();
        let outcome = run(&f, cmd(Intent::Forced, "/r/m/carol", CommandKind::AddObject, 0), false);
        assert_eq!(outcome.status, ChangeStatus::FailedPreconditions);
    }

    // ========================================================================
    // Values
    // ========================================================================

    #[test]
    fn test_equal_value_is_no_change_for_every_intent() {
        let f = fixture();
        for (intent, expected) in [
            (Intent::Forced, 99),
            (Intent::SafeStateBound, 99),
            (Intent::SafeRevBound, 5),
        ] {
            for kind in [
                CommandKind::AddValue(Value::Int(42)),
                CommandKind::ChangeValue(Value::Int(42)),
            ] {
                let outcome = run(&f, cmd(intent, "/r/m/bob/age", kind, expected), true);
                assert_eq!(outcome.status, ChangeStatus::SuccessNoChange);
            }
        }
    }

    #[test]
    fn test_equal_value_with_stale_revision_fails() {
        let f = fixture();
        for kind in [
            CommandKind::AddValue(Value::Int(42)),
            CommandKind::ChangeValue(Value::Int(42)),
        ] {
            let outcome = run(&f, cmd(Intent::SafeRevBound, "/r/m/bob/age", kind, 4), true);
            assert_eq!(outcome.status, ChangeStatus::FailedPreconditions);
            assert!(outcome.events.is_empty());
        }
    }

    #[test]
    fn test_add_value_over_existing() {
        let f = fixture();
        let safe = run(&f, cmd(Intent::SafeStateBound, "/r/m/bob/age", CommandKind::AddValue(Value::Int(1)), 0), true);
        assert_eq!(safe.status, ChangeStatus::FailedPreconditions);

        let forced = run(&f, cmd(Intent::Forced, "/r/m/bob/age", CommandKind::AddValue(Value::Int(1)), 0), true);
        assert_eq!(forced.status, ChangeStatus::SuccessExecuted);
        assert_eq!(forced.events[0].kind, EventKind::ChangeValue(Value::Int(1)));
    }

    #[test]
    fn test_change_value_revision_bound() {
        let f = fixture();
        let wrong = run(&f, cmd(Intent::SafeRevBound, "/r/m/bob/age", CommandKind::ChangeValue(Value::Int(1)), 4), true);
        assert_eq!(wrong.status, ChangeStatus::FailedPreconditions);
        let right = run(&f, cmd(Intent::SafeRevBound, "/r/m/bob/age", CommandKind::ChangeValue(Value::Int(1)), 5), true);
        assert_eq!(right.status, ChangeStatus::SuccessExecuted);
        assert_eq!(right.events[0].old_field_revision, 5);
        assert_eq!(right.events[0].old_object_revision, 5);
    }

    #[test]
    fn test_change_value_of_empty_field() {
        let f = fixture();
        let safe = run(&f, cmd(Intent::SafeStateBound, "/r/m/bob/name", CommandKind::ChangeValue("x".into()), 0), true);
        assert_eq!(safe.status, ChangeStatus::FailedPreconditions);
        let forced = run(&f, cmd(Intent::Forced, "/r/m/bob/name", CommandKind::ChangeValue("x".into()), 0), true);
        assert_eq!(forced.events[0].kind, EventKind::AddValue("x".into()));
    }

    #[test]
    fn test_value_on_missing_field_fails() {
        let f = fixture();
        let outcome = run(&f, cmd(Intent::Forced, "/r/m/bob/email", CommandKind::AddValue(Value::Bool(true)), 0), true);
        assert_eq!(outcome.status, ChangeStatus::FailedPreconditions);
    }

    // ========================================================================
    // Cascades and transactions
    // ========================================================================

    #[test]
    fn test_remove_object_cascade() {
        let f = fixture();
        let outcome = run(&f, cmd(Intent::Forced, "/r/m/bob", CommandKind::RemoveObject, 0), true);
        let kinds: Vec<(&EventKind, bool)> = outcome.events.iter().map(|e| (&e.kind, e.implied)).collect();
        assert_eq!(
            kinds,
            vec![
                (&EventKind::RemoveValue, true),
                (&EventKind::RemoveField, true),
                (&EventKind::RemoveField, true),
                (&EventKind::RemoveObject, false),
            ]
        );
    }

    #[test]
    fn test_remove_model_cascades_everything() {
        let f = fixture();
        let outcome = run(&f, cmd(Intent::SafeRevBound, "/r/m", CommandKind::RemoveModel, 7), true);
        assert_eq!(outcome.status, ChangeStatus::SuccessExecuted);
        let last = outcome.events.last().unwrap();
        assert_eq!(last.kind, EventKind::RemoveModel);
        assert!(!last.implied);
        assert!(outcome.events[..outcome.events.len() - 1].iter().all(|e| e.implied));
        assert_eq!(outcome.events.len(), 5);
    }

    #[test]
    fn test_add_model() {
        let f = fixture();
        let exists = run(&f, cmd(Intent::SafeRevBound, "/r/m", CommandKind::AddModel, 123), true);
        assert_eq!(exists.status, ChangeStatus::FailedPreconditions);
        let created = run(&f, cmd(Intent::SafeRevBound, "/r/m", CommandKind::AddModel, 123), false);
        assert_eq!(created.status, ChangeStatus::SuccessExecuted);
        assert!(!created.events[0].in_transaction);
    }

    #[test]
    fn test_transaction_sees_earlier_commands() {
        let f = fixture();
        let txn = TransactionCommand::new(
            addr("/r/m"),
            vec![
                cmd(Intent::SafeStateBound, "/r/m/carol", CommandKind::AddObject, 0),
                cmd(Intent::SafeStateBound, "/r/m/carol/x", CommandKind::AddField, 0),
                cmd(Intent::SafeStateBound, "/r/m/carol/x", CommandKind::AddValue(Value::Int(1)), 0),
                cmd(Intent::Forced, "/r/m/bob/age", CommandKind::ChangeValue(Value::Int(43)), 0),
            ],
        )
        .unwrap();
        let outcome = run(&f, txn, true);
        assert_eq!(outcome.status, ChangeStatus::SuccessExecuted);
        assert_eq!(outcome.events.len(), 4);
        assert!(outcome.events.iter().all(|e| e.in_transaction));
    }

    #[test]
    fn test_transaction_failure_discards_everything() {
        let f = fixture();
        let txn = TransactionCommand::new(
            addr("/r/m"),
            vec![
                cmd(Intent::Forced, "/r/m/carol", CommandKind::AddObject, 0),
                cmd(Intent::SafeStateBound, "/r/m/bob", CommandKind::AddObject, 0),
            ],
        )
        .unwrap();
        let outcome = run(&f, txn, true);
        assert_eq!(outcome.status, ChangeStatus::FailedPreconditions);
        assert!(outcome.events.is_empty());
        assert!(outcome.debug_hint.unwrap().starts_with("command 1"));
    }

    #[test]
    fn test_transaction_of_no_ops() {
        let f = fixture();
        let txn = TransactionCommand::new(
            addr("/r/m/bob"),
            vec![
                cmd(Intent::Forced, "/r/m/bob/age", CommandKind::AddValue(Value::Int(42)), 0),
                cmd(Intent::Forced, "/r/m/bob/name", CommandKind::AddField, 0),
            ],
        )
        .unwrap();
        let outcome = run(&f, txn, true);
        assert_eq!(outcome.status, ChangeStatus::SuccessNoChange);
    }
}
