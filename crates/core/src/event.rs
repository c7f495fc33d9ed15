//! Events: what a successful change did to the tree
//!
//! An [`AtomicEvent`] names the changed entity, the kind of change, and the
//! revisions its ancestors had before the change. A change that touched more
//! than one entity is reported as a [`TransactionEvent`].
//!
//! Two invariants hold for every event list a change commits:
//!
//! - **minimal**: no address is both added (or has its value set) and
//!   removed, and no field value is touched twice
//! - **implied**: an event is implied iff a strict ancestor of its changed
//!   entity is removed by the same change; a value removal counts as implied
//!   when its own field is removed
//!
//! [`verify_minimal`] and [`verify_implied`] check them.

use crate::address::{Address, AddressLevel};
use crate::error::{Error, Result};
use crate::revision::REVISION_OF_ENTITY_NOT_SET;
use crate::types::{ActorId, ChangeType};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Kind of an atomic event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventKind {
    /// A model was created
    AddModel,
    /// A model was removed
    RemoveModel,
    /// An object was created
    AddObject,
    /// An object was removed
    RemoveObject,
    /// A field was created (without value)
    AddField,
    /// A field was removed
    RemoveField,
    /// An empty field received a value
    AddValue(Value),
    /// A field's value was replaced
    ChangeValue(Value),
    /// A field's value was cleared
    RemoveValue,
}

impl EventKind {
    /// Add / Remove / Change
    pub fn change_type(&self) -> ChangeType {
        match self {
            EventKind::AddModel
            | EventKind::AddObject
            | EventKind::AddField
            | EventKind::AddValue(_) => ChangeType::Add,
            EventKind::RemoveModel
            | EventKind::RemoveObject
            | EventKind::RemoveField
            | EventKind::RemoveValue => ChangeType::Remove,
            EventKind::ChangeValue(_) => ChangeType::Change,
        }
    }

    /// True for events on a field's value rather than on structure
    pub fn is_value_event(&self) -> bool {
        matches!(
            self,
            EventKind::AddValue(_) | EventKind::ChangeValue(_) | EventKind::RemoveValue
        )
    }

    /// True for structural removals (model, object, field)
    pub fn is_structural_removal(&self) -> bool {
        matches!(
            self,
            EventKind::RemoveModel | EventKind::RemoveObject | EventKind::RemoveField
        )
    }

    /// Level of the address carried by events of this kind
    pub fn entity_level(&self) -> AddressLevel {
        match self {
            EventKind::AddModel | EventKind::RemoveModel => AddressLevel::Model,
            EventKind::AddObject | EventKind::RemoveObject => AddressLevel::Object,
            _ => AddressLevel::Field,
        }
    }

    /// The new value carried by value additions and changes
    pub fn new_value(&self) -> Option<&Value> {
        match self {
            EventKind::AddValue(v) | EventKind::ChangeValue(v) => Some(v),
            _ => None,
        }
    }
}

/// One change to one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicEvent {
    /// Who caused the change
    pub actor: ActorId,
    /// The changed entity (for value events: the field)
    pub address: Address,
    /// What happened
    pub kind: EventKind,
    /// Model revision before the change
    pub old_model_revision: i64,
    /// Object revision before the change, or [`REVISION_OF_ENTITY_NOT_SET`]
    pub old_object_revision: i64,
    /// Field revision before the change, or [`REVISION_OF_ENTITY_NOT_SET`]
    pub old_field_revision: i64,
    /// Part of a multi-event change
    pub in_transaction: bool,
    /// Caused by the removal of an ancestor rather than requested directly
    pub implied: bool,
}

impl AtomicEvent {
    /// Event with all old revisions unset and both flags false
    pub fn new(actor: ActorId, address: Address, kind: EventKind) -> Self {
        AtomicEvent {
            actor,
            address,
            kind,
            old_model_revision: REVISION_OF_ENTITY_NOT_SET,
            old_object_revision: REVISION_OF_ENTITY_NOT_SET,
            old_field_revision: REVISION_OF_ENTITY_NOT_SET,
            in_transaction: false,
            implied: false,
        }
    }

    /// Set the revisions the ancestors had before the change
    pub fn with_old_revisions(mut self, model: i64, object: i64, field: i64) -> Self {
        self.old_model_revision = model;
        self.old_object_revision = object;
        self.old_field_revision = field;
        self
    }

    /// Mark as caused by an ancestor's removal
    pub fn implied(mut self) -> Self {
        self.implied = true;
        self
    }

    /// Add / Remove / Change
    pub fn change_type(&self) -> ChangeType {
        self.kind.change_type()
    }

    /// The container the event happened in
    ///
    /// For structural events that is the parent of the changed entity; value
    /// events happen in the field itself.
    pub fn target(&self) -> Address {
        if self.kind.is_value_event() {
            self.address.clone()
        } else {
            self.address.parent().unwrap_or_else(Address::root)
        }
    }

    /// True if the event touches anything inside `address`, or `address`
    /// itself, or removes an ancestor of it
    pub fn touches(&self, address: &Address) -> bool {
        self.address.overlaps(address)
    }
}

/// Ordered group of atomic events committed by one change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEvent {
    /// Who caused the change
    pub actor: ActorId,
    /// Deepest address containing every atomic event (model or object)
    pub target: Address,
    /// The atomic events, in application order
    pub events: Vec<AtomicEvent>,
}

/// What one change did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// A single atomic event
    Atomic(AtomicEvent),
    /// Several atomic events applied together
    Transaction(TransactionEvent),
}

impl Event {
    /// Group the committed atomic events of one change
    ///
    /// Returns None for an empty list. A single event not marked
    /// `in_transaction` stays atomic.
    pub fn from_atomic_events(events: Vec<AtomicEvent>) -> Option<Event> {
        match events.len() {
            0 => None,
            1 if !events[0].in_transaction => events.into_iter().next().map(Event::Atomic),
            _ => {
                let actor = events[0].actor.clone();
                let target = common_container(&events);
                Some(Event::Transaction(TransactionEvent {
                    actor,
                    target,
                    events,
                }))
            }
        }
    }

    /// Add / Remove / Change / Transaction
    pub fn change_type(&self) -> ChangeType {
        match self {
            Event::Atomic(e) => e.change_type(),
            Event::Transaction(_) => ChangeType::Transaction,
        }
    }

    /// Who caused the change
    pub fn actor(&self) -> &ActorId {
        match self {
            Event::Atomic(e) => &e.actor,
            Event::Transaction(t) => &t.actor,
        }
    }

    /// The atomic events in order
    pub fn atomic_events(&self) -> &[AtomicEvent] {
        match self {
            Event::Atomic(e) => std::slice::from_ref(e),
            Event::Transaction(t) => &t.events,
        }
    }

    /// True if any atomic event touches `address`
    pub fn touches(&self, address: &Address) -> bool {
        self.atomic_events().iter().any(|e| e.touches(address))
    }
}

fn common_container(events: &[AtomicEvent]) -> Address {
    let mut common = events[0].target();
    for event in &events[1..] {
        let target = event.target();
        while !common.is_ancestor_of(&target) {
            match common.parent() {
                Some(parent) => common = parent,
                None => break,
            }
        }
    }
    // Deepest meaningful container is the model or an object.
    while common.level() > AddressLevel::Object {
        match common.parent() {
            Some(parent) => common = parent,
            None => break,
        }
    }
    common
}

/// Check the minimal invariant of one change's event list
pub fn verify_minimal(events: &[AtomicEvent]) -> Result<()> {
    let mut added: HashSet<&Address> = HashSet::new();
    let mut removed: HashSet<&Address> = HashSet::new();
    let mut values_touched: HashSet<&Address> = HashSet::new();
    let mut values_set: HashSet<&Address> = HashSet::new();

    for event in events {
        let address = &event.address;
        match &event.kind {
            EventKind::AddModel | EventKind::AddObject | EventKind::AddField => {
                if !added.insert(address) {
                    return Err(Error::EventInvariant(format!("{} added twice", address)));
                }
            }
            EventKind::RemoveModel | EventKind::RemoveObject | EventKind::RemoveField => {
                if !removed.insert(address) {
                    return Err(Error::EventInvariant(format!("{} removed twice", address)));
                }
            }
            EventKind::AddValue(_) | EventKind::ChangeValue(_) | EventKind::RemoveValue => {
                if !values_touched.insert(address) {
                    return Err(Error::EventInvariant(format!(
                        "value of {} touched twice",
                        address
                    )));
                }
                if event.kind.new_value().is_some() {
                    values_set.insert(address);
                }
            }
        }
    }

    for address in &added {
        if removed.contains(address) {
            return Err(Error::EventInvariant(format!(
                "{} both added and removed",
                address
            )));
        }
    }
    for address in &values_set {
        if removed.iter().any(|r| r.is_ancestor_of(address)) {
            return Err(Error::EventInvariant(format!(
                "value of {} set while the field is removed",
                address
            )));
        }
    }
    Ok(())
}

/// Check the implied invariant of one change's event list
pub fn verify_implied(events: &[AtomicEvent]) -> Result<()> {
    let removed: Vec<&Address> = events
        .iter()
        .filter(|e| e.kind.is_structural_removal())
        .map(|e| &e.address)
        .collect();

    for event in events {
        let expected = if event.kind.is_value_event() {
            removed.iter().any(|r| r.is_ancestor_of(&event.address))
        } else {
            removed.iter().any(|r| r.is_strict_ancestor_of(&event.address))
        };
        if event.implied != expected {
            return Err(Error::EventInvariant(format!(
                "{:?} on {} has implied={} but should be {}",
                event.kind, event.address, event.implied, expected
            )));
        }
        if event.implied && event.change_type() != ChangeType::Remove {
            return Err(Error::EventInvariant(format!(
                "implied event on {} is not a removal",
                event.address
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn ev(address: &str, kind: EventKind) -> AtomicEvent {
        AtomicEvent::new(ActorId::from("alice"), addr(address), kind)
    }

    fn object_removal_cascade() -> Vec<AtomicEvent> {
        vec![
            ev("/r/m/o/a", EventKind::RemoveValue).implied(),
            ev("/r/m/o/a", EventKind::RemoveField).implied(),
            ev("/r/m/o/b", EventKind::RemoveField).implied(),
            ev("/r/m/o", EventKind::RemoveObject),
        ]
    }

    #[test]
    fn test_target_of_structural_and_value_events() {
        assert_eq!(ev("/r/m/o", EventKind::AddObject).target(), addr("/r/m"));
        assert_eq!(
            ev("/r/m/o/f", EventKind::AddValue(Value::Int(1))).target(),
            addr("/r/m/o/f")
        );
    }

    #[test]
    fn test_cascade_satisfies_invariants() {
        let events = object_removal_cascade();
        verify_minimal(&events).unwrap();
        verify_implied(&events).unwrap();
    }

    #[test]
    fn test_implied_flag_must_match() {
        let mut events = object_removal_cascade();
        events[3].implied = true;
        assert!(matches!(
            verify_implied(&events),
            Err(Error::EventInvariant(_))
        ));

        let mut events = object_removal_cascade();
        events[2].implied = false;
        assert!(verify_implied(&events).is_err());
    }

    #[test]
    fn test_add_and_remove_same_address_is_not_minimal() {
        let events = vec![
            ev("/r/m/o", EventKind::AddObject),
            ev("/r/m/o", EventKind::RemoveObject),
        ];
        assert!(verify_minimal(&events).is_err());
    }

    #[test]
    fn test_value_touched_twice_is_not_minimal() {
        let events = vec![
            ev("/r/m/o/f", EventKind::AddValue(Value::Int(1))),
            ev("/r/m/o/f", EventKind::ChangeValue(Value::Int(2))),
        ];
        assert!(verify_minimal(&events).is_err());
    }

    #[test]
    fn test_value_set_on_removed_field_is_not_minimal() {
        let events = vec![
            ev("/r/m/o/f", EventKind::ChangeValue(Value::Int(2))),
            ev("/r/m/o/f", EventKind::RemoveField),
        ];
        assert!(verify_minimal(&events).is_err());
    }

    #[test]
    fn test_from_atomic_events() {
        assert!(Event::from_atomic_events(vec![]).is_none());

        let single = Event::from_atomic_events(vec![ev("/r/m/o", EventKind::AddObject)]).unwrap();
        assert!(matches!(single, Event::Atomic(_)));
        assert_eq!(single.change_type(), ChangeType::Add);

        let mut cascade = object_removal_cascade();
        for e in &mut cascade {
            e.in_transaction = true;
        }
        let txn = Event::from_atomic_events(cascade).unwrap();
        match &txn {
            Event::Transaction(t) => {
                assert_eq!(t.target, addr("/r/m"));
                assert_eq!(t.events.len(), 4);
            }
            _ => panic!("expected a transaction event"),
        }
        assert!(txn.touches(&addr("/r/m/o/b")));
        assert!(!txn.touches(&addr("/r/m/other")));
    }

    #[test]
    fn test_transaction_target_within_one_object() {
        let mut events = vec![
            ev("/r/m/o/a", EventKind::AddField),
            ev("/r/m/o/a", EventKind::AddValue(Value::Int(1))),
        ];
        for e in &mut events {
            e.in_transaction = true;
        }
        match Event::from_atomic_events(events).unwrap() {
            Event::Transaction(t) => assert_eq!(t.target, addr("/r/m/o")),
            _ => panic!("expected a transaction event"),
        }
    }
}
