//! Transaction-scoped delta view
//!
//! A [`TxnView`] records whole-object replacements over a base view. Reads
//! see the delta first, so command *k* of a transaction sees the effect of
//! commands *1..k-1*. Events are synthesized at the end by diffing the delta
//! against the base, which keeps them minimal: an entity touched twice
//! shows up once, with its net effect.

use super::StateRead;
use arbor_core::{
    ActorId, Address, AtomicEvent, Error, EventKind, FieldSnapshot, ObjectSnapshot, Result, Value,
    REVISION_OF_ENTITY_NOT_SET,
};
use std::collections::BTreeMap;

/// Object states recorded by a [`TxnView`]; None marks a removed object
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delta {
    objects: BTreeMap<String, Option<ObjectSnapshot>>,
}

impl Delta {
    /// True if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Ids of recorded objects
    pub fn object_ids(&self) -> impl Iterator<Item = &str> {
        self.objects.keys().map(String::as_str)
    }
}

struct ValueChange {
    object_revision: i64,
    before: FieldSnapshot,
    after: Option<Value>,
}

/// Net difference between a delta and its base
#[derive(Default)]
struct Diff {
    removed_objects: Vec<ObjectSnapshot>,
    /// (revision of the surviving object, removed field)
    removed_fields: Vec<(i64, FieldSnapshot)>,
    added_objects: Vec<ObjectSnapshot>,
    /// (revision of the surviving object, added field)
    added_fields: Vec<(i64, FieldSnapshot)>,
    value_changes: Vec<ValueChange>,
}

impl Diff {
    fn is_empty(&self) -> bool {
        self.removed_objects.is_empty()
            && self.removed_fields.is_empty()
            && self.added_objects.is_empty()
            && self.added_fields.is_empty()
            && self.value_changes.is_empty()
    }
}

/// Copy-on-write view over a base
pub struct TxnView<'v> {
    base: &'v mut dyn StateRead,
    delta: Delta,
}

impl<'v> TxnView<'v> {
    /// Empty delta over `base`
    pub fn new(base: &'v mut dyn StateRead) -> Self {
        TxnView {
            base,
            delta: Delta::default(),
        }
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Create an empty object
    pub fn add_object(&mut self, object_id: &str) -> Result<()> {
        let address = self.base.model_address().child(object_id)?;
        let revision = self.pending_revision();
        self.delta.objects.insert(
            object_id.to_string(),
            Some(ObjectSnapshot::empty(address, revision)),
        );
        Ok(())
    }

    /// Remove an object with everything in it
    pub fn remove_object(&mut self, object_id: &str) {
        self.delta.objects.insert(object_id.to_string(), None);
    }

    /// Create an empty field in an existing object
    pub fn add_field(&mut self, object_id: &str, field_id: &str) -> Result<()> {
        let revision = self.pending_revision();
        let mut object = self.existing_object(object_id)?;
        let address = object.address.child(field_id)?;
        object.fields.insert(
            field_id.to_string(),
            FieldSnapshot {
                address,
                revision,
                value: None,
            },
        );
        object.revision = revision;
        self.delta.objects.insert(object_id.to_string(), Some(object));
        Ok(())
    }

    /// Remove a field and its value
    pub fn remove_field(&mut self, object_id: &str, field_id: &str) -> Result<()> {
        let revision = self.pending_revision();
        let mut object = self.existing_object(object_id)?;
        if object.fields.remove(field_id).is_none() {
            return Err(Error::internal(format!(
                "field {} not in {}",
                field_id, object.address
            )));
        }
        object.revision = revision;
        self.delta.objects.insert(object_id.to_string(), Some(object));
        Ok(())
    }

    /// Set or clear the value of an existing field
    pub fn set_value(&mut self, object_id: &str, field_id: &str, value: Option<Value>) -> Result<()> {
        let revision = self.pending_revision();
        let mut object = self.existing_object(object_id)?;
        let field = object.fields.get_mut(field_id).ok_or_else(|| {
            Error::internal(format!("field {} not in {}", field_id, object.address))
        })?;
        field.value = value;
        field.revision = revision;
        object.revision = revision;
        self.delta.objects.insert(object_id.to_string(), Some(object));
        Ok(())
    }

    fn existing_object(&mut self, object_id: &str) -> Result<ObjectSnapshot> {
        self.object(object_id)?.ok_or_else(|| {
            Error::internal(format!(
                "object {} not in {}",
                object_id,
                self.base.model_address()
            ))
        })
    }

    // ========================================================================
    // Layering
    // ========================================================================

    /// Give up the view, keeping its delta
    pub fn into_delta(self) -> Delta {
        self.delta
    }

    /// Take over the delta of a view forked from this one
    pub fn absorb(&mut self, delta: Delta) {
        self.delta.objects.extend(delta.objects);
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// True if the delta differs from the base
    pub fn has_changes(&mut self) -> Result<bool> {
        Ok(!self.diff()?.is_empty())
    }

    /// Objects and fields created
    pub fn get_added(&mut self) -> Result<Vec<Address>> {
        let diff = self.diff()?;
        let mut added = Vec::new();
        for object in &diff.added_objects {
            added.push(object.address.clone());
            added.extend(object.fields.values().map(|f| f.address.clone()));
        }
        added.extend(diff.added_fields.iter().map(|(_, f)| f.address.clone()));
        Ok(added)
    }

    /// Fields whose value was set, changed or cleared
    pub fn get_changed(&mut self) -> Result<Vec<Address>> {
        Ok(self
            .diff()?
            .value_changes
            .iter()
            .map(|c| c.before.address.clone())
            .collect())
    }

    /// Objects and fields removed (their contents are not listed)
    pub fn get_removed(&mut self) -> Result<Vec<Address>> {
        let diff = self.diff()?;
        let mut removed: Vec<Address> = diff
            .removed_objects
            .iter()
            .map(|o| o.address.clone())
            .collect();
        removed.extend(diff.removed_fields.iter().map(|(_, f)| f.address.clone()));
        Ok(removed)
    }

    fn diff(&mut self) -> Result<Diff> {
        let mut diff = Diff::default();
        let entries: Vec<(String, Option<ObjectSnapshot>)> = self
            .delta
            .objects
            .iter()
            .map(|(id, object)| (id.clone(), object.clone()))
            .collect();

        for (object_id, after) in entries {
            let before = self.base.object(&object_id)?;
            match (before, after) {
                (None, None) => {}
                (None, Some(added)) => diff.added_objects.push(added),
                (Some(removed), None) => diff.removed_objects.push(removed),
                (Some(before), Some(after)) => {
                    for (field_id, old) in &before.fields {
                        match after.fields.get(field_id) {
                            None => diff.removed_fields.push((before.revision, old.clone())),
                            Some(new) if new.value != old.value => {
                                diff.value_changes.push(ValueChange {
                                    object_revision: before.revision,
                                    before: old.clone(),
                                    after: new.value.clone(),
                                })
                            }
                            Some(_) => {}
                        }
                    }
                    for (field_id, new) in &after.fields {
                        if !before.fields.contains_key(field_id) {
                            diff.added_fields.push((before.revision, new.clone()));
                        }
                    }
                }
            }
        }
        Ok(diff)
    }

    // ========================================================================
    // Event synthesis
    // ========================================================================

    /// Ordered atomic events describing the delta
    ///
    /// Order: object removals with their cascades, field removals in
    /// surviving objects, object additions with their contents, field
    /// additions, value changes. Every event is marked in-transaction if
    /// more than one results or `in_transaction_hint` is set.
    pub fn to_events(&mut self, actor: &ActorId, in_transaction_hint: bool) -> Result<Vec<AtomicEvent>> {
        let diff = self.diff()?;
        let model_revision = self.base.model_revision();
        let mut events = Vec::new();

        for object in &diff.removed_objects {
            events.extend(object_removal(actor, object, model_revision, false));
        }
        for (object_revision, field) in &diff.removed_fields {
            events.extend(field_removal(actor, field, model_revision, *object_revision, false));
        }
        for object in &diff.added_objects {
            events.push(
                AtomicEvent::new(actor.clone(), object.address.clone(), EventKind::AddObject)
                    .with_old_revisions(
                        model_revision,
                        REVISION_OF_ENTITY_NOT_SET,
                        REVISION_OF_ENTITY_NOT_SET,
                    ),
            );
            for field in object.fields.values() {
                events.extend(field_addition(
                    actor,
                    field,
                    model_revision,
                    REVISION_OF_ENTITY_NOT_SET,
                ));
            }
        }
        for (object_revision, field) in &diff.added_fields {
            events.extend(field_addition(actor, field, model_revision, *object_revision));
        }
        for change in &diff.value_changes {
            let kind = match (&change.before.value, &change.after) {
                (None, Some(v)) => EventKind::AddValue(v.clone()),
                (Some(_), Some(v)) => EventKind::ChangeValue(v.clone()),
                (Some(_), None) => EventKind::RemoveValue,
                (None, None) => continue,
            };
            events.push(
                AtomicEvent::new(actor.clone(), change.before.address.clone(), kind)
                    .with_old_revisions(
                        model_revision,
                        change.object_revision,
                        change.before.revision,
                    ),
            );
        }

        mark_in_transaction(&mut events, in_transaction_hint);
        Ok(events)
    }
}

impl StateRead for TxnView<'_> {
    fn model_address(&self) -> &Address {
        self.base.model_address()
    }

    fn model_exists(&self) -> bool {
        self.base.model_exists()
    }

    fn model_revision(&self) -> i64 {
        if self.delta.is_empty() {
            self.base.model_revision()
        } else {
            self.base.pending_revision()
        }
    }

    fn pending_revision(&self) -> i64 {
        self.base.pending_revision()
    }

    fn object(&mut self, object_id: &str) -> Result<Option<ObjectSnapshot>> {
        match self.delta.objects.get(object_id) {
            Some(recorded) => Ok(recorded.clone()),
            None => self.base.object(object_id),
        }
    }

    fn committed_model_revision(&self) -> i64 {
        self.base.committed_model_revision()
    }

    fn committed_object(&mut self, object_id: &str) -> Result<Option<ObjectSnapshot>> {
        self.base.committed_object(object_id)
    }
}

/// Events removing `object` bottom-up: implied value and field removals,
/// then the object removal itself
pub fn object_removal(
    actor: &ActorId,
    object: &ObjectSnapshot,
    model_revision: i64,
    object_implied: bool,
) -> Vec<AtomicEvent> {
    let mut events = Vec::new();
    for field in object.fields.values() {
        events.extend(field_removal(actor, field, model_revision, object.revision, true));
    }
    let removal = AtomicEvent::new(actor.clone(), object.address.clone(), EventKind::RemoveObject)
        .with_old_revisions(model_revision, object.revision, REVISION_OF_ENTITY_NOT_SET);
    events.push(if object_implied { removal.implied() } else { removal });
    events
}

fn field_removal(
    actor: &ActorId,
    field: &FieldSnapshot,
    model_revision: i64,
    object_revision: i64,
    field_implied: bool,
) -> Vec<AtomicEvent> {
    let mut events = Vec::with_capacity(2);
    if field.value.is_some() {
        events.push(
            AtomicEvent::new(actor.clone(), field.address.clone(), EventKind::RemoveValue)
                .with_old_revisions(model_revision, object_revision, field.revision)
                .implied(),
        );
    }
    let removal = AtomicEvent::new(actor.clone(), field.address.clone(), EventKind::RemoveField)
        .with_old_revisions(model_revision, object_revision, field.revision);
    events.push(if field_implied { removal.implied() } else { removal });
    events
}

fn field_addition(
    actor: &ActorId,
    field: &FieldSnapshot,
    model_revision: i64,
    object_revision: i64,
) -> Vec<AtomicEvent> {
    let mut events = vec![
        AtomicEvent::new(actor.clone(), field.address.clone(), EventKind::AddField)
            .with_old_revisions(model_revision, object_revision, REVISION_OF_ENTITY_NOT_SET),
    ];
    if let Some(value) = &field.value {
        events.push(
            AtomicEvent::new(
                actor.clone(),
                field.address.clone(),
                EventKind::AddValue(value.clone()),
            )
            .with_old_revisions(model_revision, object_revision, REVISION_OF_ENTITY_NOT_SET),
        );
    }
    events
}

/// Flag every event as in-transaction if there are several or `hint` is set
pub fn mark_in_transaction(events: &mut [AtomicEvent], hint: bool) {
    let in_transaction = events.len() > 1 || hint;
    for event in events {
        event.in_transaction = in_transaction;
    }
}
