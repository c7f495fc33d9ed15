//! Materialized tree state
//!
//! Snapshots are plain values: a [`ModelSnapshot`] owns its objects, an
//! [`ObjectSnapshot`] owns its fields. Every entity carries the revision of
//! the last successful change that touched it (the model: the last
//! successful change at all).
//!
//! Replaying the change log means folding [`AtomicEvent`]s into a working
//! copy with [`apply_model_event`]; each successful change then stamps the
//! model with its revision.

use crate::address::Address;
use crate::error::{Error, Result};
use crate::event::{AtomicEvent, EventKind};
use crate::revision::REVISION_OF_ENTITY_NOT_SET;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// State of one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSnapshot {
    /// Field address
    pub address: Address,
    /// Revision of the last change to this field
    pub revision: i64,
    /// Current value, if any
    pub value: Option<Value>,
}

/// State of one object and its fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSnapshot {
    /// Object address
    pub address: Address,
    /// Revision of the last change to this object or any of its fields
    pub revision: i64,
    /// Fields by id
    pub fields: BTreeMap<String, FieldSnapshot>,
}

impl ObjectSnapshot {
    /// Object without fields
    pub fn empty(address: Address, revision: i64) -> Self {
        ObjectSnapshot {
            address,
            revision,
            fields: BTreeMap::new(),
        }
    }

    /// Field by id
    pub fn field(&self, field_id: &str) -> Option<&FieldSnapshot> {
        self.fields.get(field_id)
    }

    /// Value of a field, if the field exists and holds one
    pub fn value(&self, field_id: &str) -> Option<&Value> {
        self.fields.get(field_id).and_then(|f| f.value.as_ref())
    }

    /// Fold a field-level event (AddField, RemoveField, value events) into
    /// this object at `revision`
    pub fn apply_event(&mut self, event: &AtomicEvent, revision: i64) -> Result<()> {
        let field_id = event
            .address
            .field_id()
            .ok_or_else(|| unexpected(event, "needs a field address"))?
            .to_string();
        match &event.kind {
            EventKind::AddField => {
                if self.fields.contains_key(&field_id) {
                    return Err(unexpected(event, "field already exists"));
                }
                self.fields.insert(
                    field_id,
                    FieldSnapshot {
                        address: event.address.clone(),
                        revision,
                        value: None,
                    },
                );
            }
            EventKind::RemoveField => {
                if self.fields.remove(&field_id).is_none() {
                    return Err(unexpected(event, "field does not exist"));
                }
            }
            EventKind::AddValue(v) | EventKind::ChangeValue(v) => {
                let field = self
                    .fields
                    .get_mut(&field_id)
                    .ok_or_else(|| unexpected(event, "field does not exist"))?;
                field.value = Some(v.clone());
                field.revision = revision;
            }
            EventKind::RemoveValue => {
                let field = self
                    .fields
                    .get_mut(&field_id)
                    .ok_or_else(|| unexpected(event, "field does not exist"))?;
                field.value = None;
                field.revision = revision;
            }
            _ => return Err(unexpected(event, "not a field-level event")),
        }
        self.revision = revision;
        Ok(())
    }
}

/// State of one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    /// Model address
    pub address: Address,
    /// Revision of the last successful change
    pub revision: i64,
    /// Objects by id
    pub objects: BTreeMap<String, ObjectSnapshot>,
}

impl ModelSnapshot {
    /// Model without objects
    pub fn empty(address: Address, revision: i64) -> Self {
        ModelSnapshot {
            address,
            revision,
            objects: BTreeMap::new(),
        }
    }

    /// Object by id
    pub fn object(&self, object_id: &str) -> Option<&ObjectSnapshot> {
        self.objects.get(object_id)
    }

    /// Keep only objects overlapping one of `addresses`
    ///
    /// A model-level (or higher) address keeps everything.
    pub fn restricted_to<'a, I>(&self, addresses: I) -> ModelSnapshot
    where
        I: IntoIterator<Item = &'a Address>,
    {
        let addresses: Vec<&Address> = addresses.into_iter().collect();
        let objects = self
            .objects
            .iter()
            .filter(|(_, object)| addresses.iter().any(|a| a.overlaps(&object.address)))
            .map(|(id, object)| (id.clone(), object.clone()))
            .collect();
        ModelSnapshot {
            address: self.address.clone(),
            revision: self.revision,
            objects,
        }
    }
}

/// Cached best-known state of one object
///
/// Written after every successful change that touched the object. It is a
/// replay base, valid as of `model_revision_at_update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TentativeObjectState {
    /// Object content (empty when the object does not exist)
    pub object: ObjectSnapshot,
    /// Whether the object exists
    pub exists: bool,
    /// Model revision at which this state was taken
    pub model_revision_at_update: i64,
}

impl TentativeObjectState {
    /// State of an object that does not exist as of `model_revision`
    pub fn absent(address: Address, model_revision: i64) -> Self {
        TentativeObjectState {
            object: ObjectSnapshot::empty(address, REVISION_OF_ENTITY_NOT_SET),
            exists: false,
            model_revision_at_update: model_revision,
        }
    }

    /// State of an existing object as of `model_revision`
    pub fn present(object: ObjectSnapshot, model_revision: i64) -> Self {
        TentativeObjectState {
            object,
            exists: true,
            model_revision_at_update: model_revision,
        }
    }

    /// Object address
    pub fn address(&self) -> &Address {
        &self.object.address
    }

    /// The object, if it exists
    pub fn object(&self) -> Option<&ObjectSnapshot> {
        if self.exists {
            Some(&self.object)
        } else {
            None
        }
    }

    /// Fold an event touching this object into the state
    ///
    /// Model removal (or an implied object removal) makes the object absent;
    /// events for other objects are ignored.
    pub fn apply_event(&mut self, event: &AtomicEvent, revision: i64) -> Result<()> {
        let address = self.object.address.clone();
        if !event.address.overlaps(&address) {
            return Ok(());
        }
        match &event.kind {
            EventKind::AddModel => {}
            EventKind::RemoveModel => {
                *self = TentativeObjectState::absent(address, revision);
                return Ok(());
            }
            EventKind::AddObject => {
                if self.exists {
                    return Err(unexpected(event, "object already exists"));
                }
                self.object = ObjectSnapshot::empty(address, revision);
                self.exists = true;
            }
            EventKind::RemoveObject => {
                if !self.exists {
                    return Err(unexpected(event, "object does not exist"));
                }
                *self = TentativeObjectState::absent(address, revision);
                return Ok(());
            }
            _ => {
                if !self.exists {
                    return Err(unexpected(event, "object does not exist"));
                }
                self.object.apply_event(event, revision)?;
            }
        }
        self.model_revision_at_update = self.model_revision_at_update.max(revision);
        Ok(())
    }
}

/// Fold one event into a model working copy at `revision`
///
/// `state` is `None` while the model does not exist.
pub fn apply_model_event(
    state: &mut Option<ModelSnapshot>,
    model: &Address,
    event: &AtomicEvent,
    revision: i64,
) -> Result<()> {
    match &event.kind {
        EventKind::AddModel => {
            if state.is_some() {
                return Err(unexpected(event, "model already exists"));
            }
            *state = Some(ModelSnapshot::empty(model.clone(), revision));
            return Ok(());
        }
        EventKind::RemoveModel => {
            if state.is_none() {
                return Err(unexpected(event, "model does not exist"));
            }
            *state = None;
            return Ok(());
        }
        _ => {}
    }

    let snapshot = state
        .as_mut()
        .ok_or_else(|| unexpected(event, "model does not exist"))?;
    let object_id = event
        .address
        .object_id()
        .ok_or_else(|| unexpected(event, "needs an object address"))?
        .to_string();
    match &event.kind {
        EventKind::AddObject => {
            if snapshot.objects.contains_key(&object_id) {
                return Err(unexpected(event, "object already exists"));
            }
            snapshot
                .objects
                .insert(object_id, ObjectSnapshot::empty(event.address.clone(), revision));
        }
        EventKind::RemoveObject => {
            if snapshot.objects.remove(&object_id).is_none() {
                return Err(unexpected(event, "object does not exist"));
            }
        }
        _ => {
            let object = snapshot
                .objects
                .get_mut(&object_id)
                .ok_or_else(|| unexpected(event, "object does not exist"))?;
            object.apply_event(event, revision)?;
        }
    }
    snapshot.revision = revision;
    Ok(())
}

fn unexpected(event: &AtomicEvent, reason: &str) -> Error {
    Error::internal(format!(
        "cannot apply {:?} on {}: {}",
        event.kind, event.address, reason
    ))
}
