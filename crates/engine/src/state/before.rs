//! The state just below the executing change

use super::StateRead;
use arbor_core::{
    Address, AtomicEvent, Error, ModelSnapshot, ObjectSnapshot, Result, TentativeObjectState,
};
use std::collections::BTreeMap;

/// Source of materialized object and model state
///
/// Both methods return the state as of `revision` inclusive.
pub trait ObjectLoader {
    /// One object's state
    fn load_object(&self, object: &Address, revision: i64) -> Result<TentativeObjectState>;

    /// The whole model, None if it does not exist
    fn load_model(&self, revision: i64) -> Result<Option<ModelSnapshot>>;
}

/// Read view of a model as of `pending_revision - 1`
///
/// Model existence and revision are fixed at construction (the orchestrator
/// learns them while serializing). Objects are loaded on first access and
/// memoized for the rest of the command.
pub struct BeforeView<'a> {
    model: Address,
    pending_revision: i64,
    model_exists: bool,
    model_revision: i64,
    loader: &'a dyn ObjectLoader,
    objects: BTreeMap<String, Option<ObjectSnapshot>>,
    complete: bool,
}

impl<'a> BeforeView<'a> {
    /// View for a change about to commit at `pending_revision`
    pub fn new(
        model: Address,
        pending_revision: i64,
        model_exists: bool,
        model_revision: i64,
        loader: &'a dyn ObjectLoader,
    ) -> Self {
        BeforeView {
            model,
            pending_revision,
            model_exists,
            model_revision,
            loader,
            objects: BTreeMap::new(),
            complete: false,
        }
    }

    /// Ids of every existing object, loading the whole model once
    pub fn object_ids(&mut self) -> Result<Vec<String>> {
        if !self.model_exists {
            return Ok(Vec::new());
        }
        if !self.complete {
            let snapshot = self
                .loader
                .load_model(self.pending_revision - 1)?
                .ok_or_else(|| {
                    Error::internal(format!(
                        "model {} missing at revision {}",
                        self.model,
                        self.pending_revision - 1
                    ))
                })?;
            self.objects = snapshot
                .objects
                .into_iter()
                .map(|(id, object)| (id, Some(object)))
                .collect();
            self.complete = true;
        }
        Ok(self
            .objects
            .iter()
            .filter(|(_, object)| object.is_some())
            .map(|(id, _)| id.clone())
            .collect())
    }

    /// Tentative state of `object` after applying `events` at the pending revision
    ///
    /// Only objects read during execution are known; returns None for others.
    pub fn state_after(
        &self,
        object: &Address,
        events: &[AtomicEvent],
    ) -> Result<Option<TentativeObjectState>> {
        let Some(before) = object.object_id().and_then(|id| self.objects.get(id)) else {
            return Ok(None);
        };
        let base = self.pending_revision - 1;
        let mut state = match before {
            Some(snapshot) => TentativeObjectState::present(snapshot.clone(), base),
            None => TentativeObjectState::absent(object.clone(), base),
        };
        for event in events {
            state.apply_event(event, self.pending_revision)?;
        }
        Ok(Some(state))
    }
}

impl StateRead for BeforeView<'_> {
    fn model_address(&self) -> &Address {
        &self.model
    }

    fn model_exists(&self) -> bool {
        self.model_exists
    }

    fn model_revision(&self) -> i64 {
        self.model_revision
    }

    fn pending_revision(&self) -> i64 {
        self.pending_revision
    }

    fn object(&mut self, object_id: &str) -> Result<Option<ObjectSnapshot>> {
        if !self.model_exists {
            return Ok(None);
        }
        if let Some(object) = self.objects.get(object_id) {
            return Ok(object.clone());
        }
        if self.complete {
            return Ok(None);
        }
        let address = self.model.child(object_id)?;
        let state = self
            .loader
            .load_object(&address, self.pending_revision - 1)?;
        let object = state.object().cloned();
        self.objects.insert(object_id.to_string(), object.clone());
        Ok(object)
    }
}

impl std::fmt::Debug for BeforeView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeforeView")
            .field("model", &self.model)
            .field("pending_revision", &self.pending_revision)
            .field("model_exists", &self.model_exists)
            .field("loaded", &self.objects.len())
            .finish()
    }
}
