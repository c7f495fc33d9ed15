//! In-memory change store
//!
//! One shard per model: a DashMap keyed by model address, each holding an
//! ordered map of revision slots behind a `parking_lot::RwLock`.
//!
//! # Atomicity
//!
//! - `create_change` and `update_change` take the shard's write lock, so a
//!   create-if-absent or read-modify-write on one slot is atomic
//! - Different models never contend
//! - Range reads take the read lock and return a consistent view

use arbor_core::{Address, Change, ChangeStore, CreateOutcome, Interval, Result};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Revision slots of one model
#[derive(Debug, Default)]
pub struct ModelShard {
    changes: RwLock<BTreeMap<i64, Change>>,
}

impl ModelShard {
    /// Number of claimed slots
    pub fn len(&self) -> usize {
        self.changes.read().len()
    }

    /// True if no slot was claimed
    pub fn is_empty(&self) -> bool {
        self.changes.read().is_empty()
    }
}

/// Change store backed by process memory
///
/// Stands in for the durable datastore in tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryStore {
    shards: DashMap<Address, Arc<ModelShard>>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        MemoryStore::default()
    }

    fn shard(&self, model: &Address) -> Arc<ModelShard> {
        if let Some(shard) = self.shards.get(model) {
            return Arc::clone(shard.value());
        }
        Arc::clone(
            self.shards
                .entry(model.clone())
                .or_insert_with(|| Arc::new(ModelShard::default()))
                .value(),
        )
    }

    /// Number of change entities stored for `model`
    pub fn change_count(&self, model: &Address) -> usize {
        self.shards.get(model).map(|s| s.len()).unwrap_or(0)
    }

    /// Models that have at least one change
    pub fn models(&self) -> Vec<Address> {
        let mut models: Vec<Address> = self
            .shards
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        models.sort();
        models
    }
}

impl ChangeStore for MemoryStore {
    fn create_change(&self, change: &Change) -> Result<CreateOutcome> {
        let shard = self.shard(&change.model);
        let mut changes = shard.changes.write();
        if let Some(existing) = changes.get(&change.revision) {
            return Ok(CreateOutcome::Exists(existing.clone()));
        }
        changes.insert(change.revision, change.clone());
        Ok(CreateOutcome::Created)
    }

    fn get_change(&self, model: &Address, revision: i64) -> Result<Option<Change>> {
        Ok(self
            .shards
            .get(model)
            .and_then(|shard| shard.changes.read().get(&revision).cloned()))
    }

    fn get_changes(&self, model: &Address, interval: Interval) -> Result<Vec<Change>> {
        if interval.is_empty() {
            return Ok(Vec::new());
        }
        let Some(shard) = self.shards.get(model).map(|s| Arc::clone(s.value())) else {
            return Ok(Vec::new());
        };
        let changes = shard.changes.read();
        Ok(changes
            .range(interval.start..=interval.end)
            .map(|(_, change)| change.clone())
            .collect())
    }

    fn update_change(
        &self,
        model: &Address,
        revision: i64,
        update: &mut dyn FnMut(&mut Change) -> bool,
    ) -> Result<Option<Change>> {
        let Some(shard) = self.shards.get(model).map(|s| Arc::clone(s.value())) else {
            return Ok(None);
        };
        let mut changes = shard.changes.write();
        let Some(stored) = changes.get_mut(&revision) else {
            return Ok(None);
        };
        let mut candidate = stored.clone();
        if update(&mut candidate) {
            *stored = candidate;
        }
        Ok(Some(stored.clone()))
    }
}
