//! Ports to the backing datastore and caches
//!
//! The engine never assumes shared memory between writers. Everything it
//! coordinates on goes through these traits, which only promise
//! single-entity atomicity:
//!
//! - [`ChangeStore`]: the authoritative change log (create-if-absent,
//!   atomic single-entity update, key-range reads)
//! - [`CacheStore`]: best-effort byte caches for snapshots, tentative object
//!   states and revision info; entries may vanish or be stale at any time
//!
//! Thread safety: all methods must be safe to call concurrently from
//! multiple threads (requires Send + Sync).

use crate::address::Address;
use crate::change::Change;
use crate::error::Result;
use crate::interval::Interval;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Outcome of an atomic create-if-absent
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// The entity did not exist and was created
    Created,
    /// The slot was already taken; carries the stored change
    Exists(Change),
}

/// Durable, authoritative storage of change-log entries
///
/// Each change is one entity keyed by `(model, revision)`.
///
/// # Errors
///
/// Implementations report races with [`Error::Contention`](crate::Error::Contention)
/// and slow responses with [`Error::DatastoreTimeout`](crate::Error::DatastoreTimeout);
/// callers treat both as retryable.
pub trait ChangeStore: Send + Sync {
    /// Create the entity for `change` unless one exists at its key
    fn create_change(&self, change: &Change) -> Result<CreateOutcome>;

    /// Read one change
    fn get_change(&self, model: &Address, revision: i64) -> Result<Option<Change>>;

    /// Read the changes present in `interval`, ascending by revision
    ///
    /// Missing revisions are simply absent from the result.
    fn get_changes(&self, model: &Address, interval: Interval) -> Result<Vec<Change>>;

    /// Atomically read-modify-write one change
    ///
    /// `update` receives the stored change and returns whether it modified
    /// it; only then is it written back. Returns the stored change after the
    /// call, or None if there is no entity at the key.
    fn update_change(
        &self,
        model: &Address,
        revision: i64,
        update: &mut dyn FnMut(&mut Change) -> bool,
    ) -> Result<Option<Change>>;
}

/// Best-effort key/value byte cache
pub trait CacheStore: Send + Sync {
    /// Read an entry
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write an entry
    fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Drop an entry
    fn remove(&self, key: &str) -> Result<()>;
}

/// Encode a value for a [`CacheStore`]
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec(value)?)
}

/// Decode a value read from a [`CacheStore`]
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Cache key of the model snapshot at `revision`
pub fn snapshot_key(model: &Address, revision: i64) -> String {
    format!("snap{}/{}", model, revision)
}

/// Cache key of an object's tentative state
pub fn tentative_state_key(object: &Address) -> String {
    format!("tos{}", object)
}

/// Cache key of a model's revision info
pub fn revision_info_key(model: &Address) -> String {
    format!("rev{}", model)
}
