//! Core types and traits for arbordb
//!
//! This crate defines the foundational types used throughout the system:
//! - Address: 0-4 component tree path with containment tests
//! - Value: field values
//! - Command / Event: requested and performed mutations
//! - Change / ChangeStatus: change-log entries
//! - Locks: lock sets and conflict detection
//! - RevisionInfo: monotone revision counters of a model
//! - Interval: inclusive revision ranges for batch fetches
//! - ModelSnapshot / ObjectSnapshot / TentativeObjectState: materialized state
//! - Traits: ports to the change store and caches
//! - Error: Error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod change;
pub mod command;
pub mod error;
pub mod event;
pub mod interval;
pub mod locks;
pub mod model;
pub mod revision;
pub mod traits;
pub mod types;
pub mod value;

pub use address::{Address, AddressLevel};
pub use change::{Change, ChangeStatus};
pub use command::{AtomicCommand, Command, CommandKind, Intent, TransactionCommand};
pub use error::{Error, Result};
pub use event::{verify_implied, verify_minimal, AtomicEvent, Event, EventKind, TransactionEvent};
pub use interval::Interval;
pub use locks::Locks;
pub use model::{apply_model_event, FieldSnapshot, ModelSnapshot, ObjectSnapshot, TentativeObjectState};
pub use revision::{Precision, RevisionInfo, REVISION_OF_ENTITY_NOT_SET};
pub use traits::{CacheStore, ChangeStore, CreateOutcome};
pub use types::{ActorId, ChangeType};
pub use value::Value;
