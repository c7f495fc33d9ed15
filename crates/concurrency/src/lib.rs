//! Revision coordination for arbordb
//!
//! This crate serializes concurrent writers of one model through the
//! change log alone, without shared memory or datastore locks:
//! - ChangeLog: slot claiming, timeout progression, range reads, commit
//! - RevisionCoordinator: monotone revision counters with throttled persistence
//! - Clock: wall-clock abstraction (system and manual)
//! - Backoff: capped exponential delays for poll loops
//!
//! Writers race for revision slots with an atomic create-if-absent. A
//! writer that dies while holding a slot is recovered by whoever next
//! observes the slot past its execution budget.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod change_log;
pub mod clock;
pub mod revision_coordinator;

pub use backoff::Backoff;
pub use change_log::{ChangeLog, ChangeLogConfig};
pub use clock::{Clock, ManualClock, SystemClock};
pub use revision_coordinator::RevisionCoordinator;
