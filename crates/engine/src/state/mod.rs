//! Layered state views
//!
//! Command execution reads and writes the tree through two layers:
//!
//! - [`BeforeView`]: the model as of the revision just below the executing
//!   change, loaded object by object and memoized
//! - [`TxnView`]: an in-memory delta over any [`StateRead`], so views stack;
//!   a transaction forks one per atomic command and absorbs it on success
//!
//! Nothing below the outermost view is ever mutated. A failed command just
//! drops its view.

mod before;
mod txn;

pub use before::{BeforeView, ObjectLoader};
pub use txn::{Delta, TxnView};
pub(crate) use txn::{mark_in_transaction, object_removal};

use arbor_core::{Address, ObjectSnapshot, Result};

/// Read access to a model's state during execution
pub trait StateRead {
    /// Address of the model being changed
    fn model_address(&self) -> &Address;

    /// Whether the model exists
    fn model_exists(&self) -> bool;

    /// Revision of the last successful change to the model
    fn model_revision(&self) -> i64;

    /// Revision the executing change will commit at
    fn pending_revision(&self) -> i64;

    /// State of one object, None if it does not exist
    fn object(&mut self, object_id: &str) -> Result<Option<ObjectSnapshot>>;

    /// Model revision before any stacked view changed anything
    fn committed_model_revision(&self) -> i64 {
        self.model_revision()
    }

    /// An object as it was before any stacked view changed anything
    fn committed_object(&mut self, object_id: &str) -> Result<Option<ObjectSnapshot>> {
        self.object(object_id)
    }
}
