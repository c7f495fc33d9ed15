//! Revision counters for one model
//!
//! [`RevisionInfo`] holds the four counters that describe how far the change
//! log of a model has progressed:
//!
//! ```text
//! -1 <= last_stable_success <= last_stable_committed <= last_taken
//! -1 <= last_stable_success <= last_success          <= last_taken
//! ```
//!
//! - `last_taken`: highest revision slot known to be claimed
//! - `last_success`: highest revision known to have executed successfully
//! - `last_stable_committed`: highest revision such that it and every
//!   revision below it is terminal
//! - `last_stable_success`: highest successful revision at or below
//!   `last_stable_committed`; `model_exists` is valid as of this revision
//!
//! Counters only ever move forward. Every setter raises the dependent,
//! higher-order counters so the chain holds after each call.

use crate::address::Address;
use serde::{Deserialize, Serialize};

/// Revision number marking an entity that does not exist / was never set
pub const REVISION_OF_ENTITY_NOT_SET: i64 = -1;

/// How far the counters of a [`RevisionInfo`] can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Precision {
    /// Defaults; nothing is known yet
    None,
    /// Loaded from a cache; may lag behind the change log
    Loaded,
    /// Confirmed against the change log
    Precise,
}

/// Monotone revision counters of one model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionInfo {
    model: Address,
    last_taken: i64,
    last_success: i64,
    last_stable_committed: i64,
    last_stable_success: i64,
    model_exists: bool,
    precision: Precision,
}

impl RevisionInfo {
    /// Counters of a model that does not exist and has no changes
    pub fn new(model: Address) -> Self {
        RevisionInfo {
            model,
            last_taken: -1,
            last_success: -1,
            last_stable_committed: -1,
            last_stable_success: -1,
            model_exists: false,
            precision: Precision::None,
        }
    }

    /// Address of the model these counters describe
    pub fn model(&self) -> &Address {
        &self.model
    }

    /// Highest claimed revision
    pub fn last_taken(&self) -> i64 {
        self.last_taken
    }

    /// Highest known successful revision
    pub fn last_success(&self) -> i64 {
        self.last_success
    }

    /// Highest revision with no non-terminal change at or below it
    pub fn last_stable_committed(&self) -> i64 {
        self.last_stable_committed
    }

    /// Highest successful revision at or below `last_stable_committed`
    pub fn last_stable_success(&self) -> i64 {
        self.last_stable_success
    }

    /// Whether the model exists as of `last_stable_success`
    pub fn model_exists(&self) -> bool {
        self.model_exists
    }

    /// Trust level of the counters
    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Same counters, with the trust level replaced
    ///
    /// Used when reading a persisted copy back: whatever it claimed when it
    /// was written, it is only a hint now.
    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    /// Raise the trust level (never lowers it)
    pub fn set_precision(&mut self, precision: Precision) {
        self.precision = self.precision.max(precision);
    }

    /// Raise `last_taken`
    pub fn set_last_taken(&mut self, revision: i64) {
        self.last_taken = self.last_taken.max(revision);
    }

    /// Raise `last_success` (and `last_taken`)
    pub fn set_last_success(&mut self, revision: i64) {
        self.set_last_taken(revision);
        self.last_success = self.last_success.max(revision);
    }

    /// Raise `last_stable_committed` (and `last_taken`)
    pub fn set_last_stable_committed(&mut self, revision: i64) {
        self.set_last_taken(revision);
        self.last_stable_committed = self.last_stable_committed.max(revision);
    }

    /// Raise `last_stable_success` together with the model existence valid at it
    ///
    /// Also raises `last_stable_committed`, `last_success` and `last_taken`.
    /// A lower or equal revision leaves `model_exists` untouched.
    pub fn set_last_stable_success(&mut self, revision: i64, model_exists: bool) {
        self.set_last_stable_committed(revision);
        self.set_last_success(revision);
        if revision > self.last_stable_success {
            self.last_stable_success = revision;
            self.model_exists = model_exists;
        }
    }

    /// Merge another observation of the same model, counter by counter
    ///
    /// Applied from the highest-order counter down, so the result is the
    /// pointwise maximum and still satisfies the chain invariant.
    pub fn increment_from(&mut self, other: &RevisionInfo) {
        self.set_last_taken(other.last_taken);
        self.set_last_success(other.last_success);
        self.set_last_stable_committed(other.last_stable_committed);
        self.set_last_stable_success(other.last_stable_success, other.model_exists);
        self.set_precision(other.precision);
    }

    /// Check the counter chain; used by tests and debug assertions
    pub fn is_consistent(&self) -> bool {
        -1 <= self.last_stable_success
            && self.last_stable_success <= self.last_stable_committed
            && self.last_stable_committed <= self.last_taken
            && self.last_stable_success <= self.last_success
            && self.last_success <= self.last_taken
    }
}
