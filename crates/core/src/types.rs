//! Small identifier types shared across crates

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of the actor (user, client, service) submitting a command
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorId(String);

impl ActorId {
    /// Wrap an actor name
    pub fn new(name: impl Into<String>) -> Self {
        ActorId(name.into())
    }

    /// Actor name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorId {
    fn from(s: &str) -> Self {
        ActorId(s.to_string())
    }
}

/// What a command or event does to its changed entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    /// Create an entity or set a value on an empty field
    Add,
    /// Delete an entity or clear a field's value
    Remove,
    /// Replace a field's value
    Change,
    /// Ordered group of atomic commands or events
    Transaction,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeType::Add => "ADD",
            ChangeType::Remove => "REMOVE",
            ChangeType::Change => "CHANGE",
            ChangeType::Transaction => "TRANSACTION",
        };
        f.write_str(name)
    }
}
