//! Lock sets
//!
//! A lock is just an [`Address`]. A change registers the addresses whose
//! subtrees it reads or writes; two changes conflict when any lock of one
//! overlaps (is an ancestor of, equal to, or a descendant of) any lock of the
//! other. Locks are used only for conflict detection: a later change waits
//! for every earlier, still-running change it conflicts with.
//!
//! # Minimal lock sets
//!
//! | command | lock |
//! |---------|------|
//! | AddModel / RemoveModel | the model |
//! | AddObject (SafeRevBound) | the model (its revision is read) |
//! | AddObject / RemoveObject | the object |
//! | field and value commands | the parent object (its revision changes) |
//!
//! A transaction locks the union of its commands' locks, with addresses
//! covered by another lock dropped.

use crate::address::Address;
use crate::command::{AtomicCommand, Command, CommandKind, Intent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Set of locked addresses
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locks {
    addresses: BTreeSet<Address>,
}

impl Locks {
    /// Empty lock set
    pub fn new() -> Self {
        Locks::default()
    }

    /// Lock set holding the given addresses, minimized
    pub fn from_addresses<I: IntoIterator<Item = Address>>(addresses: I) -> Self {
        let mut locks = Locks::new();
        for address in addresses {
            locks.insert(address);
        }
        locks
    }

    /// Minimal lock set for a command
    pub fn for_command(command: &Command) -> Self {
        Locks::from_addresses(command.atomic_commands().iter().map(lock_for))
    }

    /// Add a lock unless an existing lock already covers it; drops existing
    /// locks the new one covers
    pub fn insert(&mut self, address: Address) {
        if self.addresses.iter().any(|a| a.is_ancestor_of(&address)) {
            return;
        }
        self.addresses.retain(|a| !address.is_ancestor_of(a));
        self.addresses.insert(address);
    }

    /// True if any lock of `self` overlaps any lock of `other`
    pub fn conflicts_with(&self, other: &Locks) -> bool {
        self.addresses
            .iter()
            .any(|a| other.addresses.iter().any(|b| a.overlaps(b)))
    }

    /// True if any lock overlaps `address`
    pub fn overlaps(&self, address: &Address) -> bool {
        self.addresses.iter().any(|a| a.overlaps(address))
    }

    /// True if some lock is an ancestor of (or equal to) `address`
    pub fn covers(&self, address: &Address) -> bool {
        self.addresses.iter().any(|a| a.is_ancestor_of(address))
    }

    /// Locked addresses in order
    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.addresses.iter()
    }

    /// Number of locks
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// True if nothing is locked (terminal changes hold no locks)
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Drop every lock
    pub fn clear(&mut self) {
        self.addresses.clear();
    }
}

fn lock_for(command: &AtomicCommand) -> Address {
    let address = command.address();
    match command.kind() {
        CommandKind::AddModel | CommandKind::RemoveModel => address.clone(),
        CommandKind::AddObject if command.intent() == Intent::SafeRevBound => address
            .model_address()
            .unwrap_or_else(|| address.clone()),
        CommandKind::AddObject | CommandKind::RemoveObject => address.clone(),
        _ => address
            .object_address()
            .unwrap_or_else(|| address.clone()),
    }
}
