//! Commands: requested mutations
//!
//! A [`Command`] is either one [`AtomicCommand`] or a
//! [`TransactionCommand`] holding an ordered list of them. The command kind
//! is a closed enum so that every precondition rule lives in one `match` in
//! the execution engine.
//!
//! The address of an atomic command is always the *changed entity*: the
//! model for model commands, the object for object commands, the field for
//! field and value commands.

use crate::address::{Address, AddressLevel};
use crate::error::{Error, Result};
use crate::types::ChangeType;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Strictness of a command's precondition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Intent {
    /// Never fails: adds of present entities and removes of absent ones are no-ops
    Forced,
    /// Fails if the entity is not in the expected state (present/absent)
    SafeStateBound,
    /// Like `SafeStateBound`, and the entity's revision must equal the
    /// command's expected revision
    SafeRevBound,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Intent::Forced => "forced",
            Intent::SafeStateBound => "safe-state",
            Intent::SafeRevBound => "safe-rev",
        };
        f.write_str(name)
    }
}

/// What an atomic command asks for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandKind {
    /// Create a model (repository level, never inside a transaction)
    AddModel,
    /// Remove a model and everything in it (repository level)
    RemoveModel,
    /// Create an object
    AddObject,
    /// Remove an object and its fields
    RemoveObject,
    /// Create an empty field
    AddField,
    /// Remove a field and its value
    RemoveField,
    /// Set the value of an empty field
    AddValue(Value),
    /// Replace the value of a field
    ChangeValue(Value),
    /// Clear the value of a field
    RemoveValue,
}

impl CommandKind {
    /// Add / Remove / Change
    pub fn change_type(&self) -> ChangeType {
        match self {
            CommandKind::AddModel
            | CommandKind::AddObject
            | CommandKind::AddField
            | CommandKind::AddValue(_) => ChangeType::Add,
            CommandKind::RemoveModel
            | CommandKind::RemoveObject
            | CommandKind::RemoveField
            | CommandKind::RemoveValue => ChangeType::Remove,
            CommandKind::ChangeValue(_) => ChangeType::Change,
        }
    }

    /// Level the command's address must have
    pub fn entity_level(&self) -> AddressLevel {
        match self {
            CommandKind::AddModel | CommandKind::RemoveModel => AddressLevel::Model,
            CommandKind::AddObject | CommandKind::RemoveObject => AddressLevel::Object,
            _ => AddressLevel::Field,
        }
    }

    /// True for repository-level model commands
    pub fn is_model_command(&self) -> bool {
        matches!(self, CommandKind::AddModel | CommandKind::RemoveModel)
    }

    /// True for commands on a field's value
    pub fn is_value_command(&self) -> bool {
        matches!(
            self,
            CommandKind::AddValue(_) | CommandKind::ChangeValue(_) | CommandKind::RemoveValue
        )
    }
}

/// One requested change to one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicCommand {
    address: Address,
    kind: CommandKind,
    intent: Intent,
    expected_revision: i64,
}

impl AtomicCommand {
    /// Build a command, checking the address level matches the kind
    ///
    /// `expected_revision` is only consulted for [`Intent::SafeRevBound`].
    pub fn new(
        address: Address,
        kind: CommandKind,
        intent: Intent,
        expected_revision: i64,
    ) -> Result<Self> {
        if address.level() != kind.entity_level() {
            return Err(Error::InvalidCommand(format!(
                "{:?} needs a {} address, got {}",
                kind,
                kind.entity_level(),
                address
            )));
        }
        Ok(AtomicCommand {
            address,
            kind,
            intent,
            expected_revision,
        })
    }

    /// Forced command (never fails its precondition)
    pub fn forced(address: Address, kind: CommandKind) -> Result<Self> {
        Self::new(address, kind, Intent::Forced, 0)
    }

    /// Safe command bound to the entity's presence/absence
    pub fn safe(address: Address, kind: CommandKind) -> Result<Self> {
        Self::new(address, kind, Intent::SafeStateBound, 0)
    }

    /// Safe command bound to an exact revision
    pub fn safe_rev(address: Address, kind: CommandKind, expected_revision: i64) -> Result<Self> {
        Self::new(address, kind, Intent::SafeRevBound, expected_revision)
    }

    /// The changed entity
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// What is requested
    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    /// Precondition strictness
    pub fn intent(&self) -> Intent {
        self.intent
    }

    /// Revision required by a `SafeRevBound` command
    pub fn expected_revision(&self) -> i64 {
        self.expected_revision
    }

    /// Add / Remove / Change
    pub fn change_type(&self) -> ChangeType {
        self.kind.change_type()
    }

    /// The container the command operates in (value commands: the field)
    pub fn target(&self) -> Address {
        if self.kind.is_value_command() {
            self.address.clone()
        } else {
            self.address.parent().unwrap_or_else(Address::root)
        }
    }
}

/// Ordered, non-empty list of atomic commands within one model or object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionCommand {
    target: Address,
    commands: Vec<AtomicCommand>,
}

impl TransactionCommand {
    /// Validate and build a transaction
    ///
    /// Rejects: an empty list, a target that is not a model or object,
    /// commands outside the target, model-level commands, and an add of an
    /// entity followed by a remove of the same entity.
    pub fn new(target: Address, commands: Vec<AtomicCommand>) -> Result<Self> {
        if commands.is_empty() {
            return Err(Error::InvalidCommand(
                "transaction must contain at least one command".to_string(),
            ));
        }
        if !matches!(target.level(), AddressLevel::Model | AddressLevel::Object) {
            return Err(Error::InvalidCommand(format!(
                "transaction target {} must be a model or object",
                target
            )));
        }
        for command in &commands {
            if command.kind().is_model_command() {
                return Err(Error::InvalidCommand(format!(
                    "model command on {} cannot be part of a transaction",
                    command.address()
                )));
            }
            if !target.is_strict_ancestor_of(command.address()) {
                return Err(Error::InvalidCommand(format!(
                    "{} is outside transaction target {}",
                    command.address(),
                    target
                )));
            }
        }
        for (i, earlier) in commands.iter().enumerate() {
            for later in &commands[i + 1..] {
                if adds_then_removes(earlier, later) {
                    return Err(Error::InvalidCommand(format!(
                        "{} is added and then removed in one transaction",
                        earlier.address()
                    )));
                }
            }
        }
        Ok(TransactionCommand { target, commands })
    }

    /// Model or object containing every command
    pub fn target(&self) -> &Address {
        &self.target
    }

    /// The commands, in application order
    pub fn commands(&self) -> &[AtomicCommand] {
        &self.commands
    }
}

fn adds_then_removes(earlier: &AtomicCommand, later: &AtomicCommand) -> bool {
    if earlier.address() != later.address() {
        return false;
    }
    matches!(
        (earlier.kind(), later.kind()),
        (CommandKind::AddObject, CommandKind::RemoveObject)
            | (CommandKind::AddField, CommandKind::RemoveField)
            | (CommandKind::AddValue(_), CommandKind::RemoveValue)
            | (CommandKind::ChangeValue(_), CommandKind::RemoveValue)
    )
}

/// A mutation request: one atomic command or a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Single atomic command
    Atomic(AtomicCommand),
    /// Ordered list of atomic commands applied all-or-nothing
    Transaction(TransactionCommand),
}

impl Command {
    /// Add / Remove / Change / Transaction
    pub fn change_type(&self) -> ChangeType {
        match self {
            Command::Atomic(c) => c.change_type(),
            Command::Transaction(_) => ChangeType::Transaction,
        }
    }

    /// Intent of an atomic command; None for transactions
    pub fn intent(&self) -> Option<Intent> {
        match self {
            Command::Atomic(c) => Some(c.intent()),
            Command::Transaction(_) => None,
        }
    }

    /// Address the command is issued against
    pub fn target(&self) -> Address {
        match self {
            Command::Atomic(c) => c.target(),
            Command::Transaction(t) => t.target().clone(),
        }
    }

    /// The model whose change log the command is executed on
    pub fn model_address(&self) -> Result<Address> {
        let address = match self {
            Command::Atomic(c) => c.address(),
            Command::Transaction(t) => t.target(),
        };
        address.model_address().ok_or_else(|| {
            Error::InvalidCommand(format!("{} is not inside a model", address))
        })
    }

    /// The atomic commands, in order
    pub fn atomic_commands(&self) -> &[AtomicCommand] {
        match self {
            Command::Atomic(c) => std::slice::from_ref(c),
            Command::Transaction(t) => t.commands(),
        }
    }
}

impl From<AtomicCommand> for Command {
    fn from(c: AtomicCommand) -> Self {
        Command::Atomic(c)
    }
}

impl From<TransactionCommand> for Command {
    fn from(t: TransactionCommand) -> Self {
        Command::Transaction(t)
    }
}
