//! Command execution engine for arbordb
//!
//! This crate ties the lower layers together:
//! - Engine: the entry point, one revision coordinator, change log and
//!   snapshot cache per model
//! - ExecutionEngine: precondition checks and event synthesis
//! - StateViews: the before-command view and transaction deltas
//! - SnapshotCache: model snapshots by change-log replay
//! - EngineConfig: `arbor.toml` settings
//!
//! The engine is the only component that knows about:
//! - The four execution phases (allocate, serialize, decide, commit)
//! - Tentative object states written after each commit

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod execute;
pub mod orchestrator;
pub mod snapshot_cache;
pub mod state;

pub use config::{EngineConfig, CONFIG_FILE_NAME};
pub use execute::{ExecutionEngine, ExecutionOutcome};
pub use orchestrator::{Engine, ExecutionResult, ModelRevision, FAILED, NOCHANGE};
pub use snapshot_cache::SnapshotCache;
pub use state::{BeforeView, Delta, ObjectLoader, StateRead, TxnView};
