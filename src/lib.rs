//! arbordb - optimistic, revision-ordered command execution for tree stores
//!
//! arbordb keeps a four-level tree (repository / model / object / field) and
//! applies commands to it through a per-model change log. Writers claim
//! consecutive revisions, wait only for conflicting changes below them, and
//! commit events describing exactly what changed.
//!
//! # Quick Start
//!
//! ```ignore
//! use arbordb::{ActorId, AtomicCommand, CommandKind, Engine, EngineConfig};
//!
//! let engine = Engine::in_memory(EngineConfig::default())?;
//! let actor = ActorId::from("alice");
//!
//! let add_model = AtomicCommand::forced("/repo/people".parse()?, CommandKind::AddModel)?;
//! engine.execute_command(&add_model.into(), &actor)?;
//!
//! let add_bob = AtomicCommand::forced("/repo/people/bob".parse()?, CommandKind::AddObject)?;
//! let revision = engine.execute_command(&add_bob.into(), &actor)?.as_revision_code();
//! ```
//!
//! # Architecture
//!
//! All commands go through [`Engine`]. The datastore and cache are ports
//! ([`ChangeStore`], [`CacheStore`]); the in-memory implementations in
//! [`storage`] back [`Engine::in_memory`].

pub use arbor_core::*;
pub use arbor_engine::*;

/// In-memory datastore and caches
pub mod storage {
    pub use arbor_storage::testing::{ContentionInjector, UnavailableCache};
    pub use arbor_storage::{MemoryCache, MemoryStore, TieredCache};
}

/// Clocks and the per-model coordination primitives
pub mod concurrency {
    pub use arbor_concurrency::{
        Backoff, ChangeLog, ChangeLogConfig, Clock, ManualClock, RevisionCoordinator, SystemClock,
    };
}
