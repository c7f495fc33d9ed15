//! In-memory storage for arbordb
//!
//! This crate implements the datastore ports defined in `arbor-core`:
//! - MemoryStore: sharded change store with create-if-absent and atomic
//!   single-entity update
//! - MemoryCache: sharded byte cache (fast tier)
//! - TieredCache: fast tier in front of a durable tier
//! - testing: fault injection for contention and cache outages
//!
//! # Architecture
//!
//! Each model gets its own shard, so writers on different models never
//! contend. Within a model, revision slots live in an ordered map and every
//! slot mutation holds the shard's write lock.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod change_store;
pub mod testing;

pub use cache::{CacheStats, MemoryCache, TieredCache};
pub use change_store::{MemoryStore, ModelShard};
