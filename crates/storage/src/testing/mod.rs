//! Testing utilities for exercising the engine against a misbehaving datastore
//!
//! - **ContentionInjector**: fails the next N change creates with contention
//!   or a timeout
//! - **UnavailableCache**: a cache tier that is always down
//!
//! # Example
//!
//! ```ignore
//! use arbor_storage::testing::ContentionInjector;
//!
//! let store = Arc::new(ContentionInjector::new(Arc::new(MemoryStore::new())));
//! store.fail_next_creates(2);
//! ```

mod faults;

pub use faults::{ContentionInjector, InjectedFault, UnavailableCache};
