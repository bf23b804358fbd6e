//! # swkit Cache
//!
//! Versioned cache generations for the offline cache controller.
//!
//! ## Features
//!
//! - **Generations**: named partitions tagged `{app}-{static|dynamic}-v{version}`
//! - **Reconciliation**: delete every stale generation of this app on activation
//! - **Backends**: [`MemoryStorage`] (process-local) and [`DiskStorage`] (durable)
//!
//! ## Architecture
//!
//! ```text
//! GenerationManager
//!     │
//!     └── CacheStorage (trait)
//!             ├── MemoryStorage
//!             └── DiskStorage  (root/<generation>/<sha256(key)>.json)
//!
//! Cache (handle for one generation)
//!     └── "GET <url>" → CacheEntry
//! ```

pub mod disk;
pub mod entry;
pub mod error;
pub mod generation;
pub mod memory;
pub mod storage;

pub use disk::DiskStorage;
pub use entry::CacheEntry;
pub use error::StorageError;
pub use generation::{GenerationManager, GenerationTag, Purpose, ReconcileReport};
pub use memory::MemoryStorage;
pub use storage::{Cache, CacheStorage};
