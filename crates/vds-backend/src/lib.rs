//! Document-store driver abstraction for the versioned document store.
//!
//! The store above this crate needs very little from its backend: named
//! collections of JSON documents keyed by `_id`, prefix scans over `_id`,
//! and *atomic conditional* single-document writes whose matched/affected
//! counts are reported back. Everything else (wire protocol, replication,
//! connection pooling) is the driver's business.
//!
//! # Traits
//!
//! - [`Connector`]: establishes a [`Connection`] from [`ConnectOptions`]
//! - [`Connection`]: liveness, collection catalog, durability fan-out
//! - [`Collection`]: document reads and conditional writes
//!
//! # Drivers
//!
//! - [`InMemoryBackend`]: `HashMap`-based driver for tests and embedding,
//!   with fault injection
//! - [`FileBackend`]: one JSON file per collection in a directory
//!
//! # Driver Rules
//!
//! 1. `insert_one` fails with [`BackendError::DuplicateKey`] if the `_id` exists.
//! 2. `update_one` / `delete_one` touch at most one document and report how
//!    many matched; a zero count is not an error at this layer.
//! 3. Each conditional write is atomic with respect to every other write on
//!    the same collection.
//! 4. Collections spring into existence on first insert.

pub mod error;
pub mod file;
pub mod filter;
pub mod memory;
pub mod traits;

pub use error::{BackendError, BackendResult};
pub use file::FileBackend;
pub use filter::{Filter, IdMatch};
pub use memory::InMemoryBackend;
pub use traits::{Collection, ConnectOptions, Connection, Connector, UpdateOutcome};
