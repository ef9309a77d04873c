//! Branch-versioned, content-addressed object store.
//!
//! `vds-core` layers git-like versioning semantics over any document store
//! reachable through [`vds_backend::Connector`]:
//!
//! - an immutable object table (`#hash` → document), insert-only;
//! - mutable branch pointers (`*name` → `#hash`) updated only through
//!   compare-and-swap against the caller's expected prior value;
//! - refcounted project handles whose concurrent opens are coalesced into a
//!   single backend open;
//! - report-on-change status polling and fsync fan-out across every
//!   physical connection.
//!
//! # Usage
//!
//! ```no_run
//! # async fn demo() -> vds_core::StorageResult<()> {
//! use vds_backend::InMemoryBackend;
//! use vds_core::{Database, DatabaseConfig};
//! use vds_types::{BranchName, ObjectHash};
//!
//! let db = Database::new(InMemoryBackend::new(), DatabaseConfig::default());
//! db.open_database().await?;
//!
//! let project = db.open_project("demo").await?;
//! let main = BranchName::parse("*main")?;
//! let root = ObjectHash::parse("#root")?;
//! project.set_branch_hash(&main, None, Some(&root)).await?;
//! project.close();
//!
//! db.close_database().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Trust boundary
//!
//! The store checks hash *syntax* only. Callers guarantee that equal hashes
//! mean equal content; [`DatabaseConfig::verify_hashes`] turns on
//! recomputation at insert time for debugging.
//!
//! # Modules
//!
//! - [`database`]: connection lifecycle, project registry, status, fsync
//! - [`project`]: objects, hash prefix lookup, branch operations
//! - [`branch`]: the branch CAS protocol
//! - [`config`]: [`DatabaseConfig`]
//! - [`hasher`]: optional content-hash verification
//! - [`error`]: [`StorageError`]

pub mod branch;
pub mod config;
pub mod database;
pub mod error;
pub mod hasher;
pub mod project;
mod registry;

pub use branch::{Branch, HASH_FIELD};
pub use config::DatabaseConfig;
pub use database::Database;
pub use error::{StorageError, StorageResult};
pub use hasher::{Blake3ObjectHasher, ObjectHasher};
pub use project::{Project, ProjectHandle};
