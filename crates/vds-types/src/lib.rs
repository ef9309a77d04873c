//! Foundation types for the versioned document store (VDS).
//!
//! This crate provides the identifier and value types shared by the backend
//! drivers and the store itself. Every other VDS crate depends on
//! `vds-types`.
//!
//! # Key Types
//!
//! - [`ProjectName`]: Name of a project (one backend collection)
//! - [`ObjectHash`]: Content hash identifying an immutable object (`#...`)
//! - [`BranchName`]: Name of a mutable branch pointer (`*...`)
//! - [`Object`]: An immutable JSON document keyed by its [`ObjectHash`]
//! - [`DatabaseStatus`]: Liveness classification of the backing store
//!
//! Identifier types only validate *syntax*. Whether an [`ObjectHash`] really
//! is the hash of its object's content is the caller's responsibility.

pub mod error;
pub mod names;
pub mod object;
pub mod status;

pub use error::TypeError;
pub use names::{BranchName, ObjectHash, ProjectName};
pub use object::{Document, Object, ID_FIELD};
pub use status::DatabaseStatus;
