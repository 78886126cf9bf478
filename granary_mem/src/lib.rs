//! # Granary memory store
//!
//! An in-memory persistence engine for granary, primarily for testing.
//!
//! Tables live in an [`InMemoryDatabase`] shared by every context a factory opens, so state
//! written through one grain storage call is visible to the next:
//!
//! ```ignore
//! use granary_core::prelude::*;
//! use granary_mem::InMemoryContextFactory;
//!
//! let model = Model::builder("ProfilesContext")
//!     .entity_set::<Profile>("profiles")
//!     .build()?;
//! let storage = EntityGrainStorage::builder(InMemoryContextFactory::new(model))
//!     .grain::<ProfileGrain>()
//!     .build();
//! ```
//!
//! Saving follows the usual optimistic concurrency rules: updates and deletes compare every
//! concurrency token of the entity with the stored row, and row versions are regenerated on
//! every insert and update.

#![deny(missing_docs)]

mod context;
mod database;

pub use context::*;
pub use database::{InMemoryDatabase, InMemoryDatabaseError};
