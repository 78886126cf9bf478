//! # Granary
//!
//! Persists the state of virtual actor grains as entities of a data context. See
//! [`granary_core`] for the provider itself; the engines are behind features:
//!
//! - `in-memory` (default): [`mem_store`], tables kept in process.
//! - `postgres`: [`postgres`], a `sqlx` Postgres engine.
//! - `derive` (default): `#[derive(Entity)]` and `#[derive(Grain)]`.

#![deny(missing_docs)]

pub use granary_core;

#[cfg(feature = "derive")]
/// Proc-macros for the `granary` crate.
pub mod derive {
    //! Contains the `Entity` and `Grain` derive macros.
    pub use granary_derive::*;
}

#[cfg(feature = "in-memory")]
/// The in-memory engine.
pub mod mem_store {
    //! Contains the in-memory context factory and its database.
    pub use granary_mem::*;
}

#[cfg(feature = "postgres")]
/// The postgres engine.
pub mod postgres {
    //! Contains the postgres context factory and its configuration.
    pub use granary_pg::*;
}

pub mod prelude {
    //! The prelude module for the `granary` crate.
    pub use granary_core::prelude::*;

    #[cfg(feature = "derive")]
    pub use super::derive::*;
    #[cfg(feature = "in-memory")]
    pub use super::mem_store::{InMemoryContextFactory, InMemoryDatabase};
    #[cfg(feature = "postgres")]
    pub use super::postgres::{PgContextFactory, PgStorageConfig};
}
