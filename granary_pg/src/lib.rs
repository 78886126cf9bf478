//! # Granary postgres store
//!
//! A [`ContextFactory`](granary_core::context::ContextFactory) over a `sqlx` Postgres pool.
//! Every scope holds one pooled connection. Statements are generated from entity metadata and
//! updates and deletes are conditioned on the concurrency tokens the caller loaded.
//!
//! ```rust,ignore
//! use granary_pg::{PgContextFactory, PgStorageConfig};
//!
//! let pool = PgStorageConfig::from_env()?.connect().await?;
//! let factory = PgContextFactory::new(pool, model);
//! factory.initialize::<Profile>().await?;
//! ```

#![deny(missing_docs)]

/// Connection settings and pool creation
pub mod config;

/// The postgres context and its factory
pub mod context;

/// SQL generation from entity metadata
pub mod sql;

pub use config::{PgStorageConfig, PgStorageError};
pub use context::{PgContext, PgContextFactory};
pub use sql::Statement;
