//! # Granary
//!
//! Core types of the granary grain storage provider. A grain's state is persisted as an entity of
//! a data context: the provider derives, per grain type, how to find the entity of a grain, how to
//! tell inserts from updates and which concurrency token acts as the grain's etag.

#![deny(missing_docs)]

pub mod accessor;
pub mod context;
pub mod convention;
pub mod entity;
pub mod error;
pub mod grain;
pub mod model;
pub mod operation;
pub mod options;
pub mod provider;
pub mod query;
pub mod storage;
pub mod value;

pub mod prelude {
    //! The prelude module for the `granary_core` crate.
    pub use super::context::{
        ConcurrencyViolation, ContextError, ContextFactory, EntityContext, Entry, EntryState,
    };
    pub use super::convention::{ConventionOptions, EntityConvention, GrainStorageConvention};
    pub use super::entity::{Entity, EntityType, PropertyDescriptor, PropertyValues};
    pub use super::error::{ConfigurationError, GrainStorageError};
    pub use super::grain::{Grain, GrainKey, GrainKeyShape, GrainReference, GrainState, StateSlot};
    pub use super::model::Model;
    pub use super::operation::OperationContext;
    pub use super::options::{GrainStorageOptions, SaveEntryConfigurator, StateBridge};
    pub use super::provider::{EntityGrainStorage, GrainStorageBuilder};
    pub use super::query::{Predicate, Query};
    pub use super::storage::GrainStorage;
    pub use super::value::{PropertyValue, Value, ValueKind};
}
