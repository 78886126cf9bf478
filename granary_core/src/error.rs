//! Error types raised while configuring and using grain storage.

use crate::context::{ConcurrencyViolation, ContextError};
use crate::grain::GrainKeyShape;
use crate::value::ValueKind;

/// A grain storage could not be configured.
///
/// These errors are raised the first time a grain type is used, never on a hot path.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    /// The named property does not exist on the entity.
    #[error("property \"{property}\" not found on entity \"{entity}\"")]
    MissingProperty {
        /// The entity name.
        entity: &'static str,
        /// The property name.
        property: String,
    },
    /// The named property exists but has no public getter.
    #[error("property \"{property}\" of entity \"{entity}\" is not readable")]
    UnreadableProperty {
        /// The entity name.
        entity: &'static str,
        /// The property name.
        property: String,
    },
    /// A property was requested with a type that does not match its storage kind.
    #[error("property \"{property}\" of entity \"{entity}\" is {actual}, not {expected}")]
    PropertyTypeMismatch {
        /// The entity name.
        entity: &'static str,
        /// The property name.
        property: String,
        /// The requested kind.
        expected: ValueKind,
        /// The kind the property stores.
        actual: ValueKind,
    },
    /// The grain key does not match the type of the entity key property.
    #[error(
        "grain \"{grain_type}\" is keyed by {expected} but property \"{property}\" of entity \"{entity}\" is {actual}"
    )]
    KeyTypeMismatch {
        /// The grain type name.
        grain_type: String,
        /// The entity name.
        entity: &'static str,
        /// The key property name.
        property: String,
        /// The kind required by the grain key shape.
        expected: ValueKind,
        /// The kind the property stores.
        actual: ValueKind,
    },
    /// The context model has no entity set for the entity.
    #[error("context \"{context}\" has no entity set for \"{entity}\"")]
    MissingEntitySet {
        /// The context model name.
        context: String,
        /// The entity name.
        entity: &'static str,
    },
    /// The context model has several entity sets for the entity.
    #[error("context \"{context}\" has more than one entity set for \"{entity}\": {sets:?}")]
    AmbiguousEntitySet {
        /// The context model name.
        context: String,
        /// The entity name.
        entity: &'static str,
        /// The candidate set names.
        sets: Vec<String>,
    },
    /// The entity is not part of the context model.
    #[error("entity \"{entity}\" is not part of context \"{context}\"")]
    EntityNotInModel {
        /// The context model name.
        context: String,
        /// The entity name.
        entity: &'static str,
    },
    /// The entity has no key property.
    #[error("entity \"{entity}\" has no key property")]
    MissingKey {
        /// The entity name.
        entity: &'static str,
    },
    /// Etag support was requested but the entity has no concurrency token.
    #[error("entity \"{entity}\" has no concurrency token to use as etag")]
    NoConcurrencyToken {
        /// The entity name.
        entity: &'static str,
    },
    /// The etag property does not exist on the entity.
    #[error("etag property \"{property}\" not found on entity \"{entity}\"")]
    EtagPropertyNotFound {
        /// The entity name.
        entity: &'static str,
        /// The property name.
        property: String,
    },
    /// The etag property is not a concurrency token.
    #[error("etag property \"{property}\" of entity \"{entity}\" is not a concurrency token")]
    NotConcurrencyToken {
        /// The entity name.
        entity: &'static str,
        /// The property name.
        property: String,
    },
}

/// Errors returned by grain storage operations.
#[derive(Debug, thiserror::Error)]
pub enum GrainStorageError {
    /// The storage for the grain type could not be configured.
    #[error("grain storage configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    /// The row was changed or removed concurrently and etags are disabled.
    #[error("inconsistent state for grain \"{grain_type}\": {source}")]
    InconsistentState {
        /// The grain type name.
        grain_type: String,
        /// The engine conflict.
        #[source]
        source: ConcurrencyViolation,
    },
    /// The stored etag differs from the one held by the grain.
    #[error(
        "etag mismatch for grain \"{grain_type}\": stored {stored_etag:?}, supplied {supplied_etag:?}"
    )]
    EtagConflict {
        /// The grain type name.
        grain_type: String,
        /// The etag currently stored, `None` when the row no longer exists.
        stored_etag: Option<String>,
        /// The etag held by the grain when it wrote.
        supplied_etag: Option<String>,
        /// The engine conflict.
        #[source]
        source: ConcurrencyViolation,
    },
    /// No grain type with this name is registered.
    #[error("grain type \"{0}\" is not registered")]
    UnknownGrainType(String),
    /// The state slot holds a different type than the one registered for the grain.
    #[error("grain \"{grain_type}\" stores \"{expected}\" but the state slot holds \"{found}\"")]
    StateTypeMismatch {
        /// The grain type name.
        grain_type: String,
        /// The registered state type.
        expected: &'static str,
        /// The state type held by the slot.
        found: &'static str,
    },
    /// The grain reference carries a key of a different shape.
    #[error("grain \"{grain_type}\" is keyed by {expected:?} but the reference carries {found:?}")]
    KeyShapeMismatch {
        /// The grain type name.
        grain_type: String,
        /// The registered key shape.
        expected: GrainKeyShape,
        /// The shape of the reference key.
        found: GrainKeyShape,
    },
    /// The operation was cancelled before the engine completed.
    #[error("grain storage operation was cancelled")]
    Cancelled,
    /// Any other engine error.
    #[error("grain storage context error: {0}")]
    Context(#[from] ContextError),
}
