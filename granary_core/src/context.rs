//! The unit of work boundary between grain storage and a persistence engine.

use crate::entity::{Entity, PropertyValues};
use crate::model::Model;
use crate::query::Query;
use crate::value::ValueError;
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Opens scoped contexts against a single persistence engine.
#[async_trait]
pub trait ContextFactory: Send + Sync + 'static {
    /// The context type produced by this factory.
    type Context: EntityContext;

    /// The model shared by all contexts of this factory.
    fn model(&self) -> &Model;

    /// Opens a new scope. Dropping the context releases it.
    async fn open_scope(&self) -> Result<Self::Context, ContextError>;
}

/// A scoped unit of work.
#[async_trait]
pub trait EntityContext: Send + 'static {
    /// The model of this context.
    fn model(&self) -> &Model;

    /// Runs a query and returns every matching row.
    async fn fetch<E: Entity>(&mut self, query: &Query<E>) -> Result<Vec<E>, ContextError>;

    /// Runs a query expected to match at most one row.
    async fn fetch_single<E: Entity>(
        &mut self,
        query: &Query<E>,
    ) -> Result<Option<E>, ContextError> {
        let mut rows = self.fetch(query).await?;
        match rows.len() {
            0 | 1 => Ok(rows.pop()),
            count => Err(ContextError::MoreThanOneRow {
                entity_set: query.entity_set().to_owned(),
                count,
            }),
        }
    }

    /// Persists an entry according to its state and returns the number of affected rows.
    ///
    /// On success the entry holds the entity as stored (including generated values) and is
    /// `Unchanged`, or `Detached` after a deletion.
    async fn save_entry<E: Entity>(&mut self, entry: &mut Entry<E>) -> Result<u64, ContextError>;
}

/// The persistence state of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryState {
    /// Not tracked; saving does nothing.
    #[default]
    Detached,
    /// Tracked without changes; saving does nothing.
    Unchanged,
    /// Inserted on save.
    Added,
    /// Updated on save.
    Modified,
    /// Deleted on save.
    Deleted,
}

/// An entity together with the state that decides how it is saved.
#[derive(Debug, Clone)]
pub struct Entry<E> {
    entity: E,
    state: EntryState,
    modified: BTreeSet<String>,
}

impl<E> Entry<E> {
    /// A detached entry for `entity`.
    pub fn new(entity: E) -> Self {
        Self {
            entity,
            state: EntryState::Detached,
            modified: BTreeSet::new(),
        }
    }

    /// The entity.
    pub fn entity(&self) -> &E {
        &self.entity
    }

    /// Mutable access to the entity.
    pub fn entity_mut(&mut self) -> &mut E {
        &mut self.entity
    }

    /// Consumes the entry, returning the entity.
    pub fn into_entity(self) -> E {
        self.entity
    }

    /// Replaces the entity, keeping the state.
    pub fn replace_entity(&mut self, entity: E) {
        self.entity = entity;
    }

    /// The current state.
    pub fn state(&self) -> EntryState {
        self.state
    }

    /// Sets the state. Marking the entry `Modified` this way updates every property.
    pub fn set_state(&mut self, state: EntryState) {
        self.state = state;
        self.modified.clear();
    }

    /// Marks a single property as modified. A detached or unchanged entry becomes `Modified`
    /// and only the marked properties are written.
    pub fn mark_modified(&mut self, property: &str) {
        if matches!(self.state, EntryState::Detached | EntryState::Unchanged) {
            self.state = EntryState::Modified;
        }
        self.modified.insert(property.to_owned());
    }

    /// The properties to write on update, `None` meaning all of them.
    pub fn modified_properties(&self) -> Option<&BTreeSet<String>> {
        if self.modified.is_empty() {
            None
        } else {
            Some(&self.modified)
        }
    }
}

/// An optimistic concurrency check failed while saving.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ConcurrencyViolation {
    /// The entity name.
    pub entity: &'static str,
    /// A description of the conflict.
    pub message: String,
    /// The values currently stored, `None` if the row no longer exists.
    pub database_values: Option<PropertyValues>,
}

impl ConcurrencyViolation {
    /// A conflict against a row that no longer exists.
    pub fn missing_row(entity: &'static str) -> Self {
        Self {
            entity,
            message: format!(
                "expected to affect 1 row of \"{entity}\" but affected 0; the row was modified or deleted"
            ),
            database_values: None,
        }
    }

    /// A conflict against a row whose concurrency tokens changed.
    pub fn changed_row(entity: &'static str, database_values: PropertyValues) -> Self {
        Self {
            entity,
            message: format!("the \"{entity}\" row was modified since it was loaded"),
            database_values: Some(database_values),
        }
    }
}

/// Errors returned by a persistence engine.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// An optimistic concurrency check failed.
    #[error(transparent)]
    Concurrency(#[from] ConcurrencyViolation),
    /// The query names an entity set the model does not have.
    #[error("entity set \"{0}\" is not part of the model")]
    UnknownEntitySet(String),
    /// The entity set holds a different entity type than requested.
    #[error("entity set \"{entity_set}\" holds \"{holds}\", not \"{requested}\"")]
    EntitySetMismatch {
        /// The entity set name.
        entity_set: String,
        /// The entity held by the set.
        holds: &'static str,
        /// The entity requested by the caller.
        requested: &'static str,
    },
    /// The entity type is not part of the model.
    #[error("entity \"{0}\" is not part of the model")]
    UnknownEntityType(&'static str),
    /// A query references a property the entity does not have.
    #[error("property \"{property}\" not found on entity \"{entity}\"")]
    UnknownProperty {
        /// The entity name.
        entity: &'static str,
        /// The property name.
        property: String,
    },
    /// An insert collided with an existing row.
    #[error("a row with the same key already exists in \"{table}\"")]
    DuplicateKey {
        /// The table name.
        table: String,
    },
    /// A single row was expected but several matched.
    #[error("{count} rows of \"{entity_set}\" matched where at most one was expected")]
    MoreThanOneRow {
        /// The entity set name.
        entity_set: String,
        /// The number of matching rows.
        count: usize,
    },
    /// Row values could not be converted.
    #[error(transparent)]
    Value(#[from] ValueError),
    /// Any other database failure.
    #[error("database error: {0}")]
    Database(#[source] Box<dyn std::error::Error + Send + Sync>),
}
