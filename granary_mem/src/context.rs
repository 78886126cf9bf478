use crate::database::InMemoryDatabase;
use async_trait::async_trait;
use granary_core::context::{
    ConcurrencyViolation, ContextError, ContextFactory, EntityContext, Entry, EntryState,
};
use granary_core::entity::{Entity, EntityType};
use granary_core::model::Model;
use granary_core::query::Query;
use granary_core::value::Value;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// Opens [`InMemoryContext`]s over a shared [`InMemoryDatabase`].
#[derive(Clone, Debug)]
pub struct InMemoryContextFactory {
    model: Arc<Model>,
    database: InMemoryDatabase,
}

impl InMemoryContextFactory {
    /// A factory over a fresh database.
    pub fn new(model: Model) -> Self {
        Self::with_database(model, InMemoryDatabase::new())
    }

    /// A factory over an existing database.
    pub fn with_database(model: Model, database: InMemoryDatabase) -> Self {
        Self {
            model: Arc::new(model),
            database,
        }
    }

    /// The database backing every context of this factory.
    pub fn database(&self) -> &InMemoryDatabase {
        &self.database
    }
}

#[async_trait]
impl ContextFactory for InMemoryContextFactory {
    type Context = InMemoryContext;

    fn model(&self) -> &Model {
        &self.model
    }

    async fn open_scope(&self) -> Result<Self::Context, ContextError> {
        Ok(InMemoryContext {
            model: self.model.clone(),
            database: self.database.clone(),
            tracked: HashSet::new(),
        })
    }
}

/// A unit of work over an [`InMemoryDatabase`].
///
/// Rows returned by tracking queries are recorded in the context's identity map.
#[derive(Debug)]
pub struct InMemoryContext {
    model: Arc<Model>,
    database: InMemoryDatabase,
    tracked: HashSet<(String, Vec<Value>)>,
}

impl InMemoryContext {
    /// The number of rows this context tracks.
    pub fn tracked_entries(&self) -> usize {
        self.tracked.len()
    }

    fn entity_type<E: Entity>(&self) -> Result<(EntityType<E>, String), ContextError> {
        let entity_type = self
            .model
            .find_entity_type::<E>()
            .cloned()
            .ok_or(ContextError::UnknownEntityType(std::any::type_name::<E>()))?;
        let table = self
            .model
            .table_of::<E>()
            .unwrap_or(entity_type.name())
            .to_owned();
        Ok((entity_type, table))
    }
}

#[async_trait]
impl EntityContext for InMemoryContext {
    fn model(&self) -> &Model {
        &self.model
    }

    async fn fetch<E: Entity>(&mut self, query: &Query<E>) -> Result<Vec<E>, ContextError> {
        self.database.simulate_latency().await;
        let set = self
            .model
            .entity_set(query.entity_set())
            .ok_or_else(|| ContextError::UnknownEntitySet(query.entity_set().to_owned()))?;
        if !set.holds::<E>() {
            return Err(ContextError::EntitySetMismatch {
                entity_set: set.name().to_owned(),
                holds: set.entity_name(),
                requested: std::any::type_name::<E>(),
            });
        }
        let (entity_type, table) = self.entity_type::<E>()?;
        let predicate = query.predicate();
        let rows = self
            .database
            .read_table::<E, _>(&table, |rows| {
                let mut matched = Vec::new();
                for row in rows.into_iter().flat_map(|rows| rows.values()) {
                    if predicate.matches(&entity_type, row)? {
                        matched.push(row.clone());
                    }
                }
                Ok(matched)
            })
            .await?;
        if query.is_tracking() {
            for row in &rows {
                self.tracked
                    .insert((table.clone(), entity_type.key_of(row)));
            }
        }
        log::debug!(
            "Fetched {} rows of \"{}\" (tracking: {})",
            rows.len(),
            query.entity_set(),
            query.is_tracking()
        );
        Ok(rows)
    }

    async fn save_entry<E: Entity>(&mut self, entry: &mut Entry<E>) -> Result<u64, ContextError> {
        let state = entry.state();
        if matches!(state, EntryState::Detached | EntryState::Unchanged) {
            return Ok(0);
        }
        self.database.simulate_latency().await;
        let (entity_type, table) = self.entity_type::<E>()?;
        let key = entity_type.key_of(entry.entity());
        let supplied = entry.entity().clone();
        let modified = entry.modified_properties().cloned();
        log::debug!("Saving {state:?} row of \"{table}\" with key {key:?}");

        let (affected, stored) = match state {
            EntryState::Added => {
                let stored = entity_type.with_generated_values(&supplied)?;
                let row = stored.clone();
                let key = key.clone();
                let duplicate = table.clone();
                self.database
                    .write_table::<E, _>(&table, move |rows| {
                        if rows.contains_key(&key) {
                            return Err(ContextError::DuplicateKey { table: duplicate });
                        }
                        rows.insert(key, row);
                        Ok(())
                    })
                    .await?;
                (1, Some(stored))
            }
            EntryState::Modified => {
                let key = key.clone();
                let stored = self
                    .database
                    .write_table::<E, _>(&table, |rows| {
                        let current = rows
                            .get(&key)
                            .ok_or_else(|| ConcurrencyViolation::missing_row(entity_type.name()))?;
                        check_concurrency_tokens(&entity_type, current, &supplied)?;
                        let merged = merge(&entity_type, current, &supplied, modified.as_ref())?;
                        let updated = entity_type.with_generated_values(&merged)?;
                        rows.insert(key, updated.clone());
                        Ok(updated)
                    })
                    .await?;
                (1, Some(stored))
            }
            EntryState::Deleted => {
                let key = key.clone();
                let affected = self
                    .database
                    .write_table::<E, _>(&table, |rows| {
                        let Some(current) = rows.get(&key) else {
                            return Ok(0);
                        };
                        check_concurrency_tokens(&entity_type, current, &supplied)?;
                        rows.remove(&key);
                        Ok(1)
                    })
                    .await?;
                (affected, None)
            }
            EntryState::Detached | EntryState::Unchanged => (0, None),
        };

        match stored {
            Some(stored) => {
                entry.replace_entity(stored);
                entry.set_state(EntryState::Unchanged);
            }
            None => {
                self.tracked.remove(&(table, key));
                entry.set_state(EntryState::Detached);
            }
        }
        Ok(affected)
    }
}

fn check_concurrency_tokens<E>(
    entity_type: &EntityType<E>,
    current: &E,
    supplied: &E,
) -> Result<(), ConcurrencyViolation> {
    let changed = entity_type
        .concurrency_tokens()
        .any(|token| token.get(current) != token.get(supplied));
    if changed {
        return Err(ConcurrencyViolation::changed_row(
            entity_type.name(),
            entity_type.values_of(current),
        ));
    }
    Ok(())
}

/// The row to store: `supplied` as a whole, or only its `modified` properties over `current`.
fn merge<E: Entity>(
    entity_type: &EntityType<E>,
    current: &E,
    supplied: &E,
    modified: Option<&BTreeSet<String>>,
) -> Result<E, ContextError> {
    let Some(modified) = modified else {
        return Ok(supplied.clone());
    };
    let mut values = entity_type.values_of(current);
    for property in modified {
        let descriptor = entity_type.find_property(property).ok_or_else(|| {
            ContextError::UnknownProperty {
                entity: entity_type.name(),
                property: property.clone(),
            }
        })?;
        values.insert(property.as_str(), descriptor.get(supplied));
    }
    Ok(E::materialize(values)?)
}
