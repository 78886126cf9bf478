use crate::sql::{self, Statement};
use async_trait::async_trait;
use granary_core::context::{
    ConcurrencyViolation, ContextError, ContextFactory, EntityContext, Entry, EntryState,
};
use granary_core::entity::{Entity, EntityType, PropertyValues};
use granary_core::model::Model;
use granary_core::query::Query;
use granary_core::value::{Value, ValueKind};
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row};
use std::sync::Arc;

/// Opens [`PgContext`]s, one pooled connection each.
#[derive(Clone, Debug)]
pub struct PgContextFactory {
    pool: PgPool,
    model: Arc<Model>,
}

impl PgContextFactory {
    /// Creates a factory over `pool` for the entities of `model`.
    pub fn new(pool: PgPool, model: Model) -> Self {
        log::debug!("Creating a new PgContextFactory for context \"{}\"", model.name());
        Self {
            pool,
            model: Arc::new(model),
        }
    }

    /// The connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the table of `E` if it does not exist.
    pub async fn initialize<E: Entity>(&self) -> Result<(), ContextError> {
        let (entity_type, table) = entity_type_of::<E>(&self.model)?;
        let ddl = sql::create_table(&table, &entity_type);
        log::debug!("Initializing table \"{table}\": {ddl}");
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(database_error)?;
        Ok(())
    }
}

#[async_trait]
impl ContextFactory for PgContextFactory {
    type Context = PgContext;

    fn model(&self) -> &Model {
        &self.model
    }

    async fn open_scope(&self) -> Result<Self::Context, ContextError> {
        let connection = self.pool.acquire().await.map_err(database_error)?;
        Ok(PgContext {
            model: self.model.clone(),
            connection,
        })
    }
}

/// A unit of work holding one pooled connection until dropped.
///
/// Rows are never tracked; every query reads the database.
#[derive(Debug)]
pub struct PgContext {
    model: Arc<Model>,
    connection: PoolConnection<Postgres>,
}

impl PgContext {
    async fn execute(&mut self, statement: &Statement) -> Result<u64, sqlx::Error> {
        log::debug!("Executing {}", statement.sql());
        let result = statement.query().execute(&mut *self.connection).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_rows<E: Entity>(
        &mut self,
        entity_type: &EntityType<E>,
        statement: &Statement,
    ) -> Result<Vec<E>, ContextError> {
        log::debug!("Fetching {}", statement.sql());
        let rows = statement
            .query()
            .fetch_all(&mut *self.connection)
            .await
            .map_err(database_error)?;
        rows.iter().map(|row| decode(entity_type, row)).collect()
    }

    /// The violation explaining why a conditional statement matched no row.
    async fn violation<E: Entity>(
        &mut self,
        entity_type: &EntityType<E>,
        table: &str,
        entity: &E,
    ) -> Result<Option<ConcurrencyViolation>, ContextError> {
        let statement = sql::select_by_key(table, entity_type, entity);
        let current = self.fetch_rows(entity_type, &statement).await?.pop();
        Ok(current.map(|current| {
            ConcurrencyViolation::changed_row(entity_type.name(), entity_type.values_of(&current))
        }))
    }
}

#[async_trait]
impl EntityContext for PgContext {
    fn model(&self) -> &Model {
        &self.model
    }

    async fn fetch<E: Entity>(&mut self, query: &Query<E>) -> Result<Vec<E>, ContextError> {
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
        let (entity_type, table) = entity_type_of::<E>(&self.model)?;
        let statement = sql::select(&table, &entity_type, query.predicate())?;
        self.fetch_rows(&entity_type, &statement).await
    }

    async fn save_entry<E: Entity>(&mut self, entry: &mut Entry<E>) -> Result<u64, ContextError> {
        let state = entry.state();
        if matches!(state, EntryState::Detached | EntryState::Unchanged) {
            return Ok(0);
        }
        let (entity_type, table) = entity_type_of::<E>(&self.model)?;
        let supplied = entry.entity().clone();
        log::debug!(
            "Saving {state:?} row of \"{table}\" with key {:?}",
            entity_type.key_of(&supplied)
        );

        match state {
            EntryState::Added => {
                let stored = entity_type.with_generated_values(&supplied)?;
                let statement = sql::insert(&table, &entity_type, &stored);
                match self.execute(&statement).await {
                    Ok(_) => {}
                    Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                        return Err(ContextError::DuplicateKey { table });
                    }
                    Err(err) => return Err(database_error(err)),
                }
                entry.replace_entity(stored);
                entry.set_state(EntryState::Unchanged);
                Ok(1)
            }
            EntryState::Modified => {
                let updated = entity_type.with_generated_values(&supplied)?;
                let statement = sql::update(
                    &table,
                    &entity_type,
                    &supplied,
                    &updated,
                    entry.modified_properties(),
                )?;
                let mut stored = self.fetch_rows(&entity_type, &statement).await?;
                let Some(stored) = stored.pop() else {
                    let violation = self
                        .violation(&entity_type, &table, &supplied)
                        .await?
                        .unwrap_or_else(|| ConcurrencyViolation::missing_row(entity_type.name()));
                    return Err(violation.into());
                };
                entry.replace_entity(stored);
                entry.set_state(EntryState::Unchanged);
                Ok(1)
            }
            EntryState::Deleted => {
                let statement = sql::delete(&table, &entity_type, &supplied);
                let affected = self.execute(&statement).await.map_err(database_error)?;
                if affected == 0 {
                    // Deleting a row that is already gone is not a conflict.
                    if let Some(violation) = self.violation(&entity_type, &table, &supplied).await? {
                        return Err(violation.into());
                    }
                }
                entry.set_state(EntryState::Detached);
                Ok(affected)
            }
            EntryState::Detached | EntryState::Unchanged => Ok(0),
        }
    }
}

fn entity_type_of<E: Entity>(model: &Model) -> Result<(EntityType<E>, String), ContextError> {
    let entity_type = model
        .find_entity_type::<E>()
        .cloned()
        .ok_or(ContextError::UnknownEntityType(std::any::type_name::<E>()))?;
    let table = model
        .table_of::<E>()
        .unwrap_or(entity_type.name())
        .to_owned();
    Ok((entity_type, table))
}

fn database_error(err: sqlx::Error) -> ContextError {
    ContextError::Database(Box::new(err))
}

fn decode<E: Entity>(entity_type: &EntityType<E>, row: &PgRow) -> Result<E, ContextError> {
    let mut values = PropertyValues::new();
    for property in entity_type.properties() {
        let value = read_column(row, property.column, property.kind).map_err(database_error)?;
        values.insert(property.name, value);
    }
    Ok(E::materialize(values)?)
}

fn read_column(row: &PgRow, column: &str, kind: ValueKind) -> Result<Value, sqlx::Error> {
    let value = match kind {
        ValueKind::Bool => row.try_get::<Option<bool>, _>(column)?.map(Value::Bool),
        ValueKind::Int32 => row.try_get::<Option<i32>, _>(column)?.map(Value::Int32),
        ValueKind::Int64 => row.try_get::<Option<i64>, _>(column)?.map(Value::Int64),
        ValueKind::Guid => row.try_get::<Option<uuid::Uuid>, _>(column)?.map(Value::Guid),
        ValueKind::String => row.try_get::<Option<String>, _>(column)?.map(Value::String),
        ValueKind::Bytes => row.try_get::<Option<Vec<u8>>, _>(column)?.map(Value::Bytes),
        ValueKind::DateTime => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(column)?
            .map(Value::DateTime),
    };
    Ok(value.unwrap_or(Value::Null))
}
