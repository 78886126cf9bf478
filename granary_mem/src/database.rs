use granary_core::context::ContextError;
use granary_core::entity::Entity;
use granary_core::value::Value;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// The rows of one table, ordered by primary key.
pub(crate) type Table<E> = BTreeMap<Vec<Value>, E>;

trait ErasedTable: Send + Sync {
    fn len(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<E: Entity> ErasedTable for Table<E> {
    fn len(&self) -> usize {
        BTreeMap::len(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Errors specific to the in-memory engine.
#[derive(Debug, thiserror::Error)]
pub enum InMemoryDatabaseError {
    /// Two entity types were mapped to the same table.
    #[error("table \"{table}\" already holds rows of another entity type than \"{entity}\"")]
    TableTypeMismatch {
        /// The table name.
        table: String,
        /// The entity that was requested.
        entity: &'static str,
    },
}

impl From<InMemoryDatabaseError> for ContextError {
    fn from(error: InMemoryDatabaseError) -> Self {
        ContextError::Database(Box::new(error))
    }
}

/// Tables shared by every context opened against the same database.
///
/// Cloning the database is cheap; clones share their rows.
#[derive(Clone, Default)]
pub struct InMemoryDatabase {
    tables: Arc<RwLock<HashMap<String, Box<dyn ErasedTable>>>>,
    latency: Option<Duration>,
}

impl InMemoryDatabase {
    /// Creates an empty database.
    pub fn new() -> Self {
        log::debug!("Creating a new InMemoryDatabase");
        Self::default()
    }

    /// Delays every engine call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// The number of rows stored in `table`.
    pub async fn len(&self, table: &str) -> usize {
        self.tables
            .read()
            .await
            .get(table)
            .map_or(0, |rows| rows.len())
    }

    /// Whether `table` holds no rows.
    pub async fn is_empty(&self, table: &str) -> bool {
        self.len(table).await == 0
    }

    /// The row of `table` with primary key `key`.
    pub async fn get<E: Entity>(&self, table: &str, key: &[Value]) -> Option<E> {
        self.tables
            .read()
            .await
            .get(table)
            .and_then(|rows| rows.as_any().downcast_ref::<Table<E>>())
            .and_then(|rows| rows.get(key).cloned())
    }

    pub(crate) async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Runs `f` over a snapshot of the rows of `table`.
    pub(crate) async fn read_table<E, T>(
        &self,
        table: &str,
        f: impl FnOnce(Option<&Table<E>>) -> Result<T, ContextError> + Send,
    ) -> Result<T, ContextError>
    where
        E: Entity,
    {
        let tables = self.tables.read().await;
        match tables.get(table) {
            None => f(None),
            Some(rows) => {
                let rows = rows.as_any().downcast_ref::<Table<E>>().ok_or_else(|| {
                    InMemoryDatabaseError::TableTypeMismatch {
                        table: table.to_owned(),
                        entity: std::any::type_name::<E>(),
                    }
                })?;
                f(Some(rows))
            }
        }
    }

    /// Runs `f` over the rows of `table` while holding the write lock, creating the table if
    /// needed. Checks and writes made inside `f` are atomic.
    pub(crate) async fn write_table<E, T>(
        &self,
        table: &str,
        f: impl FnOnce(&mut Table<E>) -> Result<T, ContextError> + Send,
    ) -> Result<T, ContextError>
    where
        E: Entity,
    {
        let mut tables = self.tables.write().await;
        let rows = tables
            .entry(table.to_owned())
            .or_insert_with(|| Box::new(Table::<E>::new()) as Box<dyn ErasedTable>);
        let rows = rows.as_any_mut().downcast_mut::<Table<E>>().ok_or_else(|| {
            InMemoryDatabaseError::TableTypeMismatch {
                table: table.to_owned(),
                entity: std::any::type_name::<E>(),
            }
        })?;
        f(rows)
    }
}

impl fmt::Debug for InMemoryDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryDatabase")
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}
