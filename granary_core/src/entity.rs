//! Entity metadata.
//!
//! An [`Entity`] describes its persisted properties through an [`EntityType`]. The metadata is usually
//! generated with `#[derive(Entity)]`, and can be refined per model (keys, concurrency tokens, table
//! names) through [`crate::model::EntityTypeBuilder`].

use crate::value::{Value, ValueError, ValueKind};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// A row that can be stored through a grain storage context.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Returns the metadata of this entity.
    fn entity_type() -> EntityType<Self>;

    /// Rebuilds an entity from its property values. Properties absent from `values` are treated as
    /// null.
    fn materialize(values: PropertyValues) -> Result<Self, ValueError>;
}

/// When the store generates a value for a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueGenerated {
    /// The value always comes from the entity.
    #[default]
    Never,
    /// The store assigns a fresh value on every insert and update (a row version).
    OnAddOrUpdate,
}

/// Describes a single persisted property of `E`.
pub struct PropertyDescriptor<E> {
    /// The property name.
    pub name: &'static str,
    /// The column the property is stored in.
    pub column: &'static str,
    /// The storage kind.
    pub kind: ValueKind,
    /// Whether the property admits null.
    pub nullable: bool,
    /// Whether the property exposes a public getter.
    pub readable: bool,
    /// Whether the property is part of the primary key.
    pub key: bool,
    /// Whether the property participates in optimistic concurrency checks.
    pub concurrency_token: bool,
    /// Store-side generation of the value.
    pub generated: ValueGenerated,
    /// Reads the property from an entity.
    pub getter: fn(&E) -> Value,
}

impl<E> PropertyDescriptor<E> {
    /// Creates a readable, non nullable property stored in a column of the same name.
    pub fn new(name: &'static str, kind: ValueKind, getter: fn(&E) -> Value) -> Self {
        Self {
            name,
            column: name,
            kind,
            nullable: false,
            readable: true,
            key: false,
            concurrency_token: false,
            generated: ValueGenerated::Never,
            getter,
        }
    }

    /// Stores the property in `column`.
    pub fn column(mut self, column: &'static str) -> Self {
        self.column = column;
        self
    }

    /// Sets whether the property admits null.
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Marks the property as part of the primary key.
    pub fn key(mut self) -> Self {
        self.key = true;
        self
    }

    /// Marks the property as a concurrency token.
    pub fn concurrency_token(mut self) -> Self {
        self.concurrency_token = true;
        self
    }

    /// Marks the property as a store generated row version.
    pub fn row_version(mut self) -> Self {
        self.concurrency_token = true;
        self.generated = ValueGenerated::OnAddOrUpdate;
        self
    }

    /// Hides the getter from convention based configuration.
    pub fn unreadable(mut self) -> Self {
        self.readable = false;
        self
    }

    /// Reads the property value from `entity`.
    pub fn get(&self, entity: &E) -> Value {
        (self.getter)(entity)
    }
}

impl<E> Clone for PropertyDescriptor<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for PropertyDescriptor<E> {}

impl<E> fmt::Debug for PropertyDescriptor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDescriptor")
            .field("name", &self.name)
            .field("column", &self.column)
            .field("kind", &self.kind)
            .field("nullable", &self.nullable)
            .field("readable", &self.readable)
            .field("key", &self.key)
            .field("concurrency_token", &self.concurrency_token)
            .field("generated", &self.generated)
            .finish()
    }
}

/// The metadata of an entity: its name, table, and properties.
pub struct EntityType<E> {
    name: &'static str,
    table: Option<String>,
    properties: Vec<PropertyDescriptor<E>>,
}

impl<E> EntityType<E> {
    /// Creates the metadata for an entity named `name`.
    pub fn new(name: &'static str, properties: Vec<PropertyDescriptor<E>>) -> Self {
        Self {
            name,
            table: None,
            properties,
        }
    }

    /// Stores the entity in `table` instead of the table of its entity set.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// The entity name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The explicit table name, if any.
    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub(crate) fn set_table(&mut self, table: String) {
        self.table = Some(table);
    }

    /// All properties, in declaration order.
    pub fn properties(&self) -> &[PropertyDescriptor<E>] {
        &self.properties
    }

    pub(crate) fn properties_mut(&mut self) -> &mut [PropertyDescriptor<E>] {
        &mut self.properties
    }

    /// Finds a property by name.
    pub fn find_property(&self, name: &str) -> Option<&PropertyDescriptor<E>> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// The primary key properties.
    pub fn key_properties(&self) -> impl Iterator<Item = &PropertyDescriptor<E>> {
        self.properties.iter().filter(|p| p.key)
    }

    /// The concurrency token properties.
    pub fn concurrency_tokens(&self) -> impl Iterator<Item = &PropertyDescriptor<E>> {
        self.properties.iter().filter(|p| p.concurrency_token)
    }

    /// The primary key of `entity`, in key property order.
    pub fn key_of(&self, entity: &E) -> Vec<Value> {
        self.key_properties().map(|p| p.get(entity)).collect()
    }

    /// All property values of `entity`.
    pub fn values_of(&self, entity: &E) -> PropertyValues {
        self.properties
            .iter()
            .map(|p| (p.name.to_owned(), p.get(entity)))
            .collect()
    }
}

impl<E: Entity> EntityType<E> {
    /// Returns `entity` with fresh values for all store generated properties.
    pub fn with_generated_values(&self, entity: &E) -> Result<E, ValueError> {
        let generated: Vec<_> = self
            .properties
            .iter()
            .filter(|p| p.generated == ValueGenerated::OnAddOrUpdate)
            .collect();
        if generated.is_empty() {
            return Ok(entity.clone());
        }
        let mut values = self.values_of(entity);
        for property in generated {
            let current = property.get(entity);
            values.insert(property.name, next_generated_value(property.kind, &current));
        }
        E::materialize(values)
    }
}

impl<E> Clone for EntityType<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            table: self.table.clone(),
            properties: self.properties.clone(),
        }
    }
}

impl<E> fmt::Debug for EntityType<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityType")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("properties", &self.properties)
            .finish()
    }
}

/// Property values keyed by property name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyValues(BTreeMap<String, Value>);

impl PropertyValues {
    /// Creates an empty set of values.
    pub fn new() -> Self {
        Self::default()
    }

    /// The value of `property`, if present.
    pub fn get(&self, property: &str) -> Option<&Value> {
        self.0.get(property)
    }

    /// Sets the value of `property`.
    pub fn insert(&mut self, property: impl Into<String>, value: Value) {
        self.0.insert(property.into(), value);
    }

    /// Removes and returns the value of `property`, or null when absent.
    pub fn take(&mut self, property: &str) -> Value {
        self.0.remove(property).unwrap_or(Value::Null)
    }

    /// Iterates over the values in property name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The number of values.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no values.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Value)> for PropertyValues {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Produces the next store generated value for a property of `kind` currently holding `current`.
pub fn next_generated_value(kind: ValueKind, current: &Value) -> Value {
    match kind {
        ValueKind::Bytes => Value::Bytes(Uuid::new_v4().as_bytes()[..8].to_vec()),
        ValueKind::Int64 => match current {
            Value::Int64(v) => Value::Int64(v.wrapping_add(1)),
            _ => Value::Int64(1),
        },
        ValueKind::Int32 => match current {
            Value::Int32(v) => Value::Int32(v.wrapping_add(1)),
            _ => Value::Int32(1),
        },
        ValueKind::Guid => Value::Guid(Uuid::new_v4()),
        ValueKind::String => Value::String(Uuid::new_v4().simple().to_string()),
        ValueKind::DateTime => Value::DateTime(chrono::Utc::now()),
        ValueKind::Bool => match current {
            Value::Bool(v) => Value::Bool(!v),
            _ => Value::Bool(true),
        },
    }
}
