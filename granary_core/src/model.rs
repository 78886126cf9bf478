//! The model of a storage context: its entity sets and the metadata of the entities they hold.

use crate::entity::{Entity, EntityType, ValueGenerated};
use crate::error::ConfigurationError;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A named collection of entities exposed by a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySetDescriptor {
    name: String,
    entity_type_id: TypeId,
    entity_name: &'static str,
}

impl EntitySetDescriptor {
    /// The set name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The type id of the entity the set holds.
    pub fn entity_type_id(&self) -> TypeId {
        self.entity_type_id
    }

    /// The name of the entity the set holds.
    pub fn entity_name(&self) -> &'static str {
        self.entity_name
    }

    /// Returns `true` if the set holds entities of type `E`.
    pub fn holds<E: Entity>(&self) -> bool {
        self.entity_type_id == TypeId::of::<E>()
    }
}

/// The model of a context.
#[derive(Clone)]
pub struct Model {
    name: String,
    sets: Vec<EntitySetDescriptor>,
    entity_types: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    tables: HashMap<TypeId, String>,
}

impl Model {
    /// Starts building a model for the context named `name`.
    pub fn builder(name: impl Into<String>) -> ModelBuilder {
        ModelBuilder {
            name: name.into(),
            sets: Vec::new(),
            entity_types: HashMap::new(),
            errors: Vec::new(),
        }
    }

    /// The context name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All entity sets, in registration order.
    pub fn entity_sets(&self) -> &[EntitySetDescriptor] {
        &self.sets
    }

    /// Finds an entity set by name.
    pub fn entity_set(&self, name: &str) -> Option<&EntitySetDescriptor> {
        self.sets.iter().find(|s| s.name == name)
    }

    /// The entity sets holding entities of type `E`.
    pub fn sets_of<E: Entity>(&self) -> impl Iterator<Item = &EntitySetDescriptor> {
        self.sets.iter().filter(|s| s.holds::<E>())
    }

    /// The metadata of `E` as refined by this model.
    pub fn find_entity_type<E: Entity>(&self) -> Option<&EntityType<E>> {
        self.entity_types
            .get(&TypeId::of::<E>())
            .and_then(|t| t.downcast_ref::<EntityType<E>>())
    }

    /// The table `E` is stored in.
    pub fn table_of<E: Entity>(&self) -> Option<&str> {
        self.tables.get(&TypeId::of::<E>()).map(String::as_str)
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("sets", &self.sets)
            .field("tables", &self.tables)
            .finish()
    }
}

struct PendingEntity {
    entity_type: Box<dyn Any + Send + Sync>,
    finish: fn(
        &mut (dyn Any + Send + Sync + 'static),
        Option<&str>,
    ) -> Result<String, ConfigurationError>,
}

/// Builds a [`Model`].
pub struct ModelBuilder {
    name: String,
    sets: Vec<EntitySetDescriptor>,
    entity_types: HashMap<TypeId, PendingEntity>,
    errors: Vec<ConfigurationError>,
}

impl ModelBuilder {
    /// Adds an entity set named `name` holding entities of type `E`.
    pub fn entity_set<E: Entity>(mut self, name: impl Into<String>) -> Self {
        let entity_name = self
            .pending::<E>()
            .entity_type
            .downcast_ref::<EntityType<E>>()
            .map_or(std::any::type_name::<E>(), |t| t.name());
        self.sets.push(EntitySetDescriptor {
            name: name.into(),
            entity_type_id: TypeId::of::<E>(),
            entity_name,
        });
        self
    }

    /// Refines the metadata of `E`.
    pub fn entity<E: Entity>(mut self, configure: impl FnOnce(&mut EntityTypeBuilder<E>)) -> Self {
        let pending = self.pending::<E>();
        if let Some(entity_type) = pending.entity_type.downcast_mut::<EntityType<E>>() {
            let mut builder = EntityTypeBuilder {
                entity_type,
                errors: Vec::new(),
            };
            configure(&mut builder);
            let errors = builder.errors;
            self.errors.extend(errors);
        }
        self
    }

    fn pending<E: Entity>(&mut self) -> &mut PendingEntity {
        self.entity_types
            .entry(TypeId::of::<E>())
            .or_insert_with(|| PendingEntity {
                entity_type: Box::new(E::entity_type()),
                finish: finish_entity::<E>,
            })
    }

    /// Validates the model.
    ///
    /// Every entity needs a key: either declared, or a property named `id` which then becomes
    /// the key. An entity without an explicit table is stored in the table named after its first
    /// entity set.
    pub fn build(self) -> Result<Model, ConfigurationError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }
        let mut entity_types = HashMap::new();
        let mut tables = HashMap::new();
        for (type_id, mut pending) in self.entity_types {
            let first_set = self
                .sets
                .iter()
                .find(|s| s.entity_type_id == type_id)
                .map(|s| s.name.as_str());
            let table = (pending.finish)(pending.entity_type.as_mut(), first_set)?;
            tables.insert(type_id, table);
            entity_types.insert(type_id, Arc::from(pending.entity_type));
        }
        Ok(Model {
            name: self.name,
            sets: self.sets,
            entity_types,
            tables,
        })
    }
}

fn finish_entity<E: Entity>(
    entity_type: &mut (dyn Any + Send + Sync + 'static),
    first_set: Option<&str>,
) -> Result<String, ConfigurationError> {
    let Some(entity_type) = entity_type.downcast_mut::<EntityType<E>>() else {
        return Err(ConfigurationError::MissingKey {
            entity: std::any::type_name::<E>(),
        });
    };
    if entity_type.key_properties().next().is_none() {
        let id = entity_type
            .properties_mut()
            .iter_mut()
            .find(|p| p.name == "id")
            .ok_or(ConfigurationError::MissingKey {
                entity: std::any::type_name::<E>(),
            })?;
        id.key = true;
    }
    let table = match (entity_type.table(), first_set) {
        (Some(table), _) => table.to_owned(),
        (None, Some(set)) => set.to_owned(),
        (None, None) => entity_type.name().rsplit("::").next().unwrap_or_default().to_owned(),
    };
    entity_type.set_table(table.clone());
    Ok(table)
}

/// Refines the metadata of a single entity inside a [`ModelBuilder`].
pub struct EntityTypeBuilder<'a, E> {
    entity_type: &'a mut EntityType<E>,
    errors: Vec<ConfigurationError>,
}

impl<E> EntityTypeBuilder<'_, E> {
    /// Replaces the primary key with the named properties.
    pub fn has_key(&mut self, properties: &[&str]) -> &mut Self {
        let name = self.entity_type.name();
        for property in properties {
            if self.entity_type.find_property(property).is_none() {
                self.errors.push(ConfigurationError::MissingProperty {
                    entity: name,
                    property: (*property).to_owned(),
                });
            }
        }
        for p in self.entity_type.properties_mut() {
            p.key = properties.contains(&p.name);
        }
        self
    }

    /// Marks the named property as a concurrency token.
    pub fn concurrency_token(&mut self, property: &str) -> &mut Self {
        self.update(property, |p| p.concurrency_token = true)
    }

    /// Marks the named property as a store generated row version.
    pub fn row_version(&mut self, property: &str) -> &mut Self {
        self.update(property, |p| {
            p.concurrency_token = true;
            p.generated = ValueGenerated::OnAddOrUpdate;
        })
    }

    /// Stores the entity in `table`.
    pub fn to_table(&mut self, table: &str) -> &mut Self {
        self.entity_type.set_table(table.to_owned());
        self
    }

    fn update(
        &mut self,
        property: &str,
        apply: impl FnOnce(&mut crate::entity::PropertyDescriptor<E>),
    ) -> &mut Self {
        let name = self.entity_type.name();
        match self
            .entity_type
            .properties_mut()
            .iter_mut()
            .find(|p| p.name == property)
        {
            Some(p) => apply(p),
            None => self.errors.push(ConfigurationError::MissingProperty {
                entity: name,
                property: property.to_owned(),
            }),
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{PropertyDescriptor, PropertyValues};
    use crate::value::{PropertyValue, Value, ValueError, ValueKind};

    #[derive(Clone)]
    struct Note {
        id: i64,
        version: i64,
    }

    impl Entity for Note {
        fn entity_type() -> EntityType<Self> {
            EntityType::new(
                "tests::Note",
                vec![
                    PropertyDescriptor::new("id", ValueKind::Int64, |n: &Note| n.id.into()),
                    PropertyDescriptor::new("version", ValueKind::Int64, |n: &Note| {
                        n.version.into()
                    }),
                ],
            )
        }

        fn materialize(mut values: PropertyValues) -> Result<Self, ValueError> {
            Ok(Note {
                id: i64::from_value(values.take("id"))?,
                version: i64::from_value(values.take("version"))?,
            })
        }
    }

    #[test]
    fn id_becomes_key_and_first_set_names_table() {
        let model = Model::builder("NotesContext")
            .entity_set::<Note>("notes")
            .entity_set::<Note>("archived_notes")
            .build()
            .unwrap();
        let note = model.find_entity_type::<Note>().unwrap();
        assert_eq!(
            note.key_properties().map(|p| p.name).collect::<Vec<_>>(),
            ["id"]
        );
        assert_eq!(model.table_of::<Note>(), Some("notes"));
        assert_eq!(model.sets_of::<Note>().count(), 2);
    }

    #[test]
    fn entity_overrides_are_applied() {
        let model = Model::builder("NotesContext")
            .entity_set::<Note>("notes")
            .entity::<Note>(|e| {
                e.row_version("version").to_table("note_rows");
            })
            .build()
            .unwrap();
        let note = model.find_entity_type::<Note>().unwrap();
        let version = note.find_property("version").unwrap();
        assert!(version.concurrency_token);
        assert_eq!(version.generated, ValueGenerated::OnAddOrUpdate);
        assert_eq!(model.table_of::<Note>(), Some("note_rows"));

        let refreshed = note.with_generated_values(&Note { id: 1, version: 4 }).unwrap();
        assert_eq!(refreshed.version, 5);
        assert_eq!(Value::Int64(refreshed.id), Value::Int64(1));
    }

    #[test]
    fn unknown_override_property_fails_build() {
        let err = Model::builder("NotesContext")
            .entity_set::<Note>("notes")
            .entity::<Note>(|e| {
                e.concurrency_token("etag");
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingProperty { .. }));
    }
}
