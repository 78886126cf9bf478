//! Convention based derivation of the functions grain storage needs for an entity.
//!
//! [`GrainStorageConvention`] is the shared default. A context and entity pair can override the
//! default query and the lookup predicate with an [`EntityConvention`] registered in a
//! [`ConventionRegistry`].

use crate::accessor::{PropertyGetter, PropertyHandle, make_getter, resolve_property};
use crate::context::EntityContext;
use crate::entity::{Entity, EntityType};
use crate::error::{ConfigurationError, GrainStorageError};
use crate::grain::{GrainKeyShape, GrainReference};
use crate::model::Model;
use crate::query::{CompiledQuery, Predicate, Query, RowAccessor};
use crate::value::{Value, ValueKind};
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Builds the lookup predicate for a grain.
pub type PredicateBuilder =
    Arc<dyn Fn(&GrainReference) -> Result<Predicate, GrainStorageError> + Send + Sync>;

/// Decides whether an entity is already stored.
pub type IsPersistedFn<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Property names used when a grain type does not name its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConventionOptions {
    /// The key property. Default: `id`.
    pub default_key_property: String,
    /// The extension key property of compound keyed grains. Default: `key_ext`.
    pub default_key_ext_property: String,
    /// The property whose non default value means the entity is stored. Default: `id`.
    pub default_persistence_check_property: String,
}

impl Default for ConventionOptions {
    fn default() -> Self {
        Self {
            default_key_property: "id".to_owned(),
            default_key_ext_property: "key_ext".to_owned(),
            default_persistence_check_property: "id".to_owned(),
        }
    }
}

/// Converts an etag value to its string form: byte arrays become upper case hex, other values
/// use their natural representation, null has no etag.
pub fn convert_etag_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bytes(bytes) => Some(hex::encode_upper(bytes)),
        other => Some(other.to_string()),
    }
}

/// Reads the etag of an entity from its concurrency token.
pub struct EtagAccessor<E> {
    getter: PropertyGetter<E>,
    kind: ValueKind,
}

impl<E> EtagAccessor<E> {
    /// The concurrency token property.
    pub fn property_name(&self) -> &'static str {
        self.getter.name()
    }

    /// The kind of the concurrency token.
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// The etag of `entity`.
    pub fn etag_of(&self, entity: &E) -> Option<String> {
        convert_etag_to_string(&self.getter.get(entity))
    }
}

impl<E> Clone for EtagAccessor<E> {
    fn clone(&self) -> Self {
        Self {
            getter: self.getter,
            kind: self.kind,
        }
    }
}

impl<E> fmt::Debug for EtagAccessor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EtagAccessor")
            .field("property", &self.getter.name())
            .field("kind", &self.kind)
            .finish()
    }
}

/// The key properties resolved for a grain type.
pub struct KeyProperties<E> {
    /// The primary key property.
    pub key: PropertyHandle<E>,
    /// The extension key property, for compound shapes.
    pub key_ext: Option<PropertyHandle<E>>,
}

impl<E> KeyProperties<E> {
    /// The property names in the order of [`GrainReference::key_values`].
    pub fn names(&self) -> Vec<&'static str> {
        std::iter::once(self.key.name())
            .chain(self.key_ext.as_ref().map(|k| k.name()))
            .collect()
    }
}

impl<E> Clone for KeyProperties<E> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            key_ext: self.key_ext.clone(),
        }
    }
}

/// Overrides the default convention for one context and entity pair.
pub trait EntityConvention<C, E>: Send + Sync {
    /// The base query for the entity, or `None` for the default.
    fn create_default_query(&self) -> Option<RowAccessor<C, E>> {
        None
    }

    /// The lookup predicate builder for grains of `shape`, or `None` for the default.
    fn create_query_predicate(&self, shape: GrainKeyShape) -> Option<PredicateBuilder> {
        let _ = shape;
        None
    }
}

/// Per context and entity [`EntityConvention`] overrides.
#[derive(Default, Clone)]
pub struct ConventionRegistry {
    overrides: HashMap<(TypeId, TypeId), Arc<dyn Any + Send + Sync>>,
}

impl ConventionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the override for context `C` and entity `E`, replacing any previous one.
    pub fn register<C, E>(&mut self, convention: impl EntityConvention<C, E> + 'static)
    where
        C: 'static,
        E: 'static,
    {
        let convention: Arc<dyn EntityConvention<C, E>> = Arc::new(convention);
        self.overrides
            .insert((TypeId::of::<C>(), TypeId::of::<E>()), Arc::new(convention));
    }

    /// The override for context `C` and entity `E`.
    pub fn get<C, E>(&self) -> Option<Arc<dyn EntityConvention<C, E>>>
    where
        C: 'static,
        E: 'static,
    {
        self.overrides
            .get(&(TypeId::of::<C>(), TypeId::of::<E>()))
            .and_then(|c| c.downcast_ref::<Arc<dyn EntityConvention<C, E>>>())
            .cloned()
    }
}

impl fmt::Debug for ConventionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConventionRegistry")
            .field("overrides", &self.overrides.len())
            .finish()
    }
}

/// The default grain storage convention.
#[derive(Debug, Clone, Default)]
pub struct GrainStorageConvention {
    options: ConventionOptions,
}

impl GrainStorageConvention {
    /// A convention using `options` for default property names.
    pub fn new(options: ConventionOptions) -> Self {
        Self { options }
    }

    /// The convention options.
    pub fn options(&self) -> &ConventionOptions {
        &self.options
    }

    /// Builds a row accessor over the single entity set holding `E`.
    pub fn create_default_row_accessor<C, E>(
        &self,
        model: &Model,
    ) -> Result<RowAccessor<C, E>, ConfigurationError>
    where
        C: EntityContext,
        E: Entity,
    {
        let sets: Vec<_> = model.sets_of::<E>().collect();
        let set = match sets.as_slice() {
            [set] => set.name().to_owned(),
            [] => {
                return Err(ConfigurationError::MissingEntitySet {
                    context: model.name().to_owned(),
                    entity: entity_name::<E>(model),
                });
            }
            _ => {
                return Err(ConfigurationError::AmbiguousEntitySet {
                    context: model.name().to_owned(),
                    entity: entity_name::<E>(model),
                    sets: sets.iter().map(|s| s.name().to_owned()).collect(),
                });
            }
        };
        Ok(Arc::new(move |_: &C| {
            Query::from_set(set.clone()).as_no_tracking()
        }))
    }

    /// Resolves the key properties of `E` for grains of `shape`, checking their kinds.
    ///
    /// `key` and `key_ext` override the default property names.
    pub fn resolve_key_properties<E>(
        &self,
        grain_type: &str,
        shape: GrainKeyShape,
        entity_type: &EntityType<E>,
        key: Option<&str>,
        key_ext: Option<&str>,
    ) -> Result<KeyProperties<E>, ConfigurationError> {
        let key = resolve_property(
            entity_type,
            key.unwrap_or(self.options.default_key_property.as_str()),
        )?;
        check_kind(grain_type, &key, shape.primary_kind())?;
        let key_ext = if shape.is_compound() {
            let key_ext = resolve_property(
                entity_type,
                key_ext.unwrap_or(self.options.default_key_ext_property.as_str()),
            )?;
            check_kind(grain_type, &key_ext, ValueKind::String)?;
            Some(key_ext)
        } else {
            None
        };
        Ok(KeyProperties { key, key_ext })
    }

    /// Builds the default lookup predicate: equality on the key, and on the extension key for
    /// compound shapes.
    pub fn create_default_locator<E>(
        &self,
        shape: GrainKeyShape,
        keys: &KeyProperties<E>,
    ) -> PredicateBuilder {
        let names = keys.names();
        Arc::new(move |grain_ref: &GrainReference| {
            let values = grain_ref.key_values(shape)?;
            Ok(names
                .iter()
                .zip(values)
                .fold(Predicate::All, |predicate, (name, value)| {
                    predicate.and(Predicate::equals(*name, value))
                }))
        })
    }

    /// Builds the precompiled form of the default lookup.
    pub fn create_compiled_read<C, E>(
        &self,
        rows: RowAccessor<C, E>,
        entity_type: &EntityType<E>,
        keys: &KeyProperties<E>,
    ) -> Result<CompiledQuery<C, E>, ConfigurationError> {
        CompiledQuery::compile(rows, entity_type, &keys.names())
    }

    /// Builds the persistence check: an entity is stored when the named property (default
    /// [`ConventionOptions::default_persistence_check_property`]) holds a non default value.
    pub fn create_is_persisted<E: Entity>(
        &self,
        entity_type: &EntityType<E>,
        property: Option<&str>,
    ) -> Result<IsPersistedFn<E>, ConfigurationError> {
        let handle = resolve_property(
            entity_type,
            property.unwrap_or(self.options.default_persistence_check_property.as_str()),
        )?;
        let getter = make_getter(&handle);
        Ok(Arc::new(move |entity: &E| !getter.get(entity).is_default()))
    }

    /// Finds the first concurrency token of `E` and uses it as etag.
    ///
    /// Without a concurrency token this fails when `throw_if_not_found`, and otherwise returns
    /// `None`, leaving etags disabled.
    pub fn find_and_configure_etag<E: Entity>(
        &self,
        model: &Model,
        throw_if_not_found: bool,
    ) -> Result<Option<EtagAccessor<E>>, ConfigurationError> {
        let Some(entity_type) = model.find_entity_type::<E>() else {
            return if throw_if_not_found {
                Err(ConfigurationError::EntityNotInModel {
                    context: model.name().to_owned(),
                    entity: entity_name::<E>(model),
                })
            } else {
                Ok(None)
            };
        };
        match entity_type.concurrency_tokens().next() {
            Some(token) => self.configure_etag(model, token.name).map(Some),
            None if throw_if_not_found => Err(ConfigurationError::NoConcurrencyToken {
                entity: entity_type.name(),
            }),
            None => Ok(None),
        }
    }

    /// Uses the named concurrency token as etag.
    pub fn configure_etag<E: Entity>(
        &self,
        model: &Model,
        property: &str,
    ) -> Result<EtagAccessor<E>, ConfigurationError> {
        let entity_type =
            model
                .find_entity_type::<E>()
                .ok_or_else(|| ConfigurationError::EntityNotInModel {
                    context: model.name().to_owned(),
                    entity: entity_name::<E>(model),
                })?;
        let descriptor = entity_type.find_property(property).ok_or_else(|| {
            ConfigurationError::EtagPropertyNotFound {
                entity: entity_type.name(),
                property: property.to_owned(),
            }
        })?;
        if !descriptor.concurrency_token {
            return Err(ConfigurationError::NotConcurrencyToken {
                entity: entity_type.name(),
                property: property.to_owned(),
            });
        }
        let handle = resolve_property(entity_type, property)?;
        Ok(EtagAccessor {
            getter: make_getter(&handle),
            kind: handle.kind(),
        })
    }
}

fn check_kind<E>(
    grain_type: &str,
    property: &PropertyHandle<E>,
    expected: ValueKind,
) -> Result<(), ConfigurationError> {
    if property.kind() == expected {
        Ok(())
    } else {
        Err(ConfigurationError::KeyTypeMismatch {
            grain_type: grain_type.to_owned(),
            entity: property.entity(),
            property: property.name().to_owned(),
            expected,
            actual: property.kind(),
        })
    }
}

fn entity_name<E: Entity>(model: &Model) -> &'static str {
    model
        .find_entity_type::<E>()
        .map_or(std::any::type_name::<E>(), |t| t.name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{PropertyDescriptor, PropertyValues};
    use crate::grain::GrainKey;
    use crate::test_support::NullContext;
    use crate::value::{PropertyValue, ValueError};
    use uuid::Uuid;

    #[derive(Clone, Default)]
    struct Account {
        id: Uuid,
        key_ext: String,
        name: String,
        etag: Vec<u8>,
    }

    impl Entity for Account {
        fn entity_type() -> EntityType<Self> {
            EntityType::new(
                "tests::Account",
                vec![
                    PropertyDescriptor::new("id", ValueKind::Guid, |a: &Account| a.id.into()),
                    PropertyDescriptor::new("key_ext", ValueKind::String, |a: &Account| {
                        a.key_ext.clone().into()
                    }),
                    PropertyDescriptor::new("name", ValueKind::String, |a: &Account| {
                        a.name.clone().into()
                    }),
                    PropertyDescriptor::new("etag", ValueKind::Bytes, |a: &Account| {
                        a.etag.clone().into()
                    }),
                ],
            )
        }

        fn materialize(mut values: PropertyValues) -> Result<Self, ValueError> {
            Ok(Account {
                id: Uuid::from_value(values.take("id"))?,
                key_ext: String::from_value(values.take("key_ext"))?,
                name: String::from_value(values.take("name"))?,
                etag: Vec::from_value(values.take("etag"))?,
            })
        }
    }

    fn model(row_version: bool) -> Model {
        Model::builder("AccountsContext")
            .entity_set::<Account>("accounts")
            .entity::<Account>(|e| {
                if row_version {
                    e.row_version("etag");
                }
            })
            .build()
            .unwrap()
    }

    #[test]
    fn etag_bytes_are_upper_case_hex() {
        assert_eq!(
            convert_etag_to_string(&Value::Bytes(vec![0xA1, 0x0F])),
            Some("A10F".to_owned())
        );
        assert_eq!(convert_etag_to_string(&Value::Int64(42)), Some("42".to_owned()));
        assert_eq!(convert_etag_to_string(&Value::Null), None);
    }

    #[test]
    fn default_row_accessor_uses_the_single_set() {
        let convention = GrainStorageConvention::default();
        let rows = convention
            .create_default_row_accessor::<NullContext, Account>(&model(false))
            .unwrap();
        let query = rows(&NullContext::default());
        assert_eq!(query.entity_set(), "accounts");
        assert!(!query.is_tracking());
    }

    #[test]
    fn default_row_accessor_rejects_ambiguous_sets() {
        let model = Model::builder("AccountsContext")
            .entity_set::<Account>("accounts")
            .entity_set::<Account>("more_accounts")
            .build()
            .unwrap();
        let err = GrainStorageConvention::default()
            .create_default_row_accessor::<NullContext, Account>(&model)
            .err()
            .unwrap();
        assert!(matches!(err, ConfigurationError::AmbiguousEntitySet { .. }));
    }

    #[test]
    fn key_kind_mismatch_names_both_types() {
        let err = GrainStorageConvention::default()
            .resolve_key_properties(
                "tests::IntegerGrain",
                GrainKeyShape::Integer,
                &Account::entity_type(),
                None,
                None,
            )
            .err()
            .unwrap();
        assert_eq!(
            err,
            ConfigurationError::KeyTypeMismatch {
                grain_type: "tests::IntegerGrain".into(),
                entity: "tests::Account",
                property: "id".into(),
                expected: ValueKind::Int64,
                actual: ValueKind::Guid,
            }
        );
    }

    #[test]
    fn compound_locator_matches_key_and_extension() {
        let convention = GrainStorageConvention::default();
        let keys = convention
            .resolve_key_properties(
                "tests::Grain",
                GrainKeyShape::GuidCompound,
                &Account::entity_type(),
                None,
                None,
            )
            .unwrap_or_else(|e| panic!("{e}"));
        let locate = convention.create_default_locator(GrainKeyShape::GuidCompound, &keys);
        let id = Uuid::new_v4();
        let predicate = locate(&GrainReference::new(
            "tests::Grain",
            GrainKey::GuidCompound(id, "ext".into()),
        ))
        .unwrap();
        assert_eq!(
            predicate,
            Predicate::equals("id", id).and(Predicate::equals("key_ext", "ext"))
        );
    }

    #[test]
    fn is_persisted_checks_for_default_value() {
        let is_persisted = GrainStorageConvention::default()
            .create_is_persisted(&Account::entity_type(), None)
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(!is_persisted(&Account::default()));
        assert!(is_persisted(&Account {
            id: Uuid::new_v4(),
            ..Default::default()
        }));
    }

    #[test]
    fn etag_detection_follows_concurrency_tokens() {
        let convention = GrainStorageConvention::default();
        let etag = convention
            .find_and_configure_etag::<Account>(&model(true), true)
            .unwrap()
            .unwrap();
        assert_eq!(etag.property_name(), "etag");
        assert_eq!(
            etag.etag_of(&Account {
                etag: vec![0xA1, 0x0F],
                ..Default::default()
            }),
            Some("A10F".to_owned())
        );

        assert!(
            convention
                .find_and_configure_etag::<Account>(&model(false), false)
                .unwrap()
                .is_none()
        );
        assert!(matches!(
            convention.find_and_configure_etag::<Account>(&model(false), true),
            Err(ConfigurationError::NoConcurrencyToken { .. })
        ));
    }

    #[test]
    fn named_etag_must_be_a_concurrency_token() {
        let convention = GrainStorageConvention::default();
        assert!(matches!(
            convention.configure_etag::<Account>(&model(true), "name"),
            Err(ConfigurationError::NotConcurrencyToken { .. })
        ));
        assert!(matches!(
            convention.configure_etag::<Account>(&model(true), "version"),
            Err(ConfigurationError::EtagPropertyNotFound { .. })
        ));
    }

    #[test]
    fn registry_returns_overrides_by_context_and_entity() {
        struct CustomQuery;
        impl EntityConvention<NullContext, Account> for CustomQuery {
            fn create_default_query(&self) -> Option<RowAccessor<NullContext, Account>> {
                Some(Arc::new(|_: &NullContext| Query::from_set("archived")))
            }
        }

        let mut registry = ConventionRegistry::new();
        registry.register::<NullContext, Account>(CustomQuery);
        let rows = registry
            .get::<NullContext, Account>()
            .and_then(|c| c.create_default_query())
            .unwrap();
        assert_eq!(rows(&NullContext::default()).entity_set(), "archived");
        assert!(registry.get::<(), Account>().is_none());
    }

    #[test]
    fn convention_options_deserialize_with_defaults() {
        let options: ConventionOptions =
            serde_json::from_str(r#"{"default_persistence_check_property":"is_persisted"}"#)
                .unwrap();
        assert_eq!(options.default_key_property, "id");
        assert_eq!(options.default_persistence_check_property, "is_persisted");
    }
}
