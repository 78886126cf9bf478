#![allow(dead_code)]

use granary_core::context::{ContextFactory, EntityContext, Entry, EntryState};
use granary_core::convention::ConventionOptions;
use granary_core::entity::Entity;
use granary_core::model::Model;
use granary_core::options::StateBridge;
use granary_core::provider::{EntityGrainStorage, GrainStorageBuilder};
use granary_derive::{Entity, Grain};
use granary_mem::InMemoryContextFactory;
use uuid::Uuid;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn random_string() -> String {
    Uuid::new_v4().simple().to_string()
}

fn random_id() -> i64 {
    i64::from(u32::from_le_bytes(
        Uuid::new_v4().as_bytes()[..4].try_into().unwrap(),
    ))
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
pub struct EntityWithGuidKey {
    #[property(key)]
    pub id: Uuid,
    pub title: String,
    pub is_persisted: bool,
}

impl EntityWithGuidKey {
    pub fn random() -> Self {
        Self {
            id: Uuid::new_v4(),
            title: random_string(),
            is_persisted: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
pub struct EntityWithGuidCompoundKey {
    #[property(key)]
    pub id: Uuid,
    #[property(key)]
    pub key_ext: String,
    pub title: String,
    pub is_persisted: bool,
}

impl EntityWithGuidCompoundKey {
    pub fn random() -> Self {
        Self {
            id: Uuid::new_v4(),
            key_ext: random_string(),
            title: random_string(),
            is_persisted: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
pub struct EntityWithIntegerKey {
    #[property(key)]
    pub id: i64,
    pub title: String,
    pub is_persisted: bool,
}

impl EntityWithIntegerKey {
    pub fn random() -> Self {
        Self {
            id: random_id(),
            title: random_string(),
            is_persisted: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
pub struct EntityWithIntegerCompoundKey {
    #[property(key)]
    pub id: i64,
    #[property(key)]
    pub key_ext: String,
    pub title: String,
    pub is_persisted: bool,
}

impl EntityWithIntegerCompoundKey {
    pub fn random() -> Self {
        Self {
            id: random_id(),
            key_ext: random_string(),
            title: random_string(),
            is_persisted: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
pub struct EntityWithStringKey {
    #[property(key)]
    pub id: String,
    pub title: String,
    pub is_persisted: bool,
}

impl EntityWithStringKey {
    pub fn random() -> Self {
        Self {
            id: random_string(),
            title: random_string(),
            is_persisted: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
pub struct EntityWithIntegerKeyWithEtag {
    #[property(key)]
    pub id: i64,
    pub title: String,
    pub is_persisted: bool,
    #[property(row_version)]
    pub etag: Vec<u8>,
}

impl EntityWithIntegerKeyWithEtag {
    pub fn random() -> Self {
        Self {
            id: random_id(),
            title: random_string(),
            is_persisted: false,
            etag: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
pub struct ConfiguredEntityWithCustomGuidKey {
    #[property(key)]
    pub custom_key: Uuid,
    #[property(key)]
    pub custom_key_ext: String,
    pub title: String,
    pub is_persisted: bool,
}

impl ConfiguredEntityWithCustomGuidKey {
    pub fn random() -> Self {
        Self {
            custom_key: Uuid::new_v4(),
            custom_key_ext: random_string(),
            title: random_string(),
            is_persisted: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
pub struct UnconfiguredEntityWithCustomGuidKey {
    #[property(key)]
    pub custom_key: Uuid,
    #[property(key)]
    pub custom_key_ext: String,
    pub title: String,
    pub is_persisted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
pub struct InvalidConfiguredEntityWithCustomGuidKey {
    #[property(key)]
    pub custom_key: Uuid,
    pub custom_key_ext: String,
    pub is_persisted: bool,
}

/// A grain state that wraps the entity it is stored as.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GrainStateWrapper<E> {
    pub value: Option<E>,
}

#[derive(Grain)]
#[grain(state = EntityWithGuidKey, key = "guid", name = "GrainWithGuidKey")]
pub struct GrainWithGuidKey;

#[derive(Grain)]
#[grain(state = EntityWithGuidCompoundKey, key = "guid_compound", name = "GrainWithGuidCompoundKey")]
pub struct GrainWithGuidCompoundKey;

#[derive(Grain)]
#[grain(state = EntityWithIntegerKey, key = "integer", name = "GrainWithIntegerKey")]
pub struct GrainWithIntegerKey;

#[derive(Grain)]
#[grain(state = EntityWithIntegerCompoundKey, key = "integer_compound", name = "GrainWithIntegerCompoundKey")]
pub struct GrainWithIntegerCompoundKey;

#[derive(Grain)]
#[grain(state = EntityWithStringKey, key = "string", name = "GrainWithStringKey")]
pub struct GrainWithStringKey;

#[derive(Grain)]
#[grain(state = EntityWithIntegerKeyWithEtag, key = "integer", name = "GrainWithIntegerKeyWithEtag")]
pub struct GrainWithIntegerKeyWithEtag;

#[derive(Grain)]
#[grain(
    state = GrainStateWrapper<EntityWithGuidKey>,
    key = "guid",
    name = "GrainWithCustomStateGuidKey"
)]
pub struct GrainWithCustomStateGuidKey;

#[derive(Grain)]
#[grain(state = ConfiguredEntityWithCustomGuidKey, key = "guid", name = "ConfiguredGrainWithCustomGuidKey")]
pub struct ConfiguredGrainWithCustomGuidKey;

#[derive(Grain)]
#[grain(
    state = ConfiguredEntityWithCustomGuidKey,
    key = "guid_compound",
    name = "ConfiguredGrainWithCustomGuidKey2"
)]
pub struct ConfiguredGrainWithCustomGuidKey2;

#[derive(Grain)]
#[grain(
    state = UnconfiguredEntityWithCustomGuidKey,
    key = "guid_compound",
    name = "UnconfiguredGrainWithCustomGuidKey"
)]
pub struct UnconfiguredGrainWithCustomGuidKey;

#[derive(Grain)]
#[grain(
    state = InvalidConfiguredEntityWithCustomGuidKey,
    key = "integer",
    name = "InvalidConfiguredGrainWithGuidKey"
)]
pub struct InvalidConfiguredGrainWithGuidKey;

pub fn model() -> Model {
    Model::builder("TestContext")
        .entity_set::<EntityWithGuidKey>("guid_entities")
        .entity_set::<EntityWithGuidCompoundKey>("guid_compound_entities")
        .entity_set::<EntityWithIntegerKey>("integer_entities")
        .entity_set::<EntityWithIntegerCompoundKey>("integer_compound_entities")
        .entity_set::<EntityWithStringKey>("string_entities")
        .entity_set::<EntityWithIntegerKeyWithEtag>("etag_entities")
        .entity_set::<ConfiguredEntityWithCustomGuidKey>("configured_entities")
        .entity_set::<UnconfiguredEntityWithCustomGuidKey>("unconfigured_entities")
        .entity_set::<InvalidConfiguredEntityWithCustomGuidKey>("invalid_entities")
        .build()
        .expect("test model is valid")
}

pub fn convention_options() -> ConventionOptions {
    ConventionOptions {
        default_persistence_check_property: "is_persisted".to_owned(),
        ..ConventionOptions::default()
    }
}

/// The provider with every test grain registered, before any customization by a test.
pub fn builder() -> GrainStorageBuilder<InMemoryContextFactory> {
    init_logging();
    EntityGrainStorage::builder(InMemoryContextFactory::new(model()))
        .convention_options(convention_options())
        .grain::<GrainWithGuidKey>()
        .grain::<GrainWithGuidCompoundKey>()
        .grain::<GrainWithIntegerKey>()
        .grain::<GrainWithIntegerCompoundKey>()
        .grain::<GrainWithStringKey>()
        .grain::<GrainWithIntegerKeyWithEtag>()
        .grain::<UnconfiguredGrainWithCustomGuidKey>()
        .configure_grain_with_entity::<GrainWithCustomStateGuidKey, EntityWithGuidKey>(
            StateBridge::new(
                |state: &GrainStateWrapper<EntityWithGuidKey>| {
                    state.value.clone().unwrap_or_default()
                },
                |state: &mut GrainStateWrapper<EntityWithGuidKey>, entity| state.value = entity,
            ),
            |options| options,
        )
        .configure_grain::<ConfiguredGrainWithCustomGuidKey>(|options| options.use_key("custom_key"))
        .configure_grain::<ConfiguredGrainWithCustomGuidKey2>(|options| {
            options
                .use_key("custom_key")
                .use_key_ext("custom_key_ext")
        })
        .configure_grain::<InvalidConfiguredGrainWithGuidKey>(|options| {
            options.use_key("custom_key").use_key_ext("custom_key_ext")
        })
}

pub fn storage() -> EntityGrainStorage<InMemoryContextFactory> {
    builder().build()
}

/// Inserts `entity` directly through a context and returns it as stored.
pub async fn store_entity<E>(storage: &EntityGrainStorage<InMemoryContextFactory>, entity: E) -> E
where
    E: Entity,
{
    let mut context = storage.factory().open_scope().await.unwrap();
    let mut entry = Entry::new(entity);
    entry.set_state(EntryState::Added);
    context.save_entry(&mut entry).await.unwrap();
    entry.into_entity()
}

/// Loads the stored row of `entity` by its key.
pub async fn fetch_entity<E>(
    storage: &EntityGrainStorage<InMemoryContextFactory>,
    table: &str,
    entity: &E,
) -> Option<E>
where
    E: Entity,
{
    let entity_type = storage
        .factory()
        .model()
        .find_entity_type::<E>()
        .cloned()
        .unwrap();
    storage
        .factory()
        .database()
        .get(table, &entity_type.key_of(entity))
        .await
}
