//! Per grain type storage options.
//!
//! [`GrainStorageOptions`] collects what the caller configured for a grain type. The first time the
//! grain type is used, [`GrainStorageOptions::post_configure`] fills every gap from the convention
//! and freezes the result into [`ConfiguredOptions`]. A failed attempt leaves the registered options
//! untouched, so a later attempt starts from scratch.

use crate::context::{EntityContext, Entry, EntryState};
use crate::convention::{
    EntityConvention, EtagAccessor, GrainStorageConvention, IsPersistedFn,
    PredicateBuilder,
};
use crate::entity::Entity;
use crate::error::{ConfigurationError, GrainStorageError};
use crate::grain::{Grain, GrainKeyShape, GrainReference};
use crate::model::Model;
use crate::query::{CompiledQuery, Predicate, Query, RowAccessor};
use futures_core::future::BoxFuture;
use log::info;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A caller supplied read: locates the entity of a grain in an open context.
pub type ReadStateFn<C, E> = Arc<
    dyn for<'a> Fn(
            &'a mut C,
            &'a GrainReference,
        ) -> BoxFuture<'a, Result<Option<E>, GrainStorageError>>
        + Send
        + Sync,
>;

/// Translates between a grain state and the entity it is stored as.
pub struct StateBridge<S, E> {
    get: Arc<dyn Fn(&S) -> E + Send + Sync>,
    set: Arc<dyn Fn(&mut S, Option<E>) + Send + Sync>,
}

impl<S: 'static, E: 'static> StateBridge<S, E> {
    /// A bridge from the two translation functions. `set` receives `None` when no row exists.
    pub fn new(
        get: impl Fn(&S) -> E + Send + Sync + 'static,
        set: impl Fn(&mut S, Option<E>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            get: Arc::new(get),
            set: Arc::new(set),
        }
    }
}

impl<E: Clone + Default + 'static> StateBridge<E, E> {
    /// The bridge for grains whose state is the entity. A missing row resets the state.
    pub fn identity() -> Self {
        Self::new(
            |state: &E| state.clone(),
            |state: &mut E, entity: Option<E>| *state = entity.unwrap_or_default(),
        )
    }
}

impl<S, E> StateBridge<S, E> {
    /// Extracts the entity from the state.
    pub fn entity_from_state(&self, state: &S) -> E {
        (self.get)(state)
    }

    /// Writes the entity, or its absence, onto the state.
    pub fn set_entity_on_state(&self, state: &mut S, entity: Option<E>) {
        (self.set)(state, entity)
    }
}

impl<S, E> Clone for StateBridge<S, E> {
    fn clone(&self) -> Self {
        Self {
            get: self.get.clone(),
            set: self.set.clone(),
        }
    }
}

/// What a [`SaveEntryConfigurator`] gets to decide how an entity is written.
pub struct ConfigureSaveEntryContext<'a, C, E> {
    /// The open context.
    pub context: &'a C,
    /// The entry about to be saved.
    pub entry: &'a mut Entry<E>,
    /// Whether the entity is considered stored already.
    pub is_persisted: bool,
}

/// Sets the state of the entry written by a grain write.
pub trait SaveEntryConfigurator<C, E>: Send + Sync {
    /// Configures the entry before it is saved.
    fn configure_save_entry(&self, context: ConfigureSaveEntryContext<'_, C, E>);
}

/// Updates stored entities and inserts the others.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSaveEntryConfigurator;

impl<C, E> SaveEntryConfigurator<C, E> for DefaultSaveEntryConfigurator {
    fn configure_save_entry(&self, context: ConfigureSaveEntryContext<'_, C, E>) {
        context.entry.set_state(if context.is_persisted {
            EntryState::Modified
        } else {
            EntryState::Added
        });
    }
}

struct FnSaveEntryConfigurator<F>(F);

impl<C, E, F> SaveEntryConfigurator<C, E> for FnSaveEntryConfigurator<F>
where
    F: Fn(ConfigureSaveEntryContext<'_, C, E>) + Send + Sync,
{
    fn configure_save_entry(&self, context: ConfigureSaveEntryContext<'_, C, E>) {
        (self.0)(context)
    }
}

/// The storage options of grain type `G`, stored as entity `E` through context `C`.
pub struct GrainStorageOptions<C, G: Grain, E> {
    bridge: StateBridge<G::State, E>,
    rows: Option<RowAccessor<C, E>>,
    predicate: Option<PredicateBuilder>,
    read_state: Option<ReadStateFn<C, E>>,
    key_property: Option<String>,
    key_ext_property: Option<String>,
    persistence_check_property: Option<String>,
    is_persisted: Option<IsPersistedFn<E>>,
    use_etag: bool,
    etag_property: Option<String>,
    precompile_query: bool,
    entry_configurator: Option<Arc<dyn SaveEntryConfigurator<C, E>>>,
    customized: bool,
    _phantom: PhantomData<fn() -> G>,
}

impl<C, G, E> GrainStorageOptions<C, G, E>
where
    C: EntityContext,
    G: Grain,
    E: Entity,
{
    /// Default options translating the grain state through `bridge`.
    pub fn new(bridge: StateBridge<G::State, E>) -> Self {
        Self {
            bridge,
            rows: None,
            predicate: None,
            read_state: None,
            key_property: None,
            key_ext_property: None,
            persistence_check_property: None,
            is_persisted: None,
            use_etag: false,
            etag_property: None,
            precompile_query: true,
            entry_configurator: None,
            customized: false,
            _phantom: PhantomData,
        }
    }

    fn customize(mut self, apply: impl FnOnce(&mut Self)) -> Self {
        apply(&mut self);
        self.customized = true;
        self
    }

    /// Uses the named property as the key instead of the conventional one.
    pub fn use_key(self, property: impl Into<String>) -> Self {
        let property = property.into();
        self.customize(|o| o.key_property = Some(property))
    }

    /// Uses the named property as the extension key of compound keyed grains.
    pub fn use_key_ext(self, property: impl Into<String>) -> Self {
        let property = property.into();
        self.customize(|o| o.key_ext_property = Some(property))
    }

    /// Enables etags on the first concurrency token of the entity. Configuration fails if there
    /// is none.
    pub fn use_etag(self) -> Self {
        self.customize(|o| o.use_etag = true)
    }

    /// Enables etags on the named concurrency token.
    pub fn use_etag_property(self, property: impl Into<String>) -> Self {
        let property = property.into();
        self.customize(|o| {
            o.use_etag = true;
            o.etag_property = Some(property);
        })
    }

    /// Decides insert versus update with `is_persisted`.
    pub fn configure_is_persisted(
        self,
        is_persisted: impl Fn(&E) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.customize(|o| o.is_persisted = Some(Arc::new(is_persisted)))
    }

    /// Decides insert versus update on whether the named property holds a non default value.
    pub fn check_persistence_on(self, property: impl Into<String>) -> Self {
        let property = property.into();
        self.customize(|o| o.persistence_check_property = Some(property))
    }

    /// Reads the entity from the query returned by `rows` instead of the entity set.
    pub fn use_query(self, rows: impl Fn(&C) -> Query<E> + Send + Sync + 'static) -> Self {
        self.customize(|o| o.rows = Some(Arc::new(rows)))
    }

    /// Locates the row of a grain with a custom predicate.
    pub fn use_query_predicate(
        self,
        predicate: impl Fn(&GrainReference) -> Result<Predicate, GrainStorageError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.customize(|o| o.predicate = Some(Arc::new(predicate)))
    }

    /// Replaces the whole read with `read_state`.
    pub fn configure_read_state(
        self,
        read_state: impl for<'a> Fn(
            &'a mut C,
            &'a GrainReference,
        ) -> BoxFuture<'a, Result<Option<E>, GrainStorageError>>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.customize(|o| o.read_state = Some(Arc::new(read_state)))
    }

    /// Whether the default read is compiled ahead of time. Enabled by default.
    pub fn precompile_read_query(self, precompile: bool) -> Self {
        self.customize(|o| o.precompile_query = precompile)
    }

    /// Decides how written entities are saved.
    pub fn configure_save_entry(
        self,
        configurator: impl SaveEntryConfigurator<C, E> + 'static,
    ) -> Self {
        self.customize(|o| o.entry_configurator = Some(Arc::new(configurator)))
    }

    /// Decides how written entities are saved, with a closure.
    pub fn configure_save_entry_with(
        self,
        configure: impl Fn(ConfigureSaveEntryContext<'_, C, E>) + Send + Sync + 'static,
    ) -> Self {
        self.configure_save_entry(FnSaveEntryConfigurator(configure))
    }

    /// Whether anything was configured beyond the defaults.
    pub fn is_customized(&self) -> bool {
        self.customized
    }

    /// Derives everything left unconfigured and freezes the options.
    ///
    /// `overrides` is consulted before the shared `convention` for the default query and the
    /// lookup predicate.
    pub fn post_configure(
        self,
        model: &Model,
        convention: &GrainStorageConvention,
        overrides: Option<&dyn EntityConvention<C, E>>,
    ) -> Result<ConfiguredOptions<C, G::State, E>, ConfigurationError> {
        let grain_type = G::grain_type();
        let shape = G::KEY_SHAPE;
        if !self.customized {
            info!(
                "Grain storage options are not configured for grain \"{grain_type}\"; default options are used"
            );
        }
        let entity_type = model
            .find_entity_type::<E>()
            .cloned()
            .unwrap_or_else(E::entity_type);

        let rows = match (&self.read_state, self.rows) {
            (Some(_), _) => None,
            (None, Some(rows)) => Some(rows),
            (None, None) => match overrides.and_then(|o| o.create_default_query()) {
                Some(rows) => Some(rows),
                None => Some(convention.create_default_row_accessor::<C, E>(model)?),
            },
        };

        let predicate = self
            .predicate
            .or_else(|| overrides.and_then(|o| o.create_query_predicate(shape)));
        let keys = match (&self.read_state, &predicate) {
            (None, None) => Some(convention.resolve_key_properties(
                grain_type,
                shape,
                &entity_type,
                self.key_property.as_deref(),
                self.key_ext_property.as_deref(),
            )?),
            _ => None,
        };

        let is_persisted = match self.is_persisted {
            Some(is_persisted) => is_persisted,
            None => convention
                .create_is_persisted(&entity_type, self.persistence_check_property.as_deref())?,
        };

        let mut etag = match (self.use_etag, &self.etag_property) {
            (true, Some(property)) => Some(convention.configure_etag::<E>(model, property)?),
            _ => None,
        };

        let locator = match (self.read_state, rows, predicate, keys) {
            (Some(read_state), ..) => Locator::Custom(read_state),
            (None, Some(rows), Some(predicate), _) => Locator::Predicate { rows, predicate },
            (None, Some(rows), None, Some(keys)) if self.precompile_query => Locator::Compiled {
                query: convention.create_compiled_read(rows, &entity_type, &keys)?,
                shape,
            },
            (None, Some(rows), None, Some(keys)) => Locator::Predicate {
                rows,
                predicate: convention.create_default_locator(shape, &keys),
            },
            (None, None, ..) | (None, Some(_), None, None) => {
                return Err(ConfigurationError::MissingEntitySet {
                    context: model.name().to_owned(),
                    entity: entity_type.name(),
                });
            }
        };

        if etag.is_none() {
            etag = convention.find_and_configure_etag::<E>(model, self.use_etag)?;
        }

        Ok(ConfiguredOptions {
            grain_type,
            key_shape: shape,
            locator,
            is_persisted,
            etag,
            bridge: self.bridge,
            entry_configurator: self
                .entry_configurator
                .unwrap_or_else(|| Arc::new(DefaultSaveEntryConfigurator)),
        })
    }
}

impl<C, G> Default for GrainStorageOptions<C, G, G::State>
where
    C: EntityContext,
    G: Grain,
    G::State: Entity,
{
    fn default() -> Self {
        Self::new(StateBridge::identity())
    }
}

impl<C, G: Grain, E> Clone for GrainStorageOptions<C, G, E> {
    fn clone(&self) -> Self {
        Self {
            bridge: self.bridge.clone(),
            rows: self.rows.clone(),
            predicate: self.predicate.clone(),
            read_state: self.read_state.clone(),
            key_property: self.key_property.clone(),
            key_ext_property: self.key_ext_property.clone(),
            persistence_check_property: self.persistence_check_property.clone(),
            is_persisted: self.is_persisted.clone(),
            use_etag: self.use_etag,
            etag_property: self.etag_property.clone(),
            precompile_query: self.precompile_query,
            entry_configurator: self.entry_configurator.clone(),
            customized: self.customized,
            _phantom: PhantomData,
        }
    }
}

impl<C, G: Grain, E> fmt::Debug for GrainStorageOptions<C, G, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrainStorageOptions")
            .field("grain_type", &G::grain_type())
            .field("key_property", &self.key_property)
            .field("key_ext_property", &self.key_ext_property)
            .field("persistence_check_property", &self.persistence_check_property)
            .field("use_etag", &self.use_etag)
            .field("etag_property", &self.etag_property)
            .field("precompile_query", &self.precompile_query)
            .field("customized", &self.customized)
            .finish_non_exhaustive()
    }
}

/// How the row of a grain is found.
pub enum Locator<C, E> {
    /// A compiled equality query over the key properties.
    Compiled {
        /// The compiled query.
        query: CompiledQuery<C, E>,
        /// The key shape whose values are bound.
        shape: GrainKeyShape,
    },
    /// A base query narrowed by a predicate built per call.
    Predicate {
        /// The base query.
        rows: RowAccessor<C, E>,
        /// The predicate builder.
        predicate: PredicateBuilder,
    },
    /// A caller supplied read.
    Custom(ReadStateFn<C, E>),
}

impl<C: EntityContext, E: Entity> Locator<C, E> {
    /// Finds the entity of `grain_ref`, if stored.
    pub async fn locate(
        &self,
        context: &mut C,
        grain_ref: &GrainReference,
    ) -> Result<Option<E>, GrainStorageError> {
        match self {
            Locator::Compiled { query, shape } => {
                let values = grain_ref.key_values(*shape)?;
                let query = query.bind(context, values);
                Ok(context.fetch_single(&query).await?)
            }
            Locator::Predicate { rows, predicate } => {
                let query = rows(context).filter(predicate(grain_ref)?);
                Ok(context.fetch_single(&query).await?)
            }
            Locator::Custom(read_state) => read_state(context, grain_ref).await,
        }
    }
}

/// Fully derived storage options of a grain type. Immutable once built.
pub struct ConfiguredOptions<C, S, E> {
    grain_type: &'static str,
    key_shape: GrainKeyShape,
    locator: Locator<C, E>,
    is_persisted: IsPersistedFn<E>,
    etag: Option<EtagAccessor<E>>,
    bridge: StateBridge<S, E>,
    entry_configurator: Arc<dyn SaveEntryConfigurator<C, E>>,
}

impl<C, S, E> ConfiguredOptions<C, S, E> {
    /// The grain type name.
    pub fn grain_type(&self) -> &'static str {
        self.grain_type
    }

    /// The key shape of the grain type.
    pub fn key_shape(&self) -> GrainKeyShape {
        self.key_shape
    }

    /// How rows are found.
    pub fn locator(&self) -> &Locator<C, E> {
        &self.locator
    }

    /// Whether reads use a compiled query.
    pub fn is_precompiled(&self) -> bool {
        matches!(self.locator, Locator::Compiled { .. })
    }

    /// Whether `entity` is considered stored already.
    pub fn is_persisted(&self, entity: &E) -> bool {
        (self.is_persisted)(entity)
    }

    /// The etag accessor, when etags are enabled.
    pub fn etag(&self) -> Option<&EtagAccessor<E>> {
        self.etag.as_ref()
    }

    /// Whether etags are enabled.
    pub fn uses_etag(&self) -> bool {
        self.etag.is_some()
    }

    /// The state bridge.
    pub fn bridge(&self) -> &StateBridge<S, E> {
        &self.bridge
    }

    /// The configurator deciding how writes are saved.
    pub fn entry_configurator(&self) -> &dyn SaveEntryConfigurator<C, E> {
        self.entry_configurator.as_ref()
    }
}

impl<C, S, E> fmt::Debug for ConfiguredOptions<C, S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfiguredOptions")
            .field("grain_type", &self.grain_type)
            .field("key_shape", &self.key_shape)
            .field("precompiled", &self.is_precompiled())
            .field("etag", &self.etag)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityType, PropertyDescriptor, PropertyValues};
    use crate::test_support::NullContext;
    use crate::value::{PropertyValue, ValueError, ValueKind};
    use uuid::Uuid;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Profile {
        id: Uuid,
        custom_key: Uuid,
        version: i64,
    }

    impl Entity for Profile {
        fn entity_type() -> EntityType<Self> {
            EntityType::new(
                "tests::Profile",
                vec![
                    PropertyDescriptor::new("id", ValueKind::Guid, |p: &Profile| p.id.into()),
                    PropertyDescriptor::new("custom_key", ValueKind::Guid, |p: &Profile| {
                        p.custom_key.into()
                    }),
                    PropertyDescriptor::new("version", ValueKind::Int64, |p: &Profile| {
                        p.version.into()
                    }),
                ],
            )
        }

        fn materialize(mut values: PropertyValues) -> Result<Self, ValueError> {
            Ok(Profile {
                id: Uuid::from_value(values.take("id"))?,
                custom_key: Uuid::from_value(values.take("custom_key"))?,
                version: i64::from_value(values.take("version"))?,
            })
        }
    }

    struct ProfileGrain;

    impl Grain for ProfileGrain {
        type State = Profile;
        const KEY_SHAPE: GrainKeyShape = GrainKeyShape::Guid;
    }

    struct NumberedProfileGrain;

    impl Grain for NumberedProfileGrain {
        type State = Profile;
        const KEY_SHAPE: GrainKeyShape = GrainKeyShape::Integer;
    }

    type Options<G> = GrainStorageOptions<NullContext, G, Profile>;

    fn model(concurrency: bool) -> Model {
        Model::builder("ProfilesContext")
            .entity_set::<Profile>("profiles")
            .entity::<Profile>(|e| {
                if concurrency {
                    e.concurrency_token("version");
                }
            })
            .build()
            .unwrap()
    }

    #[test]
    fn defaults_use_compiled_read_and_no_etag() {
        let configured = Options::<ProfileGrain>::default()
            .post_configure(&model(false), &GrainStorageConvention::default(), None)
            .unwrap();
        assert!(configured.is_precompiled());
        assert!(!configured.uses_etag());
        assert!(!configured.is_persisted(&Profile::default()));
    }

    #[test]
    fn etag_is_detected_without_being_requested() {
        let configured = Options::<ProfileGrain>::default()
            .post_configure(&model(true), &GrainStorageConvention::default(), None)
            .unwrap();
        assert_eq!(configured.etag().map(|e| e.property_name()), Some("version"));
    }

    #[test]
    fn requested_etag_requires_a_concurrency_token() {
        let err = Options::<ProfileGrain>::default()
            .use_etag()
            .post_configure(&model(false), &GrainStorageConvention::default(), None)
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::NoConcurrencyToken { .. }));
    }

    #[test]
    fn key_shape_mismatch_fails_configuration() {
        let err = Options::<NumberedProfileGrain>::default()
            .post_configure(&model(false), &GrainStorageConvention::default(), None)
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::KeyTypeMismatch { .. }));
    }

    #[test]
    fn unknown_custom_key_fails_and_template_can_be_fixed() {
        let template = Options::<ProfileGrain>::default().use_key("missing_key");
        let err = template
            .clone()
            .post_configure(&model(false), &GrainStorageConvention::default(), None)
            .unwrap_err();
        assert!(err.to_string().contains("missing_key"));

        let configured = template
            .use_key("custom_key")
            .precompile_read_query(false)
            .post_configure(&model(false), &GrainStorageConvention::default(), None)
            .unwrap();
        assert!(!configured.is_precompiled());
    }

    #[test]
    fn custom_read_skips_key_resolution() {
        let configured = Options::<NumberedProfileGrain>::default()
            .configure_read_state(|_ctx, _grain_ref| Box::pin(async { Result::<Option<Profile>, GrainStorageError>::Ok(None) }))
            .post_configure(&model(false), &GrainStorageConvention::default(), None)
            .unwrap();
        assert!(matches!(configured.locator(), Locator::Custom(_)));
    }

    #[test]
    fn default_save_entry_inserts_then_updates() {
        let context = NullContext::default();
        let mut entry = Entry::new(Profile::default());
        DefaultSaveEntryConfigurator.configure_save_entry(ConfigureSaveEntryContext::<
            NullContext,
            Profile,
        > {
            context: &context,
            entry: &mut entry,
            is_persisted: false,
        });
        assert_eq!(entry.state(), EntryState::Added);

        DefaultSaveEntryConfigurator.configure_save_entry(ConfigureSaveEntryContext::<
            NullContext,
            Profile,
        > {
            context: &context,
            entry: &mut entry,
            is_persisted: true,
        });
        assert_eq!(entry.state(), EntryState::Modified);
    }

    #[test]
    fn identity_bridge_resets_state_on_missing_row() {
        let bridge = StateBridge::<Profile, Profile>::identity();
        let mut state = Profile {
            version: 3,
            ..Default::default()
        };
        assert_eq!(bridge.entity_from_state(&state).version, 3);
        bridge.set_entity_on_state(&mut state, None);
        assert_eq!(state, Profile::default());
    }
}
