//! The grain storage provider: a registry of grain types and a cache of their storage adapters.
//!
//! Adapters are built lazily, the first time a grain type is used. Building holds only a shared
//! lock on the registry, so concurrent first uses of the same grain type may each build an
//! adapter, but exactly one is published and every caller uses it. Registering a grain type again
//! evicts its published adapter.

use crate::context::ContextFactory;
use crate::convention::{ConventionOptions, ConventionRegistry, EntityConvention, GrainStorageConvention};
use crate::entity::Entity;
use crate::error::GrainStorageError;
use crate::grain::{Grain, GrainKeyShape, GrainReference, StateSlot};
use crate::operation::OperationContext;
use crate::options::{GrainStorageOptions, StateBridge};
use crate::storage::{EntityGrainStorageAdapter, GrainStorage};
use async_trait::async_trait;
use dashmap::DashMap;
use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// What adapter factories get to build an adapter.
pub struct StorageServices<F> {
    factory: Arc<F>,
    convention: GrainStorageConvention,
    overrides: ConventionRegistry,
}

impl<F: ContextFactory> StorageServices<F> {
    /// The context factory.
    pub fn factory(&self) -> &Arc<F> {
        &self.factory
    }

    /// The default convention.
    pub fn convention(&self) -> &GrainStorageConvention {
        &self.convention
    }

    /// The per context and entity convention overrides.
    pub fn overrides(&self) -> &ConventionRegistry {
        &self.overrides
    }
}

type AdapterFactory<F> = Arc<
    dyn Fn(&StorageServices<F>) -> Result<Arc<dyn GrainStorage>, GrainStorageError> + Send + Sync,
>;

/// A registered grain type.
pub struct GrainDescriptor<F> {
    grain_type: &'static str,
    key_shape: GrainKeyShape,
    state_type: &'static str,
    entity_type: &'static str,
    build: AdapterFactory<F>,
}

impl<F: ContextFactory> GrainDescriptor<F> {
    /// Describes grain type `G` stored as `E` with `options`.
    pub fn new<G, E>(options: GrainStorageOptions<F::Context, G, E>) -> Self
    where
        G: Grain,
        E: Entity,
    {
        let build: AdapterFactory<F> = Arc::new(move |services: &StorageServices<F>| {
            let overrides = services.overrides.get::<F::Context, E>();
            let configured = options.clone().post_configure(
                services.factory.model(),
                &services.convention,
                overrides.as_deref(),
            )?;
            debug!("Configured grain storage: {configured:?}");
            let adapter = EntityGrainStorageAdapter::new(services.factory.clone(), configured);
            Ok(Arc::new(adapter) as Arc<dyn GrainStorage>)
        });
        Self {
            grain_type: G::grain_type(),
            key_shape: G::KEY_SHAPE,
            state_type: std::any::type_name::<G::State>(),
            entity_type: std::any::type_name::<E>(),
            build,
        }
    }
}

impl<F> GrainDescriptor<F> {
    /// The grain type name.
    pub fn grain_type(&self) -> &'static str {
        self.grain_type
    }

    /// The key shape.
    pub fn key_shape(&self) -> GrainKeyShape {
        self.key_shape
    }

    /// The state type name.
    pub fn state_type(&self) -> &'static str {
        self.state_type
    }

    /// The entity type name.
    pub fn entity_type(&self) -> &'static str {
        self.entity_type
    }
}

impl<F> Clone for GrainDescriptor<F> {
    fn clone(&self) -> Self {
        Self {
            grain_type: self.grain_type,
            key_shape: self.key_shape,
            state_type: self.state_type,
            entity_type: self.entity_type,
            build: self.build.clone(),
        }
    }
}

impl<F> fmt::Debug for GrainDescriptor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrainDescriptor")
            .field("grain_type", &self.grain_type)
            .field("key_shape", &self.key_shape)
            .field("state_type", &self.state_type)
            .field("entity_type", &self.entity_type)
            .finish()
    }
}

/// Resolves grain type names to their registration.
pub struct GrainTypeRegistry<F> {
    grains: RwLock<HashMap<String, GrainDescriptor<F>>>,
}

impl<F: ContextFactory> GrainTypeRegistry<F> {
    fn new() -> Self {
        Self {
            grains: RwLock::new(HashMap::new()),
        }
    }

    fn register(&mut self, descriptor: GrainDescriptor<F>) {
        debug!(
            "Registering grain type \"{}\" stored as \"{}\"",
            descriptor.grain_type, descriptor.entity_type
        );
        self.grains
            .get_mut()
            .insert(descriptor.grain_type.to_owned(), descriptor);
    }

    /// The registration of `grain_type`.
    pub fn resolve(&self, grain_type: &str) -> Result<GrainDescriptor<F>, GrainStorageError> {
        self.grains
            .read()
            .get(grain_type)
            .cloned()
            .ok_or_else(|| GrainStorageError::UnknownGrainType(grain_type.to_owned()))
    }

    /// Whether `grain_type` is registered.
    pub fn contains(&self, grain_type: &str) -> bool {
        self.grains.read().contains_key(grain_type)
    }
}

/// Grain storage for every registered grain type, backed by one context factory.
pub struct EntityGrainStorage<F: ContextFactory> {
    services: StorageServices<F>,
    registry: GrainTypeRegistry<F>,
    storages: DashMap<String, Arc<dyn GrainStorage>>,
}

impl<F: ContextFactory> EntityGrainStorage<F> {
    /// Starts building a provider over `factory`.
    pub fn builder(factory: F) -> GrainStorageBuilder<F> {
        GrainStorageBuilder {
            factory,
            convention_options: ConventionOptions::default(),
            overrides: ConventionRegistry::new(),
            registry: GrainTypeRegistry::new(),
        }
    }

    /// The grain type registry.
    pub fn registry(&self) -> &GrainTypeRegistry<F> {
        &self.registry
    }

    /// Registers a grain type at any time.
    ///
    /// A registration of the same name is replaced and its published adapter evicted, so the
    /// next use builds from `descriptor`.
    pub fn register(&self, descriptor: GrainDescriptor<F>) {
        let grain_type = descriptor.grain_type;
        debug!(
            "Registering grain type \"{grain_type}\" stored as \"{}\"",
            descriptor.entity_type
        );
        let mut grains = self.registry.grains.write();
        if grains.insert(grain_type.to_owned(), descriptor).is_some()
            && self.storages.remove(grain_type).is_some()
        {
            debug!("Evicted the adapter of re-registered grain type \"{grain_type}\"");
        }
    }

    /// Registers grain type `G` with default options; its state is its entity.
    pub fn register_grain<G>(&self)
    where
        G: Grain,
        G::State: Entity,
    {
        self.register(GrainDescriptor::new::<G, G::State>(
            GrainStorageOptions::default(),
        ));
    }

    /// The context factory.
    pub fn factory(&self) -> &Arc<F> {
        &self.services.factory
    }

    /// The adapter of `grain_type`, built and published on first use.
    ///
    /// A failed build is returned to the caller and not cached; the next call tries again.
    pub fn get_or_create(&self, grain_type: &str) -> Result<Arc<dyn GrainStorage>, GrainStorageError> {
        if let Some(storage) = self.storages.get(grain_type) {
            return Ok(storage.value().clone());
        }
        // Held until published so a concurrent registration cannot be overwritten by a stale build.
        let grains = self.registry.grains.read();
        let descriptor = grains
            .get(grain_type)
            .ok_or_else(|| GrainStorageError::UnknownGrainType(grain_type.to_owned()))?;
        let candidate = (descriptor.build)(&self.services)?;
        let published = self
            .storages
            .entry(grain_type.to_owned())
            .or_insert(candidate)
            .value()
            .clone();
        Ok(published)
    }

    /// The grain types with a published adapter, for diagnostics.
    #[doc(hidden)]
    pub fn cached_grain_types(&self) -> Vec<String> {
        self.storages.iter().map(|e| e.key().clone()).collect()
    }
}

#[async_trait]
impl<F: ContextFactory> GrainStorage for EntityGrainStorage<F> {
    async fn read_state_with(
        &self,
        grain_type: &str,
        grain_ref: &GrainReference,
        slot: &mut dyn StateSlot,
        operation: &OperationContext,
    ) -> Result<(), GrainStorageError> {
        let storage = self.get_or_create(grain_type)?;
        storage
            .read_state_with(grain_type, grain_ref, slot, operation)
            .await
    }

    async fn write_state_with(
        &self,
        grain_type: &str,
        grain_ref: &GrainReference,
        slot: &mut dyn StateSlot,
        operation: &OperationContext,
    ) -> Result<(), GrainStorageError> {
        let storage = self.get_or_create(grain_type)?;
        storage
            .write_state_with(grain_type, grain_ref, slot, operation)
            .await
    }

    async fn clear_state_with(
        &self,
        grain_type: &str,
        grain_ref: &GrainReference,
        slot: &mut dyn StateSlot,
        operation: &OperationContext,
    ) -> Result<(), GrainStorageError> {
        let storage = self.get_or_create(grain_type)?;
        storage
            .clear_state_with(grain_type, grain_ref, slot, operation)
            .await
    }
}

/// Builds an [`EntityGrainStorage`].
pub struct GrainStorageBuilder<F: ContextFactory> {
    factory: F,
    convention_options: ConventionOptions,
    overrides: ConventionRegistry,
    registry: GrainTypeRegistry<F>,
}

impl<F: ContextFactory> GrainStorageBuilder<F> {
    /// Replaces the default property name conventions.
    pub fn convention_options(mut self, options: ConventionOptions) -> Self {
        self.convention_options = options;
        self
    }

    /// Overrides the default query or lookup predicate of entity `E`.
    pub fn convention<E: Entity>(
        mut self,
        convention: impl EntityConvention<F::Context, E> + 'static,
    ) -> Self {
        self.overrides.register::<F::Context, E>(convention);
        self
    }

    /// Registers grain type `G` with default options.
    pub fn grain<G>(mut self) -> Self
    where
        G: Grain,
        G::State: Entity,
    {
        self.registry
            .register(GrainDescriptor::new::<G, G::State>(GrainStorageOptions::default()));
        self
    }

    /// Registers grain type `G`, configuring its options.
    pub fn configure_grain<G>(
        mut self,
        configure: impl FnOnce(
            GrainStorageOptions<F::Context, G, G::State>,
        ) -> GrainStorageOptions<F::Context, G, G::State>,
    ) -> Self
    where
        G: Grain,
        G::State: Entity,
    {
        let options = configure(GrainStorageOptions::default());
        self.registry.register(GrainDescriptor::new(options));
        self
    }

    /// Registers grain type `G`, stored as entity `E` through `bridge`.
    pub fn configure_grain_with_entity<G, E>(
        mut self,
        bridge: StateBridge<G::State, E>,
        configure: impl FnOnce(
            GrainStorageOptions<F::Context, G, E>,
        ) -> GrainStorageOptions<F::Context, G, E>,
    ) -> Self
    where
        G: Grain,
        E: Entity,
    {
        let options = configure(GrainStorageOptions::new(bridge));
        self.registry.register(GrainDescriptor::new(options));
        self
    }

    /// Builds the provider.
    pub fn build(self) -> EntityGrainStorage<F> {
        EntityGrainStorage {
            services: StorageServices {
                factory: Arc::new(self.factory),
                convention: GrainStorageConvention::new(self.convention_options),
                overrides: self.overrides,
            },
            registry: self.registry,
            storages: DashMap::new(),
        }
    }
}
