//! The grain storage interface and its entity based implementation.

use crate::context::{ContextError, ContextFactory, EntityContext, Entry, EntryState};
use crate::convention::convert_etag_to_string;
use crate::entity::Entity;
use crate::error::GrainStorageError;
use crate::grain::{GrainReference, StateSlot};
use crate::operation::OperationContext;
use crate::options::{ConfigureSaveEntryContext, ConfiguredOptions};
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;

/// Reads, writes and clears grain state on behalf of the host runtime.
#[async_trait]
pub trait GrainStorage: Send + Sync {
    /// Loads the state of `grain_ref` into `slot`.
    async fn read_state_with(
        &self,
        grain_type: &str,
        grain_ref: &GrainReference,
        slot: &mut dyn StateSlot,
        operation: &OperationContext,
    ) -> Result<(), GrainStorageError>;

    /// Stores the state held by `slot`.
    async fn write_state_with(
        &self,
        grain_type: &str,
        grain_ref: &GrainReference,
        slot: &mut dyn StateSlot,
        operation: &OperationContext,
    ) -> Result<(), GrainStorageError>;

    /// Removes the stored state of the grain.
    async fn clear_state_with(
        &self,
        grain_type: &str,
        grain_ref: &GrainReference,
        slot: &mut dyn StateSlot,
        operation: &OperationContext,
    ) -> Result<(), GrainStorageError>;

    /// [`GrainStorage::read_state_with`] with default settings.
    async fn read_state(
        &self,
        grain_type: &str,
        grain_ref: &GrainReference,
        slot: &mut dyn StateSlot,
    ) -> Result<(), GrainStorageError> {
        let operation = OperationContext::default();
        self.read_state_with(grain_type, grain_ref, slot, &operation)
            .await
    }

    /// [`GrainStorage::write_state_with`] with default settings.
    async fn write_state(
        &self,
        grain_type: &str,
        grain_ref: &GrainReference,
        slot: &mut dyn StateSlot,
    ) -> Result<(), GrainStorageError> {
        let operation = OperationContext::default();
        self.write_state_with(grain_type, grain_ref, slot, &operation)
            .await
    }

    /// [`GrainStorage::clear_state_with`] with default settings.
    async fn clear_state(
        &self,
        grain_type: &str,
        grain_ref: &GrainReference,
        slot: &mut dyn StateSlot,
    ) -> Result<(), GrainStorageError> {
        let operation = OperationContext::default();
        self.clear_state_with(grain_type, grain_ref, slot, &operation)
            .await
    }
}

/// Stores the state of one grain type as entity `E`, using the options derived for it.
pub struct EntityGrainStorageAdapter<F: ContextFactory, S, E> {
    factory: Arc<F>,
    options: ConfiguredOptions<F::Context, S, E>,
}

impl<F, S, E> EntityGrainStorageAdapter<F, S, E>
where
    F: ContextFactory,
    S: Send + Sync + 'static,
    E: Entity,
{
    /// An adapter over `factory` using `options`.
    pub fn new(factory: Arc<F>, options: ConfiguredOptions<F::Context, S, E>) -> Self {
        Self { factory, options }
    }

    /// The configured options.
    pub fn options(&self) -> &ConfiguredOptions<F::Context, S, E> {
        &self.options
    }

    fn state<'a>(&self, slot: &'a dyn StateSlot) -> Result<&'a S, GrainStorageError> {
        slot.state()
            .downcast_ref::<S>()
            .ok_or_else(|| self.state_type_mismatch(slot))
    }

    fn set_entity(
        &self,
        slot: &mut dyn StateSlot,
        entity: Option<E>,
    ) -> Result<(), GrainStorageError> {
        let mismatch = self.state_type_mismatch(slot);
        let state = slot.state_mut().downcast_mut::<S>().ok_or(mismatch)?;
        self.options.bridge().set_entity_on_state(state, entity);
        Ok(())
    }

    fn state_type_mismatch(&self, slot: &dyn StateSlot) -> GrainStorageError {
        GrainStorageError::StateTypeMismatch {
            grain_type: self.options.grain_type().to_owned(),
            expected: std::any::type_name::<S>(),
            found: slot.state_type_name(),
        }
    }

    fn classify_save_error(
        &self,
        error: ContextError,
        supplied_etag: Option<String>,
    ) -> GrainStorageError {
        let grain_type = self.options.grain_type().to_owned();
        match error {
            ContextError::Concurrency(violation) => match self.options.etag() {
                None => {
                    warn!("Inconsistent state for grain \"{grain_type}\": {violation}");
                    GrainStorageError::InconsistentState {
                        grain_type,
                        source: violation,
                    }
                }
                Some(etag) => {
                    let stored_etag = violation
                        .database_values
                        .as_ref()
                        .and_then(|values| values.get(etag.property_name()))
                        .and_then(convert_etag_to_string);
                    warn!(
                        "Etag conflict for grain \"{grain_type}\": stored {stored_etag:?}, supplied {supplied_etag:?}"
                    );
                    GrainStorageError::EtagConflict {
                        grain_type,
                        stored_etag,
                        supplied_etag,
                        source: violation,
                    }
                }
            },
            other => GrainStorageError::Context(other),
        }
    }
}

#[async_trait]
impl<F, S, E> GrainStorage for EntityGrainStorageAdapter<F, S, E>
where
    F: ContextFactory,
    S: Send + Sync + 'static,
    E: Entity,
{
    async fn read_state_with(
        &self,
        _grain_type: &str,
        grain_ref: &GrainReference,
        slot: &mut dyn StateSlot,
        operation: &OperationContext,
    ) -> Result<(), GrainStorageError> {
        debug!("Reading state of grain {grain_ref}");
        self.state(slot)?;
        let entity = operation
            .run(async {
                let mut context = self.factory.open_scope().await?;
                self.options.locator().locate(&mut context, grain_ref).await
            })
            .await?;

        let etag = match (&entity, self.options.etag()) {
            (Some(entity), Some(etag)) => etag.etag_of(entity),
            _ => None,
        };
        let found = entity.is_some();
        self.set_entity(slot, entity)?;
        slot.set_etag(etag);
        slot.set_record_exists(found);
        debug!("Read state of grain {grain_ref} (found: {found})");
        Ok(())
    }

    async fn write_state_with(
        &self,
        _grain_type: &str,
        grain_ref: &GrainReference,
        slot: &mut dyn StateSlot,
        operation: &OperationContext,
    ) -> Result<(), GrainStorageError> {
        let entity = self
            .options
            .bridge()
            .entity_from_state(self.state(slot)?);
        let is_persisted = self.options.is_persisted(&entity);
        let supplied_etag = slot.etag().map(str::to_owned);
        debug!("Writing state of grain {grain_ref} (persisted: {is_persisted})");

        let entry = operation
            .run(async {
                let mut context = self.factory.open_scope().await?;
                let mut entry = Entry::new(entity);
                if !operation.apply_entry_state(&mut entry) {
                    self.options
                        .entry_configurator()
                        .configure_save_entry(ConfigureSaveEntryContext {
                            context: &context,
                            entry: &mut entry,
                            is_persisted,
                        });
                }
                match context.save_entry(&mut entry).await {
                    Ok(_) => Ok(entry),
                    Err(error) => Err(self.classify_save_error(error, supplied_etag.clone())),
                }
            })
            .await?;

        let entity = entry.into_entity();
        let etag = self.options.etag().and_then(|etag| etag.etag_of(&entity));
        self.set_entity(slot, Some(entity))?;
        slot.set_etag(etag);
        slot.set_record_exists(true);
        debug!("Wrote state of grain {grain_ref}");
        Ok(())
    }

    async fn clear_state_with(
        &self,
        _grain_type: &str,
        grain_ref: &GrainReference,
        slot: &mut dyn StateSlot,
        operation: &OperationContext,
    ) -> Result<(), GrainStorageError> {
        let entity = self
            .options
            .bridge()
            .entity_from_state(self.state(slot)?);
        let supplied_etag = slot.etag().map(str::to_owned);
        debug!("Clearing state of grain {grain_ref}");

        operation
            .run(async {
                let mut context = self.factory.open_scope().await?;
                let mut entry = Entry::new(entity);
                if !operation.apply_entry_state(&mut entry) {
                    entry.set_state(EntryState::Deleted);
                }
                context
                    .save_entry(&mut entry)
                    .await
                    .map_err(|error| self.classify_save_error(error, supplied_etag.clone()))
            })
            .await?;

        slot.set_etag(None);
        slot.set_record_exists(false);
        debug!("Cleared state of grain {grain_ref}");
        Ok(())
    }
}
