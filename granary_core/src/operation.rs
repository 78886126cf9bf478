//! Per call settings of a grain storage operation.

use crate::context::Entry;
use crate::entity::Entity;
use crate::error::GrainStorageError;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type ConfigureEntryStateFn<E> = Arc<dyn Fn(&mut Entry<E>) + Send + Sync>;

/// Settings that apply to a single read, write or clear.
///
/// An entry state override replaces the configured [`crate::options::SaveEntryConfigurator`] for
/// entities of its type, for the calls this context is passed to and no others.
#[derive(Clone, Default)]
pub struct OperationContext {
    entry_state: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    cancellation: Option<CancellationToken>,
}

impl OperationContext {
    /// An empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides how entries of `E` are marked before they are saved.
    pub fn configure_entry_state<E: Entity>(
        &mut self,
        configure: impl Fn(&mut Entry<E>) + Send + Sync + 'static,
    ) -> &mut Self {
        let configure: ConfigureEntryStateFn<E> = Arc::new(configure);
        self.entry_state
            .insert(TypeId::of::<E>(), Arc::new(configure));
        self
    }

    /// Builder form of [`OperationContext::configure_entry_state`].
    pub fn with_entry_state<E: Entity>(
        mut self,
        configure: impl Fn(&mut Entry<E>) + Send + Sync + 'static,
    ) -> Self {
        self.configure_entry_state(configure);
        self
    }

    /// Whether an entry state override exists for `E`.
    pub fn is_entry_state_configured<E: Entity>(&self) -> bool {
        self.entry_state.contains_key(&TypeId::of::<E>())
    }

    /// Removes every entry state override.
    pub fn clear(&mut self) {
        self.entry_state.clear();
    }

    /// Aborts the engine call when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// The cancellation token, if any.
    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    /// Applies the override for `E` to `entry`. Returns `false` if there is none.
    pub(crate) fn apply_entry_state<E: Entity>(&self, entry: &mut Entry<E>) -> bool {
        match self
            .entry_state
            .get(&TypeId::of::<E>())
            .and_then(|c| c.downcast_ref::<ConfigureEntryStateFn<E>>())
        {
            Some(configure) => {
                configure(entry);
                true
            }
            None => false,
        }
    }

    /// Runs `operation`, unless the cancellation token fires first.
    pub(crate) async fn run<T>(
        &self,
        operation: impl Future<Output = Result<T, GrainStorageError>>,
    ) -> Result<T, GrainStorageError> {
        match &self.cancellation {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(GrainStorageError::Cancelled),
                result = operation => result,
            },
            None => operation.await,
        }
    }
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext")
            .field("entry_state_overrides", &self.entry_state.len())
            .field("cancellable", &self.cancellation.is_some())
            .finish()
    }
}
