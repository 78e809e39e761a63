//! Orchestration context
//!
//! Carries the runtime dependencies shared by the engine and the lifecycle
//! wrappers: the spawner, the unit registry, configuration, the notifier and
//! the error handlers.

use crate::{
    config::OrchestrationConfig,
    events::Notifier,
    handlers::ErrorHandlers,
    runtime::{Spawner, default_spawner},
    unload::UnloadQueue,
};
use std::sync::Arc;
use unit_registry::Registry;

/// Context object for unit orchestration
pub struct OrchestrationContext<L> {
    /// Runtime spawner for the pass driver and deferred failures
    pub spawner: Arc<dyn Spawner>,

    /// Unit registry
    pub registry: Arc<Registry<L>>,

    /// Engine configuration
    pub config: Arc<OrchestrationConfig>,

    /// Routing notification fan-out
    pub notifier: Arc<Notifier>,

    /// Receivers of unit failures
    pub error_handlers: Arc<ErrorHandlers>,

    pub(crate) unloads: Arc<UnloadQueue>,
}

impl<L> Clone for OrchestrationContext<L> {
    fn clone(&self) -> Self {
        Self {
            spawner: self.spawner.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
            notifier: self.notifier.clone(),
            error_handlers: self.error_handlers.clone(),
            unloads: self.unloads.clone(),
        }
    }
}

impl<L> OrchestrationContext<L> {
    /// Create a context on the runtime selected by the enabled feature
    pub fn new(config: OrchestrationConfig, registry: Arc<Registry<L>>) -> Self {
        Self::with_spawner(default_spawner(), config, registry)
    }

    /// Create a context with a specific spawner
    pub fn with_spawner(
        spawner: Arc<dyn Spawner>,
        config: OrchestrationConfig,
        registry: Arc<Registry<L>>,
    ) -> Self {
        let error_handlers = Arc::new(ErrorHandlers::new());
        let notifier = Arc::new(Notifier::new(spawner.clone(), error_handlers.clone()));

        Self {
            spawner,
            registry,
            config: Arc::new(config),
            notifier,
            error_handlers,
            unloads: Arc::new(UnloadQueue::new()),
        }
    }
}
