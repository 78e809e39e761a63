//! # Unit orchestration
//!
//! Reroute engine for routed units.
//!
//! Every time the routing context changes the engine diffs the registered
//! units against their activity predicates and runs the lifecycle
//! operations needed to make exactly the active units mounted: unmounts and
//! unloads first, then loads, bootstraps and mounts. Concurrent triggers are
//! coalesced so that only one reroute pass runs at a time and every caller is
//! answered by exactly one pass.
//!
//! ## Example
//!
//! ```rust
//! use unit_orchestration::Engine;
//! use unit_registry::{UnitExports, UnitRegistration};
//!
//! # async fn example() -> unit_orchestration::Result<()> {
//! let engine: Engine<String> = Engine::new("/".to_string());
//!
//! engine.register(UnitRegistration::new(
//!     "app1",
//!     |_props| async { anyhow::Ok(UnitExports::noop()) },
//!     |path: &String| path.starts_with("/app1"),
//! ))?;
//!
//! engine.start().await?;
//! let active = engine.navigate("/app1/settings".to_string(), None).await?;
//! assert_eq!(active, vec!["app1"]);
//! # Ok(())
//! # }
//! ```

mod config;
mod context;
mod engine;
mod events;
mod handlers;
mod lifecycles;
mod runtime;
mod unload;

pub use config::{ConfigError, FailurePolicy, OrchestrationConfig, TimeoutConfig, Timeouts};
pub use context::OrchestrationContext;
pub use engine::{Engine, EngineBuilder};
pub use events::{
    EventPayload, EventReplay, LifecycleWarning, ListenerId, NoReplay, NotificationSink, Notifier,
    RoutingEventDetail, RoutingEventKind,
};
pub use handlers::{ErrorHandler, ErrorHandlers, HandlerId};
pub use lifecycles::Lifecycles;
pub use runtime::{Spawner, default_spawner, sleep};
pub use unload::UnloadOptions;

#[cfg(feature = "smol")]
pub use runtime::SmolSpawner;
#[cfg(feature = "tokio")]
pub use runtime::TokioSpawner;

use std::sync::Arc;
use unit_registry::{Operation, UnitStatus};

/// Error types for orchestration operations
///
/// Errors are `Clone` because a single failure answers every trigger that
/// was waiting on the pass.
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// Unit registry errors
    #[error("Unit registry error: {0}")]
    Registry(#[from] unit_registry::Error),

    /// A unit-supplied lifecycle function failed
    #[error("{operation} of unit '{unit}' failed: {cause}")]
    Lifecycle {
        /// Unit name
        unit: String,
        /// Operation that failed
        operation: Operation,
        /// Failure returned by the unit
        cause: Arc<anyhow::Error>,
    },

    /// An unload request could not be carried out
    #[error("Unit '{unit}' cannot be unloaded from status {status}")]
    UnloadAborted {
        /// Unit name
        unit: String,
        /// Status the unit was in
        status: UnitStatus,
    },

    /// A routing event listener failed
    #[error("Routing event listener failed: {0}")]
    Listener(Arc<anyhow::Error>),

    /// The pass answering a trigger went away without answering
    #[error("Reroute ended without answering the trigger")]
    Abandoned,
}

impl Error {
    /// Name of the unit the error is about, if any
    pub fn unit(&self) -> Option<&str> {
        match self {
            Error::Lifecycle { unit, .. } | Error::UnloadAborted { unit, .. } => Some(unit),
            Error::Registry(unit_registry::Error::UnitNotFound(unit))
            | Error::Registry(unit_registry::Error::UnitExists(unit))
            | Error::Registry(unit_registry::Error::InvalidStatusTransition { unit, .. })
            | Error::Registry(unit_registry::Error::MalformedUnit { unit, .. }) => Some(unit),
            _ => None,
        }
    }
}

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, Error>;
