//! Registry of routed units
//!
//! A unit is an independently lifecycle-managed application: it has a name,
//! an activity predicate over an opaque routing context and a loader that
//! produces its lifecycle exports (bootstrap, mount, unmount and an optional
//! unload).
//!
//! The registry exclusively owns unit records. It enforces the status table
//! on every write and answers the selector queries the reroute engine needs
//! (units to load, mount, unmount and unload).
//!
//! # Example
//!
//! ```
//! use unit_registry::{Registry, UnitExports, UnitRegistration, UnitStatus};
//!
//! let registry: Registry<String> = Registry::new();
//! registry
//!     .register(UnitRegistration::new(
//!         "navbar",
//!         |_props| async { anyhow::Ok(UnitExports::noop()) },
//!         |_location: &String| true,
//!     ))
//!     .unwrap();
//!
//! assert_eq!(registry.status("navbar").unwrap(), UnitStatus::NotLoaded);
//! assert_eq!(registry.check_activity(&"/anything".to_string()), vec!["navbar"]);
//! ```

pub mod error;
pub mod lifecycle;
pub mod models;
pub mod registry;

pub use error::{Error, Result};
pub use lifecycle::{
    ActivityFn, LifecycleChain, LifecycleFn, LifecycleProps, LifecycleSet, TimeoutOverrides,
    UnitExports, UnitLoader, lifecycle_fn,
};
pub use models::{Operation, UnitSnapshot, UnitStatus};
pub use registry::{Registry, ReroutePlan, UnitRegistration};

/// Re-export key types for convenience
pub mod prelude {
    pub use crate::{
        Error, LifecycleProps, Operation, Registry, Result, UnitExports, UnitRegistration,
        UnitStatus,
    };
}
