//! Lifecycle operation wrappers
//!
//! Each wrapper moves a unit along one arrow of the status table:
//!
//! | operation | from                                | in flight             | to                 |
//! |-----------|-------------------------------------|-----------------------|--------------------|
//! | load      | `NOT_LOADED`                        | `LOADING_SOURCE_CODE` | `NOT_BOOTSTRAPPED` |
//! | bootstrap | `NOT_BOOTSTRAPPED`                  | `BOOTSTRAPPING`       | `NOT_MOUNTED`      |
//! | mount     | `NOT_MOUNTED`                       | `MOUNTING`            | `MOUNTED`          |
//! | unmount   | `MOUNTED`                           | `UNMOUNTING`          | `NOT_MOUNTED`      |
//! | unload    | `NOT_MOUNTED` or `NOT_BOOTSTRAPPED` | `UNLOADING`           | `NOT_LOADED`       |
//!
//! A wrapper whose precondition does not hold returns immediately without
//! calling the unit. A failing unit function demotes the unit to
//! `SKIP_BECAUSE_BROKEN` and is reported to the error handlers; whether the
//! failure is also returned depends on the [`FailurePolicy`].

mod activation;
mod load;
mod timeouts;
mod unload;

use crate::{Error, FailurePolicy, Result, context::OrchestrationContext};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error};
use unit_registry::{LifecycleSet, Operation, UnitStatus};

/// Runs unit lifecycle functions under the status table
pub struct Lifecycles<L> {
    ctx: OrchestrationContext<L>,
}

impl<L> Clone for Lifecycles<L> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
        }
    }
}

impl<L> Lifecycles<L> {
    /// Create wrappers over a context
    pub fn new(ctx: OrchestrationContext<L>) -> Self {
        Self { ctx }
    }

    /// The context the wrappers operate on
    pub fn context(&self) -> &OrchestrationContext<L> {
        &self.ctx
    }

    /// Run the unit's chain for `operation` after claiming the `from ->
    /// in flight` arrow; settle on success, break the unit on failure
    async fn transition(&self, name: &str, operation: Operation, from: UnitStatus) -> Result<()> {
        let registry = &self.ctx.registry;

        if registry
            .try_transition(name, &[from], operation.in_flight_status())?
            .is_none()
        {
            debug!("Skipping {} of unit {}: not {}", operation, name, from);
            return Ok(());
        }

        let Some(set) = registry.lifecycles(name)? else {
            return self.fail(name, missing_exports(name));
        };

        match self.run_chain(name, operation, &set).await? {
            Ok(()) => {
                registry.set_status(name, operation.settled_status())?;
                Ok(())
            }
            Err(cause) => self.fail(name, lifecycle_error(name, operation, cause)),
        }
    }

    /// Run the chain for `operation` under the warning timer. A missing
    /// chain succeeds immediately.
    async fn run_chain(
        &self,
        name: &str,
        operation: Operation,
        set: &LifecycleSet,
    ) -> Result<anyhow::Result<()>> {
        let Some(chain) = set.chain(operation) else {
            return Ok(Ok(()));
        };

        let props = self.ctx.registry.props(name)?;
        let threshold = self
            .ctx
            .config
            .warning_threshold(operation, Some(&set.timeouts));

        Ok(timeouts::reasonable_time(
            &self.ctx.notifier,
            name,
            operation,
            threshold,
            contain_panic(name, operation, chain.run(props)),
        )
        .await)
    }

    /// Demote a unit to broken and report the failure
    fn fail(&self, name: &str, err: Error) -> Result<()> {
        debug!("Unit {} failed: {}", name, err);
        let marked = self.ctx.registry.mark_broken(name);
        self.ctx.error_handlers.report(&err);
        marked?;

        match self.ctx.config.failure_policy {
            FailurePolicy::Isolate => Ok(()),
            FailurePolicy::Propagate => Err(err),
        }
    }
}

/// Run unit-supplied work, turning a panic into an ordinary failure so the
/// unit can be broken like any other failing unit
pub(super) async fn contain_panic<T>(
    name: &str,
    operation: Operation,
    work: impl Future<Output = anyhow::Result<T>>,
) -> anyhow::Result<T> {
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!("{} of unit {} panicked: {}", operation, name, message);
            Err(anyhow::anyhow!("panicked: {}", message))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

fn lifecycle_error(name: &str, operation: Operation, cause: anyhow::Error) -> Error {
    Error::Lifecycle {
        unit: name.to_string(),
        operation,
        cause: Arc::new(cause),
    }
}

fn missing_exports(name: &str) -> Error {
    Error::Registry(unit_registry::Error::MalformedUnit {
        unit: name.to_string(),
        reason: "no lifecycle exports installed".to_string(),
    })
}
