//! Lifecycle export contract
//!
//! A unit's loader resolves to [`UnitExports`], a loosely assembled set of
//! lifecycle functions. The exports are validated exactly once, when the load
//! completes, into a [`LifecycleSet`] whose required operations are known to
//! be present. Everything downstream works with the typed set only.

use crate::{
    error::{Error, Result},
    models::Operation,
};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Activity predicate over the routing context
pub type ActivityFn<L> = Arc<dyn Fn(&L) -> bool + Send + Sync>;

/// A single unit-supplied lifecycle function
pub type LifecycleFn = Arc<dyn Fn(LifecycleProps) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`LifecycleFn`]
pub fn lifecycle_fn<F, Fut>(f: F) -> LifecycleFn
where
    F: Fn(LifecycleProps) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |props| f(props).boxed())
}

/// Props handed to every lifecycle function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleProps {
    /// Name of the unit the call is made for
    pub name: String,

    /// Custom props supplied at registration
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub custom: serde_json::Value,
}

impl LifecycleProps {
    /// Props carrying only the unit name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            custom: serde_json::Value::Null,
        }
    }
}

/// Produces the lifecycle exports of a unit
#[async_trait]
pub trait UnitLoader: Send + Sync {
    /// Fetch the unit code and hand back its exports
    async fn load(&self, props: LifecycleProps) -> anyhow::Result<UnitExports>;
}

#[async_trait]
impl<F, Fut> UnitLoader for F
where
    F: Fn(LifecycleProps) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<UnitExports>> + Send + 'static,
{
    async fn load(&self, props: LifecycleProps) -> anyhow::Result<UnitExports> {
        (self)(props).await
    }
}

/// Per-unit replacement of the configured warning thresholds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeoutOverrides {
    /// Bootstrap threshold
    pub bootstrap: Option<Duration>,
    /// Mount threshold
    pub mount: Option<Duration>,
    /// Unmount threshold
    pub unmount: Option<Duration>,
    /// Unload threshold
    pub unload: Option<Duration>,
}

impl TimeoutOverrides {
    /// Override for an operation, if any. Load always uses the configured
    /// threshold since no exports exist yet.
    pub fn get(&self, operation: Operation) -> Option<Duration> {
        match operation {
            Operation::Load => None,
            Operation::Bootstrap => self.bootstrap,
            Operation::Mount => self.mount,
            Operation::Unmount => self.unmount,
            Operation::Unload => self.unload,
        }
    }

    /// Set the same threshold for every overridable operation
    pub fn all(duration: Duration) -> Self {
        Self {
            bootstrap: Some(duration),
            mount: Some(duration),
            unmount: Some(duration),
            unload: Some(duration),
        }
    }
}

/// Unvalidated exports produced by a loader
#[derive(Clone, Default)]
pub struct UnitExports {
    bootstrap: Vec<LifecycleFn>,
    mount: Vec<LifecycleFn>,
    unmount: Vec<LifecycleFn>,
    unload: Vec<LifecycleFn>,
    timeouts: TimeoutOverrides,
}

impl UnitExports {
    /// Empty exports; fails validation until bootstrap, mount and unmount
    /// are supplied
    pub fn new() -> Self {
        Self::default()
    }

    /// Exports whose required operations all succeed immediately
    pub fn noop() -> Self {
        Self::new()
            .bootstrap(|_| async { Ok(()) })
            .mount(|_| async { Ok(()) })
            .unmount(|_| async { Ok(()) })
    }

    /// Append a bootstrap function
    pub fn bootstrap<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(LifecycleProps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.bootstrap.push(lifecycle_fn(f));
        self
    }

    /// Append a mount function
    pub fn mount<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(LifecycleProps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.mount.push(lifecycle_fn(f));
        self
    }

    /// Append an unmount function
    pub fn unmount<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(LifecycleProps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.unmount.push(lifecycle_fn(f));
        self
    }

    /// Append an unload function
    pub fn unload<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(LifecycleProps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.unload.push(lifecycle_fn(f));
        self
    }

    /// Append an already wrapped function for an operation
    pub fn with_fn(mut self, operation: Operation, f: LifecycleFn) -> Self {
        match operation {
            Operation::Load => {}
            Operation::Bootstrap => self.bootstrap.push(f),
            Operation::Mount => self.mount.push(f),
            Operation::Unmount => self.unmount.push(f),
            Operation::Unload => self.unload.push(f),
        }
        self
    }

    /// Replace the warning thresholds for this unit
    pub fn with_timeouts(mut self, timeouts: TimeoutOverrides) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Check the exports against the lifecycle contract
    pub fn validate(self, unit: &str) -> Result<LifecycleSet> {
        let mut missing = Vec::new();
        if self.bootstrap.is_empty() {
            missing.push(Operation::Bootstrap.as_str());
        }
        if self.mount.is_empty() {
            missing.push(Operation::Mount.as_str());
        }
        if self.unmount.is_empty() {
            missing.push(Operation::Unmount.as_str());
        }

        if !missing.is_empty() {
            return Err(Error::MalformedUnit {
                unit: unit.to_string(),
                reason: format!("missing required lifecycle functions: {}", missing.join(", ")),
            });
        }

        if self.timeouts.bootstrap == Some(Duration::ZERO)
            || self.timeouts.mount == Some(Duration::ZERO)
            || self.timeouts.unmount == Some(Duration::ZERO)
            || self.timeouts.unload == Some(Duration::ZERO)
        {
            return Err(Error::MalformedUnit {
                unit: unit.to_string(),
                reason: "timeout overrides must be greater than zero".to_string(),
            });
        }

        Ok(LifecycleSet {
            bootstrap: LifecycleChain(self.bootstrap),
            mount: LifecycleChain(self.mount),
            unmount: LifecycleChain(self.unmount),
            unload: (!self.unload.is_empty()).then(|| LifecycleChain(self.unload)),
            timeouts: self.timeouts,
        })
    }
}

impl fmt::Debug for UnitExports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitExports")
            .field("bootstrap", &self.bootstrap.len())
            .field("mount", &self.mount.len())
            .field("unmount", &self.unmount.len())
            .field("unload", &self.unload.len())
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

/// Functions run one after another for a single operation
#[derive(Clone)]
pub struct LifecycleChain(Vec<LifecycleFn>);

impl LifecycleChain {
    /// Run every function in order, stopping at the first failure
    pub async fn run(&self, props: LifecycleProps) -> anyhow::Result<()> {
        for f in &self.0 {
            f(props.clone()).await?;
        }
        Ok(())
    }

    /// Number of functions in the chain
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the chain is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for LifecycleChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LifecycleChain({} fns)", self.0.len())
    }
}

/// Validated lifecycle exports of a loaded unit
#[derive(Debug, Clone)]
pub struct LifecycleSet {
    /// Bootstrap functions
    pub bootstrap: LifecycleChain,
    /// Mount functions
    pub mount: LifecycleChain,
    /// Unmount functions
    pub unmount: LifecycleChain,
    /// Unload functions; absent means unloading succeeds immediately
    pub unload: Option<LifecycleChain>,
    /// Per-unit warning thresholds
    pub timeouts: TimeoutOverrides,
}

impl LifecycleSet {
    /// Chain for an operation. `None` for load, and for unload when the unit
    /// does not export one.
    pub fn chain(&self, operation: Operation) -> Option<&LifecycleChain> {
        match operation {
            Operation::Load => None,
            Operation::Bootstrap => Some(&self.bootstrap),
            Operation::Mount => Some(&self.mount),
            Operation::Unmount => Some(&self.unmount),
            Operation::Unload => self.unload.as_ref(),
        }
    }
}
