//! Engine configuration.
//!
//! Configuration is plain serde data so it can be embedded in a larger YAML
//! document or loaded on its own:
//!
//! ```yaml
//! timeouts:
//!   bootstrap:
//!     warning_millis: 2000
//!   mount:
//!     warning_millis: 500
//! failure_policy: propagate
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use unit_registry::{Operation, TimeoutOverrides};

/// Default slow-operation warning threshold in milliseconds
pub const DEFAULT_WARNING_MILLIS: u64 = 1000;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    /// Failed to parse YAML
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Warning threshold of one operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Milliseconds an operation may run before a warning is emitted
    pub warning_millis: u64,
}

impl TimeoutConfig {
    /// Threshold as a duration
    pub fn warning(&self) -> Duration {
        Duration::from_millis(self.warning_millis)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            warning_millis: DEFAULT_WARNING_MILLIS,
        }
    }
}

/// Warning thresholds per operation kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Load threshold
    pub load: TimeoutConfig,
    /// Bootstrap threshold
    pub bootstrap: TimeoutConfig,
    /// Mount threshold
    pub mount: TimeoutConfig,
    /// Unmount threshold
    pub unmount: TimeoutConfig,
    /// Unload threshold
    pub unload: TimeoutConfig,
}

impl Timeouts {
    /// Threshold for an operation kind
    pub fn get(&self, operation: Operation) -> &TimeoutConfig {
        match operation {
            Operation::Load => &self.load,
            Operation::Bootstrap => &self.bootstrap,
            Operation::Mount => &self.mount,
            Operation::Unmount => &self.unmount,
            Operation::Unload => &self.unload,
        }
    }

    /// Change the threshold of an operation kind
    pub fn set(&mut self, operation: Operation, warning: Duration) {
        let config = match operation {
            Operation::Load => &mut self.load,
            Operation::Bootstrap => &mut self.bootstrap,
            Operation::Mount => &mut self.mount,
            Operation::Unmount => &mut self.unmount,
            Operation::Unload => &mut self.unload,
        };
        config.warning_millis = u64::try_from(warning.as_millis()).unwrap_or(u64::MAX);
    }

    /// Same threshold for every operation kind
    pub fn uniform(warning: Duration) -> Self {
        let mut timeouts = Self::default();
        for operation in Operation::ALL {
            timeouts.set(operation, warning);
        }
        timeouts
    }
}

/// What a failing unit operation does to the rest of the pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// The unit is marked broken and reported; the pass carries on and
    /// resolves normally
    #[default]
    Isolate,
    /// The unit is marked broken and reported, and the failure also fails
    /// the pass: a failed unmount aborts every mount of the pass, a failed
    /// load, bootstrap or mount rejects the waiting triggers
    Propagate,
}

/// Engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Slow-operation warning thresholds
    pub timeouts: Timeouts,
    /// Failure handling
    pub failure_policy: FailurePolicy,
}

impl OrchestrationConfig {
    /// Parse configuration from a YAML string
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Check the configuration for values the engine cannot use
    pub fn validate(&self) -> Result<(), ConfigError> {
        for operation in Operation::ALL {
            if self.timeouts.get(operation).warning_millis == 0 {
                return Err(ConfigError::Validation(format!(
                    "timeouts.{}.warning_millis must be greater than zero",
                    operation
                )));
            }
        }
        Ok(())
    }

    /// Threshold for an operation, honouring the unit's own overrides
    pub fn warning_threshold(
        &self,
        operation: Operation,
        overrides: Option<&TimeoutOverrides>,
    ) -> Duration {
        overrides
            .and_then(|overrides| overrides.get(operation))
            .unwrap_or_else(|| self.timeouts.get(operation).warning())
    }

    /// Builder-style threshold change
    pub fn with_warning(mut self, operation: Operation, warning: Duration) -> Self {
        self.timeouts.set(operation, warning);
        self
    }

    /// Builder-style policy change
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}
