//! Scenario files
//!
//! A scenario describes a set of scripted units, engine settings and a list
//! of routes to visit:
//!
//! ```yaml
//! settings:
//!   timeouts: { mount: { warning_millis: 50 } }
//!   failure_policy: isolate
//! units:
//!   - name: app1
//!     active_when: { prefix: /app1 }
//!     delays: { mount: 10 }
//!     fail: [unmount]
//!   - name: navbar
//!     active_when: { always: true }
//! routes: [/app1, /app2]
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use unit_orchestration::{Engine, OrchestrationConfig, sleep};
use unit_registry::{Operation, UnitExports, UnitRegistration, lifecycle_fn};

/// A parsed scenario file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    /// Engine settings
    pub settings: OrchestrationConfig,
    /// Scripted units, in registration order
    pub units: Vec<UnitSpec>,
    /// Routes visited by `simulate`, in order
    pub routes: Vec<String>,
}

/// When a scripted unit is active. Exactly one condition must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ActiveWhen {
    /// Active on routes starting with this prefix
    pub prefix: Option<String>,
    /// Active on routes containing this fragment
    pub contains: Option<String>,
    /// Active on every route
    pub always: bool,
}

impl ActiveWhen {
    fn conditions(&self) -> usize {
        usize::from(self.prefix.is_some()) + usize::from(self.contains.is_some()) + usize::from(self.always)
    }

    /// Whether the unit is active at `route`
    pub fn matches(&self, route: &str) -> bool {
        if self.always {
            return true;
        }
        if let Some(prefix) = &self.prefix {
            return route.starts_with(prefix.as_str());
        }
        if let Some(fragment) = &self.contains {
            return route.contains(fragment.as_str());
        }
        false
    }
}

/// A unit whose lifecycle functions sleep and fail as scripted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSpec {
    /// Unit name
    pub name: String,

    /// Activity condition
    pub active_when: ActiveWhen,

    /// Milliseconds each operation takes
    #[serde(default)]
    pub delays: HashMap<Operation, u64>,

    /// Operations that fail
    #[serde(default)]
    pub fail: Vec<Operation>,

    /// Custom props handed to every lifecycle function
    #[serde(default)]
    pub custom_props: serde_json::Value,
}

impl UnitSpec {
    async fn perform(&self, operation: Operation) -> anyhow::Result<()> {
        if let Some(millis) = self.delays.get(&operation) {
            sleep(Duration::from_millis(*millis)).await;
        }
        if self.fail.contains(&operation) {
            bail!("scripted {} failure", operation);
        }
        debug!("Scripted {} of unit {} done", operation, self.name);
        Ok(())
    }

    fn exports(self: &Arc<Self>) -> UnitExports {
        Operation::ALL
            .into_iter()
            .filter(|operation| *operation != Operation::Load)
            .fold(UnitExports::new(), |exports, operation| {
                let unit = self.clone();
                exports.with_fn(
                    operation,
                    lifecycle_fn(move |_props| {
                        let unit = unit.clone();
                        async move { unit.perform(operation).await }
                    }),
                )
            })
    }

    /// Registration running this unit's script
    pub fn registration(&self) -> UnitRegistration<String> {
        let unit = Arc::new(self.clone());
        let active_when = self.active_when.clone();

        UnitRegistration::new(
            self.name.clone(),
            move |_props| {
                let unit = unit.clone();
                async move {
                    unit.perform(Operation::Load).await?;
                    anyhow::Ok(unit.exports())
                }
            },
            move |route: &String| active_when.matches(route),
        )
        .with_custom_props(self.custom_props.clone())
    }
}

impl Scenario {
    /// Check names, activity conditions and settings
    pub fn validate(&self) -> Result<()> {
        self.settings
            .validate()
            .context("Invalid scenario settings")?;

        let mut seen = HashSet::new();
        for unit in &self.units {
            if unit.name.trim().is_empty() {
                bail!("Unit names must not be empty");
            }
            if !seen.insert(unit.name.as_str()) {
                bail!("Unit '{}' is defined more than once", unit.name);
            }
            if unit.active_when.conditions() != 1 {
                bail!(
                    "Unit '{}' must set exactly one of prefix, contains or always in active_when",
                    unit.name
                );
            }
        }

        Ok(())
    }

    /// Build an engine at `location` with every unit registered
    pub fn build_engine(&self, location: String) -> Result<Engine<String>> {
        let engine = Engine::builder(location)
            .config(self.settings.clone())
            .build();

        for unit in &self.units {
            engine
                .register(unit.registration())
                .with_context(|| format!("Failed to register unit '{}'", unit.name))?;
        }

        Ok(engine)
    }
}

/// Parse and validate a scenario file
pub fn parse_file(path: impl AsRef<Path>) -> Result<Scenario> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Parse and validate a scenario from YAML
pub fn parse_str(content: &str) -> Result<Scenario> {
    let scenario: Scenario = serde_yaml::from_str(content)?;
    scenario.validate()?;
    Ok(scenario)
}
