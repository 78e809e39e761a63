//! Run a scenario through a live engine

use crate::scenario::{self, Scenario};
use anyhow::Result;
use comfy_table::{Cell, Color, Table};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use unit_orchestration::{
    LifecycleWarning, NotificationSink, RoutingEventDetail, RoutingEventKind,
};
use unit_registry::UnitStatus;

/// A routing event seen during one step
#[derive(Debug, Clone, Serialize)]
pub struct RecordedEvent {
    /// Event kind
    pub kind: RoutingEventKind,
    /// Event detail
    pub detail: RoutingEventDetail,
}

/// Status of one unit after a step
#[derive(Debug, Clone, Serialize)]
pub struct UnitState {
    /// Unit name
    pub name: String,
    /// Status after the step
    pub status: UnitStatus,
}

/// Outcome of visiting one route
#[derive(Debug, Clone, Serialize)]
pub struct Step {
    /// Route visited
    pub route: String,
    /// Active units reported by the pass
    pub active: Vec<String>,
    /// Set when the pass itself was rejected
    pub failure: Option<String>,
    /// Every unit in registration order
    pub units: Vec<UnitState>,
    /// Routing events of the pass
    pub events: Vec<RecordedEvent>,
    /// Slow-operation warnings
    pub warnings: Vec<String>,
    /// Unit failures reported to the error handlers
    pub errors: Vec<String>,
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<RecordedEvent>>,
    warnings: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

impl Recorder {
    fn drain(&self) -> (Vec<RecordedEvent>, Vec<String>, Vec<String>) {
        (
            std::mem::take(&mut *self.events.lock()),
            std::mem::take(&mut *self.warnings.lock()),
            std::mem::take(&mut *self.errors.lock()),
        )
    }
}

impl NotificationSink for Recorder {
    fn on_routing_event(
        &self,
        kind: RoutingEventKind,
        detail: &RoutingEventDetail,
    ) -> anyhow::Result<()> {
        self.events.lock().push(RecordedEvent {
            kind,
            detail: detail.clone(),
        });
        Ok(())
    }

    fn on_warning(&self, warning: &LifecycleWarning) {
        self.warnings.lock().push(warning.message.clone());
    }
}

/// Start an engine on the first route, then navigate to each following
/// route. A rejected pass is recorded on its step and does not stop the run.
pub async fn simulate(scenario: &Scenario) -> Result<Vec<Step>> {
    let mut routes = scenario.routes.iter().cloned();
    let first = routes.next().unwrap_or_else(|| "/".to_string());

    let engine = scenario.build_engine(first.clone())?;
    let recorder = Arc::new(Recorder::default());
    engine.add_listener(recorder.clone());
    let errors = recorder.clone();
    engine.add_error_handler(move |err| errors.errors.lock().push(err.to_string()));

    info!("Simulating {} unit(s)", scenario.units.len());

    let mut steps = Vec::new();
    let mut result = engine.start().await;
    let mut route = first;

    loop {
        let (active, failure) = match result {
            Ok(active) => (active, None),
            Err(err) => (engine.mounted_unit_names(), Some(err.to_string())),
        };

        let units = engine
            .unit_names()
            .into_iter()
            .map(|name| -> Result<UnitState> {
                let status = engine.status(&name)?;
                Ok(UnitState { name, status })
            })
            .collect::<Result<Vec<_>>>()?;

        let (events, warnings, errors) = recorder.drain();
        steps.push(Step {
            route,
            active,
            failure,
            units,
            events,
            warnings,
            errors,
        });

        let Some(next) = routes.next() else {
            break;
        };
        result = engine.navigate(next.clone(), None).await;
        route = next;
    }

    Ok(steps)
}

/// Simulate a scenario file and print every step
pub async fn run(path: &Path, json: bool) -> Result<()> {
    let scenario = scenario::parse_file(path)?;
    let steps = simulate(&scenario).await?;

    for step in &steps {
        if json {
            println!("{}", serde_json::to_string(step)?);
        } else {
            display_step(step);
        }
    }

    Ok(())
}

fn display_step(step: &Step) {
    println!("→ {}", step.route);
    match &step.failure {
        Some(failure) => println!("  ✗ Reroute failed: {}", failure),
        None => println!("  Active: [{}]", step.active.join(", ")),
    }

    let mut table = Table::new();
    table.set_header(vec!["UNIT", "STATUS"]);
    for unit in &step.units {
        let color = match unit.status {
            UnitStatus::Mounted => Color::Green,
            UnitStatus::SkipBecauseBroken => Color::Red,
            UnitStatus::NotLoaded => Color::DarkGrey,
            _ => Color::Yellow,
        };
        table.add_row(vec![
            Cell::new(&unit.name),
            Cell::new(unit.status.as_str()).fg(color),
        ]);
    }
    println!("{}", table);

    for event in &step.events {
        println!(
            "  event: {} ({} changed)",
            event.kind, event.detail.total_changed_count
        );
    }
    for warning in &step.warnings {
        println!("  ⚠ {}", warning);
    }
    for error in &step.errors {
        println!("  ✗ {}", error);
    }
    println!();
}
