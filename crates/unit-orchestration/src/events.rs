//! Routing notifications and deferred event replay
//!
//! A pass talks to the outside world through two collaborators:
//!
//! - [`NotificationSink`]s receive the routing events of every pass
//!   (`before-routing-event`, then `no-app-change` or `app-change`, then
//!   `routing-event`) and slow-operation warnings.
//! - An [`EventReplay`] receives the payload of every trigger answered by a
//!   pass, once the unmount-all barrier has settled, so environment events
//!   held back during the pass are replayed in arrival order.

use crate::{Error, handlers::ErrorHandlers, runtime::Spawner};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use unit_registry::{Operation, UnitStatus};
use uuid::Uuid;

/// Opaque payload carried by a trigger, usually the environment event that
/// caused it
pub type EventPayload = serde_json::Value;

/// Routing notification kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingEventKind {
    /// Emitted once the pass has computed what it is going to change
    BeforeRoutingEvent,
    /// The pass touched no unit
    NoAppChange,
    /// The pass touched at least one unit
    AppChange,
    /// Emitted after every successful pass
    RoutingEvent,
}

impl RoutingEventKind {
    /// Event name as dispatched to listeners
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingEventKind::BeforeRoutingEvent => "before-routing-event",
            RoutingEventKind::NoAppChange => "no-app-change",
            RoutingEventKind::AppChange => "app-change",
            RoutingEventKind::RoutingEvent => "routing-event",
        }
    }
}

impl fmt::Display for RoutingEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statuses seeded into every grouping, even when empty
const GROUPED_STATUSES: [UnitStatus; 4] = [
    UnitStatus::Mounted,
    UnitStatus::NotMounted,
    UnitStatus::NotLoaded,
    UnitStatus::SkipBecauseBroken,
];

/// Detail attached to every routing notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingEventDetail {
    /// Status of every unit touched by the pass, in the order it was touched
    pub new_statuses_by_name: IndexMap<String, UnitStatus>,

    /// Status each touched unit had when the pass started
    pub old_statuses_by_name: IndexMap<String, UnitStatus>,

    /// Touched unit names grouped by their status
    pub names_grouped_by_new_status: BTreeMap<UnitStatus, Vec<String>>,

    /// Number of units touched by the pass
    pub total_changed_count: usize,

    /// Payload of the trigger that started the pass, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_trigger_payload: Option<EventPayload>,
}

impl RoutingEventDetail {
    /// Empty detail with the standard status groups in place
    pub fn new(original_trigger_payload: Option<EventPayload>) -> Self {
        Self {
            new_statuses_by_name: IndexMap::new(),
            old_statuses_by_name: IndexMap::new(),
            names_grouped_by_new_status: GROUPED_STATUSES
                .into_iter()
                .map(|status| (status, Vec::new()))
                .collect(),
            total_changed_count: 0,
            original_trigger_payload,
        }
    }

    /// Record one touched unit
    pub fn record(&mut self, name: &str, old: UnitStatus, new: UnitStatus) {
        self.old_statuses_by_name.insert(name.to_string(), old);
        if self.new_statuses_by_name.insert(name.to_string(), new).is_none() {
            self.names_grouped_by_new_status
                .entry(new)
                .or_default()
                .push(name.to_string());
            self.total_changed_count += 1;
        }
    }

    /// Names of touched units that ended in `status`
    pub fn names_with_status(&self, status: UnitStatus) -> &[String] {
        self.names_grouped_by_new_status
            .get(&status)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Emitted when a lifecycle operation outlives its warning threshold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleWarning {
    /// Unit name
    pub unit: String,
    /// Operation that is running late
    pub operation: Operation,
    /// Threshold that was exceeded
    pub threshold: Duration,
    /// Human-readable message
    pub message: String,
}

impl LifecycleWarning {
    /// Build the warning for an operation
    pub fn new(unit: &str, operation: Operation, threshold: Duration) -> Self {
        Self {
            unit: unit.to_string(),
            operation,
            threshold,
            message: format!(
                "{} unit '{}' did not resolve or reject within {} milliseconds",
                operation.progressive(),
                unit,
                threshold.as_millis()
            ),
        }
    }
}

/// Receives routing notifications
pub trait NotificationSink: Send + Sync {
    /// Handle a routing event. A failure never affects the pass; it is
    /// reported to the error handlers on a later scheduler turn.
    fn on_routing_event(
        &self,
        kind: RoutingEventKind,
        detail: &RoutingEventDetail,
    ) -> anyhow::Result<()>;

    /// Handle a slow-operation warning
    fn on_warning(&self, _warning: &LifecycleWarning) {}
}

/// Replays environment events that were held back during a pass
pub trait EventReplay: Send + Sync {
    /// Replay the events captured for one trigger
    fn replay(&self, payload: Option<&EventPayload>);
}

/// Replay that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReplay;

impl EventReplay for NoReplay {
    fn replay(&self, _payload: Option<&EventPayload>) {}
}

/// Identifies a registered notification sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

/// Fans notifications out to the registered sinks
pub struct Notifier {
    sinks: RwLock<Vec<(ListenerId, Arc<dyn NotificationSink>)>>,
    spawner: Arc<dyn Spawner>,
    handlers: Arc<ErrorHandlers>,
}

impl Notifier {
    /// Create a notifier deferring listener failures through `spawner`
    pub fn new(spawner: Arc<dyn Spawner>, handlers: Arc<ErrorHandlers>) -> Self {
        Self {
            sinks: RwLock::new(Vec::new()),
            spawner,
            handlers,
        }
    }

    /// Register a sink
    pub fn add(&self, sink: Arc<dyn NotificationSink>) -> ListenerId {
        let id = ListenerId(Uuid::new_v4());
        self.sinks.write().push((id, sink));
        id
    }

    /// Remove a sink; returns whether it was registered
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut sinks = self.sinks.write();
        let before = sinks.len();
        sinks.retain(|(sink_id, _)| *sink_id != id);
        sinks.len() != before
    }

    /// Number of registered sinks
    pub fn len(&self) -> usize {
        self.sinks.read().len()
    }

    /// Whether no sink is registered
    pub fn is_empty(&self) -> bool {
        self.sinks.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn NotificationSink>> {
        self.sinks.read().iter().map(|(_, sink)| sink.clone()).collect()
    }

    /// Dispatch a routing event to every sink
    ///
    /// Every sink sees the event even if an earlier one fails. Failures are
    /// handed to the error handlers from a spawned task, after this call has
    /// returned.
    pub fn emit(&self, kind: RoutingEventKind, detail: &RoutingEventDetail) {
        debug!(
            "Dispatching {} ({} units changed)",
            kind, detail.total_changed_count
        );

        let failures: Vec<anyhow::Error> = self
            .snapshot()
            .into_iter()
            .filter_map(|sink| sink.on_routing_event(kind, detail).err())
            .collect();

        if failures.is_empty() {
            return;
        }

        let handlers = self.handlers.clone();
        self.spawner.spawn(Box::pin(async move {
            for failure in failures {
                handlers.report(&Error::Listener(Arc::new(failure)));
            }
        }));
    }

    /// Dispatch a slow-operation warning
    pub fn warn(&self, warning: &LifecycleWarning) {
        warn!("{}", warning.message);
        for sink in self.snapshot() {
            sink.on_warning(warning);
        }
    }
}
