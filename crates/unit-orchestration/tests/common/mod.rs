//! Common test utilities

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use unit_orchestration::{
    Engine, EventPayload, EventReplay, LifecycleWarning, NotificationSink, OrchestrationConfig,
    RoutingEventDetail, RoutingEventKind, sleep,
};
use unit_registry::{
    LifecycleProps, Operation, TimeoutOverrides, UnitExports, UnitRegistration, lifecycle_fn,
};

/// Whether a journal entry marks the start or the end of a unit function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    End,
}

#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub unit: String,
    pub operation: Operation,
    pub phase: Phase,
    pub at: Instant,
}

/// Shared record of every unit function invocation
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<JournalEntry>>>);

impl Journal {
    pub fn record(&self, unit: &str, operation: Operation, phase: Phase) {
        self.0.lock().push(JournalEntry {
            unit: unit.to_string(),
            operation,
            phase,
            at: Instant::now(),
        });
    }

    /// `"<unit>:<operation>"` for every started call, in start order
    pub fn calls(&self) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter(|entry| entry.phase == Phase::Start)
            .map(|entry| format!("{}:{}", entry.unit, entry.operation))
            .collect()
    }

    pub fn count(&self, unit: &str, operation: Operation) -> usize {
        self.0
            .lock()
            .iter()
            .filter(|entry| {
                entry.unit == unit && entry.operation == operation && entry.phase == Phase::Start
            })
            .count()
    }

    pub fn time_of(&self, unit: &str, operation: Operation, phase: Phase) -> Option<Instant> {
        self.0
            .lock()
            .iter()
            .find(|entry| entry.unit == unit && entry.operation == operation && entry.phase == phase)
            .map(|entry| entry.at)
    }
}

/// Pauses a unit function until the test releases it
#[derive(Clone)]
pub struct Gate {
    started_tx: async_channel::Sender<()>,
    started_rx: async_channel::Receiver<()>,
    release_tx: async_channel::Sender<()>,
    release_rx: async_channel::Receiver<()>,
}

impl Gate {
    pub fn new() -> Self {
        let (started_tx, started_rx) = async_channel::unbounded();
        let (release_tx, release_rx) = async_channel::unbounded();
        Self {
            started_tx,
            started_rx,
            release_tx,
            release_rx,
        }
    }

    /// Wait until the gated function has been entered
    pub async fn entered(&self) {
        self.started_rx.recv().await.unwrap();
    }

    /// Let the gated function carry on
    pub fn release(&self) {
        self.release_tx.try_send(()).unwrap();
    }

    async fn pass(&self) {
        self.started_tx.send(()).await.unwrap();
        self.release_rx.recv().await.unwrap();
    }
}

type Activity = Arc<dyn Fn(&String) -> bool + Send + Sync>;

/// A unit whose lifecycle functions journal their calls and follow a script
#[derive(Clone)]
pub struct ScriptedUnit {
    name: String,
    activity: Activity,
    delays: HashMap<Operation, Duration>,
    failures: Vec<Operation>,
    panics: Vec<Operation>,
    gates: HashMap<Operation, Gate>,
    timeouts: TimeoutOverrides,
    custom_props: serde_json::Value,
    props_seen: Arc<Mutex<Vec<(Operation, LifecycleProps)>>>,
}

impl ScriptedUnit {
    /// Unit active on every path starting with `prefix`
    pub fn prefix(name: &str, prefix: &str) -> Self {
        let prefix = prefix.to_string();
        Self::with_activity(name, Arc::new(move |path: &String| path.starts_with(&prefix)))
    }

    /// Unit active everywhere
    pub fn always(name: &str) -> Self {
        Self::with_activity(name, Arc::new(|_: &String| true))
    }

    /// Unit active wherever `activity` holds
    pub fn matching(name: &str, activity: impl Fn(&String) -> bool + Send + Sync + 'static) -> Self {
        Self::with_activity(name, Arc::new(activity))
    }

    fn with_activity(name: &str, activity: Activity) -> Self {
        Self {
            name: name.to_string(),
            activity,
            delays: HashMap::new(),
            failures: Vec::new(),
            panics: Vec::new(),
            gates: HashMap::new(),
            timeouts: TimeoutOverrides::default(),
            custom_props: serde_json::Value::Null,
            props_seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn delay(mut self, operation: Operation, millis: u64) -> Self {
        self.delays.insert(operation, Duration::from_millis(millis));
        self
    }

    pub fn fail(mut self, operation: Operation) -> Self {
        self.failures.push(operation);
        self
    }

    pub fn panic(mut self, operation: Operation) -> Self {
        self.panics.push(operation);
        self
    }

    pub fn gate(mut self, operation: Operation, gate: &Gate) -> Self {
        self.gates.insert(operation, gate.clone());
        self
    }

    pub fn timeouts(mut self, timeouts: TimeoutOverrides) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn custom_props(mut self, props: serde_json::Value) -> Self {
        self.custom_props = props;
        self
    }

    /// Props every lifecycle function was called with, including load
    pub fn props_seen(&self) -> Vec<(Operation, LifecycleProps)> {
        self.props_seen.lock().clone()
    }

    async fn perform(&self, journal: &Journal, operation: Operation, props: LifecycleProps) -> anyhow::Result<()> {
        journal.record(&self.name, operation, Phase::Start);
        self.props_seen.lock().push((operation, props));

        if let Some(gate) = self.gates.get(&operation) {
            gate.pass().await;
        }
        if let Some(delay) = self.delays.get(&operation) {
            sleep(*delay).await;
        }

        if self.panics.contains(&operation) {
            panic!("{} of {} panicked on purpose", operation, self.name);
        }

        journal.record(&self.name, operation, Phase::End);
        if self.failures.contains(&operation) {
            anyhow::bail!("{} of {} failed on purpose", operation, self.name);
        }
        Ok(())
    }

    fn exports(&self, journal: &Journal) -> UnitExports {
        let mut exports = UnitExports::new().with_timeouts(self.timeouts.clone());
        for operation in [
            Operation::Bootstrap,
            Operation::Mount,
            Operation::Unmount,
            Operation::Unload,
        ] {
            let unit = self.clone();
            let journal = journal.clone();
            exports = exports.with_fn(
                operation,
                lifecycle_fn(move |props| {
                    let unit = unit.clone();
                    let journal = journal.clone();
                    async move { unit.perform(&journal, operation, props).await }
                }),
            );
        }
        exports
    }

    pub fn registration(&self, journal: &Journal) -> UnitRegistration<String> {
        let unit = self.clone();
        let journal = journal.clone();
        let activity = self.activity.clone();

        UnitRegistration::new(
            self.name.clone(),
            move |props| {
                let unit = unit.clone();
                let journal = journal.clone();
                async move {
                    unit.perform(&journal, Operation::Load, props).await?;
                    anyhow::Ok(unit.exports(&journal))
                }
            },
            move |path: &String| activity(path),
        )
        .with_custom_props(self.custom_props.clone())
    }
}

/// Records every routing event and warning
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(RoutingEventKind, RoutingEventDetail)>>,
    warnings: Mutex<Vec<LifecycleWarning>>,
}

impl RecordingSink {
    pub fn kinds(&self) -> Vec<RoutingEventKind> {
        self.events.lock().iter().map(|(kind, _)| *kind).collect()
    }

    pub fn events(&self) -> Vec<(RoutingEventKind, RoutingEventDetail)> {
        self.events.lock().clone()
    }

    pub fn last(&self, kind: RoutingEventKind) -> Option<RoutingEventDetail> {
        self.events
            .lock()
            .iter()
            .rev()
            .find(|(k, _)| *k == kind)
            .map(|(_, detail)| detail.clone())
    }

    pub fn warnings(&self) -> Vec<LifecycleWarning> {
        self.warnings.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
        self.warnings.lock().clear();
    }
}

impl NotificationSink for RecordingSink {
    fn on_routing_event(
        &self,
        kind: RoutingEventKind,
        detail: &RoutingEventDetail,
    ) -> anyhow::Result<()> {
        self.events.lock().push((kind, detail.clone()));
        Ok(())
    }

    fn on_warning(&self, warning: &LifecycleWarning) {
        self.warnings.lock().push(warning.clone());
    }
}

/// Records every replayed payload in order
#[derive(Default)]
pub struct RecordingReplay(Mutex<Vec<Option<EventPayload>>>);

impl RecordingReplay {
    pub fn replayed(&self) -> Vec<Option<EventPayload>> {
        self.0.lock().clone()
    }
}

impl EventReplay for RecordingReplay {
    fn replay(&self, payload: Option<&EventPayload>) {
        self.0.lock().push(payload.cloned());
    }
}

/// Engine wired to recording collaborators
pub struct Harness {
    pub engine: Engine<String>,
    pub journal: Journal,
    pub sink: Arc<RecordingSink>,
    pub replay: Arc<RecordingReplay>,
    pub errors: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    pub fn new(config: OrchestrationConfig, units: &[ScriptedUnit]) -> Self {
        let journal = Journal::default();
        let sink = Arc::new(RecordingSink::default());
        let replay = Arc::new(RecordingReplay::default());
        let errors = Arc::new(Mutex::new(Vec::new()));

        let engine = Engine::builder("/".to_string())
            .config(config)
            .event_replay(replay.clone())
            .build();
        engine.add_listener(sink.clone());

        let seen = errors.clone();
        engine.add_error_handler(move |err| seen.lock().push(err.to_string()));

        for unit in units {
            engine.register(unit.registration(&journal)).unwrap();
        }

        Self {
            engine,
            journal,
            sink,
            replay,
            errors,
        }
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    condition()
}
