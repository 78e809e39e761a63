//! Reroute engine
//!
//! The engine owns the pass state: a flag saying whether a pass is underway
//! and the FIFO queue of triggers that arrived meanwhile. The first trigger
//! that finds the engine idle spawns a driver task; the driver runs passes
//! in a loop until no trigger is waiting, so bursts of triggers are served
//! by one follow-up pass each time instead of by nested passes.

use crate::{
    Error, Result,
    config::OrchestrationConfig,
    context::OrchestrationContext,
    events::{
        EventPayload, EventReplay, ListenerId, NoReplay, NotificationSink, RoutingEventDetail,
        RoutingEventKind,
    },
    handlers::HandlerId,
    lifecycles::Lifecycles,
    runtime::{Spawner, default_spawner},
    unload::{UnloadOptions, wait},
};
use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared, join_all};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info, warn};
use unit_registry::{Registry, UnitRegistration, UnitSnapshot, UnitStatus};

/// Joint completion of every unmount and unload of a pass
type Barrier<'a> = Shared<BoxFuture<'a, Result<()>>>;

/// A caller waiting for a pass to answer its trigger
struct TriggerRequest {
    payload: Option<EventPayload>,
    reply: oneshot::Sender<Result<Vec<String>>>,
}

#[derive(Default)]
struct PassState {
    underway: bool,
    waiting: VecDeque<TriggerRequest>,
}

/// Bookkeeping of a single pass
struct Pass {
    /// Triggers queued behind the previous pass, in arrival order
    pending: Vec<TriggerRequest>,
    /// The trigger that started the driver; only the first pass has one
    own: Option<TriggerRequest>,
    /// Units touched by the pass and their status when it started
    changed: IndexMap<String, UnitStatus>,
}

impl Pass {
    fn new(pending: Vec<TriggerRequest>, own: Option<TriggerRequest>) -> Self {
        Self {
            pending,
            own,
            changed: IndexMap::new(),
        }
    }

    fn payload(&self) -> Option<&EventPayload> {
        self.own.as_ref().and_then(|own| own.payload.as_ref())
    }

    fn touch<'a, L>(&mut self, names: impl IntoIterator<Item = &'a String>, registry: &Registry<L>) {
        for name in names {
            if self.changed.contains_key(name) {
                continue;
            }
            if let Ok(status) = registry.status(name) {
                self.changed.insert(name.clone(), status);
            }
        }
    }

    fn detail<L>(&self, registry: &Registry<L>) -> RoutingEventDetail {
        let mut detail = RoutingEventDetail::new(self.payload().cloned());
        for (name, old) in &self.changed {
            // A unit unregistered mid-pass keeps its last known status
            let new = registry.status(name).unwrap_or(*old);
            detail.record(name, *old, new);
        }
        detail
    }

    /// Replay held-back events: queued triggers first, then the pass's own
    fn flush_events(&self, replay: &dyn EventReplay) {
        for request in &self.pending {
            replay.replay(request.payload.as_ref());
        }
        replay.replay(self.payload());
    }

    fn settle(self, result: &Result<Vec<String>>) {
        for request in self.pending.into_iter().chain(self.own) {
            // The caller may have dropped its future
            let _ = request.reply.send(result.clone());
        }
    }
}

struct Inner<L> {
    ctx: OrchestrationContext<L>,
    lifecycles: Lifecycles<L>,
    location: RwLock<L>,
    replay: Arc<dyn EventReplay>,
    started: AtomicBool,
    state: Mutex<PassState>,
    passes_completed: AtomicU64,
}

impl<L> Inner<L>
where
    L: Clone + Send + Sync + 'static,
{
    fn location(&self) -> L {
        self.location.read().clone()
    }

    fn is_active(&self, name: &str) -> Result<bool> {
        Ok(self.ctx.registry.should_be_active(name, &self.location())?)
    }

    /// Run passes until nobody is waiting
    async fn drive(self: Arc<Self>, pending: Vec<TriggerRequest>, own: Option<TriggerRequest>) {
        let mut guard = DriverGuard {
            inner: self.clone(),
            finished: false,
        };
        let mut pending = pending;
        let mut own = own;

        loop {
            self.run_pass(pending, own.take()).await;

            let next = {
                let mut state = self.state.lock();
                if state.waiting.is_empty() {
                    state.underway = false;
                    None
                } else {
                    Some(state.waiting.drain(..).collect::<Vec<_>>())
                }
            };

            match next {
                Some(waiting) => {
                    debug!("{} trigger(s) queued during the pass", waiting.len());
                    pending = waiting;
                }
                None => break,
            }
        }

        guard.finished = true;
    }

    async fn run_pass(&self, pending: Vec<TriggerRequest>, own: Option<TriggerRequest>) {
        let mut pass = Pass::new(pending, own);

        let result = if self.started.load(Ordering::SeqCst) {
            self.perform_unit_changes(&mut pass).await
        } else {
            self.load_units(&mut pass).await
        };

        match &result {
            Ok(active) => debug!("Reroute pass finished, active units: {:?}", active),
            Err(err) => warn!("Reroute pass failed: {}", err),
        }

        self.passes_completed.fetch_add(1, Ordering::SeqCst);
        pass.settle(&result);
    }

    /// Before start only loads run, and nothing can be mounted yet
    async fn load_units(&self, pass: &mut Pass) -> Result<Vec<String>> {
        let registry = &self.ctx.registry;
        let to_load = registry.units_to_load(&self.location());
        debug!("Pre-start pass: {} unit(s) to load", to_load.len());
        pass.touch(&to_load, registry);

        let results = join_all(to_load.iter().map(|name| self.lifecycles.load(name))).await;
        pass.flush_events(self.replay.as_ref());

        results.into_iter().collect::<Result<()>>()?;
        Ok(Vec::new())
    }

    async fn perform_unit_changes(&self, pass: &mut Pass) -> Result<Vec<String>> {
        let registry = &self.ctx.registry;
        let notifier = &self.ctx.notifier;
        let lifecycles = &self.lifecycles;

        let plan = registry.plan(&self.location());
        info!(
            "Reroute pass: {} to unload, {} to unmount, {} to load, {} to mount",
            plan.to_unload.len(),
            plan.to_unmount.len(),
            plan.to_load.len(),
            plan.to_mount.len()
        );

        pass.touch(plan.names(), registry);
        notifier.emit(RoutingEventKind::BeforeRoutingEvent, &pass.detail(registry));
        let pass: &Pass = pass;

        let mut teardown: Vec<BoxFuture<'_, Result<()>>> = Vec::new();
        for name in &plan.to_unmount {
            teardown.push(
                async move {
                    lifecycles.unmount(name).await?;
                    lifecycles.unload(name).await
                }
                .boxed(),
            );
        }
        for name in &plan.to_unload {
            teardown.push(lifecycles.unload(name).boxed());
        }
        let barrier: Barrier<'_> = join_all(teardown)
            .map(|results| results.into_iter().collect::<Result<()>>())
            .boxed()
            .shared();

        // Loads and bootstraps overlap the teardown; mounts wait for it
        let mut chains: Vec<BoxFuture<'_, Result<()>>> = Vec::new();
        for name in &plan.to_load {
            let barrier = barrier.clone();
            chains.push(
                async move {
                    lifecycles.load(name).await?;
                    self.bootstrap_and_mount(name, barrier).await
                }
                .boxed(),
            );
        }
        for name in &plan.to_mount {
            chains.push(self.bootstrap_and_mount(name, barrier.clone()).boxed());
        }

        let (teardown_result, chain_results) = futures::join!(
            async {
                let result = barrier.await;
                debug!("Unmount-all barrier settled");
                pass.flush_events(self.replay.as_ref());
                result
            },
            join_all(chains)
        );

        teardown_result?;
        chain_results.into_iter().collect::<Result<()>>()?;

        let active = registry.mounted_unit_names();
        let detail = pass.detail(registry);
        let kind = if pass.changed.is_empty() {
            RoutingEventKind::NoAppChange
        } else {
            RoutingEventKind::AppChange
        };
        notifier.emit(kind, &detail);
        notifier.emit(RoutingEventKind::RoutingEvent, &detail);

        Ok(active)
    }

    /// Bootstrap a unit and mount it once the barrier settles, re-checking
    /// its activity before each step
    async fn bootstrap_and_mount(&self, name: &str, barrier: Barrier<'_>) -> Result<()> {
        if !self.is_active(name)? {
            return barrier.await;
        }

        self.lifecycles.bootstrap(name).await?;
        barrier.await?;

        if self.is_active(name)? {
            self.lifecycles.mount(name).await
        } else {
            debug!("Unit {} is no longer active, not mounting", name);
            Ok(())
        }
    }
}

/// Hands the pass state on when a driver stops without finishing, e.g.
/// because a pass panicked: queued triggers get a fresh driver, otherwise
/// the engine goes idle.
struct DriverGuard<L>
where
    L: Clone + Send + Sync + 'static,
{
    inner: Arc<Inner<L>>,
    finished: bool,
}

impl<L> Drop for DriverGuard<L>
where
    L: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let waiting = {
            let mut state = self.inner.state.lock();
            if state.waiting.is_empty() {
                state.underway = false;
                None
            } else {
                Some(state.waiting.drain(..).collect::<Vec<_>>())
            }
        };

        warn!("Reroute driver stopped before its pass finished");
        if let Some(waiting) = waiting {
            let inner = self.inner.clone();
            self.inner
                .ctx
                .spawner
                .spawn(inner.drive(waiting, None).boxed());
        }
    }
}

/// Builder for [`Engine`]
pub struct EngineBuilder<L> {
    location: L,
    config: OrchestrationConfig,
    spawner: Option<Arc<dyn Spawner>>,
    replay: Option<Arc<dyn EventReplay>>,
    registry: Option<Arc<Registry<L>>>,
}

impl<L> EngineBuilder<L>
where
    L: Clone + Send + Sync + 'static,
{
    /// Start building an engine at the initial routing context
    pub fn new(location: L) -> Self {
        Self {
            location,
            config: OrchestrationConfig::default(),
            spawner: None,
            replay: None,
            registry: None,
        }
    }

    /// Engine configuration
    pub fn config(mut self, config: OrchestrationConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawner for the pass driver. Defaults to the enabled runtime.
    pub fn spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Receiver of held-back environment events
    pub fn event_replay(mut self, replay: Arc<dyn EventReplay>) -> Self {
        self.replay = Some(replay);
        self
    }

    /// Use an existing registry
    pub fn registry(mut self, registry: Arc<Registry<L>>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Build the engine
    pub fn build(self) -> Engine<L> {
        let registry = self.registry.unwrap_or_else(|| Arc::new(Registry::new()));
        let spawner = self.spawner.unwrap_or_else(default_spawner);
        let replay: Arc<dyn EventReplay> = match self.replay {
            Some(replay) => replay,
            None => Arc::new(NoReplay),
        };

        let ctx = OrchestrationContext::with_spawner(spawner, self.config, registry);
        Engine {
            inner: Arc::new(Inner {
                lifecycles: Lifecycles::new(ctx.clone()),
                ctx,
                location: RwLock::new(self.location),
                replay,
                started: AtomicBool::new(false),
                state: Mutex::new(PassState::default()),
                passes_completed: AtomicU64::new(0),
            }),
        }
    }
}

/// Reroute engine over routing contexts of type `L`
///
/// Cloning is cheap; clones share the same registry and pass state.
pub struct Engine<L> {
    inner: Arc<Inner<L>>,
}

impl<L> Clone for Engine<L> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<L> Engine<L>
where
    L: Clone + Send + Sync + 'static,
{
    /// Engine with default configuration on the enabled runtime
    pub fn new(location: L) -> Self {
        EngineBuilder::new(location).build()
    }

    /// Start building an engine
    pub fn builder(location: L) -> EngineBuilder<L> {
        EngineBuilder::new(location)
    }

    /// Shared context
    pub fn context(&self) -> &OrchestrationContext<L> {
        &self.inner.ctx
    }

    /// Unit registry
    pub fn registry(&self) -> &Arc<Registry<L>> {
        &self.inner.ctx.registry
    }

    /// Lifecycle wrappers bound to this engine's registry
    pub fn lifecycles(&self) -> &Lifecycles<L> {
        &self.inner.lifecycles
    }

    /// Register a unit. Nothing is loaded until the next trigger.
    pub fn register(&self, registration: UnitRegistration<L>) -> Result<()> {
        Ok(self.inner.ctx.registry.register(registration)?)
    }

    /// Remove a unit from the registry without running any of its
    /// lifecycle functions
    pub fn unregister(&self, name: &str) -> Result<UnitSnapshot> {
        Ok(self.inner.ctx.registry.unregister(name)?)
    }

    /// Names of all registered units
    pub fn unit_names(&self) -> Vec<String> {
        self.inner.ctx.registry.unit_names()
    }

    /// Current routing context
    pub fn location(&self) -> L {
        self.inner.location()
    }

    /// Replace the routing context without triggering
    pub fn set_location(&self, location: L) {
        *self.inner.location.write() = location;
    }

    /// Mark the environment started and trigger a pass
    pub fn start(&self) -> impl Future<Output = Result<Vec<String>>> + Send + 'static {
        if !self.inner.started.swap(true, Ordering::SeqCst) {
            info!("Reroute engine started");
        }
        self.trigger(None)
    }

    /// Whether [`Engine::start`] has been called
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Request a pass and wait for the active unit names it produces
    ///
    /// The request is queued as soon as this is called, not when the
    /// returned future is first polled. If no pass is underway a driver task
    /// is spawned; otherwise the request is answered by the next pass.
    pub fn trigger(
        &self,
        payload: Option<EventPayload>,
    ) -> impl Future<Output = Result<Vec<String>>> + Send + 'static {
        let (reply, rx) = oneshot::channel();
        let request = TriggerRequest { payload, reply };

        let start = {
            let mut state = self.inner.state.lock();
            if state.underway {
                state.waiting.push_back(request);
                None
            } else {
                state.underway = true;
                Some(request)
            }
        };

        match start {
            Some(own) => {
                let inner = self.inner.clone();
                self.inner.ctx.spawner.spawn(inner.drive(Vec::new(), Some(own)).boxed());
            }
            None => debug!("Pass underway, trigger queued"),
        }

        async move {
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(Error::Abandoned),
            }
        }
    }

    /// Change the routing context and trigger a pass
    pub fn navigate(
        &self,
        location: L,
        payload: Option<EventPayload>,
    ) -> impl Future<Output = Result<Vec<String>>> + Send + 'static {
        self.set_location(location);
        self.trigger(payload)
    }

    /// Names of units whose activity predicate holds for `location`, in
    /// registration order
    pub fn check_activity(&self, location: &L) -> Vec<String> {
        self.inner.ctx.registry.check_activity(location)
    }

    /// Status of a unit
    pub fn status(&self, name: &str) -> Result<UnitStatus> {
        Ok(self.inner.ctx.registry.status(name)?)
    }

    /// Snapshot of a unit
    pub fn unit_snapshot(&self, name: &str) -> Result<UnitSnapshot> {
        Ok(self.inner.ctx.registry.snapshot(name)?)
    }

    /// Names of mounted units
    pub fn mounted_unit_names(&self) -> Vec<String> {
        self.inner.ctx.registry.mounted_unit_names()
    }

    /// Register a notification sink
    pub fn add_listener(&self, sink: Arc<dyn NotificationSink>) -> ListenerId {
        self.inner.ctx.notifier.add(sink)
    }

    /// Remove a notification sink
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.ctx.notifier.remove(id)
    }

    /// Register a receiver of unit failures
    pub fn add_error_handler<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.inner.ctx.error_handlers.add(handler)
    }

    /// Remove an error handler
    pub fn remove_error_handler(&self, id: HandlerId) -> bool {
        self.inner.ctx.error_handlers.remove(id)
    }

    /// Unload a unit so that its next activation loads fresh code
    ///
    /// By default a mounted unit is unmounted and unloaded right away, and
    /// once that succeeds a pass is triggered on a later scheduler turn (so
    /// a unit that is still active gets loaded again). With
    /// [`UnloadOptions::wait_for_unmount`] the unit is left alone and the
    /// returned future completes when a pass unloads it after routing has
    /// unmounted it. Concurrent requests for the same unit share the
    /// outcome.
    ///
    /// An immediate unload of a unit caught mid-operation (e.g. `MOUNTING`)
    /// only completes once a later pass unmounts and unloads it, so while the
    /// unit stays active the returned future can stay pending indefinitely.
    pub async fn unload_unit(&self, name: &str, options: UnloadOptions) -> Result<()> {
        let ctx = &self.inner.ctx;

        let status = ctx.registry.status(name)?;
        if status.is_broken() {
            return Err(Error::UnloadAborted {
                unit: name.to_string(),
                status,
            });
        }
        if status == UnitStatus::NotLoaded && !ctx.unloads.is_pending(name) {
            debug!("Unit {} is not loaded, nothing to unload", name);
            return Ok(());
        }

        let (rx, first) = ctx.unloads.subscribe(name);
        if !first {
            debug!("Joining pending unload of unit {}", name);
        }
        ctx.registry.request_unload(name)?;

        if !options.wait_for_unmount {
            info!("Unloading unit {}", name);
            let lifecycles = &self.inner.lifecycles;
            let unloaded = match lifecycles.unmount(name).await {
                Ok(()) => lifecycles.unload(name).await,
                Err(err) => Err(err),
            };
            if let Err(err) = unloaded {
                ctx.registry.clear_unload_request(name);
                ctx.unloads.finish(name, Err(err));
            }
        }

        let result = wait(rx).await;

        if result.is_ok() && !options.wait_for_unmount {
            let engine = self.clone();
            let unit = name.to_string();
            ctx.spawner.spawn(
                async move {
                    if let Err(err) = engine.trigger(None).await {
                        debug!("Reroute after unloading {} failed: {}", unit, err);
                    }
                }
                .boxed(),
            );
        }

        result
    }

    /// Number of passes run so far
    pub fn passes_completed(&self) -> u64 {
        self.inner.passes_completed.load(Ordering::SeqCst)
    }

    /// Whether a pass is running right now
    pub fn is_pass_underway(&self) -> bool {
        self.inner.state.lock().underway
    }
}
