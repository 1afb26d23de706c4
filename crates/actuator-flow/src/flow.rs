//! A single flow: source, operator chain, sink and monitor, with its own
//! scope and a monotonic state machine.
//!
//! `INIT -> CONTEXT -> SETUP -> WIRED -> STARTED -> ENDING -> ENDED`
//!
//! Flows are normally driven by a [`FlowSet`](crate::FlowSet), which runs the
//! context, setup and wiring passes across all flows before starting any.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use actuator_blueprint::Param;
use actuator_types::{ActuatorError, Result, Scope, Value};

use crate::builtins;
use crate::chain::{Chain, Operator, Source};
use crate::component::Lifecycle;
use crate::events::{EventEmitter, FlowEvent};
use crate::monitor::{CallHandle, DemandHandle, Monitor};
use crate::pipeline::{lock, Driver, Pipeline, SharedPipeline};
use crate::signal::{Latch, Sleeper};
use crate::sink::{Outflow, Sink};

// ---------------------------------------------------------------------------
// FlowState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FlowState {
    Init = 0,
    Context = 1,
    Setup = 2,
    Wired = 3,
    Started = 4,
    Ending = 5,
    Ended = 6,
}

impl FlowState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => FlowState::Init,
            1 => FlowState::Context,
            2 => FlowState::Setup,
            3 => FlowState::Wired,
            4 => FlowState::Started,
            5 => FlowState::Ending,
            _ => FlowState::Ended,
        }
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlowState::Init => "INIT",
            FlowState::Context => "CONTEXT",
            FlowState::Setup => "SETUP",
            FlowState::Wired => "WIRED",
            FlowState::Started => "STARTED",
            FlowState::Ending => "ENDING",
            FlowState::Ended => "ENDED",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Directory of flows
// ---------------------------------------------------------------------------

/// Name directory of every flow in a set, shared with all components.
#[derive(Default)]
pub struct Directory {
    flows: BTreeMap<String, FlowHandle>,
}

impl Directory {
    pub fn get(&self, name: &str) -> Option<&FlowHandle> {
        self.flows.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.flows.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.flows.keys().map(String::as_str)
    }

    pub(crate) fn insert(&mut self, name: String, handle: FlowHandle) {
        self.flows.insert(name, handle);
    }
}

/// What peers may know about a flow: its state and, if it is callable, how
/// to call it.
#[derive(Clone)]
pub struct FlowHandle {
    core: Weak<FlowCore>,
    call: Option<CallHandle>,
}

impl FlowHandle {
    pub fn state(&self) -> FlowState {
        self.core
            .upgrade()
            .map(|core| core.state())
            .unwrap_or(FlowState::Ended)
    }

    pub fn call_handle(&self) -> Option<&CallHandle> {
        self.call.as_ref()
    }

    pub fn is_callable(&self) -> bool {
        self.call.is_some()
    }
}

// ---------------------------------------------------------------------------
// FlowContext
// ---------------------------------------------------------------------------

/// Everything a component may reach once attached to its flow.
#[derive(Clone)]
pub struct FlowContext {
    flow: String,
    scope: Scope,
    directory: Arc<Directory>,
    pipeline: Weak<Mutex<Pipeline>>,
    started: Latch,
    events: EventEmitter,
}

impl FlowContext {
    pub fn flow(&self) -> &str {
        &self.flow
    }

    /// The flow's own scope. Its parent is the flow set's root scope.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Look up a peer flow by name.
    pub fn peer(&self, name: &str) -> Result<&FlowHandle> {
        self.directory.get(name).ok_or_else(|| {
            ActuatorError::ConfigurationError(format!(
                "flow '{}' references unknown flow '{name}'",
                self.flow
            ))
        })
    }

    /// Handle through which peers pull this flow's chain on demand.
    pub fn demand_handle(&self) -> DemandHandle {
        DemandHandle::new(self.flow.clone(), self.pipeline.clone(), self.started.clone())
    }

    /// Resolve a deferred parameter. Variable lookups do not block.
    pub fn resolve(&self, param: &Param) -> Result<Value> {
        match param {
            Param::Var(r) => self.scope.get_value(&r.var, false),
            Param::Flow(r) => {
                self.peer(&r.flow)?;
                Ok(Value::String(r.flow.clone()))
            }
            Param::Literal(v) => Ok(v.clone()),
        }
    }
}

impl fmt::Debug for FlowContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowContext").field("flow", &self.flow).finish()
    }
}

// ---------------------------------------------------------------------------
// FlowCore: the part of a flow shared with its monitor thread
// ---------------------------------------------------------------------------

pub(crate) struct FlowCore {
    name: String,
    state: AtomicU8,
    pipeline: SharedPipeline,
    /// Set once the context pass has created the flow's scope.
    scope: OnceLock<Scope>,
    /// Parked monitor: before start, and after a run that does not end the flow.
    monitor: Mutex<Option<Lifecycle<dyn Monitor>>>,
    monitor_kind: String,
    threaded: bool,
    sleeper: Sleeper,
    started: Latch,
    events: EventEmitter,
}

impl FlowCore {
    fn state(&self) -> FlowState {
        FlowState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn parked(&self) -> MutexGuard<'_, Option<Lifecycle<dyn Monitor>>> {
        self.monitor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move forward to `to`. Returns `false` if the flow is already there or past it.
    fn advance(&self, to: FlowState) -> bool {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            if current >= to as u8 {
                return false;
            }
            match self
                .state
                .compare_exchange(current, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        let from = FlowState::from_u8(current);
        tracing::debug!(flow = %self.name, from = %from, to = %to, "Flow state changed");
        self.events.emit(FlowEvent::StateChanged {
            flow: self.name.clone(),
            from,
            to,
        });
        true
    }

    /// Idempotent, callable from any thread, and never waits for a pull in
    /// progress. Moves to ENDING and releases every wait of the flow: the
    /// monitor's sleep, blocked scope reads and peers waiting for it to start.
    /// A parked monitor is finished here; a running one finishes the flow
    /// itself once its loop returns.
    pub(crate) fn stop(&self) {
        if !self.advance(FlowState::Ending) {
            return;
        }
        self.interrupt();
        let parked = self.parked().take();
        if let Some(monitor) = parked {
            self.finish(monitor);
        }
    }

    fn interrupt(&self) {
        self.sleeper.stop();
        if let Some(scope) = self.scope.get() {
            scope.close();
        }
        // Waiters on a flow that never started must not hang.
        self.started.set();
    }

    /// Stop the monitor, then source, operators and sink, and enter ENDED.
    fn finish(&self, mut monitor: Lifecycle<dyn Monitor>) {
        if let Err(e) = monitor.stop() {
            tracing::warn!(flow = %self.name, error = %e, "Monitor failed to stop");
        }
        lock(&self.pipeline).stop(&self.name);
        self.advance(FlowState::Ended);
        tracing::info!(flow = %self.name, "Flow ended");
    }

    fn stopping(&self) -> bool {
        self.state() >= FlowState::Ending
    }

    fn run(&self, mut monitor: Lifecycle<dyn Monitor>) -> Result<()> {
        let started = {
            let mut pipeline = lock(&self.pipeline);
            if self.advance(FlowState::Started) {
                // Set while holding the pipeline, so demanders see a started pipeline.
                self.started.set();
                Some(pipeline.start())
            } else {
                None
            }
        };
        let Some(started) = started else {
            tracing::debug!(flow = %self.name, "Flow stopped before it started");
            self.finish(monitor);
            return Ok(());
        };

        let result = started.and_then(|()| monitor.start()).and_then(|()| {
            tracing::info!(flow = %self.name, monitor = %monitor.kind(), "Flow started");
            let driver = Driver::new(
                self.name.clone(),
                self.pipeline.clone(),
                self.sleeper.clone(),
                self.events.clone(),
            );
            monitor.run(&driver)
        });

        // A wait cut short by stop is how a stopped flow ends, not a failure.
        let result = match result {
            Err(ActuatorError::Interrupted { key }) if self.stopping() => {
                tracing::debug!(flow = %self.name, key = %key, "Pull interrupted by stop");
                Ok(())
            }
            other => other,
        };

        if let Err(e) = &result {
            tracing::error!(flow = %self.name, error = %e, "Flow failed");
            self.events.emit(FlowEvent::FlowFailed {
                flow: self.name.clone(),
                error: e.to_string(),
            });
        }

        if result.is_err() || monitor.ends_flow() || self.stopping() {
            if self.advance(FlowState::Ending) {
                self.interrupt();
            }
            self.finish(monitor);
        } else {
            *self.parked() = Some(monitor);
            // A stop that raced the parking found no monitor to finish.
            if self.stopping() {
                let parked = self.parked().take();
                if let Some(monitor) = parked {
                    self.finish(monitor);
                }
            }
        }
        result
    }
}

// ---------------------------------------------------------------------------
// FlowParts: a flow before interpolation
// ---------------------------------------------------------------------------

/// The explicitly given parts of a flow. Missing parts are filled in by
/// [`assemble`](Self::assemble).
#[derive(Default)]
pub struct FlowParts {
    pub name: Option<String>,
    pub source: Option<Lifecycle<dyn Source>>,
    pub operators: Vec<Lifecycle<dyn Operator>>,
    pub sink: Option<Lifecycle<dyn Sink>>,
    pub monitor: Option<Lifecycle<dyn Monitor>>,
}

impl FlowParts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn source(mut self, source: Lifecycle<dyn Source>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn operator(mut self, operator: Lifecycle<dyn Operator>) -> Self {
        self.operators.push(operator);
        self
    }

    pub fn sink(mut self, sink: Lifecycle<dyn Sink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn monitor(mut self, monitor: Lifecycle<dyn Monitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Peer flows this flow's sinks feed.
    pub fn targets(&self) -> Vec<&str> {
        self.operators
            .iter()
            .filter_map(|op| op.tee())
            .chain(self.sink.iter())
            .filter_map(|s| s.target())
            .collect()
    }

    /// Fill in defaults and build the flow.
    ///
    /// Source: the monitor's suggestion, else `inflow` when peers feed this
    /// flow, else `stdin`. Sink: the monitor's suggestion, else `print`.
    /// Monitor: the sink's suggestion, else `once`. Name: generated.
    pub fn assemble(self, has_inflows: bool, events: EventEmitter) -> Result<Flow> {
        let name = self.name.unwrap_or_else(generate_name);
        let monitor = self.monitor;

        let source = match self.source {
            Some(source) => source,
            None => monitor
                .as_ref()
                .and_then(|m| m.suggest_source())
                .or_else(|| has_inflows.then(builtins::sources::inflow))
                .unwrap_or_else(builtins::sources::stdin),
        };
        let sink = match self.sink {
            Some(sink) => sink,
            None => monitor
                .as_ref()
                .and_then(|m| m.suggest_sink())
                .unwrap_or_else(builtins::sinks::print),
        };
        let monitor = match monitor {
            Some(monitor) => monitor,
            None => sink.suggest_monitor().unwrap_or_else(builtins::monitors::once),
        };

        if monitor.push_slot().is_some()
            && (source.kind() != builtins::sources::PUSH_KIND || sink.kind() != "none")
        {
            return Err(ActuatorError::ConfigurationError(format!(
                "flow '{name}': a '{}' monitor needs its own push source and the 'none' sink, got '{}' and '{}'",
                monitor.kind(),
                source.kind(),
                sink.kind()
            )));
        }

        tracing::debug!(
            flow = %name,
            source = %source.kind(),
            operators = self.operators.len(),
            sink = %sink.kind(),
            monitor = %monitor.kind(),
            "Assembled flow"
        );

        let core = FlowCore {
            name,
            state: AtomicU8::new(FlowState::Init as u8),
            pipeline: Arc::new(Mutex::new(Pipeline::new(
                Chain::new(source, self.operators),
                sink,
            ))),
            scope: OnceLock::new(),
            monitor_kind: monitor.kind().to_string(),
            threaded: monitor.threaded(),
            monitor: Mutex::new(Some(monitor)),
            sleeper: Sleeper::new(),
            started: Latch::new(),
            events,
        };
        Ok(Flow {
            core: Arc::new(core),
            thread: None,
        })
    }
}

fn generate_name() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("flow-{}", &id[..8])
}

// ---------------------------------------------------------------------------
// Flow
// ---------------------------------------------------------------------------

pub struct Flow {
    core: Arc<FlowCore>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl Flow {
    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn state(&self) -> FlowState {
        self.core.state()
    }

    /// The flow's own scope, once its context is set.
    pub fn scope(&self) -> Option<&Scope> {
        self.core.scope.get()
    }

    pub fn is_threaded(&self) -> bool {
        self.core.threaded
    }

    pub fn monitor_kind(&self) -> &str {
        &self.core.monitor_kind
    }

    /// Kinds from the source to the last operator.
    pub fn upstreams(&self) -> Vec<String> {
        let pipeline = lock(&self.core.pipeline);
        pipeline
            .chain()
            .upstreams()
            .into_iter()
            .map(String::from)
            .collect()
    }

    pub fn sink_kind(&self) -> String {
        lock(&self.core.pipeline).sink().kind().to_string()
    }

    /// Block until the flow has entered STARTED (or was stopped).
    pub fn wait_started(&self) {
        self.core.started.wait();
    }

    fn expect(&self, expected: FlowState) -> Result<()> {
        let actual = self.state();
        if actual == expected {
            Ok(())
        } else {
            Err(ActuatorError::InvalidState {
                component: format!("flow '{}'", self.name()),
                expected: expected.to_string(),
                actual: actual.to_string(),
            })
        }
    }

    pub(crate) fn handle(&self) -> FlowHandle {
        let call = self.core.parked().as_ref().and_then(|m| m.push_slot()).map(|slot| {
            CallHandle::new(
                self.name(),
                slot,
                Arc::downgrade(&self.core.pipeline),
                self.core.started.clone(),
            )
        });
        FlowHandle {
            core: Arc::downgrade(&self.core),
            call,
        }
    }

    pub(crate) fn stopper(&self) -> Arc<FlowCore> {
        self.core.clone()
    }

    /// INIT -> CONTEXT: create the flow's scope under `root`, register the
    /// flow's name there, and attach every component.
    pub fn set_context(&mut self, root: &Scope, directory: Arc<Directory>) -> Result<()> {
        self.expect(FlowState::Init)?;
        let scope = root.child();
        scope.set("global", root.clone(), true)?;
        root.set(self.name(), scope.clone(), true)?;

        let ctx = FlowContext {
            flow: self.name().to_string(),
            scope: scope.clone(),
            directory,
            pipeline: Arc::downgrade(&self.core.pipeline),
            started: self.core.started.clone(),
            events: self.core.events.clone(),
        };
        lock(&self.core.pipeline).set_context(&ctx)?;
        if let Some(monitor) = self.core.parked().as_mut() {
            monitor.set_context(ctx)?;
        }
        // The state check above makes this the only context pass.
        let _ = self.core.scope.set(scope);
        self.core.advance(FlowState::Context);
        Ok(())
    }

    /// CONTEXT -> SETUP: resolve every component's deferred arguments.
    pub fn setup(&mut self) -> Result<()> {
        self.expect(FlowState::Context)?;
        lock(&self.core.pipeline).setup()?;
        if let Some(monitor) = self.core.parked().as_mut() {
            monitor.setup()?;
        }
        self.core.advance(FlowState::Setup);
        Ok(())
    }

    /// SETUP -> WIRED: hand inbound outflows to the source and link the chain.
    pub fn wire(&mut self, inflows: Vec<Outflow>) -> Result<()> {
        self.expect(FlowState::Setup)?;
        {
            let mut pipeline = lock(&self.core.pipeline);
            if !inflows.is_empty() {
                let producers: Vec<&str> = inflows.iter().map(Outflow::producer).collect();
                tracing::debug!(flow = %self.name(), inflows = ?producers, "Wiring inflows");
            }
            pipeline.chain_mut().source_mut().wire(inflows)?;
            pipeline.chain_mut().link();
        }
        self.core.advance(FlowState::Wired);
        Ok(())
    }

    /// Handles through which peers read this flow's sinks.
    pub fn outflows(&self) -> Vec<Outflow> {
        lock(&self.core.pipeline).outflows()
    }

    /// WIRED -> STARTED. Threaded monitors run on a dedicated thread;
    /// others run to completion on the caller.
    pub fn start(&mut self) -> Result<()> {
        self.expect(FlowState::Wired)?;
        let monitor = self.core.parked().take().ok_or_else(|| ActuatorError::InvalidState {
            component: format!("flow '{}'", self.name()),
            expected: "a parked monitor".into(),
            actual: "none".into(),
        })?;

        if self.core.threaded {
            let core = self.core.clone();
            let handle = std::thread::Builder::new()
                .name(format!("flow:{}", self.name()))
                .spawn(move || core.run(monitor))?;
            self.thread = Some(handle);
            Ok(())
        } else {
            self.core.run(monitor)
        }
    }

    pub fn stop(&self) {
        self.core.stop();
    }

    /// Wait for the monitor thread, returning its result.
    pub fn join(&mut self) -> Result<()> {
        match self.thread.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| ActuatorError::Other(format!("flow '{}' thread panicked", self.name())))?,
            None => Ok(()),
        }
    }

    /// Summary of the assembled flow, for display.
    pub fn describe(&self) -> Value {
        serde_json::json!({
            "name": self.name(),
            "state": self.state().to_string(),
            "upstreams": self.upstreams(),
            "sink": self.sink_kind(),
            "monitor": self.monitor_kind(),
            "threaded": self.is_threaded(),
        })
    }
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::sinks::testing::capture;
    use crate::chain::tests::fixed;
    use crate::component::{Component, Deferred};
    use serde_json::json;

    fn run_alone(flow: &mut Flow) -> Result<()> {
        let root = Scope::root();
        let mut directory = Directory::default();
        directory.insert(flow.name().to_string(), flow.handle());
        flow.set_context(&root, Arc::new(directory))?;
        flow.setup()?;
        flow.wire(vec![])?;
        flow.start()?;
        flow.join()
    }

    fn states(rx: &mut tokio::sync::broadcast::Receiver<FlowEvent>) -> Vec<FlowState> {
        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let FlowEvent::StateChanged { to, .. } = event {
                seen.push(to);
            }
        }
        seen
    }

    #[test]
    fn defaults_are_interpolated() {
        let flow = FlowParts::new().assemble(false, EventEmitter::default()).unwrap();
        assert!(flow.name().starts_with("flow-"));
        assert_eq!(flow.name().len(), "flow-".len() + 8);
        assert_eq!(flow.upstreams(), vec!["stdin"]);
        assert_eq!(flow.sink_kind(), "print");
        assert_eq!(flow.monitor_kind(), "once");
        assert_eq!(flow.state(), FlowState::Init);
    }

    #[test]
    fn inflow_source_when_targeted() {
        let flow = FlowParts::new()
            .named("b")
            .assemble(true, EventEmitter::default())
            .unwrap();
        assert_eq!(flow.upstreams(), vec!["inflow"]);
    }

    #[test]
    fn flow_sink_suggests_on_demand_monitor() {
        let flow = FlowParts::new()
            .named("a")
            .sink(builtins::flowref::flow_sink("b"))
            .assemble(false, EventEmitter::default())
            .unwrap();
        assert_eq!(flow.monitor_kind(), "demand");
    }

    #[test]
    fn call_monitor_suggests_push_source_and_none_sink() {
        let flow = FlowParts::new()
            .named("double")
            .monitor(builtins::monitors::call())
            .assemble(false, EventEmitter::default())
            .unwrap();
        assert_eq!(flow.upstreams(), vec![builtins::sources::PUSH_KIND]);
        assert_eq!(flow.sink_kind(), "none");
        assert!(!flow.is_threaded());
        assert!(flow.handle().is_callable());
    }

    #[test]
    fn call_monitor_rejects_explicit_source() {
        let err = FlowParts::new()
            .named("double")
            .source(fixed(vec![]))
            .monitor(builtins::monitors::call())
            .assemble(false, EventEmitter::default())
            .unwrap_err();
        assert!(matches!(err, ActuatorError::ConfigurationError(ref m) if m.contains("push source")));
    }

    #[test]
    fn once_flow_runs_to_ended() {
        let (sink, captured) = capture();
        let events = EventEmitter::new(64);
        let mut rx = events.subscribe();
        let mut flow = FlowParts::new()
            .named("one")
            .source(fixed(vec![json!("hello")]))
            .sink(sink)
            .assemble(false, events)
            .unwrap();
        run_alone(&mut flow).unwrap();

        assert_eq!(*captured.lock().unwrap(), vec![json!("hello")]);
        assert_eq!(flow.state(), FlowState::Ended);
        assert_eq!(
            states(&mut rx),
            vec![
                FlowState::Context,
                FlowState::Setup,
                FlowState::Wired,
                FlowState::Started,
                FlowState::Ending,
                FlowState::Ended
            ]
        );
    }

    #[test]
    fn stop_twice_passes_through_ending_once() {
        let events = EventEmitter::new(64);
        let mut rx = events.subscribe();
        let flow = FlowParts::new()
            .named("idle")
            .source(fixed(vec![]))
            .assemble(false, events)
            .unwrap();
        flow.stop();
        flow.stop();
        assert_eq!(states(&mut rx), vec![FlowState::Ending, FlowState::Ended]);
    }

    type StopLog = Arc<Mutex<Vec<&'static str>>>;

    /// Idles until stopped, then logs its own stop hook.
    struct Idle(StopLog);

    impl Component for Idle {
        fn stop(&mut self) -> Result<()> {
            self.0.lock().unwrap().push("monitor");
            Ok(())
        }
    }

    impl Monitor for Idle {
        fn run(&mut self, driver: &Driver) -> Result<()> {
            while driver.sleep(std::time::Duration::from_millis(5)) {}
            Ok(())
        }
    }

    struct Discard(StopLog);

    impl Component for Discard {
        fn stop(&mut self) -> Result<()> {
            self.0.lock().unwrap().push("sink");
            Ok(())
        }
    }

    impl Sink for Discard {
        fn perform(&mut self, _payload: Value) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn running_monitor_stops_before_sink() {
        let log = StopLog::default();
        let mut flow = FlowParts::new()
            .named("ordered")
            .source(fixed(vec![]))
            .sink(Lifecycle::new("discard", Box::new(Discard(log.clone())), Deferred::default()))
            .monitor(Lifecycle::new("idle", Box::new(Idle(log.clone())), Deferred::default()))
            .assemble(false, EventEmitter::default())
            .unwrap();
        let mut directory = Directory::default();
        directory.insert(flow.name().to_string(), flow.handle());
        flow.set_context(&Scope::root(), Arc::new(directory)).unwrap();
        flow.setup().unwrap();
        flow.wire(vec![]).unwrap();
        flow.start().unwrap();
        flow.wait_started();
        std::thread::sleep(std::time::Duration::from_millis(20));

        flow.stop();
        flow.join().unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["monitor", "sink"]);
        assert_eq!(flow.state(), FlowState::Ended);
    }

    #[test]
    fn stop_closes_the_flow_scope() {
        let mut flow = FlowParts::new()
            .named("closing")
            .source(fixed(vec![]))
            .assemble(false, EventEmitter::default())
            .unwrap();
        flow.set_context(&Scope::root(), Arc::new(Directory::default()))
            .unwrap();
        let scope = flow.scope().unwrap().clone();
        assert!(!scope.is_closed());
        flow.stop();
        assert!(scope.is_closed());
        assert_eq!(flow.state(), FlowState::Ended);
    }

    #[test]
    fn out_of_order_transitions_are_invalid() {
        let mut flow = FlowParts::new()
            .named("early")
            .source(fixed(vec![]))
            .assemble(false, EventEmitter::default())
            .unwrap();
        assert!(matches!(flow.setup(), Err(ActuatorError::InvalidState { .. })));
        assert!(matches!(flow.wire(vec![]), Err(ActuatorError::InvalidState { .. })));
        assert!(matches!(flow.start(), Err(ActuatorError::InvalidState { .. })));
    }

    #[test]
    fn context_registers_name_and_global() {
        let root = Scope::root();
        let mut flow = FlowParts::new()
            .named("named")
            .source(fixed(vec![]))
            .assemble(false, EventEmitter::default())
            .unwrap();
        flow.set_context(&root, Arc::new(Directory::default())).unwrap();
        let scope = flow.scope().unwrap();
        assert!(root.get("named", false).unwrap().as_scope().unwrap().ptr_eq(scope));
        assert!(scope.get("global", false).unwrap().as_scope().unwrap().ptr_eq(&root));
    }

    #[test]
    fn duplicate_flow_name_in_scope_is_claim_conflict() {
        let root = Scope::root();
        let mut a = FlowParts::new()
            .named("dup")
            .source(fixed(vec![]))
            .assemble(false, EventEmitter::default())
            .unwrap();
        let mut b = FlowParts::new()
            .named("dup")
            .source(fixed(vec![]))
            .assemble(false, EventEmitter::default())
            .unwrap();
        a.set_context(&root, Arc::new(Directory::default())).unwrap();
        let err = b.set_context(&root, Arc::new(Directory::default())).unwrap_err();
        assert!(matches!(err, ActuatorError::ClaimConflict { ref key } if key == "dup"));
    }

    #[test]
    fn setup_failure_leaves_flow_in_context() {
        let source: Lifecycle<dyn Source> = Lifecycle::new(
            "str",
            Box::new(builtins::sources::StrSource::default()),
            Deferred::new(vec![Param::var("missing")]),
        );
        let mut flow = FlowParts::new()
            .named("broken")
            .source(source)
            .assemble(false, EventEmitter::default())
            .unwrap();
        flow.set_context(&Scope::root(), Arc::new(Directory::default()))
            .unwrap();
        assert!(matches!(flow.setup(), Err(ActuatorError::UndefinedKey { .. })));
        assert_eq!(flow.state(), FlowState::Context);
    }

    #[test]
    fn describe_lists_parts() {
        let flow = FlowParts::new()
            .named("d")
            .source(fixed(vec![]))
            .assemble(false, EventEmitter::default())
            .unwrap();
        let d = flow.describe();
        assert_eq!(d["name"], json!("d"));
        assert_eq!(d["upstreams"], json!(["fixed"]));
        assert_eq!(d["monitor"], json!("once"));
        assert_eq!(d["state"], json!("INIT"));
    }
}
