//! A set of flows that reference each other by name, sharing one root scope.
//!
//! [`FlowSet::setup`] runs three passes across every flow, so that no flow
//! is wired before all of its peers exist:
//!
//! 1. context: create each flow's scope and attach every component;
//! 2. setup: resolve deferred arguments;
//! 3. wire: hand each flow the outflows of the peers that target it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use actuator_blueprint::{ChainLink, FlowBlueprint, FlowSetBlueprint};
use actuator_types::{ActuatorError, Result, Scope, Value};

use crate::events::EventEmitter;
use crate::flow::{Directory, Flow, FlowCore, FlowParts};
use crate::registry::{default_registry, Registry};
use crate::sink::Outflow;
use crate::validation;

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Everything a flow set is built against: the component registry and the
/// global variables seeded into the root scope.
#[derive(Debug)]
pub struct Environment {
    registry: Registry,
    globals: BTreeMap<String, Value>,
}

impl Environment {
    pub fn new() -> Self {
        Self::with_registry(default_registry())
    }

    pub fn with_registry(registry: Registry) -> Self {
        Self {
            registry,
            globals: BTreeMap::new(),
        }
    }

    /// Builder: seed a global variable. Overrides a document global of the
    /// same name.
    pub fn with_global(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.globals.insert(key.into(), value.into());
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn globals(&self) -> &BTreeMap<String, Value> {
        &self.globals
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// FlowSet
// ---------------------------------------------------------------------------

pub struct FlowSet {
    flows: Vec<Flow>,
    directory: Arc<Directory>,
    root: Scope,
    events: EventEmitter,
}

impl FlowSet {
    /// Assemble every flow and the name directory. Flows fed by a peer's
    /// sink get the `inflow` source when they name no source of their own.
    pub fn new(parts: Vec<FlowParts>, root: Scope, events: EventEmitter) -> Result<Self> {
        let targets: BTreeSet<String> = parts
            .iter()
            .flat_map(FlowParts::targets)
            .map(String::from)
            .collect();

        let mut flows: Vec<Flow> = Vec::with_capacity(parts.len());
        let mut directory = Directory::default();
        for part in parts {
            let has_inflows = part.name.as_ref().is_some_and(|n| targets.contains(n));
            let flow = part.assemble(has_inflows, events.clone())?;
            if directory.contains(flow.name()) {
                return Err(ActuatorError::ConfigurationError(format!(
                    "duplicate flow name '{}'",
                    flow.name()
                )));
            }
            directory.insert(flow.name().to_string(), flow.handle());
            flows.push(flow);
        }

        tracing::debug!(flows = flows.len(), "Assembled flow set");
        Ok(Self {
            flows,
            directory: Arc::new(directory),
            root,
            events,
        })
    }

    /// Validate `doc`, seed the globals and build every component through
    /// the environment's registry.
    pub fn from_blueprint(env: &Environment, doc: &FlowSetBlueprint) -> Result<Self> {
        let diagnostics = validation::validate_or_raise(doc, env.registry())?;
        for d in &diagnostics {
            tracing::warn!(rule = %d.rule, flow = ?d.flow, "{}", d.message);
        }

        let root = Scope::root();
        let mut globals = doc.globals.clone();
        globals.extend(env.globals().iter().map(|(k, v)| (k.clone(), v.clone())));
        for (key, value) in globals {
            root.set(&key, value, true)?;
        }

        let parts = doc
            .flows
            .iter()
            .map(|flow| build_parts(env.registry(), flow))
            .collect::<Result<Vec<_>>>()?;
        Self::new(parts, root, EventEmitter::default())
    }

    pub fn flows(&self) -> &[Flow] {
        &self.flows
    }

    pub fn flow(&self, name: &str) -> Option<&Flow> {
        self.flows.iter().find(|f| f.name() == name)
    }

    pub fn scope(&self) -> &Scope {
        &self.root
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Context, setup and wiring passes.
    pub fn setup(&mut self) -> Result<()> {
        for flow in &mut self.flows {
            flow.set_context(&self.root, self.directory.clone())?;
        }
        for flow in &mut self.flows {
            flow.setup()?;
        }

        let outflows: Vec<Outflow> = self.flows.iter().flat_map(Flow::outflows).collect();
        for flow in &mut self.flows {
            let mut inflows: Vec<Outflow> = outflows
                .iter()
                .filter(|o| o.target() == flow.name())
                .cloned()
                .collect();
            // Producer order, not declaration order.
            inflows.sort_by(|a, b| a.producer().cmp(b.producer()));
            flow.wire(inflows)?;
        }
        tracing::info!(flows = self.flows.len(), "Flow set wired");
        Ok(())
    }

    /// Start every flow, wait until all have started, then wait for them to
    /// finish. Flows still running when the rest are done (on-call flows)
    /// are stopped. Returns the first flow failure.
    pub fn start(&mut self) -> Result<()> {
        let mut failed = None;
        for flow in &mut self.flows {
            if let Err(e) = flow.start() {
                tracing::error!(flow = %flow.name(), error = %e, "Flow failed to start");
                failed = Some(e);
                break;
            }
        }
        if let Some(e) = failed {
            self.stop();
            if let Err(join_err) = self.join_all() {
                tracing::warn!(error = %join_err, "Flow failed while the set was stopping");
            }
            return Err(e);
        }

        for flow in &self.flows {
            flow.wait_started();
        }
        let result = self.join_all();
        self.stop();
        result
    }

    /// Set up and start. A setup failure stops every flow before returning.
    pub fn run(&mut self) -> Result<()> {
        if let Err(e) = self.setup() {
            self.stop();
            return Err(e);
        }
        self.start()
    }

    pub fn stop(&self) {
        for flow in &self.flows {
            flow.stop();
        }
    }

    /// A handle that stops every flow from any thread.
    pub fn stopper(&self) -> Stopper {
        Stopper {
            cores: self.flows.iter().map(Flow::stopper).collect(),
        }
    }

    fn join_all(&mut self) -> Result<()> {
        let mut first = Ok(());
        for flow in &mut self.flows {
            if let Err(e) = flow.join() {
                if first.is_ok() {
                    first = Err(e);
                }
            }
        }
        first
    }

    /// Summary of every flow, for display.
    pub fn describe(&self) -> Value {
        Value::Array(self.flows.iter().map(Flow::describe).collect())
    }
}

impl std::fmt::Debug for FlowSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowSet").field("flows", &self.flows).finish()
    }
}

/// Stops every flow of a [`FlowSet`]; cheap to clone and `Send`.
#[derive(Clone)]
pub struct Stopper {
    cores: Vec<Arc<FlowCore>>,
}

impl Stopper {
    pub fn stop_all(&self) {
        tracing::info!(flows = self.cores.len(), "Stopping all flows");
        for core in &self.cores {
            core.stop();
        }
    }
}

impl std::fmt::Debug for Stopper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stopper").field("flows", &self.cores.len()).finish()
    }
}

fn build_parts(registry: &Registry, bp: &FlowBlueprint) -> Result<FlowParts> {
    let mut parts = FlowParts::new();
    parts.name = bp.name.clone();
    if let Some(source) = &bp.source {
        parts.source = Some(registry.build_source(source)?);
    }
    for link in &bp.operators {
        let op = match link {
            ChainLink::Operator(op) => registry.build_operator(op)?,
            ChainLink::Tee(tee) => registry.build_tee(&tee.to)?,
        };
        parts.operators.push(op);
    }
    if let Some(sink) = &bp.sink {
        parts.sink = Some(registry.build_sink(sink)?);
    }
    if let Some(monitor) = &bp.monitor {
        parts.monitor = Some(registry.build_monitor(monitor)?);
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::flowref::flow_sink;
    use crate::builtins::sinks::testing::capture;
    use crate::builtins::sources::StrSource;
    use crate::chain::tests::fixed;
    use crate::chain::Source;
    use crate::component::{Deferred, Lifecycle};
    use actuator_blueprint::Param;
    use crate::flow::FlowState;
    use serde_json::json;

    fn parts(name: &str, values: Vec<Value>) -> FlowParts {
        FlowParts::new().named(name).source(fixed(values))
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = FlowSet::new(
            vec![parts("a", vec![]), parts("a", vec![])],
            Scope::root(),
            EventEmitter::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate flow name 'a'"));
    }

    #[test]
    fn every_flow_gets_a_scope_under_root() {
        let mut set = FlowSet::new(
            vec![parts("a", vec![json!(1)]), parts("b", vec![json!(2)])],
            Scope::root(),
            EventEmitter::default(),
        )
        .unwrap();
        set.setup().unwrap();
        assert!(set.scope().has_local("a"));
        assert!(set.scope().has_local("b"));
        assert!(set.flows().iter().all(|f| f.state() == FlowState::Wired));
    }

    #[test]
    fn targeted_flow_reads_producer_payload() {
        let (sink, captured) = capture();
        // A constant source: the consumer's demand and the producer's own
        // monitor may pull in either order.
        let source: Lifecycle<dyn Source> = Lifecycle::new(
            "str",
            Box::new(StrSource::default()),
            Deferred::new(vec![Param::literal("hello")]),
        );
        let producer = FlowParts::new().named("a").source(source).sink(flow_sink("b"));
        let consumer = FlowParts::new().named("b").sink(sink);
        let mut set = FlowSet::new(vec![consumer, producer], Scope::root(), EventEmitter::default())
            .unwrap();
        assert_eq!(set.flow("b").unwrap().upstreams(), vec!["inflow".to_string()]);
        set.run().unwrap();
        assert_eq!(*captured.lock().unwrap(), vec![json!("hello")]);
        assert!(set.flows().iter().all(|f| f.state() == FlowState::Ended));
    }

    #[test]
    fn stopper_ends_every_flow() {
        let set = FlowSet::new(
            vec![parts("a", vec![]), parts("b", vec![])],
            Scope::root(),
            EventEmitter::default(),
        )
        .unwrap();
        let stopper = set.stopper();
        std::thread::spawn(move || stopper.stop_all()).join().unwrap();
        assert!(set.flows().iter().all(|f| f.state() == FlowState::Ended));
    }

    #[test]
    fn setup_failure_stops_all() {
        let producer = parts("a", vec![]).sink(flow_sink("missing"));
        let mut set = FlowSet::new(
            vec![producer, parts("b", vec![])],
            Scope::root(),
            EventEmitter::default(),
        )
        .unwrap();
        assert!(set.run().is_err());
        assert!(set.flows().iter().all(|f| f.state() == FlowState::Ended));
    }

    #[test]
    fn start_failure_stops_every_flow() {
        let mut set = FlowSet::new(
            vec![parts("a", vec![json!(1)]), parts("b", vec![json!(2)])],
            Scope::root(),
            EventEmitter::default(),
        )
        .unwrap();
        // Never wired, so the first start is out of order.
        let err = set.start().unwrap_err();
        assert!(matches!(err, ActuatorError::InvalidState { .. }));
        assert!(set.flows().iter().all(|f| f.state() == FlowState::Ended));
    }

    #[test]
    fn environment_globals_override_document() {
        let doc = actuator_blueprint::parse(
            r#"{"globals": {"x": 1, "y": 2}, "flows": [{"name": "f", "source": "int", "sink": "none"}]}"#,
        )
        .unwrap();
        let env = Environment::new().with_global("x", 10);
        let set = FlowSet::from_blueprint(&env, &doc).unwrap();
        assert_eq!(set.scope().get_value("x", false).unwrap(), json!(10));
        assert_eq!(set.scope().get_value("y", false).unwrap(), json!(2));
    }

    #[test]
    fn from_blueprint_rejects_unknown_kinds() {
        let doc = actuator_blueprint::parse(r#"{"flows": [{"source": "nope"}]}"#).unwrap();
        let err = FlowSet::from_blueprint(&Environment::new(), &doc).unwrap_err();
        assert!(matches!(err, ActuatorError::ConfigurationError(_)));
    }
}
