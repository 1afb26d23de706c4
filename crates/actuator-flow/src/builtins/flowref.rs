//! Cross-flow components: the `_flowref` sink that feeds a peer flow, and the
//! `_flowref`, `map` and `filter` operators that call a peer flow as a function.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use actuator_blueprint::{Param, FLOWREF_KIND};
use actuator_types::{short_string, truthy, ActuatorError, Result, Value};

use crate::builtins::monitors;
use crate::chain::{Operator, Upstream};
use crate::component::{Component, Deferred, Lifecycle};
use crate::flow::{FlowContext, FlowHandle, FlowState};
use crate::monitor::{CallHandle, DemandHandle, Monitor};
use crate::params::{ParamKind, ParamSchema};
use crate::sink::{Outflow, PayloadSlot, Sink};

/// A sink feeding `target`, as built for `... | @target`.
pub fn flow_sink(target: &str) -> Lifecycle<dyn Sink> {
    Lifecycle::new(
        FLOWREF_KIND,
        Box::new(FlowSink::new(target)),
        Deferred::new(vec![Param::flow(target)]),
    )
}

fn target_of(kind: &str, deferred: &Deferred) -> Result<String> {
    deferred.flow_name().map(String::from).ok_or_else(|| {
        ActuatorError::ConfigurationError(format!("{kind} needs the name of a flow as its first argument"))
    })
}

fn flow_schema() -> ParamSchema {
    ParamSchema::new().required("flow", ParamKind::Str)
}

// ---------------------------------------------------------------------------
// FlowSink
// ---------------------------------------------------------------------------

pub(crate) fn flow_sink_factory(deferred: &Deferred) -> Result<Box<dyn Sink>> {
    let target = target_of(FLOWREF_KIND, deferred)?;
    Ok(Box::new(FlowSink::new(&target)))
}

/// Feeds a peer flow's `inflow` source.
///
/// Holds the last pushed payload; when driven by its suggested on-demand
/// monitor the peer pulls through this flow's chain instead.
pub struct FlowSink {
    from: String,
    target: String,
    peer: Option<FlowHandle>,
    payload: PayloadSlot,
    demand: Arc<OnceLock<DemandHandle>>,
}

impl FlowSink {
    pub fn new(target: &str) -> Self {
        Self {
            from: String::new(),
            target: target.to_string(),
            peer: None,
            payload: Arc::new(Mutex::new(Value::Null)),
            demand: Arc::new(OnceLock::new()),
        }
    }
}

impl Component for FlowSink {
    fn schema(&self) -> ParamSchema {
        flow_schema()
    }

    // Resolved at attach time so peers are wired before any setup runs.
    fn attach(&mut self, ctx: &FlowContext) -> Result<()> {
        if self.target == ctx.flow() {
            return Err(ActuatorError::ConfigurationError(format!(
                "flow '{}' cannot feed itself",
                self.target
            )));
        }
        self.peer = Some(ctx.peer(&self.target)?.clone());
        self.from = ctx.flow().to_string();
        Ok(())
    }
}

impl Sink for FlowSink {
    fn perform(&mut self, payload: Value) -> Result<()> {
        *self.payload.lock().unwrap_or_else(PoisonError::into_inner) = payload;
        Ok(())
    }

    /// Active until the target flow ends.
    fn active(&self) -> bool {
        self.peer
            .as_ref()
            .is_some_and(|peer| peer.state() < FlowState::Ending)
    }

    fn suggest_monitor(&self) -> Option<Lifecycle<dyn Monitor>> {
        Some(monitors::on_demand(self.demand.clone()))
    }

    fn target(&self) -> Option<&str> {
        Some(&self.target)
    }

    fn outflow(&self) -> Option<Outflow> {
        Some(Outflow::new(
            self.from.clone(),
            self.target.clone(),
            self.payload.clone(),
            self.demand.clone(),
        ))
    }
}

// ---------------------------------------------------------------------------
// SubFlow / Map / Filter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallMode {
    Call,
    Map,
    Filter,
}

pub(crate) fn subflow(deferred: &Deferred) -> Result<Box<dyn Operator>> {
    SubFlow::boxed(CallMode::Call, FLOWREF_KIND, deferred)
}

pub(crate) fn map(deferred: &Deferred) -> Result<Box<dyn Operator>> {
    SubFlow::boxed(CallMode::Map, "map", deferred)
}

pub(crate) fn filter(deferred: &Deferred) -> Result<Box<dyn Operator>> {
    SubFlow::boxed(CallMode::Filter, "filter", deferred)
}

/// Calls a peer flow synchronously with the upstream value (`_flowref`), with
/// each list item (`map`), or keeps the items for which the call is truthy
/// (`filter`). The peer must be driven by a `call` monitor.
pub struct SubFlow {
    mode: CallMode,
    target: String,
    call: Option<CallHandle>,
}

impl SubFlow {
    fn boxed(mode: CallMode, kind: &str, deferred: &Deferred) -> Result<Box<dyn Operator>> {
        Ok(Box::new(SubFlow {
            mode,
            target: target_of(kind, deferred)?,
            call: None,
        }))
    }

    fn handle(&self) -> Result<&CallHandle> {
        self.call.as_ref().ok_or_else(|| {
            ActuatorError::ConfigurationError(format!("call to flow '{}' before it was attached", self.target))
        })
    }

    fn items(&self, value: Value) -> Result<Vec<Value>> {
        match value {
            Value::Array(items) => Ok(items),
            other => Err(ActuatorError::evaluation(
                format!("{:?} @{}", self.mode, self.target),
                format!("expected a list, got {}", short_string(&other, 40)),
            )),
        }
    }
}

impl Component for SubFlow {
    fn schema(&self) -> ParamSchema {
        flow_schema()
    }

    fn attach(&mut self, ctx: &FlowContext) -> Result<()> {
        if self.target == ctx.flow() {
            return Err(ActuatorError::ConfigurationError(format!(
                "flow '{}' cannot call itself",
                self.target
            )));
        }
        let peer = ctx.peer(&self.target)?;
        let call = peer.call_handle().ok_or_else(|| ActuatorError::NotCallable {
            flow: self.target.clone(),
        })?;
        self.call = Some(call.clone());
        Ok(())
    }
}

impl Operator for SubFlow {
    fn value(&mut self, upstream: &mut Upstream<'_>) -> Result<Value> {
        let value = upstream.value()?;
        let call = self.handle()?;
        match self.mode {
            CallMode::Call => call.call(value),
            CallMode::Map => self
                .items(value)?
                .into_iter()
                .map(|item| call.call(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            CallMode::Filter => {
                let mut kept = Vec::new();
                for item in self.items(value)? {
                    if truthy(&call.call(item.clone())?) {
                        kept.push(item);
                    }
                }
                Ok(Value::Array(kept))
            }
        }
    }
}
