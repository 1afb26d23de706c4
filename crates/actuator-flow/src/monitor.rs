//! Monitor contract and the capabilities monitors are composed from.
//!
//! A monitor is the scheduling authority of one flow: it decides when the
//! chain is pulled and when values reach the sink. Behaviour shared between
//! monitors (interruptible sleep, exit conditions) lives in small capability
//! types the concrete monitors hold, not in a base type.

use std::cell::RefCell;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use actuator_types::{ActuatorError, Result, Value};

use crate::chain::Source;
use crate::component::{Component, Lifecycle};
use crate::params::{ParamKind, ParamSchema, Params};
use crate::pipeline::{lock, Driver, Pipeline};
use crate::signal::Latch;
use crate::sink::Sink;

pub trait Monitor: Component {
    /// Whether the flow runs this monitor on a dedicated thread.
    fn threaded(&self) -> bool {
        true
    }

    /// Whether the flow ends when `run` returns.
    fn ends_flow(&self) -> bool {
        true
    }

    fn run(&mut self, driver: &Driver) -> Result<()>;

    fn suggest_source(&self) -> Option<Lifecycle<dyn Source>> {
        None
    }

    fn suggest_sink(&self) -> Option<Lifecycle<dyn Sink>> {
        None
    }

    /// Injection point for synchronous calls, for monitors that are callable.
    fn push_slot(&self) -> Option<PushSlot> {
        None
    }
}

// ---------------------------------------------------------------------------
// Exit conditions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCondition {
    AnyNull,
    IsFalse,
    IsEmptyString,
}

impl ExitCondition {
    pub fn matches(self, value: &Value) -> bool {
        match self {
            ExitCondition::AnyNull => value.is_null(),
            ExitCondition::IsFalse => *value == Value::Bool(false),
            ExitCondition::IsEmptyString => value.as_str() == Some(""),
        }
    }
}

/// The set of values that end a scheduled loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitConditions(Vec<ExitCondition>);

impl ExitConditions {
    pub fn new(conditions: Vec<ExitCondition>) -> Self {
        Self(conditions)
    }

    /// Parameters understood by [`from_params`](Self::from_params).
    pub fn schema(schema: ParamSchema) -> ParamSchema {
        schema
            .optional("exit_on_none", ParamKind::Bool, true)
            .optional("exit_on_false", ParamKind::Bool, false)
            .optional("exit_on_empty", ParamKind::Bool, false)
    }

    pub fn from_params(params: &Params) -> Result<Self> {
        let mut conditions = Vec::new();
        if params.bool("exit_on_none")? {
            conditions.push(ExitCondition::AnyNull);
        }
        if params.bool("exit_on_false")? {
            conditions.push(ExitCondition::IsFalse);
        }
        if params.bool("exit_on_empty")? {
            conditions.push(ExitCondition::IsEmptyString);
        }
        Ok(Self(conditions))
    }

    /// The first condition the value meets, if any.
    pub fn check(&self, value: &Value) -> Option<ExitCondition> {
        self.0.iter().copied().find(|c| c.matches(value))
    }
}

// ---------------------------------------------------------------------------
// Cross-flow handles
// ---------------------------------------------------------------------------

/// Forces one pull through a producing flow's chain, for peers that read its
/// values on demand.
#[derive(Clone)]
pub struct DemandHandle {
    flow: String,
    pipeline: Weak<Mutex<Pipeline>>,
    started: Latch,
}

impl DemandHandle {
    pub(crate) fn new(flow: impl Into<String>, pipeline: Weak<Mutex<Pipeline>>, started: Latch) -> Self {
        Self {
            flow: flow.into(),
            pipeline,
            started,
        }
    }

    pub fn flow(&self) -> &str {
        &self.flow
    }

    /// Wait for the producing flow to start, then evaluate its chain once.
    pub fn demand(&self) -> Result<Value> {
        self.started.wait();
        let pipeline = self.pipeline.upgrade().ok_or_else(|| {
            ActuatorError::Other(format!("flow '{}' is gone", self.flow))
        })?;
        let value = lock(&pipeline).pull();
        tracing::trace!(flow = %self.flow, ok = value.is_ok(), "Served demand");
        value
    }
}

/// Value injected into a callable flow for the duration of one call.
pub type PushSlot = Arc<Mutex<Option<Value>>>;

/// Invokes a callable flow synchronously on the caller's thread.
#[derive(Clone)]
pub struct CallHandle {
    flow: String,
    slot: PushSlot,
    pipeline: Weak<Mutex<Pipeline>>,
    started: Latch,
}

impl CallHandle {
    pub(crate) fn new(
        flow: impl Into<String>,
        slot: PushSlot,
        pipeline: Weak<Mutex<Pipeline>>,
        started: Latch,
    ) -> Self {
        Self {
            flow: flow.into(),
            slot,
            pipeline,
            started,
        }
    }

    pub fn flow(&self) -> &str {
        &self.flow
    }

    /// Inject `payload`, pull the flow's chain once, reset, and return the result.
    ///
    /// A call back into a flow this thread is already inside of is a
    /// configuration error, not a deadlock.
    pub fn call(&self, payload: Value) -> Result<Value> {
        self.started.wait();
        let pipeline = self.pipeline.upgrade().ok_or_else(|| {
            ActuatorError::Other(format!("flow '{}' is gone", self.flow))
        })?;
        let _entered = CallFrame::enter(&self.flow)?;
        let mut pipeline = lock(&pipeline);
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(payload);
        let result = pipeline.pull();
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        result
    }
}

thread_local! {
    static CALL_STACK: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Marks a flow as being called on this thread until dropped.
struct CallFrame;

impl CallFrame {
    fn enter(flow: &str) -> Result<Self> {
        CALL_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.iter().any(|f| f == flow) {
                let mut ring = stack.clone();
                ring.push(flow.to_string());
                return Err(ActuatorError::ConfigurationError(format!(
                    "flows call each other in a cycle: {}",
                    ring.join(" -> ")
                )));
            }
            stack.push(flow.to_string());
            Ok(CallFrame)
        })
    }
}

impl Drop for CallFrame {
    fn drop(&mut self) {
        CALL_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

impl std::fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHandle").field("flow", &self.flow).finish()
    }
}

impl std::fmt::Debug for DemandHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DemandHandle").field("flow", &self.flow).finish()
    }
}
