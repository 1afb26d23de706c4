//! Sink contract and cross-flow outflows.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use actuator_types::{ActuatorError, Result, Value};

use crate::component::{Component, Lifecycle};
use crate::monitor::{DemandHandle, Monitor};

/// Terminal consumer of a flow's values.
pub trait Sink: Component {
    fn perform(&mut self, _payload: Value) -> Result<()> {
        Err(ActuatorError::UnimplementedOperator {
            kind: std::any::type_name::<Self>().into(),
        })
    }

    /// Whether the sink is still driving its flow. Passive sinks return `false`.
    fn active(&self) -> bool {
        false
    }

    /// A monitor this sink would rather be driven by, when none was given.
    fn suggest_monitor(&self) -> Option<Lifecycle<dyn Monitor>> {
        None
    }

    /// Name of the peer flow this sink feeds, known from construction.
    fn target(&self) -> Option<&str> {
        None
    }

    /// Handle through which the target flow reads this sink's values.
    fn outflow(&self) -> Option<Outflow> {
        None
    }
}

impl Lifecycle<dyn Sink> {
    pub fn push(&mut self, payload: Value) -> Result<()> {
        let result = (**self).perform(payload);
        result.map_err(|e| self.label_error(e))
    }
}

/// Latest value pushed by a producing sink.
pub(crate) type PayloadSlot = Arc<Mutex<Value>>;

/// One producer's side of an inflow: either the last pushed payload, or an
/// on-demand pull through the producing flow's chain.
#[derive(Clone)]
pub struct Outflow {
    from: String,
    target: String,
    payload: PayloadSlot,
    demand: Arc<OnceLock<DemandHandle>>,
}

impl Outflow {
    pub(crate) fn new(
        from: impl Into<String>,
        target: impl Into<String>,
        payload: PayloadSlot,
        demand: Arc<OnceLock<DemandHandle>>,
    ) -> Self {
        Self {
            from: from.into(),
            target: target.into(),
            payload,
            demand,
        }
    }

    /// Name of the producing flow.
    pub fn producer(&self) -> &str {
        &self.from
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_on_demand(&self) -> bool {
        self.demand.get().is_some()
    }

    pub fn get_payload(&self) -> Result<Value> {
        match self.demand.get() {
            Some(handle) => handle.demand(),
            None => Ok(self
                .payload
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()),
        }
    }
}

impl std::fmt::Debug for Outflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outflow")
            .field("from", &self.from)
            .field("target", &self.target)
            .field("on_demand", &self.is_on_demand())
            .finish()
    }
}
