//! A flow's source, operator chain and sink behind one mutex, and the
//! [`Driver`] monitors use to operate it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use actuator_types::{short_string, ActuatorError, Result, Value};

use crate::chain::Chain;
use crate::component::Lifecycle;
use crate::events::{EventEmitter, FlowEvent};
use crate::flow::FlowContext;
use crate::monitor::ExitCondition;
use crate::signal::Sleeper;
use crate::sink::{Outflow, Sink};

pub struct Pipeline {
    chain: Chain,
    sink: Lifecycle<dyn Sink>,
}

pub type SharedPipeline = Arc<Mutex<Pipeline>>;

pub(crate) fn lock(pipeline: &Mutex<Pipeline>) -> MutexGuard<'_, Pipeline> {
    pipeline.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Pipeline {
    pub fn new(chain: Chain, sink: Lifecycle<dyn Sink>) -> Self {
        Self { chain, sink }
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut Chain {
        &mut self.chain
    }

    pub fn sink(&self) -> &Lifecycle<dyn Sink> {
        &self.sink
    }

    pub fn pull(&mut self) -> Result<Value> {
        self.chain.value()
    }

    pub fn push(&mut self, payload: Value) -> Result<()> {
        self.sink.push(payload)
    }

    /// Every sink in the flow: inline tees first, then the terminal sink.
    pub fn sinks(&self) -> impl Iterator<Item = &Lifecycle<dyn Sink>> {
        self.chain.tees().chain(std::iter::once(&self.sink))
    }

    pub fn sinks_active(&self) -> bool {
        self.sinks().any(|s| s.active())
    }

    pub fn outflows(&self) -> Vec<Outflow> {
        self.sinks().filter_map(|s| s.outflow()).collect()
    }

    pub(crate) fn set_context(&mut self, ctx: &FlowContext) -> Result<()> {
        self.chain.source_mut().set_context(ctx.clone())?;
        for op in self.chain.operators_mut() {
            op.set_context(ctx.clone())?;
        }
        self.sink.set_context(ctx.clone())
    }

    pub(crate) fn setup(&mut self) -> Result<()> {
        self.chain.source_mut().setup()?;
        for op in self.chain.operators_mut() {
            op.setup()?;
        }
        self.sink.setup()
    }

    /// Start source, operators, then sink.
    pub(crate) fn start(&mut self) -> Result<()> {
        self.chain.source_mut().start()?;
        for op in self.chain.operators_mut() {
            op.start()?;
        }
        self.sink.start()
    }

    /// Stop source, operators, then sink. Every component is stopped even if
    /// an earlier one fails; failures are logged.
    pub(crate) fn stop(&mut self, flow: &str) {
        let source = self.chain.source_mut();
        if let Err(e) = source.stop() {
            tracing::warn!(flow = %flow, kind = %source.kind(), error = %e, "Source failed to stop");
        }
        for op in self.chain.operators_mut() {
            if let Err(e) = op.stop() {
                tracing::warn!(flow = %flow, kind = %op.kind(), error = %e, "Operator failed to stop");
            }
        }
        if let Err(e) = self.sink.stop() {
            tracing::warn!(flow = %flow, kind = %self.sink.kind(), error = %e, "Sink failed to stop");
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("chain", &self.chain)
            .field("sink", &self.sink.kind())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// What a monitor gets to operate its flow: pull the chain, push to the sink,
/// sleep interruptibly, and report.
pub struct Driver {
    flow: String,
    pipeline: SharedPipeline,
    sleeper: Sleeper,
    events: EventEmitter,
}

impl Driver {
    pub fn new(
        flow: impl Into<String>,
        pipeline: SharedPipeline,
        sleeper: Sleeper,
        events: EventEmitter,
    ) -> Self {
        Self {
            flow: flow.into(),
            pipeline,
            sleeper,
            events,
        }
    }

    pub fn flow(&self) -> &str {
        &self.flow
    }

    /// Evaluate the chain once.
    pub fn pull(&self) -> Result<Value> {
        lock(&self.pipeline).pull()
    }

    /// Forward a value to the flow's sink.
    pub fn push(&self, payload: Value) -> Result<()> {
        tracing::debug!(flow = %self.flow, payload = %short_string(&payload, 60), "Running sink");
        lock(&self.pipeline).push(payload.clone())?;
        self.events.emit(FlowEvent::SinkPerformed {
            flow: self.flow.clone(),
            payload,
        });
        Ok(())
    }

    /// Sleep for `duration`; `false` once the flow has been asked to stop.
    pub fn sleep(&self, duration: Duration) -> bool {
        self.sleeper.sleep(duration)
    }

    pub fn stopped(&self) -> bool {
        self.sleeper.is_stopped()
    }

    #[cfg(test)]
    pub(crate) fn sleeper(&self) -> &Sleeper {
        &self.sleeper
    }

    pub fn sinks_active(&self) -> bool {
        lock(&self.pipeline).sinks_active()
    }

    /// Log a failed cycle of a scheduled loop; the loop carries on.
    pub fn report(&self, err: &ActuatorError) {
        tracing::error!(flow = %self.flow, error = %err, "Monitor cycle failed");
        self.events.emit(FlowEvent::PullFailed {
            flow: self.flow.clone(),
            error: err.to_string(),
        });
    }

    pub fn report_exit(&self, condition: ExitCondition) {
        tracing::info!(flow = %self.flow, condition = ?condition, "Exit condition met");
        self.events.emit(FlowEvent::ExitConditionMet {
            flow: self.flow.clone(),
            condition: format!("{condition:?}"),
        });
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver").field("flow", &self.flow).finish()
    }
}
