//! Built-in sources.

use std::collections::VecDeque;
use std::io::BufRead;
use std::sync::PoisonError;

use actuator_types::{Result, Value};

use crate::chain::Source;
use crate::component::{Component, Deferred, Lifecycle};
use crate::flow::FlowContext;
use crate::monitor::PushSlot;
use crate::params::{ParamKind, ParamSchema, Params};
use crate::sink::Outflow;

/// Kind of the push-only source that callable flows read their payload from.
pub const PUSH_KIND: &str = "_push";

/// `stdin`, the source a flow gets when it names none and nothing feeds it.
pub fn stdin() -> Lifecycle<dyn Source> {
    Lifecycle::new("stdin", Box::new(StdinSource), Deferred::default())
}

/// `inflow`, the source of a flow fed by peers.
pub fn inflow() -> Lifecycle<dyn Source> {
    Lifecycle::new("inflow", Box::new(FlowSource::default()), Deferred::default())
}

pub(crate) fn push(slot: PushSlot) -> Lifecycle<dyn Source> {
    Lifecycle::new(PUSH_KIND, Box::new(PushSource { slot }), Deferred::default())
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct StrSource {
    value: String,
}

impl Component for StrSource {
    fn schema(&self) -> ParamSchema {
        ParamSchema::new().required("value", ParamKind::Str)
    }

    fn initialise(&mut self, params: Params, _ctx: &FlowContext) -> Result<()> {
        self.value = params.str("value")?;
        Ok(())
    }
}

impl Source for StrSource {
    fn value(&mut self) -> Result<Value> {
        Ok(Value::String(self.value.clone()))
    }
}

#[derive(Debug, Default)]
pub struct IntSource {
    value: i64,
}

impl Component for IntSource {
    fn schema(&self) -> ParamSchema {
        ParamSchema::new().optional("value", ParamKind::Int, 1)
    }

    fn initialise(&mut self, params: Params, _ctx: &FlowContext) -> Result<()> {
        self.value = params.int("value")?;
        Ok(())
    }
}

impl Source for IntSource {
    fn value(&mut self) -> Result<Value> {
        Ok(Value::from(self.value))
    }
}

#[derive(Debug, Default)]
pub struct FloatSource {
    value: f64,
}

impl Component for FloatSource {
    fn schema(&self) -> ParamSchema {
        ParamSchema::new().optional("value", ParamKind::Float, 0.0)
    }

    fn initialise(&mut self, params: Params, _ctx: &FlowContext) -> Result<()> {
        self.value = params.float("value")?;
        Ok(())
    }
}

impl Source for FloatSource {
    fn value(&mut self) -> Result<Value> {
        Ok(Value::from(self.value))
    }
}

#[derive(Debug, Default)]
pub struct BoolSource {
    value: bool,
}

impl Component for BoolSource {
    fn schema(&self) -> ParamSchema {
        ParamSchema::new().optional("value", ParamKind::Bool, true)
    }

    fn initialise(&mut self, params: Params, _ctx: &FlowContext) -> Result<()> {
        self.value = params.bool("value")?;
        Ok(())
    }
}

impl Source for BoolSource {
    fn value(&mut self) -> Result<Value> {
        Ok(Value::Bool(self.value))
    }
}

// ---------------------------------------------------------------------------
// Sequences
// ---------------------------------------------------------------------------

/// Counts up by `step` from `start`; the first value is `start + step`.
#[derive(Debug, Default)]
pub struct CounterSource {
    current: i64,
    step: i64,
}

impl Component for CounterSource {
    fn schema(&self) -> ParamSchema {
        ParamSchema::new()
            .optional("start", ParamKind::Int, 0)
            .optional("step", ParamKind::Int, 1)
    }

    fn initialise(&mut self, params: Params, _ctx: &FlowContext) -> Result<()> {
        self.current = params.int("start")?;
        self.step = params.int("step")?;
        Ok(())
    }
}

impl Source for CounterSource {
    fn value(&mut self) -> Result<Value> {
        self.current += self.step;
        Ok(Value::from(self.current))
    }
}

/// Emits each argument in turn, then `null` forever.
#[derive(Debug, Default)]
pub struct SeqSource {
    values: VecDeque<Value>,
}

impl Component for SeqSource {
    fn schema(&self) -> ParamSchema {
        ParamSchema::new().variadic()
    }

    fn initialise(&mut self, params: Params, _ctx: &FlowContext) -> Result<()> {
        self.values = params.into_rest().into();
        Ok(())
    }
}

impl Source for SeqSource {
    fn value(&mut self) -> Result<Value> {
        Ok(self.values.pop_front().unwrap_or(Value::Null))
    }
}

/// One line of standard input per pull, without its line ending; `null` at EOF.
#[derive(Debug, Default)]
pub struct StdinSource;

impl Component for StdinSource {}

impl Source for StdinSource {
    fn value(&mut self) -> Result<Value> {
        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line)? == 0 {
            return Ok(Value::Null);
        }
        let trimmed = line.trim_end_matches(['\n', '\r']);
        Ok(Value::String(trimmed.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Cross-flow sources
// ---------------------------------------------------------------------------

/// Reads the outflows of peer flows that target this flow.
///
/// No inflow gives `null`, one gives its payload, several give a list, or an
/// object keyed by producer when `named` is set.
#[derive(Debug, Default)]
pub struct FlowSource {
    inflows: Vec<Outflow>,
    named: bool,
}

impl Component for FlowSource {
    fn schema(&self) -> ParamSchema {
        ParamSchema::new().optional("named", ParamKind::Bool, false)
    }

    fn initialise(&mut self, params: Params, _ctx: &FlowContext) -> Result<()> {
        self.named = params.bool("named")?;
        Ok(())
    }
}

impl Source for FlowSource {
    fn value(&mut self) -> Result<Value> {
        match self.inflows.as_slice() {
            [] => Ok(Value::Null),
            [only] => only.get_payload(),
            many if self.named => many
                .iter()
                .map(|i| Ok((i.producer().to_string(), i.get_payload()?)))
                .collect::<Result<serde_json::Map<_, _>>>()
                .map(Value::Object),
            many => many
                .iter()
                .map(Outflow::get_payload)
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
        }
    }

    fn wire(&mut self, inflows: Vec<Outflow>) -> Result<()> {
        self.inflows = inflows;
        Ok(())
    }
}

/// The payload of the call in progress, `null` outside a call.
pub(crate) struct PushSource {
    slot: PushSlot,
}

impl Component for PushSource {}

impl Source for PushSource {
    fn value(&mut self) -> Result<Value> {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(slot.clone().unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::testing::context;
    use crate::monitor::DemandHandle;
    use crate::signal::Latch;
    use actuator_blueprint::Param;
    use actuator_types::Scope;
    use serde_json::json;
    use std::sync::{Arc, Mutex, OnceLock, Weak};

    fn ready(kind: &str, inner: Box<dyn Source>, args: Vec<Param>) -> Lifecycle<dyn Source> {
        let mut src = Lifecycle::new(kind, inner, Deferred::new(args));
        src.set_context(context("f", Scope::root())).unwrap();
        src.setup().unwrap();
        src
    }

    fn outflow(from: &str, value: Value) -> Outflow {
        Outflow::new(
            from,
            "f",
            Arc::new(Mutex::new(value)),
            Arc::new(OnceLock::<DemandHandle>::new()),
        )
    }

    #[test]
    fn constants() {
        let mut s = ready("str", Box::new(StrSource::default()), vec![Param::literal("hi")]);
        assert_eq!(s.pull().unwrap(), json!("hi"));
        let mut i = ready("int", Box::new(IntSource::default()), vec![]);
        assert_eq!(i.pull().unwrap(), json!(1));
        let mut b = ready("bool", Box::new(BoolSource::default()), vec![Param::literal("off")]);
        assert_eq!(b.pull().unwrap(), json!(false));
        let mut f = ready("float", Box::new(FloatSource::default()), vec![Param::literal("2.5")]);
        assert_eq!(f.pull().unwrap(), json!(2.5));
    }

    #[test]
    fn str_requires_value() {
        let mut s: Lifecycle<dyn Source> =
            Lifecycle::new("str", Box::new(StrSource::default()), Deferred::default());
        s.set_context(context("f", Scope::root())).unwrap();
        assert!(s.setup().is_err());
    }

    #[test]
    fn counter_steps_from_start() {
        let mut c = ready(
            "counter",
            Box::new(CounterSource::default()),
            vec![Param::literal(10), Param::literal(5)],
        );
        let got: Vec<Value> = (0..3).map(|_| c.pull().unwrap()).collect();
        assert_eq!(got, vec![json!(15), json!(20), json!(25)]);
    }

    #[test]
    fn seq_then_null() {
        let mut s = ready(
            "seq",
            Box::new(SeqSource::default()),
            vec![Param::literal(1), Param::literal("two")],
        );
        assert_eq!(s.pull().unwrap(), json!(1));
        assert_eq!(s.pull().unwrap(), json!("two"));
        assert_eq!(s.pull().unwrap(), Value::Null);
        assert_eq!(s.pull().unwrap(), Value::Null);
    }

    #[test]
    fn flow_source_shapes() {
        let mut none = ready("inflow", Box::new(FlowSource::default()), vec![]);
        assert_eq!(none.pull().unwrap(), Value::Null);

        let mut one = ready("inflow", Box::new(FlowSource::default()), vec![]);
        one.wire(vec![outflow("a", json!(1))]).unwrap();
        assert_eq!(one.pull().unwrap(), json!(1));

        let mut many = ready("inflow", Box::new(FlowSource::default()), vec![]);
        many.wire(vec![outflow("a", json!(1)), outflow("b", json!(2))]).unwrap();
        assert_eq!(many.pull().unwrap(), json!([1, 2]));

        let mut named = ready(
            "inflow",
            Box::new(FlowSource::default()),
            vec![Param::literal(true)],
        );
        named.wire(vec![outflow("a", json!(1)), outflow("b", json!(2))]).unwrap();
        assert_eq!(named.pull().unwrap(), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn on_demand_inflow_waits_for_producer() {
        let demand = Arc::new(OnceLock::new());
        let started = Latch::new();
        demand
            .set(DemandHandle::new("gone", Weak::new(), started.clone()))
            .unwrap();
        let inflow = Outflow::new("gone", "f", Arc::new(Mutex::new(Value::Null)), demand);
        assert!(inflow.is_on_demand());
        started.set();
        // The producing flow has been dropped.
        assert!(inflow.get_payload().is_err());
    }

    #[test]
    fn push_source_reads_slot() {
        let slot: PushSlot = Arc::new(Mutex::new(None));
        let mut src = push(slot.clone());
        src.set_context(context("f", Scope::root())).unwrap();
        src.setup().unwrap();
        assert_eq!(src.pull().unwrap(), Value::Null);
        *slot.lock().unwrap() = Some(json!(4));
        assert_eq!(src.pull().unwrap(), json!(4));
    }
}
