//! Built-in monitors.
//!
//! `once`, `count` and `call` propagate errors. The scheduled loops
//! (`interval`, `change`, `onvalue`, `demand`) report a failed cycle, skip
//! the sink for it, and carry on.

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use actuator_types::{short_string, ActuatorError, Result, Value};

use crate::builtins::{sinks, sources};
use crate::chain::Source;
use crate::component::{Component, Deferred, Lifecycle};
use crate::flow::FlowContext;
use crate::monitor::{DemandHandle, ExitConditions, Monitor, PushSlot};
use crate::params::{ParamKind, ParamSchema, Params};
use crate::pipeline::Driver;
use crate::sink::Sink;

/// `once`, the monitor a flow gets when neither it nor its sink names one.
pub fn once() -> Lifecycle<dyn Monitor> {
    Lifecycle::new("once", Box::new(Once), Deferred::default())
}

/// A `call` monitor, making its flow callable from peers.
pub fn call() -> Lifecycle<dyn Monitor> {
    Lifecycle::new("call", Box::new(OnCall::default()), Deferred::default())
}

pub(crate) fn on_demand(handle: Arc<OnceLock<DemandHandle>>) -> Lifecycle<dyn Monitor> {
    let monitor = OnDemand {
        handle,
        ..OnDemand::default()
    };
    Lifecycle::new("demand", Box::new(monitor), Deferred::default())
}

fn sleep_schema(default: f64) -> ParamSchema {
    ParamSchema::new().optional("sleep", ParamKind::Duration, default)
}

/// Pull once and push, reporting instead of propagating.
fn cycle(driver: &Driver) -> Option<Value> {
    match driver.pull() {
        Ok(value) => Some(value),
        Err(ActuatorError::Interrupted { .. }) if driver.stopped() => None,
        Err(e) => {
            driver.report(&e);
            None
        }
    }
}

fn forward(driver: &Driver, value: Value) {
    if let Err(e) = driver.push(value) {
        driver.report(&e);
    }
}

// ---------------------------------------------------------------------------
// Once / Count
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct Once;

impl Component for Once {}

impl Monitor for Once {
    fn run(&mut self, driver: &Driver) -> Result<()> {
        let value = driver.pull()?;
        driver.push(value)
    }
}

/// Pulls exactly `n` times, unless stopped first.
#[derive(Debug, Default)]
pub struct Count {
    n: u64,
}

impl Component for Count {
    fn schema(&self) -> ParamSchema {
        ParamSchema::new().required("n", ParamKind::Int)
    }

    fn initialise(&mut self, params: Params, _ctx: &FlowContext) -> Result<()> {
        self.n = params.int("n")?.max(0) as u64;
        Ok(())
    }
}

impl Monitor for Count {
    fn run(&mut self, driver: &Driver) -> Result<()> {
        for _ in 0..self.n {
            if driver.stopped() {
                break;
            }
            let value = driver.pull()?;
            driver.push(value)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scheduled loops
// ---------------------------------------------------------------------------

/// Pull, push, sleep, until stopped or an exit condition matches.
#[derive(Debug, Default)]
pub struct Interval {
    sleep: Duration,
    exits: ExitConditions,
}

impl Component for Interval {
    fn schema(&self) -> ParamSchema {
        ExitConditions::schema(sleep_schema(1.0))
    }

    fn initialise(&mut self, params: Params, _ctx: &FlowContext) -> Result<()> {
        self.sleep = params.duration("sleep")?;
        self.exits = ExitConditions::from_params(&params)?;
        Ok(())
    }
}

impl Monitor for Interval {
    fn run(&mut self, driver: &Driver) -> Result<()> {
        loop {
            if let Some(value) = cycle(driver) {
                if let Some(condition) = self.exits.check(&value) {
                    driver.report_exit(condition);
                    return Ok(());
                }
                forward(driver, value);
            }
            if !driver.sleep(self.sleep) {
                return Ok(());
            }
        }
    }
}

/// Like `interval`, but pushes only values that differ from the last one pushed.
#[derive(Debug, Default)]
pub struct Change {
    sleep: Duration,
    last: Option<Value>,
}

impl Component for Change {
    fn schema(&self) -> ParamSchema {
        sleep_schema(1.0)
    }

    fn initialise(&mut self, params: Params, _ctx: &FlowContext) -> Result<()> {
        self.sleep = params.duration("sleep")?;
        self.last = None;
        Ok(())
    }
}

impl Monitor for Change {
    fn run(&mut self, driver: &Driver) -> Result<()> {
        loop {
            if let Some(value) = cycle(driver) {
                if self.last.as_ref() == Some(&value) {
                    tracing::debug!(flow = %driver.flow(), value = %short_string(&value, 60), "Unchanged");
                } else {
                    tracing::info!(flow = %driver.flow(), value = %short_string(&value, 60), "Changed, running sink");
                    self.last = Some(value.clone());
                    forward(driver, value);
                }
            }
            if !driver.sleep(self.sleep) {
                return Ok(());
            }
        }
    }
}

/// Pushes when the pulled value equals `value`: on every match with
/// `always`, otherwise only on the transition into matching.
#[derive(Debug, Default)]
pub struct OnValue {
    target: Value,
    always: bool,
    sleep: Duration,
    matching: bool,
}

impl Component for OnValue {
    fn schema(&self) -> ParamSchema {
        ParamSchema::new()
            .required("value", ParamKind::Any)
            .optional("always", ParamKind::Bool, false)
            .optional("sleep", ParamKind::Duration, 1.0)
    }

    fn initialise(&mut self, params: Params, _ctx: &FlowContext) -> Result<()> {
        self.target = params.value("value");
        self.always = params.bool("always")?;
        self.sleep = params.duration("sleep")?;
        self.matching = false;
        Ok(())
    }
}

impl Monitor for OnValue {
    fn run(&mut self, driver: &Driver) -> Result<()> {
        loop {
            if let Some(value) = cycle(driver) {
                let matches = value == self.target;
                if matches && (self.always || !self.matching) {
                    forward(driver, value);
                }
                self.matching = matches;
            }
            if !driver.sleep(self.sleep) {
                return Ok(());
            }
        }
    }
}

/// Serves pulls requested by peers. Pushes once at start, then idles while
/// any of the flow's sinks is active.
#[derive(Debug, Default)]
pub struct OnDemand {
    handle: Arc<OnceLock<DemandHandle>>,
    sleep: Duration,
}

impl Component for OnDemand {
    fn schema(&self) -> ParamSchema {
        sleep_schema(0.25)
    }

    fn attach(&mut self, ctx: &FlowContext) -> Result<()> {
        // Shared with the sink that suggested this monitor; attach runs once.
        let _ = self.handle.set(ctx.demand_handle());
        Ok(())
    }

    fn initialise(&mut self, params: Params, _ctx: &FlowContext) -> Result<()> {
        self.sleep = params.duration("sleep")?;
        Ok(())
    }
}

impl Monitor for OnDemand {
    fn run(&mut self, driver: &Driver) -> Result<()> {
        if let Some(value) = cycle(driver) {
            forward(driver, value);
        }
        while driver.sinks_active() {
            if !driver.sleep(self.sleep) {
                break;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// OnCall
// ---------------------------------------------------------------------------

/// Makes the flow a function: peers inject a payload, pull once, and get the
/// chain's value back. Runs nothing itself and leaves the flow started.
pub struct OnCall {
    slot: PushSlot,
}

impl Default for OnCall {
    fn default() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }
}

impl Component for OnCall {}

impl Monitor for OnCall {
    fn threaded(&self) -> bool {
        false
    }

    fn ends_flow(&self) -> bool {
        false
    }

    fn run(&mut self, driver: &Driver) -> Result<()> {
        tracing::debug!(flow = %driver.flow(), "Flow is callable");
        Ok(())
    }

    fn suggest_source(&self) -> Option<Lifecycle<dyn Source>> {
        Some(sources::push(self.slot.clone()))
    }

    fn suggest_sink(&self) -> Option<Lifecycle<dyn Sink>> {
        Some(sinks::none())
    }

    fn push_slot(&self) -> Option<PushSlot> {
        Some(self.slot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use crate::events::{EventEmitter, FlowEvent};
    use crate::flow::testing::context;
    use crate::pipeline::tests::driver_over;
    use crate::pipeline::Pipeline;
    use crate::signal::Sleeper;
    use actuator_blueprint::Param;
    use actuator_types::{ActuatorError, Scope};
    use serde_json::json;

    fn ready(kind: &str, inner: Box<dyn Monitor>, deferred: Deferred) -> Lifecycle<dyn Monitor> {
        let mut m = Lifecycle::new(kind, inner, deferred);
        m.set_context(context("test", Scope::root())).unwrap();
        m.setup().unwrap();
        m.start().unwrap();
        m
    }

    fn kwargs(pairs: &[(&str, Value)]) -> Deferred {
        Deferred {
            args: vec![],
            kwargs: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), Param::Literal(v.clone())))
                .collect(),
        }
    }

    #[test]
    fn once_pushes_one_value() {
        let (driver, captured, _) = driver_over(vec![json!(1), json!(2)]);
        let mut m = ready("once", Box::new(Once), Deferred::default());
        m.run(&driver).unwrap();
        assert_eq!(*captured.lock().unwrap(), vec![json!(1)]);
    }

    #[test]
    fn count_pushes_n_values() {
        let (driver, captured, _) = driver_over(vec![json!(1), json!(2), json!(3), json!(4)]);
        let mut m = ready("count", Box::new(Count::default()), Deferred::new(vec![Param::literal(3)]));
        m.run(&driver).unwrap();
        assert_eq!(*captured.lock().unwrap(), vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn interval_exits_on_null() {
        let (driver, captured, events) = driver_over(vec![json!(1), json!(2), json!(3), Value::Null, json!(5)]);
        let mut rx = events.subscribe();
        let mut m = ready("interval", Box::new(Interval::default()), kwargs(&[("sleep", json!(0))]));
        m.run(&driver).unwrap();
        assert_eq!(*captured.lock().unwrap(), vec![json!(1), json!(2), json!(3)]);
        let exits: Vec<FlowEvent> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|e| matches!(e, FlowEvent::ExitConditionMet { .. }))
            .collect();
        assert_eq!(exits.len(), 1);
    }

    #[test]
    fn interval_exit_on_false_only_when_enabled() {
        let (driver, captured, _) = driver_over(vec![json!(true), json!(false), json!(true)]);
        let mut m = ready(
            "interval",
            Box::new(Interval::default()),
            kwargs(&[("sleep", json!(0)), ("exit_on_false", json!(true))]),
        );
        m.run(&driver).unwrap();
        assert_eq!(*captured.lock().unwrap(), vec![json!(true)]);
    }

    #[test]
    fn interval_stops_when_sleeper_stopped() {
        let (driver, captured, _) = driver_over(vec![json!(1), json!(2)]);
        let mut m = ready(
            "interval",
            Box::new(Interval::default()),
            kwargs(&[("sleep", json!(0)), ("exit_on_none", json!(false))]),
        );
        // Not stopped: would loop forever on nulls, so stop from another thread.
        std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(Duration::from_millis(30));
                driver_stop(&driver);
            });
            m.run(&driver).unwrap();
        });
        let captured = captured.lock().unwrap();
        assert_eq!(&captured[..2], &[json!(1), json!(2)]);
        assert!(captured[2..].iter().all(Value::is_null));
    }

    fn driver_stop(driver: &Driver) {
        driver.sleeper().stop();
    }

    #[test]
    fn change_pushes_only_changes() {
        let (driver, captured, _) = driver_over(vec![json!(1), json!(1), json!(2), json!(2), json!(1)]);
        let mut m = ready("change", Box::new(Change::default()), kwargs(&[("sleep", json!(0))]));
        std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(Duration::from_millis(30));
                driver_stop(&driver);
            });
            m.run(&driver).unwrap();
        });
        // Trailing nulls from the exhausted fixture count as one more change.
        assert_eq!(
            *captured.lock().unwrap(),
            vec![json!(1), json!(2), json!(1), Value::Null]
        );
    }

    #[test]
    fn onvalue_transition_only() {
        let (driver, captured, _) = driver_over(vec![json!("a"), json!("a"), json!("b"), json!("a")]);
        let mut m = ready(
            "onvalue",
            Box::new(OnValue::default()),
            kwargs(&[("value", json!("a")), ("sleep", json!(0))]),
        );
        std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(Duration::from_millis(30));
                driver_stop(&driver);
            });
            m.run(&driver).unwrap();
        });
        assert_eq!(*captured.lock().unwrap(), vec![json!("a"), json!("a")]);
    }

    #[test]
    fn onvalue_always() {
        let (driver, captured, _) = driver_over(vec![json!(1), json!(1), json!(2), json!(1)]);
        let mut m = ready(
            "onvalue",
            Box::new(OnValue::default()),
            kwargs(&[("value", json!(1)), ("always", json!(true)), ("sleep", json!(0))]),
        );
        std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(Duration::from_millis(30));
                driver_stop(&driver);
            });
            m.run(&driver).unwrap();
        });
        assert_eq!(*captured.lock().unwrap(), vec![json!(1), json!(1), json!(1)]);
    }

    #[test]
    fn demand_pushes_once_when_no_sink_is_active() {
        let (driver, captured, _) = driver_over(vec![json!(1), json!(2)]);
        let mut m = ready("demand", Box::new(OnDemand::default()), Deferred::default());
        m.run(&driver).unwrap();
        assert_eq!(*captured.lock().unwrap(), vec![json!(1)]);
    }

    struct Flaky(u32);
    impl Component for Flaky {}
    impl Source for Flaky {
        fn value(&mut self) -> Result<Value> {
            self.0 += 1;
            match self.0 {
                1 => Err(ActuatorError::evaluation("flaky", "first pull fails")),
                2 => Ok(json!("ok")),
                _ => Ok(Value::Null),
            }
        }
    }

    fn flaky_driver() -> (Driver, Arc<Mutex<Vec<Value>>>, EventEmitter) {
        let (sink, captured) = sinks::testing::capture();
        let source: Lifecycle<dyn Source> = Lifecycle::new("flaky", Box::new(Flaky(0)), Deferred::default());
        let mut chain = Chain::new(source, vec![]);
        chain.link();
        let events = EventEmitter::new(16);
        let driver = Driver::new(
            "flaky",
            Arc::new(Mutex::new(Pipeline::new(chain, sink))),
            Sleeper::new(),
            events.clone(),
        );
        (driver, captured, events)
    }

    #[test]
    fn scheduled_loop_survives_failing_pull() {
        let (driver, captured, events) = flaky_driver();
        let mut rx = events.subscribe();
        let mut m = ready("interval", Box::new(Interval::default()), kwargs(&[("sleep", json!(0))]));
        m.run(&driver).unwrap();
        assert_eq!(*captured.lock().unwrap(), vec![json!("ok")]);
        assert!(matches!(rx.try_recv().unwrap(), FlowEvent::PullFailed { .. }));
    }

    #[test]
    fn once_propagates_errors() {
        let (driver, captured, _) = flaky_driver();
        let mut m = ready("once", Box::new(Once), Deferred::default());
        let err = m.run(&driver).unwrap_err();
        assert!(matches!(err, ActuatorError::Evaluation { .. }));
        assert!(captured.lock().unwrap().is_empty());
    }

    #[test]
    fn call_monitor_shape() {
        let m = call();
        assert!(!m.threaded());
        assert!(!m.ends_flow());
        assert!(m.push_slot().is_some());
        assert_eq!(m.suggest_source().unwrap().kind(), sources::PUSH_KIND);
        assert_eq!(m.suggest_sink().unwrap().kind(), "none");
    }
}
