//! Built-in operators: conversions, accessors, and the stateful transforms
//! (`cached`, `forever`, `once`, `change`, `smooth`, `try`).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use actuator_types::{short_string, truthy, ActuatorError, Result, Value};

use crate::chain::{Operator, Upstream};
use crate::component::{Component, Deferred, Lifecycle};
use crate::flow::FlowContext;
use crate::params::{ParamKind, ParamSchema, Params};
use crate::sink::Sink;

// ---------------------------------------------------------------------------
// Pass-through and conversions
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct Noop;

impl Component for Noop {}

impl Operator for Noop {
    fn value(&mut self, upstream: &mut Upstream<'_>) -> Result<Value> {
        upstream.value()
    }
}

/// Equality with `to`; a list `to` tests membership instead.
#[derive(Debug, Default)]
pub struct Equals {
    to: Value,
}

impl Component for Equals {
    fn schema(&self) -> ParamSchema {
        ParamSchema::new().required("to", ParamKind::Any)
    }

    fn initialise(&mut self, params: Params, _ctx: &FlowContext) -> Result<()> {
        self.to = params.value("to");
        Ok(())
    }
}

impl Operator for Equals {
    fn value(&mut self, upstream: &mut Upstream<'_>) -> Result<Value> {
        let value = upstream.value()?;
        let equal = match &self.to {
            Value::Array(items) => items.contains(&value),
            to => *to == value,
        };
        Ok(Value::Bool(equal))
    }
}

#[derive(Debug, Default)]
pub struct Not;

impl Component for Not {}

impl Operator for Not {
    fn value(&mut self, upstream: &mut Upstream<'_>) -> Result<Value> {
        Ok(Value::Bool(!truthy(&upstream.value()?)))
    }
}

#[derive(Debug, Default)]
pub struct Str;

impl Component for Str {}

impl Operator for Str {
    fn value(&mut self, upstream: &mut Upstream<'_>) -> Result<Value> {
        Ok(match upstream.value()? {
            s @ Value::String(_) => s,
            other => Value::String(other.to_string()),
        })
    }
}

#[derive(Debug, Default)]
pub struct Int;

impl Component for Int {}

impl Operator for Int {
    fn value(&mut self, upstream: &mut Upstream<'_>) -> Result<Value> {
        to_int(&upstream.value()?).map(Value::from)
    }
}

#[derive(Debug, Default)]
pub struct Float;

impl Component for Float {}

impl Operator for Float {
    fn value(&mut self, upstream: &mut Upstream<'_>) -> Result<Value> {
        to_float(&upstream.value()?).map(Value::from)
    }
}

/// Integer value of a number, numeric string or boolean. Floats truncate.
pub(crate) fn to_int(value: &Value) -> Result<i64> {
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f.trunc() as i64))
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    };
    parsed.ok_or_else(|| {
        ActuatorError::evaluation("int", format!("cannot convert {} to an integer", short_string(value, 40)))
    })
}

pub(crate) fn to_float(value: &Value) -> Result<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    parsed.ok_or_else(|| {
        ActuatorError::evaluation("float", format!("cannot convert {} to a number", short_string(value, 40)))
    })
}

/// Hex SHA-256 digest of the upstream value. Strings are hashed as their
/// text, anything else as compact JSON. `null` passes through.
#[derive(Debug, Default)]
pub struct Hash;

impl Component for Hash {
    fn schema(&self) -> ParamSchema {
        ParamSchema::new().optional("algo", ParamKind::Str, "sha256")
    }

    fn initialise(&mut self, params: Params, _ctx: &FlowContext) -> Result<()> {
        match params.str("algo")?.as_str() {
            "sha256" => Ok(()),
            other => Err(ActuatorError::ConfigurationError(format!(
                "hash: unsupported algorithm '{other}', only 'sha256'"
            ))),
        }
    }
}

impl Operator for Hash {
    fn value(&mut self, upstream: &mut Upstream<'_>) -> Result<Value> {
        let value = upstream.value()?;
        let text = match &value {
            Value::Null => return Ok(Value::Null),
            Value::String(s) => s.clone(),
            other => serde_json::to_string(other)?,
        };
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        Ok(Value::String(hex::encode(hasher.finalize())))
    }
}

// ---------------------------------------------------------------------------
// Accessors and collections
// ---------------------------------------------------------------------------

/// Dotted-path accessor into objects and lists. Missing paths give `null`.
#[derive(Debug, Default)]
pub struct Get {
    path: Vec<String>,
}

impl Component for Get {
    fn schema(&self) -> ParamSchema {
        ParamSchema::new().required("path", ParamKind::Str)
    }

    fn initialise(&mut self, params: Params, _ctx: &FlowContext) -> Result<()> {
        self.path = params
            .str("path")?
            .split('.')
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        Ok(())
    }
}

impl Operator for Get {
    fn value(&mut self, upstream: &mut Upstream<'_>) -> Result<Value> {
        let value = upstream.value()?;
        let mut current = &value;
        for segment in &self.path {
            let next = match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            match next {
                Some(v) => current = v,
                None => return Ok(Value::Null),
            }
        }
        Ok(current.clone())
    }
}

/// Whether the value contains any of the given names: object keys, list
/// items, or substrings.
#[derive(Debug, Default)]
pub struct Has {
    names: Vec<Value>,
}

impl Component for Has {
    fn schema(&self) -> ParamSchema {
        ParamSchema::new().variadic()
    }

    fn initialise(&mut self, params: Params, _ctx: &FlowContext) -> Result<()> {
        self.names = params.into_rest();
        Ok(())
    }
}

impl Operator for Has {
    fn value(&mut self, upstream: &mut Upstream<'_>) -> Result<Value> {
        let value = upstream.value()?;
        let found = self.names.iter().any(|name| match (&value, name) {
            (Value::Object(map), Value::String(key)) => map.contains_key(key),
            (Value::Array(items), name) => items.contains(name),
            (Value::String(s), Value::String(part)) => s.contains(part.as_str()),
            _ => false,
        });
        Ok(Value::Bool(found))
    }
}

fn items(kind: &str, value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(map) => Ok(map.into_iter().map(|(_, v)| v).collect()),
        other => Err(ActuatorError::evaluation(
            kind,
            format!("expected a list, got {}", short_string(&other, 40)),
        )),
    }
}

#[derive(Debug, Default)]
pub struct All;

impl Component for All {}

impl Operator for All {
    fn value(&mut self, upstream: &mut Upstream<'_>) -> Result<Value> {
        let items = items("all", upstream.value()?)?;
        Ok(Value::Bool(items.iter().all(truthy)))
    }
}

#[derive(Debug, Default)]
pub struct Any;

impl Component for Any {}

impl Operator for Any {
    fn value(&mut self, upstream: &mut Upstream<'_>) -> Result<Value> {
        let items = items("any", upstream.value()?)?;
        Ok(Value::Bool(items.iter().any(truthy)))
    }
}

/// Splits the value's string form on `delim`, or on whitespace when unset.
#[derive(Debug, Default)]
pub struct Split {
    delim: Option<String>,
}

impl Component for Split {
    fn schema(&self) -> ParamSchema {
        ParamSchema::new().optional("delim", ParamKind::Str, Value::Null)
    }

    fn initialise(&mut self, params: Params, _ctx: &FlowContext) -> Result<()> {
        self.delim = params.get("delim").map(|_| params.str("delim")).transpose()?;
        Ok(())
    }
}

impl Operator for Split {
    fn value(&mut self, upstream: &mut Upstream<'_>) -> Result<Value> {
        let text = match upstream.value()? {
            Value::Null => return Ok(Value::Null),
            Value::String(s) => s,
            other => other.to_string(),
        };
        let parts: Vec<Value> = match &self.delim {
            Some(delim) => text.split(delim.as_str()).map(Value::from).collect(),
            None => text.split_whitespace().map(Value::from).collect(),
        };
        Ok(Value::Array(parts))
    }
}

/// Emits the items of each upstream list one at a time, fetching the next
/// list once the current one is used up.
#[derive(Debug, Default)]
pub struct Feed {
    parts: VecDeque<Value>,
}

impl Component for Feed {}

impl Operator for Feed {
    fn value(&mut self, upstream: &mut Upstream<'_>) -> Result<Value> {
        while self.parts.is_empty() {
            match upstream.value()? {
                Value::Null => return Ok(Value::Null),
                Value::Array(items) => self.parts = items.into(),
                other => self.parts.push_back(other),
            }
        }
        Ok(self.parts.pop_front().unwrap_or(Value::Null))
    }
}

// ---------------------------------------------------------------------------
// Stateful transforms
// ---------------------------------------------------------------------------

/// Re-polls upstream only when nothing is cached or `delay` has elapsed.
#[derive(Debug, Default)]
pub struct Cached {
    delay: Duration,
    last: Option<(Instant, Value)>,
}

impl Component for Cached {
    fn schema(&self) -> ParamSchema {
        ParamSchema::new().optional("delay", ParamKind::Duration, 10)
    }

    fn initialise(&mut self, params: Params, _ctx: &FlowContext) -> Result<()> {
        self.delay = params.duration("delay")?;
        self.last = None;
        Ok(())
    }
}

impl Operator for Cached {
    fn value(&mut self, upstream: &mut Upstream<'_>) -> Result<Value> {
        if let Some((at, value)) = &self.last {
            if at.elapsed() <= self.delay {
                return Ok(value.clone());
            }
        }
        tracing::debug!(upstream = %upstream.kind(), "Cache expired, polling upstream");
        let value = upstream.value()?;
        self.last = Some((Instant::now(), value.clone()));
        Ok(value)
    }
}

/// Evaluates upstream on the first read and returns that value forever.
#[derive(Debug, Default)]
pub struct Forever {
    value: Option<Value>,
}

impl Component for Forever {}

impl Operator for Forever {
    fn value(&mut self, upstream: &mut Upstream<'_>) -> Result<Value> {
        if let Some(v) = &self.value {
            return Ok(v.clone());
        }
        let v = upstream.value()?;
        self.value = Some(v.clone());
        Ok(v)
    }
}

/// Evaluates upstream on the first read; `null` ever after.
#[derive(Debug, Default)]
pub struct Once {
    done: bool,
}

impl Component for Once {}

impl Operator for Once {
    fn value(&mut self, upstream: &mut Upstream<'_>) -> Result<Value> {
        if self.done {
            return Ok(Value::Null);
        }
        self.done = true;
        upstream.value()
    }
}

/// Whether upstream differs from the previous read. The first read always
/// counts as a change.
#[derive(Debug, Default)]
pub struct Change {
    previous: Option<Value>,
}

impl Component for Change {}

impl Operator for Change {
    fn value(&mut self, upstream: &mut Upstream<'_>) -> Result<Value> {
        let current = upstream.value()?;
        let changed = self.previous.as_ref() != Some(&current);
        self.previous = Some(current);
        Ok(Value::Bool(changed))
    }
}

/// Debounces a boolean. The stable state starts `false` and follows the raw
/// value only once the raw value has held for the delay configured for it.
#[derive(Debug)]
pub struct Smooth {
    delay_true: Duration,
    delay_false: Duration,
    raw: bool,
    raw_since: Instant,
    state: bool,
}

impl Default for Smooth {
    fn default() -> Self {
        Self {
            delay_true: Duration::from_secs(10),
            delay_false: Duration::from_secs(10),
            raw: false,
            raw_since: Instant::now(),
            state: false,
        }
    }
}

impl Component for Smooth {
    fn schema(&self) -> ParamSchema {
        ParamSchema::new()
            .optional("delay", ParamKind::Duration, 10)
            .optional("delay_true", ParamKind::Duration, Value::Null)
            .optional("delay_false", ParamKind::Duration, Value::Null)
    }

    fn initialise(&mut self, params: Params, _ctx: &FlowContext) -> Result<()> {
        let delay = params.duration("delay")?;
        self.delay_true = params.maybe_duration("delay_true")?.unwrap_or(delay);
        self.delay_false = params.maybe_duration("delay_false")?.unwrap_or(delay);
        self.raw = false;
        self.raw_since = Instant::now();
        self.state = false;
        Ok(())
    }
}

impl Operator for Smooth {
    fn value(&mut self, upstream: &mut Upstream<'_>) -> Result<Value> {
        let raw = truthy(&upstream.value()?);
        if raw != self.raw {
            self.raw = raw;
            self.raw_since = Instant::now();
        }
        let lag = if self.raw { self.delay_true } else { self.delay_false };
        if self.raw != self.state && self.raw_since.elapsed() >= lag {
            self.state = self.raw;
        }
        Ok(Value::Bool(self.state))
    }
}

/// Substitutes `default` for any upstream error.
#[derive(Debug, Default)]
pub struct Try {
    default: Value,
}

impl Component for Try {
    fn schema(&self) -> ParamSchema {
        ParamSchema::new().optional("default", ParamKind::Any, false)
    }

    fn initialise(&mut self, params: Params, _ctx: &FlowContext) -> Result<()> {
        self.default = params.value("default");
        Ok(())
    }
}

impl Operator for Try {
    fn value(&mut self, upstream: &mut Upstream<'_>) -> Result<Value> {
        match upstream.value() {
            Ok(v) => Ok(v),
            Err(e) => {
                tracing::warn!(
                    upstream = %upstream.kind(),
                    error = %e,
                    default = %short_string(&self.default, 40),
                    "Upstream failed, using default"
                );
                Ok(self.default.clone())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SinkOperator
// ---------------------------------------------------------------------------

/// Inline `to` link: a sink that the chain passes through.
pub fn tee(sink: Lifecycle<dyn Sink>) -> Lifecycle<dyn Operator> {
    Lifecycle::new("to", Box::new(SinkOperator::new(sink)), Deferred::default())
}

/// Forwards each value to the wrapped sink and passes it on unchanged.
///
/// The wrapped sink follows this operator through its lifecycle.
pub struct SinkOperator {
    sink: Lifecycle<dyn Sink>,
}

impl SinkOperator {
    pub fn new(sink: Lifecycle<dyn Sink>) -> Self {
        Self { sink }
    }
}

impl Component for SinkOperator {
    // The wrapped sink binds its own arguments.
    fn schema(&self) -> ParamSchema {
        ParamSchema::new().variadic()
    }

    fn attach(&mut self, ctx: &FlowContext) -> Result<()> {
        self.sink.set_context(ctx.clone())
    }

    fn initialise(&mut self, _params: Params, _ctx: &FlowContext) -> Result<()> {
        self.sink.setup()
    }

    fn start(&mut self) -> Result<()> {
        self.sink.start()
    }

    fn stop(&mut self) -> Result<()> {
        self.sink.stop()
    }
}

impl Operator for SinkOperator {
    fn value(&mut self, upstream: &mut Upstream<'_>) -> Result<Value> {
        let value = upstream.value()?;
        self.sink.push(value.clone())?;
        Ok(value)
    }

    fn tee(&self) -> Option<&Lifecycle<dyn Sink>> {
        Some(&self.sink)
    }
}
