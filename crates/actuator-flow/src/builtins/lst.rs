//! The `lst` package: list operators.

use std::cmp::Ordering;

use actuator_types::{short_string, ActuatorError, Result, Value};

use crate::builtins::operators::{to_float, to_int};
use crate::chain::{Operator, Upstream};
use crate::component::{Component, Deferred};
use crate::flow::FlowContext;
use crate::params::{ParamKind, ParamSchema, Params};
use crate::registry::Package;

type ListFn = fn(Vec<Value>) -> Result<Value>;

pub fn package() -> Package {
    let mut pkg = Package::new("lst");
    pkg.operators
        .register("head", |_| list_op("head", head))
        .register("tail", |_| list_op("tail", tail))
        .register("last", |_| list_op("last", last))
        .register("init", |_| list_op("init", init))
        .register("len", length)
        .register("reverse", |_| list_op("reverse", reverse))
        .register("join", join)
        .register("sum", |_| list_op("sum", sum))
        .register("avg", |_| list_op("avg", avg))
        .register("prod", |_| list_op("prod", prod))
        .register("max", |_| list_op("max", |items| extreme("max", items, Ordering::Greater)))
        .register("min", |_| list_op("min", |items| extreme("min", items, Ordering::Less)))
        .register("ints", |_| list_op("ints", ints))
        .register("floats", |_| list_op("floats", floats));
    pkg
}

fn list_op(name: &'static str, f: ListFn) -> Result<Box<dyn Operator>> {
    Ok(Box::new(ListOp { name, f }))
}

fn not_a_list(name: &str, value: &Value) -> ActuatorError {
    ActuatorError::evaluation(
        format!("lst.{name}"),
        format!("expected a list, got {}", short_string(value, 40)),
    )
}

fn empty(name: &str) -> ActuatorError {
    ActuatorError::evaluation(format!("lst.{name}"), "empty list")
}

/// Applies a function to the upstream list.
struct ListOp {
    name: &'static str,
    f: ListFn,
}

impl Component for ListOp {}

impl Operator for ListOp {
    fn value(&mut self, upstream: &mut Upstream<'_>) -> Result<Value> {
        match upstream.value()? {
            Value::Array(items) => (self.f)(items),
            other => Err(not_a_list(self.name, &other)),
        }
    }
}

fn head(items: Vec<Value>) -> Result<Value> {
    items.into_iter().next().ok_or_else(|| empty("head"))
}

fn tail(items: Vec<Value>) -> Result<Value> {
    Ok(Value::Array(items.into_iter().skip(1).collect()))
}

fn last(mut items: Vec<Value>) -> Result<Value> {
    items.pop().ok_or_else(|| empty("last"))
}

fn init(mut items: Vec<Value>) -> Result<Value> {
    items.pop();
    Ok(Value::Array(items))
}

fn reverse(mut items: Vec<Value>) -> Result<Value> {
    items.reverse();
    Ok(Value::Array(items))
}

fn ints(items: Vec<Value>) -> Result<Value> {
    items
        .iter()
        .map(|v| to_int(v).map(Value::from))
        .collect::<Result<Vec<_>>>()
        .map(Value::Array)
}

fn floats(items: Vec<Value>) -> Result<Value> {
    items
        .iter()
        .map(|v| to_float(v).map(Value::from))
        .collect::<Result<Vec<_>>>()
        .map(Value::Array)
}

/// Integers when every item is an integer, otherwise floats.
enum Numbers {
    Ints(Vec<i64>),
    Floats(Vec<f64>),
}

fn numbers(name: &str, items: &[Value]) -> Result<Numbers> {
    if let Some(ints) = items.iter().map(Value::as_i64).collect::<Option<Vec<_>>>() {
        return Ok(Numbers::Ints(ints));
    }
    items
        .iter()
        .map(|v| {
            v.as_f64().ok_or_else(|| {
                ActuatorError::evaluation(
                    format!("lst.{name}"),
                    format!("{} is not a number", short_string(v, 40)),
                )
            })
        })
        .collect::<Result<Vec<_>>>()
        .map(Numbers::Floats)
}

fn sum(items: Vec<Value>) -> Result<Value> {
    Ok(match numbers("sum", &items)? {
        Numbers::Ints(v) => Value::from(v.iter().sum::<i64>()),
        Numbers::Floats(v) => Value::from(v.iter().sum::<f64>()),
    })
}

fn prod(items: Vec<Value>) -> Result<Value> {
    Ok(match numbers("prod", &items)? {
        Numbers::Ints(v) => Value::from(v.iter().product::<i64>()),
        Numbers::Floats(v) => Value::from(v.iter().product::<f64>()),
    })
}

fn avg(items: Vec<Value>) -> Result<Value> {
    if items.is_empty() {
        return Err(empty("avg"));
    }
    let total: f64 = match numbers("avg", &items)? {
        Numbers::Ints(v) => v.iter().map(|&i| i as f64).sum(),
        Numbers::Floats(v) => v.iter().sum(),
    };
    Ok(Value::from(total / items.len() as f64))
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Largest (`Greater`) or smallest (`Less`) item. Items must be all numbers
/// or all strings.
fn extreme(name: &str, items: Vec<Value>, keep: Ordering) -> Result<Value> {
    let mut items = items.into_iter();
    let mut best = items.next().ok_or_else(|| empty(name))?;
    for item in items {
        match compare(&item, &best) {
            Some(ord) if ord == keep => best = item,
            Some(_) => {}
            None => {
                return Err(ActuatorError::evaluation(
                    format!("lst.{name}"),
                    format!(
                        "cannot compare {} with {}",
                        short_string(&item, 40),
                        short_string(&best, 40)
                    ),
                ))
            }
        }
    }
    Ok(best)
}

// ---------------------------------------------------------------------------
// Operators with their own shape
// ---------------------------------------------------------------------------

fn length(_: &Deferred) -> Result<Box<dyn Operator>> {
    Ok(Box::new(Len))
}

/// Length of a list, string (in characters) or object.
struct Len;

impl Component for Len {}

impl Operator for Len {
    fn value(&mut self, upstream: &mut Upstream<'_>) -> Result<Value> {
        match upstream.value()? {
            Value::Array(items) => Ok(Value::from(items.len())),
            Value::String(s) => Ok(Value::from(s.chars().count())),
            Value::Object(map) => Ok(Value::from(map.len())),
            other => Err(not_a_list("len", &other)),
        }
    }
}

fn join(_: &Deferred) -> Result<Box<dyn Operator>> {
    Ok(Box::new(Join::default()))
}

/// Joins the items' string forms with `delim`.
#[derive(Default)]
struct Join {
    delim: String,
}

impl Component for Join {
    fn schema(&self) -> ParamSchema {
        ParamSchema::new().optional("delim", ParamKind::Str, "")
    }

    fn initialise(&mut self, params: Params, _ctx: &FlowContext) -> Result<()> {
        self.delim = params.value("delim").as_str().unwrap_or_default().to_string();
        Ok(())
    }
}

impl Operator for Join {
    fn value(&mut self, upstream: &mut Upstream<'_>) -> Result<Value> {
        let items = match upstream.value()? {
            Value::Array(items) => items,
            other => return Err(not_a_list("join", &other)),
        };
        let parts: Vec<String> = items
            .into_iter()
            .map(|v| match v {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .collect();
        Ok(Value::String(parts.join(&self.delim)))
    }
}
