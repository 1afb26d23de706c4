//! The `fmt` package: JSON text in and out of a chain.
//!
//! Both operators pass `null` through untouched.

use actuator_types::{short_string, ActuatorError, Result, Value};

use crate::builtins::operator;
use crate::chain::{Operator, Upstream};
use crate::component::Component;
use crate::flow::FlowContext;
use crate::params::{ParamKind, ParamSchema, Params};
use crate::registry::Package;

pub fn package() -> Package {
    let mut pkg = Package::new("fmt");
    pkg.operators
        .register("tojson", operator::<ToJson>)
        .register("fromjson", operator::<FromJson>);
    pkg
}

/// Serialises the upstream value to a JSON string, indented unless `pretty`
/// is off.
#[derive(Debug, Default)]
pub struct ToJson {
    pretty: bool,
}

impl Component for ToJson {
    fn schema(&self) -> ParamSchema {
        ParamSchema::new().optional("pretty", ParamKind::Bool, true)
    }

    fn initialise(&mut self, params: Params, _ctx: &FlowContext) -> Result<()> {
        self.pretty = params.bool("pretty")?;
        Ok(())
    }
}

impl Operator for ToJson {
    fn value(&mut self, upstream: &mut Upstream<'_>) -> Result<Value> {
        let value = upstream.value()?;
        if value.is_null() {
            return Ok(value);
        }
        let text = if self.pretty {
            serde_json::to_string_pretty(&value)?
        } else {
            serde_json::to_string(&value)?
        };
        Ok(Value::String(text))
    }
}

#[derive(Debug, Default)]
pub struct FromJson;

impl Component for FromJson {}

impl Operator for FromJson {
    fn value(&mut self, upstream: &mut Upstream<'_>) -> Result<Value> {
        match upstream.value()? {
            Value::Null => Ok(Value::Null),
            Value::String(text) => serde_json::from_str(&text).map_err(|e| {
                ActuatorError::evaluation("fmt.fromjson", format!("invalid JSON: {e}"))
            }),
            other => Err(ActuatorError::evaluation(
                "fmt.fromjson",
                format!("expected a string, got {}", short_string(&other, 40)),
            )),
        }
    }
}
