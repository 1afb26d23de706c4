//! Typed parameter schemas.
//!
//! Each component declares the parameters it accepts as an ordered
//! [`ParamSchema`]. At setup time the component's resolved positional and
//! keyword arguments are bound against that schema, coerced to the declared
//! kind, and handed to the component as a [`Params`] bag.

use std::collections::BTreeMap;
use std::time::Duration;

use actuator_blueprint::duration_from_value;
use actuator_types::{parse_bool, ActuatorError, Result, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Str,
    Int,
    Float,
    Bool,
    /// Seconds as a number, or a suffixed string such as `"250ms"`.
    Duration,
    Any,
}

#[derive(Debug, Clone)]
struct ParamSpec {
    name: &'static str,
    kind: ParamKind,
    /// `None` marks a required parameter.
    default: Option<Value>,
}

/// Ordered parameter declarations for one component type.
///
/// Positional arguments fill the declared parameters in order; keyword
/// arguments fill them by name. Extra positional arguments are only accepted
/// when the schema is [`variadic`](Self::variadic).
#[derive(Debug, Clone, Default)]
pub struct ParamSchema {
    specs: Vec<ParamSpec>,
    variadic: bool,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: &'static str, kind: ParamKind) -> Self {
        self.specs.push(ParamSpec {
            name,
            kind,
            default: None,
        });
        self
    }

    /// Declare a parameter with a default. A `null` default leaves it unset.
    pub fn optional(mut self, name: &'static str, kind: ParamKind, default: impl Into<Value>) -> Self {
        self.specs.push(ParamSpec {
            name,
            kind,
            default: Some(default.into()),
        });
        self
    }

    /// Accept extra positional arguments (and ignore unknown keywords).
    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.specs.iter().map(|s| s.name)
    }

    /// Bind resolved arguments for `component` against this schema.
    pub fn bind(
        &self,
        component: &str,
        args: Vec<Value>,
        mut kwargs: BTreeMap<String, Value>,
    ) -> Result<Params> {
        let mut args = args.into_iter();
        let mut values = BTreeMap::new();

        for spec in &self.specs {
            let raw = match args.next() {
                Some(v) => {
                    if kwargs.contains_key(spec.name) {
                        return Err(bad_param(
                            component,
                            format!("parameter '{}' given both by position and by name", spec.name),
                        ));
                    }
                    Some(v)
                }
                None => kwargs.remove(spec.name),
            };
            let value = match (raw, &spec.default) {
                (Some(v), _) => coerce(component, spec, v)?,
                (None, Some(default)) => default.clone(),
                (None, None) => {
                    return Err(bad_param(
                        component,
                        format!("missing required parameter '{}'", spec.name),
                    ))
                }
            };
            values.insert(spec.name, value);
        }

        let rest: Vec<Value> = args.collect();
        if !self.variadic {
            if !rest.is_empty() {
                return Err(bad_param(
                    component,
                    format!(
                        "takes at most {} positional argument(s), got {}",
                        self.specs.len(),
                        self.specs.len() + rest.len()
                    ),
                ));
            }
            if let Some(unknown) = kwargs.keys().next() {
                return Err(bad_param(component, format!("unknown parameter '{unknown}'")));
            }
        }

        Ok(Params { values, rest })
    }
}

fn bad_param(component: &str, message: String) -> ActuatorError {
    ActuatorError::ConfigurationError(format!("{component}: {message}"))
}

fn coerce(component: &str, spec: &ParamSpec, value: Value) -> Result<Value> {
    if value.is_null() {
        return Ok(value);
    }
    let mismatch = |value: &Value| {
        bad_param(
            component,
            format!("parameter '{}' expects {:?}, got {value}", spec.name, spec.kind),
        )
    };
    let coerced = match spec.kind {
        ParamKind::Any => value,
        ParamKind::Str => match value {
            Value::String(_) => value,
            Value::Number(_) | Value::Bool(_) => Value::String(value.to_string()),
            other => return Err(mismatch(&other)),
        },
        ParamKind::Int => {
            let parsed = match &value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            };
            Value::from(parsed.ok_or_else(|| mismatch(&value))?)
        }
        ParamKind::Float => {
            let parsed = match &value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            Value::from(parsed.ok_or_else(|| mismatch(&value))?)
        }
        ParamKind::Bool => {
            let parsed = match &value {
                Value::Bool(b) => Some(*b),
                Value::String(s) => parse_bool(s),
                Value::Number(n) => n.as_f64().map(|f| f != 0.0),
                _ => None,
            };
            Value::Bool(parsed.ok_or_else(|| mismatch(&value))?)
        }
        ParamKind::Duration => {
            let d = duration_from_value(&value)
                .map_err(|e| bad_param(component, format!("parameter '{}': {e}", spec.name)))?;
            Value::from(d.as_secs_f64())
        }
    };
    Ok(coerced)
}

// ---------------------------------------------------------------------------
// Params
// ---------------------------------------------------------------------------

/// Bound, coerced parameters handed to a component's `initialise` hook.
#[derive(Debug, Clone, Default)]
pub struct Params {
    values: BTreeMap<&'static str, Value>,
    rest: Vec<Value>,
}

impl Params {
    /// The parameter value, or `None` when it is unset (absent or `null`).
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    /// The parameter value, `null` when unset.
    pub fn value(&self, name: &str) -> Value {
        self.get(name).cloned().unwrap_or(Value::Null)
    }

    fn require(&self, name: &str) -> Result<&Value> {
        self.get(name)
            .ok_or_else(|| ActuatorError::ConfigurationError(format!("parameter '{name}' is not set")))
    }

    pub fn str(&self, name: &str) -> Result<String> {
        match self.require(name)? {
            Value::String(s) => Ok(s.clone()),
            other => Ok(other.to_string()),
        }
    }

    pub fn int(&self, name: &str) -> Result<i64> {
        self.require(name)?.as_i64().ok_or_else(|| {
            ActuatorError::ConfigurationError(format!("parameter '{name}' is not an integer"))
        })
    }

    pub fn float(&self, name: &str) -> Result<f64> {
        self.require(name)?.as_f64().ok_or_else(|| {
            ActuatorError::ConfigurationError(format!("parameter '{name}' is not a number"))
        })
    }

    pub fn bool(&self, name: &str) -> Result<bool> {
        self.require(name)?.as_bool().ok_or_else(|| {
            ActuatorError::ConfigurationError(format!("parameter '{name}' is not a boolean"))
        })
    }

    pub fn duration(&self, name: &str) -> Result<Duration> {
        duration_from_value(self.require(name)?)
    }

    pub fn maybe_duration(&self, name: &str) -> Result<Option<Duration>> {
        self.get(name).map(duration_from_value).transpose()
    }

    /// Positional arguments beyond the declared parameters.
    pub fn rest(&self) -> &[Value] {
        &self.rest
    }

    pub fn into_rest(self) -> Vec<Value> {
        self.rest
    }
}
