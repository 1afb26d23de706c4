//! The `var` package: read and write variables in the flow's scope.
//!
//! `var` as a source reads (`var.get`), as a sink writes (`var.set`), and
//! `var.set` as an operator writes and passes the value on.

use actuator_types::{Result, Scope, Value};

use crate::builtins::operators::SinkOperator;
use crate::builtins::{sink, source};
use crate::chain::{Operator, Source};
use crate::component::{Component, Deferred, Lifecycle};
use crate::flow::FlowContext;
use crate::params::{ParamKind, ParamSchema, Params};
use crate::registry::Package;
use crate::sink::Sink;

pub fn package() -> Package {
    let mut pkg = Package::new("var");
    pkg.sources.register_default("get", source::<VarGet>);
    pkg.sinks.register_default("set", sink::<VarSet>);
    pkg.operators.register("set", set_operator);
    pkg
}

fn set_operator(deferred: &Deferred) -> Result<Box<dyn Operator>> {
    let sink: Lifecycle<dyn Sink> =
        Lifecycle::new("var.set", Box::new(VarSet::default()), deferred.clone());
    Ok(Box::new(SinkOperator::new(sink)))
}

/// Reads `name`. With `wait` (the default) a missing variable blocks until
/// some flow claims it; without, it reads as `null`.
#[derive(Debug, Default)]
pub struct VarGet {
    name: String,
    wait: bool,
    scope: Option<Scope>,
}

impl Component for VarGet {
    fn schema(&self) -> ParamSchema {
        ParamSchema::new()
            .required("name", ParamKind::Str)
            .optional("wait", ParamKind::Bool, true)
    }

    fn initialise(&mut self, params: Params, ctx: &FlowContext) -> Result<()> {
        self.name = params.str("name")?;
        self.wait = params.bool("wait")?;
        self.scope = Some(ctx.scope().clone());
        Ok(())
    }
}

impl Source for VarGet {
    fn value(&mut self) -> Result<Value> {
        let Some(scope) = &self.scope else {
            return Ok(Value::Null);
        };
        if !self.wait && !scope.has(&self.name) {
            return Ok(Value::Null);
        }
        scope.get_value(&self.name, self.wait)
    }
}

/// Writes each payload to `name`. The first write claims the variable, so two
/// writers of the same name in one scope conflict.
#[derive(Debug, Default)]
pub struct VarSet {
    name: String,
    claimed: bool,
    scope: Option<Scope>,
}

impl Component for VarSet {
    fn schema(&self) -> ParamSchema {
        ParamSchema::new().required("name", ParamKind::Str)
    }

    fn initialise(&mut self, params: Params, ctx: &FlowContext) -> Result<()> {
        self.name = params.str("name")?;
        self.scope = Some(ctx.scope().clone());
        Ok(())
    }
}

impl Sink for VarSet {
    fn perform(&mut self, payload: Value) -> Result<()> {
        if let Some(scope) = &self.scope {
            scope.set(&self.name, payload, !self.claimed)?;
            self.claimed = true;
        }
        Ok(())
    }
}
