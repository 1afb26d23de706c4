//! The `bool` package: constant sources and the boolean operators under one
//! namespace.

use actuator_types::{Result, Value};

use crate::builtins::{operator, operators, source};
use crate::chain::Source;
use crate::component::Component;
use crate::registry::Package;

pub fn package() -> Package {
    let mut pkg = Package::new("bool");
    pkg.sources
        .register("true", source::<True>)
        .register("false", source::<False>);
    pkg.operators
        .register("not", operator::<operators::Not>)
        .register("all", operator::<operators::All>)
        .register("any", operator::<operators::Any>)
        .register("smooth", operator::<operators::Smooth>);
    pkg
}

#[derive(Debug, Default)]
pub struct True;

impl Component for True {}

impl Source for True {
    fn value(&mut self) -> Result<Value> {
        Ok(Value::Bool(true))
    }
}

#[derive(Debug, Default)]
pub struct False;

impl Component for False {}

impl Source for False {
    fn value(&mut self) -> Result<Value> {
        Ok(Value::Bool(false))
    }
}
