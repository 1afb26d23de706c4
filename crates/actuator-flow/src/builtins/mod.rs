//! Built-in components and packages.

pub mod boolean;
pub mod file;
pub mod flowref;
pub mod fmt;
pub mod lst;
pub mod monitors;
pub mod operators;
pub mod sinks;
pub mod sources;
pub mod time;
pub mod var;

use actuator_blueprint::FLOWREF_KIND;
use actuator_types::Result;

use crate::chain::{Operator, Source};
use crate::component::Deferred;
use crate::monitor::Monitor;
use crate::registry::Package;
use crate::sink::Sink;

// Factories for components that take nothing at construction time.

pub(crate) fn source<T: Source + Default + 'static>(_: &Deferred) -> Result<Box<dyn Source>> {
    Ok(Box::new(T::default()))
}

pub(crate) fn operator<T: Operator + Default + 'static>(_: &Deferred) -> Result<Box<dyn Operator>> {
    Ok(Box::new(T::default()))
}

pub(crate) fn sink<T: Sink + Default + 'static>(_: &Deferred) -> Result<Box<dyn Sink>> {
    Ok(Box::new(T::default()))
}

pub(crate) fn monitor<T: Monitor + Default + 'static>(_: &Deferred) -> Result<Box<dyn Monitor>> {
    Ok(Box::new(T::default()))
}

/// Register the unnamed built-in package.
pub(crate) fn register(pkg: &mut Package) {
    pkg.sources
        .register("str", source::<sources::StrSource>)
        .register("int", source::<sources::IntSource>)
        .register("float", source::<sources::FloatSource>)
        .register("bool", source::<sources::BoolSource>)
        .register("counter", source::<sources::CounterSource>)
        .register("seq", source::<sources::SeqSource>)
        .register("stdin", source::<sources::StdinSource>)
        .register("inflow", source::<sources::FlowSource>);

    pkg.operators
        .register("noop", operator::<operators::Noop>)
        .register("eq", operator::<operators::Equals>)
        .register("not", operator::<operators::Not>)
        .register("str", operator::<operators::Str>)
        .register("int", operator::<operators::Int>)
        .register("float", operator::<operators::Float>)
        .register("hash", operator::<operators::Hash>)
        .register("get", operator::<operators::Get>)
        .register("has", operator::<operators::Has>)
        .register("all", operator::<operators::All>)
        .register("any", operator::<operators::Any>)
        .register("split", operator::<operators::Split>)
        .register("feed", operator::<operators::Feed>)
        .register("cached", operator::<operators::Cached>)
        .register("forever", operator::<operators::Forever>)
        .register("once", operator::<operators::Once>)
        .register("change", operator::<operators::Change>)
        .register("smooth", operator::<operators::Smooth>)
        .register("try", operator::<operators::Try>)
        .register(FLOWREF_KIND, flowref::subflow)
        .register("map", flowref::map)
        .register("filter", flowref::filter);

    pkg.sinks
        .register("none", sink::<sinks::NoneSink>)
        .register("print", sink::<sinks::PrintSink>)
        .register(FLOWREF_KIND, flowref::flow_sink_factory);

    pkg.monitors
        .register("once", monitor::<monitors::Once>)
        .register("count", monitor::<monitors::Count>)
        .register("interval", monitor::<monitors::Interval>)
        .register("change", monitor::<monitors::Change>)
        .register("onvalue", monitor::<monitors::OnValue>)
        .register("demand", monitor::<monitors::OnDemand>)
        .register("call", monitor::<monitors::OnCall>);
}
