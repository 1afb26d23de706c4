//! Flow execution engine, component catalog, registry and validation.
//!
//! This crate implements the Actuator dataflow model: components wired into
//! pull-evaluated chains, monitors that decide when a flow fires, flows with
//! a monotonic lifecycle, and flow sets whose flows reach each other through
//! a shared scope tree, inflows and synchronous calls.

pub mod builtins;
pub mod chain;
pub mod component;
pub mod events;
pub mod flow;
pub mod flowset;
pub mod monitor;
pub mod params;
pub mod pipeline;
pub mod registry;
pub mod signal;
pub mod sink;
pub mod validation;

pub use chain::{Chain, Operator, Source, Upstream};
pub use component::{Component, ComponentState, Deferred, Lifecycle};
pub use events::{EventEmitter, FlowEvent};
pub use flow::{Directory, Flow, FlowContext, FlowHandle, FlowParts, FlowState};
pub use flowset::{Environment, FlowSet, Stopper};
pub use monitor::{CallHandle, DemandHandle, ExitCondition, ExitConditions, Monitor, PushSlot};
pub use params::{ParamKind, ParamSchema, Params};
pub use pipeline::{Driver, Pipeline, SharedPipeline};
pub use registry::{default_registry, Package, Registry, Role};
pub use signal::{Latch, Sleeper};
pub use sink::{Outflow, Sink};
pub use validation::{validate, validate_or_raise, Diagnostic, LintRule, Severity};
