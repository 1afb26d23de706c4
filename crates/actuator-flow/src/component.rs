//! Component contract and lifecycle.
//!
//! Every source, operator, sink and monitor is wrapped in a [`Lifecycle`],
//! which owns the stashed constructor arguments and enforces the order
//! `CREATED -> CONTEXTUALIZED -> INITIALISED -> RUNNING -> STOPPED`.
//! Concrete components only implement the [`Component`] hooks they need.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Deref, DerefMut};

use actuator_blueprint::{ComponentBlueprint, Param};
use actuator_types::{ActuatorError, Result};

use crate::flow::FlowContext;
use crate::params::{ParamSchema, Params};

// ---------------------------------------------------------------------------
// Component trait
// ---------------------------------------------------------------------------

/// Hooks shared by all component roles. Every hook has a no-op default.
pub trait Component: Send {
    /// Parameters accepted at setup time.
    fn schema(&self) -> ParamSchema {
        ParamSchema::new()
    }

    /// Called once when the owning flow attaches its context, before setup.
    fn attach(&mut self, _ctx: &FlowContext) -> Result<()> {
        Ok(())
    }

    /// Receives the resolved, schema-bound parameters.
    fn initialise(&mut self, _params: Params, _ctx: &FlowContext) -> Result<()> {
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ComponentState {
    Created,
    Contextualized,
    Initialised,
    Running,
    Stopped,
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComponentState::Created => "CREATED",
            ComponentState::Contextualized => "CONTEXTUALIZED",
            ComponentState::Initialised => "INITIALISED",
            ComponentState::Running => "RUNNING",
            ComponentState::Stopped => "STOPPED",
        };
        f.write_str(s)
    }
}

/// Constructor arguments, kept unresolved until setup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Deferred {
    pub args: Vec<Param>,
    pub kwargs: BTreeMap<String, Param>,
}

impl Deferred {
    pub fn new(args: Vec<Param>) -> Self {
        Self {
            args,
            kwargs: BTreeMap::new(),
        }
    }

    /// First positional argument read as a flow name, without resolving anything.
    pub fn flow_name(&self) -> Option<&str> {
        self.args.first().and_then(Param::flow_name)
    }
}

impl From<&ComponentBlueprint> for Deferred {
    fn from(bp: &ComponentBlueprint) -> Self {
        Self {
            args: bp.args.clone(),
            kwargs: bp.params.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle wrapper
// ---------------------------------------------------------------------------

/// A component together with its kind, stashed arguments and lifecycle state.
///
/// Derefs to the wrapped component so role methods (`value`, `perform`,
/// `run`, ...) are called directly on the wrapper.
pub struct Lifecycle<T: ?Sized> {
    kind: String,
    name: Option<String>,
    state: ComponentState,
    deferred: Deferred,
    context: Option<FlowContext>,
    inner: Box<T>,
}

impl<T: ?Sized + Component> Lifecycle<T> {
    pub fn new(kind: impl Into<String>, inner: Box<T>, deferred: Deferred) -> Self {
        Self {
            kind: kind.into(),
            name: None,
            state: ComponentState::Created,
            deferred,
            context: None,
            inner,
        }
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The component's name if it has one, otherwise its kind.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.kind)
    }

    pub fn state(&self) -> ComponentState {
        self.state
    }

    pub fn deferred(&self) -> &Deferred {
        &self.deferred
    }

    pub fn context(&self) -> Option<&FlowContext> {
        self.context.as_ref()
    }

    fn expect_state(&self, expected: ComponentState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ActuatorError::InvalidState {
                component: self.kind.clone(),
                expected: expected.to_string(),
                actual: self.state.to_string(),
            })
        }
    }

    /// Attach the owning flow's context. Allowed exactly once.
    pub fn set_context(&mut self, ctx: FlowContext) -> Result<()> {
        self.expect_state(ComponentState::Created)?;
        self.inner.attach(&ctx)?;
        self.context = Some(ctx);
        self.state = ComponentState::Contextualized;
        Ok(())
    }

    /// Resolve deferred arguments against the context and run `initialise`.
    pub fn setup(&mut self) -> Result<()> {
        self.expect_state(ComponentState::Contextualized)?;
        let ctx = self.context.as_ref().ok_or_else(|| ActuatorError::InvalidState {
            component: self.kind.clone(),
            expected: ComponentState::Contextualized.to_string(),
            actual: "no context".into(),
        })?;

        let args = self
            .deferred
            .args
            .iter()
            .map(|p| ctx.resolve(p))
            .collect::<Result<Vec<_>>>()?;
        let kwargs = self
            .deferred
            .kwargs
            .iter()
            .map(|(k, p)| Ok((k.clone(), ctx.resolve(p)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        let params = self.inner.schema().bind(&self.kind, args, kwargs)?;
        self.inner.initialise(params, ctx)?;
        self.state = ComponentState::Initialised;
        tracing::trace!(flow = %ctx.flow(), kind = %self.kind, "Component initialised");
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.expect_state(ComponentState::Initialised)?;
        self.inner.start()?;
        self.state = ComponentState::Running;
        Ok(())
    }

    /// Stop the component. Only a running component has its hook called;
    /// stopping twice is a no-op.
    pub fn stop(&mut self) -> Result<()> {
        let was = self.state;
        if was == ComponentState::Stopped {
            return Ok(());
        }
        self.state = ComponentState::Stopped;
        if was == ComponentState::Running {
            self.inner.stop()?;
        }
        Ok(())
    }

    /// Rewrite an abstract-base error so it names this component's kind.
    pub(crate) fn label_error(&self, err: ActuatorError) -> ActuatorError {
        match err {
            ActuatorError::UnimplementedOperator { .. } => ActuatorError::UnimplementedOperator {
                kind: self.kind.clone(),
            },
            other => other,
        }
    }
}

impl<T: ?Sized> Deref for Lifecycle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: ?Sized> DerefMut for Lifecycle<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T: ?Sized> fmt::Debug for Lifecycle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("state", &self.state)
            .finish()
    }
}
