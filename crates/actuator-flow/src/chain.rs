//! Pull-based operator chain.
//!
//! A [`Chain`] is one source followed by an ordered list of operators. Reading
//! the chain's value asks the last operator, which reads its [`Upstream`],
//! which evaluates the node above it, recursively down to the source. Reads
//! may have side effects and are not idempotent.

use actuator_types::{ActuatorError, Result, Value};

use crate::component::{Component, Lifecycle};
use crate::sink::{Outflow, Sink};

/// Root of a chain. Has no upstream by construction.
pub trait Source: Component {
    fn value(&mut self) -> Result<Value> {
        Err(ActuatorError::UnimplementedOperator {
            kind: std::any::type_name::<Self>().into(),
        })
    }

    /// Receive the outflows of peer flows that target this flow.
    fn wire(&mut self, _inflows: Vec<Outflow>) -> Result<()> {
        Ok(())
    }
}

/// A chain node that transforms the value of the node above it.
pub trait Operator: Component {
    fn value(&mut self, _upstream: &mut Upstream<'_>) -> Result<Value> {
        Err(ActuatorError::UnimplementedOperator {
            kind: std::any::type_name::<Self>().into(),
        })
    }

    /// The sink this operator forwards to, for inline `to` links.
    fn tee(&self) -> Option<&Lifecycle<dyn Sink>> {
        None
    }
}

impl Lifecycle<dyn Source> {
    pub fn pull(&mut self) -> Result<Value> {
        let result = (**self).value();
        result.map_err(|e| self.label_error(e))
    }
}

impl Lifecycle<dyn Operator> {
    pub fn pull(&mut self, upstream: &mut Upstream<'_>) -> Result<Value> {
        let result = (**self).value(upstream);
        result.map_err(|e| self.label_error(e))
    }
}

// ---------------------------------------------------------------------------
// Upstream
// ---------------------------------------------------------------------------

/// Pull handle an operator receives: everything above it in the chain.
pub struct Upstream<'a> {
    source: &'a mut Lifecycle<dyn Source>,
    operators: &'a mut [Lifecycle<dyn Operator>],
}

impl Upstream<'_> {
    /// Evaluate the node immediately above.
    pub fn value(&mut self) -> Result<Value> {
        match self.operators.split_last_mut() {
            None => self.source.pull(),
            Some((last, above)) => {
                let mut upstream = Upstream {
                    source: &mut *self.source,
                    operators: above,
                };
                last.pull(&mut upstream)
            }
        }
    }

    /// Kind of the node immediately above.
    pub fn kind(&self) -> &str {
        match self.operators.last() {
            Some(op) => op.kind(),
            None => self.source.kind(),
        }
    }
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

pub struct Chain {
    source: Lifecycle<dyn Source>,
    operators: Vec<Lifecycle<dyn Operator>>,
    linked: bool,
}

impl Chain {
    pub fn new(source: Lifecycle<dyn Source>, operators: Vec<Lifecycle<dyn Operator>>) -> Self {
        Self {
            source,
            operators,
            linked: false,
        }
    }

    /// Link the operators to the source. Reads fail until this is called.
    pub fn link(&mut self) {
        self.linked = true;
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    /// Evaluate the whole chain once.
    pub fn value(&mut self) -> Result<Value> {
        if !self.linked {
            return Err(ActuatorError::ConfigurationError(format!(
                "chain starting at '{}' read before it was wired",
                self.source.kind()
            )));
        }
        Upstream {
            source: &mut self.source,
            operators: &mut self.operators,
        }
        .value()
    }

    /// Kinds from the source to the last operator.
    pub fn upstreams(&self) -> Vec<&str> {
        std::iter::once(self.source.kind())
            .chain(self.operators.iter().map(|op| op.kind()))
            .collect()
    }

    pub fn source(&self) -> &Lifecycle<dyn Source> {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut Lifecycle<dyn Source> {
        &mut self.source
    }

    pub fn operators(&self) -> &[Lifecycle<dyn Operator>] {
        &self.operators
    }

    pub fn operators_mut(&mut self) -> &mut [Lifecycle<dyn Operator>] {
        &mut self.operators
    }

    /// Sinks reached through inline `to` links.
    pub fn tees(&self) -> impl Iterator<Item = &Lifecycle<dyn Sink>> {
        self.operators.iter().filter_map(|op| op.tee())
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("upstreams", &self.upstreams())
            .field("linked", &self.linked)
            .finish()
    }
}
