use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use actuator_types::Value;

/// Component kind used by the expression sugar `@flow` for cross-flow references.
pub const FLOWREF_KIND: &str = "_flowref";

/// Operator kinds whose first argument names a callable flow.
pub const CALLING_KINDS: &[&str] = &[FLOWREF_KIND, "map", "filter"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlowSetBlueprint {
    pub flows: Vec<FlowBlueprint>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub globals: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlowBlueprint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ComponentBlueprint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operators: Vec<ChainLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink: Option<ComponentBlueprint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<ComponentBlueprint>,
}

/// One element of an operator chain: a plain operator, or an inline
/// `{"to": sink}` tee that forwards the value to a sink and passes it on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChainLink {
    Tee(TeeLink),
    Operator(ComponentBlueprint),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TeeLink {
    pub to: ComponentBlueprint,
}

/// A parsed, not-yet-built description of a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ComponentRepr")]
pub struct ComponentBlueprint {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Param>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Param>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ComponentRepr {
    Bare(String),
    Full(FullComponent),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FullComponent {
    kind: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    args: Vec<Param>,
    #[serde(default)]
    params: BTreeMap<String, Param>,
}

impl From<ComponentRepr> for ComponentBlueprint {
    fn from(repr: ComponentRepr) -> Self {
        match repr {
            ComponentRepr::Bare(kind) => ComponentBlueprint::new(kind),
            ComponentRepr::Full(full) => ComponentBlueprint {
                kind: full.kind,
                name: full.name,
                args: full.args,
                params: full.params,
            },
        }
    }
}

/// A constructor argument. References are resolved at setup time, once the
/// component knows which flow and scope it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Param {
    Var(VarRef),
    Flow(FlowRef),
    Literal(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VarRef {
    pub var: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlowRef {
    pub flow: String,
}

impl Param {
    pub fn var(name: impl Into<String>) -> Self {
        Param::Var(VarRef { var: name.into() })
    }

    pub fn flow(name: impl Into<String>) -> Self {
        Param::Flow(FlowRef { flow: name.into() })
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Param::Literal(value.into())
    }

    /// The flow name this parameter points at: a flow reference, or a bare
    /// string literal used where a flow name is expected.
    pub fn flow_name(&self) -> Option<&str> {
        match self {
            Param::Flow(r) => Some(&r.flow),
            Param::Literal(Value::String(s)) => Some(s),
            _ => None,
        }
    }
}

impl ComponentBlueprint {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: None,
            args: Vec::new(),
            params: BTreeMap::new(),
        }
    }

    /// Builder: append a positional argument.
    pub fn arg(mut self, param: Param) -> Self {
        self.args.push(param);
        self
    }

    /// Builder: set a keyword parameter.
    pub fn param(mut self, key: impl Into<String>, param: Param) -> Self {
        self.params.insert(key.into(), param);
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Target flow of a `_flowref`, `map`, or `filter` component.
    pub fn flow_target(&self) -> Option<&str> {
        if CALLING_KINDS.contains(&self.kind.as_str()) {
            self.args.first().and_then(Param::flow_name)
        } else {
            None
        }
    }
}

impl FlowBlueprint {
    /// Every sink in this flow: the terminal sink plus inline tees.
    pub fn sinks(&self) -> impl Iterator<Item = &ComponentBlueprint> {
        self.operators
            .iter()
            .filter_map(|link| match link {
                ChainLink::Tee(tee) => Some(&tee.to),
                ChainLink::Operator(_) => None,
            })
            .chain(self.sink.iter())
    }

    /// Names of the flows this flow's sinks push into.
    pub fn outflow_targets(&self) -> Vec<&str> {
        self.sinks()
            .filter(|s| s.kind == FLOWREF_KIND)
            .filter_map(ComponentBlueprint::flow_target)
            .collect()
    }

    /// Names of the flows this flow's operators call synchronously.
    pub fn called_flows(&self) -> Vec<&str> {
        self.operators
            .iter()
            .filter_map(|link| match link {
                ChainLink::Operator(op) => op.flow_target(),
                ChainLink::Tee(_) => None,
            })
            .collect()
    }

    /// All components, in chain order, with the monitor last.
    pub fn components(&self) -> Vec<&ComponentBlueprint> {
        let mut all: Vec<&ComponentBlueprint> = self.source.iter().collect();
        for link in &self.operators {
            match link {
                ChainLink::Operator(op) => all.push(op),
                ChainLink::Tee(tee) => all.push(&tee.to),
            }
        }
        all.extend(self.sink.iter());
        all.extend(self.monitor.iter());
        all
    }
}
