//! Blueprint documents for Actuator flow sets.
//!
//! A blueprint is the parsed, not-yet-built description of a set of flows.
//! Documents are JSON: a list of flows, each with an optional name, source,
//! operator chain, sink and monitor. Components are either a bare kind
//! (`"print"`) or an object with positional `args` and keyword `params`.
//! Parameters may defer to a scope variable (`{"var": "a.b"}`) or a peer flow
//! (`{"flow": "B"}`); both are resolved at setup time.
//!
//! # Example
//! ```
//! let doc = r#"{"flows": [{"name": "hello", "source": {"kind": "str", "args": ["hi"]}}]}"#;
//! let blueprint = actuator_blueprint::parse(doc).unwrap();
//! assert_eq!(blueprint.flows.len(), 1);
//! assert_eq!(blueprint.flows[0].name.as_deref(), Some("hello"));
//! ```

pub mod ast;
mod duration;

use std::path::Path;

use actuator_types::{ActuatorError, Result};

pub use ast::*;
pub use duration::{duration_from_value, parse_duration};

/// Parse a blueprint document from a JSON string.
pub fn parse(input: &str) -> Result<FlowSetBlueprint> {
    serde_json::from_str(input).map_err(|e| ActuatorError::ParseError {
        line: e.line(),
        col: e.column(),
        message: e.to_string(),
    })
}

/// Read and parse a blueprint document from disk.
pub fn load(path: impl AsRef<Path>) -> Result<FlowSetBlueprint> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let doc = parse(&text)?;
    tracing::debug!(path = %path.display(), flows = doc.flows.len(), "Loaded blueprint");
    Ok(doc)
}
