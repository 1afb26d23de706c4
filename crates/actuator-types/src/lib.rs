//! Shared types, errors, and the variable scope tree for the Actuator flow engine.
//!
//! This crate provides the foundational types used across all other Actuator crates:
//! - `ActuatorError`: unified error taxonomy
//! - `Value`: the dynamic payload that travels through a flow
//! - `Scope`: hierarchical, thread-safe namespace with claim and blocking-get semantics

pub mod scope;

pub use scope::{Entry, Scope};

/// The payload type carried from sources, through operators, into sinks.
pub type Value = serde_json::Value;

/// Unified error type for all Actuator subsystems.
#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    // === Blueprint Errors ===
    #[error("Blueprint parse error at line {line}, col {col}: {message}")]
    ParseError {
        line: usize,
        col: usize,
        message: String,
    },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Flow '{flow}' is not callable: its monitor must be 'call'")]
    NotCallable { flow: String },

    #[error("Component '{component}' is {actual}, expected {expected}")]
    InvalidState {
        component: String,
        expected: String,
        actual: String,
    },

    // === Scope Errors ===
    #[error("Undefined: '{key}'")]
    UndefinedKey { key: String },

    #[error("Claim failed for key '{key}'")]
    ClaimConflict { key: String },

    #[error("Wait for '{key}' interrupted: the flow is stopping")]
    Interrupted { key: String },

    // === Evaluation Errors ===
    #[error("Value is unimplemented for {kind}")]
    UnimplementedOperator { kind: String },

    #[error("{component} failed to evaluate: {message}")]
    Evaluation { component: String, message: String },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl ActuatorError {
    /// Shorthand for an [`ActuatorError::Evaluation`] raised by `component`.
    pub fn evaluation(component: impl Into<String>, message: impl Into<String>) -> Self {
        ActuatorError::Evaluation {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Returns `true` for errors raised while pulling a value in steady state.
    ///
    /// Scheduled monitor loops log these and carry on with the next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ActuatorError::Evaluation { .. }
                | ActuatorError::UnimplementedOperator { .. }
                | ActuatorError::Io(_)
                | ActuatorError::Json(_)
        )
    }

    /// Returns `true` if the error must abort setup or wiring.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ActuatorError::ParseError { .. }
                | ActuatorError::ConfigurationError(_)
                | ActuatorError::NotCallable { .. }
                | ActuatorError::InvalidState { .. }
                | ActuatorError::ClaimConflict { .. }
        )
    }
}

/// A convenience alias for `Result<T, ActuatorError>`.
pub type Result<T> = std::result::Result<T, ActuatorError>;

// ---------------------------------------------------------------------------
// Value helpers
// ---------------------------------------------------------------------------

/// Parse the boolean spellings accepted in component parameters.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" => Some(true),
        "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Truthiness of a payload.
///
/// Strings spelling a boolean (`"off"`, `"yes"`, ...) count as that boolean;
/// any other string is true when non-empty.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => parse_bool(s).unwrap_or(!s.is_empty()),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Render a value for log lines, collapsing newlines and truncating to `max` chars.
pub fn short_string(value: &Value, max: usize) -> String {
    let s = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let s = s.replace('\n', " ");
    if s.chars().count() > max {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    } else {
        s
    }
}
