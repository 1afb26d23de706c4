//! Blueprint validation: lint rules and diagnostics.
//!
//! Rules check a [`FlowSetBlueprint`] against a [`Registry`] before anything
//! is built. Call [`validate`] for advisory diagnostics or
//! [`validate_or_raise`] to fail on any `Error`-severity issue.

use std::collections::{BTreeMap, BTreeSet};

use actuator_blueprint::{ChainLink, ComponentBlueprint, FlowBlueprint, FlowSetBlueprint, Param};
use actuator_types::{ActuatorError, Result};

use crate::registry::{Registry, Role};

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    /// Name (or `#index` when unnamed) of the flow the issue is in.
    pub flow: Option<String>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Diagnostic {
    fn new(rule: &str, severity: Severity, flow: String, message: String) -> Self {
        Self {
            rule: rule.into(),
            severity,
            message,
            flow: Some(flow),
            fix: None,
        }
    }

    fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix = Some(fix.into());
        self
    }
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, doc: &FlowSetBlueprint, registry: &Registry) -> Vec<Diagnostic>;
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn label(index: usize, flow: &FlowBlueprint) -> String {
    flow.name.clone().unwrap_or_else(|| format!("#{index}"))
}

fn names(doc: &FlowSetBlueprint) -> BTreeSet<&str> {
    doc.flows.iter().filter_map(|f| f.name.as_deref()).collect()
}

/// Every component with the role it is looked up under.
fn roles(flow: &FlowBlueprint) -> Vec<(Role, &ComponentBlueprint)> {
    let mut all: Vec<(Role, &ComponentBlueprint)> =
        flow.source.iter().map(|s| (Role::Source, s)).collect();
    for link in &flow.operators {
        match link {
            ChainLink::Operator(op) => all.push((Role::Operator, op)),
            ChainLink::Tee(tee) => all.push((Role::Sink, &tee.to)),
        }
    }
    all.extend(flow.sink.iter().map(|s| (Role::Sink, s)));
    all.extend(flow.monitor.iter().map(|m| (Role::Monitor, m)));
    all
}

/// Flow names a component refers to: its call or push target, plus any
/// `{"flow": ...}` parameter.
fn references(component: &ComponentBlueprint) -> Vec<&str> {
    let explicit = component
        .args
        .iter()
        .chain(component.params.values())
        .filter_map(|p| match p {
            Param::Flow(r) => Some(r.flow.as_str()),
            _ => None,
        });
    let mut refs: Vec<&str> = component.flow_target().into_iter().chain(explicit).collect();
    refs.dedup();
    refs
}

fn is_call_monitor(flow: &FlowBlueprint) -> bool {
    flow.monitor.as_ref().is_some_and(|m| m.kind == "call")
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct UnknownKindRule;
impl LintRule for UnknownKindRule {
    fn name(&self) -> &str { "unknown_kind" }
    fn apply(&self, doc: &FlowSetBlueprint, registry: &Registry) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for (i, flow) in doc.flows.iter().enumerate() {
            for (role, component) in roles(flow) {
                if !registry.has(role, &component.kind) {
                    diags.push(
                        Diagnostic::new(
                            self.name(),
                            Severity::Error,
                            label(i, flow),
                            format!("unknown {role} '{}'", component.kind),
                        )
                        .with_fix(format!("Run `actuator list` to see the known {role}s")),
                    );
                }
            }
        }
        diags
    }
}

struct DuplicateNameRule;
impl LintRule for DuplicateNameRule {
    fn name(&self) -> &str { "duplicate_name" }
    fn apply(&self, doc: &FlowSetBlueprint, _registry: &Registry) -> Vec<Diagnostic> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for name in doc.flows.iter().filter_map(|f| f.name.as_deref()) {
            *counts.entry(name).or_default() += 1;
        }
        counts
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(name, n)| {
                Diagnostic::new(
                    self.name(),
                    Severity::Error,
                    name.to_string(),
                    format!("flow name '{name}' is used {n} times"),
                )
            })
            .collect()
    }
}

struct DanglingReferenceRule;
impl LintRule for DanglingReferenceRule {
    fn name(&self) -> &str { "dangling_reference" }
    fn apply(&self, doc: &FlowSetBlueprint, _registry: &Registry) -> Vec<Diagnostic> {
        let known = names(doc);
        let mut diags = Vec::new();
        for (i, flow) in doc.flows.iter().enumerate() {
            for (_, component) in roles(flow) {
                for target in references(component) {
                    if !known.contains(target) {
                        diags.push(Diagnostic::new(
                            self.name(),
                            Severity::Error,
                            label(i, flow),
                            format!("'{}' refers to unknown flow '{target}'", component.kind),
                        ));
                    }
                }
            }
        }
        diags
    }
}

struct SelfReferenceRule;
impl LintRule for SelfReferenceRule {
    fn name(&self) -> &str { "self_reference" }
    fn apply(&self, doc: &FlowSetBlueprint, _registry: &Registry) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for flow in &doc.flows {
            let Some(name) = flow.name.as_deref() else {
                continue;
            };
            let loops = flow
                .called_flows()
                .into_iter()
                .chain(flow.outflow_targets())
                .any(|target| target == name);
            if loops {
                diags.push(Diagnostic::new(
                    self.name(),
                    Severity::Error,
                    name.to_string(),
                    format!("flow '{name}' calls or feeds itself"),
                ));
            }
        }
        diags
    }
}

/// Flows that call each other in a ring, `a -> b -> a`. A call holds the
/// caller's pipeline while the callee runs, so such a ring can never finish.
struct CallCycleRule;
impl LintRule for CallCycleRule {
    fn name(&self) -> &str { "call_cycle" }
    fn apply(&self, doc: &FlowSetBlueprint, _registry: &Registry) -> Vec<Diagnostic> {
        let calls: BTreeMap<&str, Vec<&str>> = doc
            .flows
            .iter()
            .filter_map(|f| f.name.as_deref().map(|n| (n, f.called_flows())))
            .collect();
        let mut diags = Vec::new();
        for &start in calls.keys() {
            // Each ring is reported once, from its smallest member.
            let mut path = vec![start];
            if let Some(ring) = ring_from(start, &calls, &mut path) {
                diags.push(
                    Diagnostic::new(
                        self.name(),
                        Severity::Error,
                        start.to_string(),
                        format!("flows call each other in a cycle: {}", ring.join(" -> ")),
                    )
                    .with_fix("Break the cycle; a called flow must not call back into its caller"),
                );
            }
        }
        diags
    }
}

/// Depth-first search for a path back to `path[0]` through names no smaller
/// than it. Self calls are left to `self_reference`.
fn ring_from<'a>(
    current: &'a str,
    calls: &BTreeMap<&'a str, Vec<&'a str>>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<&'a str>> {
    let start = path[0];
    for &next in calls.get(current).into_iter().flatten() {
        if next == start && path.len() > 1 {
            let mut ring = path.clone();
            ring.push(start);
            return Some(ring);
        }
        if next <= start || path.contains(&next) || !calls.contains_key(next) {
            continue;
        }
        path.push(next);
        if let Some(ring) = ring_from(next, calls, path) {
            return Some(ring);
        }
        path.pop();
    }
    None
}

struct CallableTargetRule;
impl LintRule for CallableTargetRule {
    fn name(&self) -> &str { "callable_target" }
    fn apply(&self, doc: &FlowSetBlueprint, _registry: &Registry) -> Vec<Diagnostic> {
        let by_name: BTreeMap<&str, &FlowBlueprint> = doc
            .flows
            .iter()
            .filter_map(|f| f.name.as_deref().map(|n| (n, f)))
            .collect();
        let mut diags = Vec::new();
        for (i, flow) in doc.flows.iter().enumerate() {
            for target in flow.called_flows() {
                // Unknown targets are reported as dangling references.
                let Some(peer) = by_name.get(target) else {
                    continue;
                };
                if !is_call_monitor(peer) {
                    diags.push(
                        Diagnostic::new(
                            self.name(),
                            Severity::Error,
                            label(i, flow),
                            format!("flow '{target}' is called but has no 'call' monitor"),
                        )
                        .with_fix(format!("Give flow '{target}' \"monitor\": \"call\"")),
                    );
                }
            }
        }
        diags
    }
}

struct SourceWithInflowsRule;
impl LintRule for SourceWithInflowsRule {
    fn name(&self) -> &str { "source_with_inflows" }
    fn apply(&self, doc: &FlowSetBlueprint, _registry: &Registry) -> Vec<Diagnostic> {
        let targets: BTreeSet<&str> = doc.flows.iter().flat_map(FlowBlueprint::outflow_targets).collect();
        doc.flows
            .iter()
            .filter(|f| f.source.is_some())
            .filter_map(|f| f.name.as_deref())
            .filter(|name| targets.contains(name))
            .map(|name| {
                Diagnostic::new(
                    self.name(),
                    Severity::Warning,
                    name.to_string(),
                    format!("flow '{name}' is fed by peers but its source ignores them"),
                )
                .with_fix("Drop the source to read peers through 'inflow'")
            })
            .collect()
    }
}

struct CallMonitorShapeRule;
impl LintRule for CallMonitorShapeRule {
    fn name(&self) -> &str { "call_monitor" }
    fn apply(&self, doc: &FlowSetBlueprint, _registry: &Registry) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for (i, flow) in doc.flows.iter().enumerate() {
            if !is_call_monitor(flow) {
                continue;
            }
            for (part, given) in [("source", &flow.source), ("sink", &flow.sink)] {
                if given.is_some() {
                    diags.push(Diagnostic::new(
                        self.name(),
                        Severity::Error,
                        label(i, flow),
                        format!("a 'call' flow supplies its own {part}"),
                    ));
                }
            }
        }
        diags
    }
}

struct UnnamedFlowRule;
impl LintRule for UnnamedFlowRule {
    fn name(&self) -> &str { "unnamed_flow" }
    fn apply(&self, doc: &FlowSetBlueprint, _registry: &Registry) -> Vec<Diagnostic> {
        doc.flows
            .iter()
            .enumerate()
            .filter(|(_, f)| f.name.is_none())
            .map(|(i, f)| {
                Diagnostic::new(
                    self.name(),
                    Severity::Info,
                    label(i, f),
                    "flow has no name; a generated one will be used".into(),
                )
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run every lint rule and collect diagnostics.
pub fn validate(doc: &FlowSetBlueprint, registry: &Registry) -> Vec<Diagnostic> {
    let rules: Vec<Box<dyn LintRule>> = vec![
        Box::new(UnknownKindRule),
        Box::new(DuplicateNameRule),
        Box::new(DanglingReferenceRule),
        Box::new(SelfReferenceRule),
        Box::new(CallCycleRule),
        Box::new(CallableTargetRule),
        Box::new(SourceWithInflowsRule),
        Box::new(CallMonitorShapeRule),
        Box::new(UnnamedFlowRule),
    ];

    let mut diagnostics = Vec::new();
    for rule in &rules {
        diagnostics.extend(rule.apply(doc, registry));
    }
    diagnostics
}

/// Run all lint rules; return `Err` if any `Error`-severity diagnostic found.
pub fn validate_or_raise(doc: &FlowSetBlueprint, registry: &Registry) -> Result<Vec<Diagnostic>> {
    let diagnostics = validate(doc, registry);
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .collect();
    if !errors.is_empty() {
        let messages: Vec<_> = errors.iter().map(|d| d.message.clone()).collect();
        return Err(ActuatorError::ConfigurationError(messages.join("; ")));
    }
    Ok(diagnostics)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::default_registry;

    fn check(doc: &str) -> Vec<Diagnostic> {
        let doc = actuator_blueprint::parse(doc).unwrap();
        validate(&doc, &default_registry())
    }

    fn has(diags: &[Diagnostic], rule: &str, severity: Severity) -> bool {
        diags.iter().any(|d| d.rule == rule && d.severity == severity)
    }

    #[test]
    fn valid_flow_set_passes() {
        let diags = check(
            r#"{"flows": [
                {"name": "a", "source": "counter", "sink": {"kind": "_flowref", "args": ["b"]}},
                {"name": "b", "operators": [{"kind": "map", "args": ["double"]}]},
                {"name": "double", "operators": ["lst.len"], "monitor": "call"}
            ]}"#,
        );
        let errors: Vec<_> = diags.iter().filter(|d| d.severity == Severity::Error).collect();
        assert!(errors.is_empty(), "Expected no errors, got: {errors:?}");
        assert!(diags.is_empty(), "Expected no diagnostics, got: {diags:?}");
    }

    #[test]
    fn unknown_kinds_by_role() {
        let diags = check(
            r#"{"flows": [{"name": "a", "source": "nope", "operators": [{"to": "print"}, "lst.nope"], "monitor": "print"}]}"#,
        );
        let unknown: Vec<_> = diags.iter().filter(|d| d.rule == "unknown_kind").collect();
        assert_eq!(unknown.len(), 3);
        assert!(unknown.iter().any(|d| d.message == "unknown source 'nope'"));
        assert!(unknown.iter().any(|d| d.message == "unknown operator 'lst.nope'"));
        assert!(unknown.iter().any(|d| d.message == "unknown monitor 'print'"));
    }

    #[test]
    fn duplicate_names() {
        let diags = check(r#"{"flows": [{"name": "a"}, {"name": "a"}]}"#);
        assert!(has(&diags, "duplicate_name", Severity::Error));
    }

    #[test]
    fn dangling_references() {
        let diags = check(
            r#"{"flows": [{"name": "a", "source": {"kind": "str", "args": [{"flow": "ghost"}]},
                           "sink": {"kind": "_flowref", "args": ["nowhere"]}}]}"#,
        );
        let dangling: Vec<_> = diags.iter().filter(|d| d.rule == "dangling_reference").collect();
        assert_eq!(dangling.len(), 2);
    }

    #[test]
    fn self_call() {
        let diags = check(
            r#"{"flows": [{"name": "a", "operators": [{"kind": "_flowref", "args": ["a"]}], "monitor": "call"}]}"#,
        );
        assert!(has(&diags, "self_reference", Severity::Error));
    }

    #[test]
    fn mutual_calls_form_a_cycle() {
        let diags = check(
            r#"{"flows": [
                {"name": "b", "operators": [{"kind": "_flowref", "args": ["a"]}], "monitor": "call"},
                {"name": "a", "operators": [{"kind": "map", "args": ["b"]}], "monitor": "call"}
            ]}"#,
        );
        let cycles: Vec<_> = diags.iter().filter(|d| d.rule == "call_cycle").collect();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].severity, Severity::Error);
        assert_eq!(cycles[0].flow.as_deref(), Some("a"));
        assert_eq!(cycles[0].message, "flows call each other in a cycle: a -> b -> a");
        assert!(!has(&diags, "self_reference", Severity::Error));
    }

    #[test]
    fn longer_call_ring_is_reported_once() {
        let diags = check(
            r#"{"flows": [
                {"name": "x", "operators": [{"kind": "_flowref", "args": ["y"]}], "monitor": "call"},
                {"name": "y", "operators": [{"kind": "filter", "args": ["z"]}], "monitor": "call"},
                {"name": "z", "operators": [{"kind": "_flowref", "args": ["x"]}], "monitor": "call"}
            ]}"#,
        );
        let cycles: Vec<_> = diags.iter().filter(|d| d.rule == "call_cycle").collect();
        assert_eq!(cycles.len(), 1);
        assert!(cycles[0].message.ends_with("x -> y -> z -> x"));
    }

    #[test]
    fn call_chain_without_ring_is_fine() {
        let diags = check(
            r#"{"flows": [
                {"name": "a", "source": "int", "operators": [{"kind": "_flowref", "args": ["b"]}]},
                {"name": "b", "operators": [{"kind": "_flowref", "args": ["c"]}], "monitor": "call"},
                {"name": "c", "operators": ["not"], "monitor": "call"}
            ]}"#,
        );
        assert!(!diags.iter().any(|d| d.rule == "call_cycle"));
    }

    #[test]
    fn called_flow_needs_call_monitor() {
        let diags = check(
            r#"{"flows": [
                {"name": "a", "source": "int", "operators": [{"kind": "filter", "args": ["b"]}]},
                {"name": "b", "source": "int"}
            ]}"#,
        );
        let d = diags.iter().find(|d| d.rule == "callable_target").unwrap();
        assert_eq!(d.flow.as_deref(), Some("a"));
        assert!(d.fix.is_some());
    }

    #[test]
    fn explicit_source_with_inflows_warns() {
        let diags = check(
            r#"{"flows": [
                {"name": "a", "source": "int", "sink": {"kind": "_flowref", "args": ["b"]}},
                {"name": "b", "source": "int"}
            ]}"#,
        );
        assert!(has(&diags, "source_with_inflows", Severity::Warning));
        assert!(!diags.iter().any(|d| d.severity == Severity::Error));
    }

    #[test]
    fn call_flow_with_own_parts() {
        let diags = check(r#"{"flows": [{"name": "f", "source": "int", "sink": "print", "monitor": "call"}]}"#);
        let shape: Vec<_> = diags.iter().filter(|d| d.rule == "call_monitor").collect();
        assert_eq!(shape.len(), 2);
    }

    #[test]
    fn unnamed_flow_is_info() {
        let diags = check(r#"{"flows": [{"source": "int"}]}"#);
        let d = diags.iter().find(|d| d.rule == "unnamed_flow").unwrap();
        assert_eq!(d.severity, Severity::Info);
        assert_eq!(d.flow.as_deref(), Some("#0"));
    }

    #[test]
    fn validate_or_raise_joins_errors() {
        let doc = actuator_blueprint::parse(r#"{"flows": [{"name": "a", "source": "x"}, {"name": "a"}]}"#)
            .unwrap();
        let err = validate_or_raise(&doc, &default_registry()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("unknown source 'x'"));
        assert!(msg.contains("flow name 'a' is used 2 times"));
    }

    #[test]
    fn validate_or_raise_returns_advisories() {
        let doc = actuator_blueprint::parse(r#"{"flows": [{"source": "int"}]}"#).unwrap();
        let diags = validate_or_raise(&doc, &default_registry()).unwrap();
        assert_eq!(diags.len(), 1);
    }
}
