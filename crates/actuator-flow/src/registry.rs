//! Component registry: packages of source, operator, sink and monitor
//! factories, and the two-level name lookup used to build blueprints.

use std::collections::BTreeMap;
use std::fmt;

use actuator_blueprint::ComponentBlueprint;
use actuator_types::{ActuatorError, Result};

use crate::builtins;
use crate::chain::{Operator, Source};
use crate::component::{Deferred, Lifecycle};
use crate::monitor::Monitor;
use crate::sink::Sink;

pub type SourceFactory = fn(&Deferred) -> Result<Box<dyn Source>>;
pub type OperatorFactory = fn(&Deferred) -> Result<Box<dyn Operator>>;
pub type SinkFactory = fn(&Deferred) -> Result<Box<dyn Sink>>;
pub type MonitorFactory = fn(&Deferred) -> Result<Box<dyn Monitor>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Source,
    Operator,
    Sink,
    Monitor,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Source, Role::Operator, Role::Sink, Role::Monitor];
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Source => "source",
            Role::Operator => "operator",
            Role::Sink => "sink",
            Role::Monitor => "monitor",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Archive / Package
// ---------------------------------------------------------------------------

/// Factories for one role within a package, plus an optional default element
/// used when the package name alone is given.
pub struct Archive<F> {
    elements: BTreeMap<String, F>,
    default: Option<String>,
}

impl<F: Copy> Archive<F> {
    fn new() -> Self {
        Self {
            elements: BTreeMap::new(),
            default: None,
        }
    }

    pub fn register(&mut self, name: impl Into<String>, factory: F) -> &mut Self {
        self.elements.insert(name.into(), factory);
        self
    }

    /// Register `name` and make it the package's default for this role.
    pub fn register_default(&mut self, name: impl Into<String>, factory: F) -> &mut Self {
        let name = name.into();
        self.default = Some(name.clone());
        self.register(name, factory)
    }

    pub fn get(&self, name: &str) -> Option<F> {
        self.elements.get(name).copied()
    }

    pub fn default_element(&self) -> Option<F> {
        self.default.as_deref().and_then(|name| self.get(name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.elements.keys().map(String::as_str)
    }
}

pub struct Package {
    name: String,
    pub sources: Archive<SourceFactory>,
    pub operators: Archive<OperatorFactory>,
    pub sinks: Archive<SinkFactory>,
    pub monitors: Archive<MonitorFactory>,
}

impl Package {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sources: Archive::new(),
            operators: Archive::new(),
            sinks: Archive::new(),
            monitors: Archive::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn names(&self, role: Role) -> Vec<&str> {
        match role {
            Role::Source => self.sources.names().collect(),
            Role::Operator => self.operators.names().collect(),
            Role::Sink => self.sinks.names().collect(),
            Role::Monitor => self.monitors.names().collect(),
        }
    }

    fn has_default(&self, role: Role) -> bool {
        match role {
            Role::Source => self.sources.default_element().is_some(),
            Role::Operator => self.operators.default_element().is_some(),
            Role::Sink => self.sinks.default_element().is_some(),
            Role::Monitor => self.monitors.default_element().is_some(),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Built-in elements plus named packages.
///
/// Lookup of `pkg.element` goes to that package. A bare `name` is first tried
/// as a built-in element, then as package `name`'s default element.
pub struct Registry {
    builtin: Package,
    packages: BTreeMap<String, Package>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            builtin: Package::new(""),
            packages: BTreeMap::new(),
        }
    }

    pub fn builtin_mut(&mut self) -> &mut Package {
        &mut self.builtin
    }

    pub fn register_package(&mut self, package: Package) {
        tracing::debug!(package = %package.name(), "Registered package");
        self.packages.insert(package.name.clone(), package);
    }

    pub fn package_names(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }

    fn lookup<F: Copy>(
        &self,
        role: Role,
        name: &str,
        archive: impl Fn(&Package) -> &Archive<F>,
    ) -> Result<F> {
        let found = match name.split_once('.') {
            Some((pkg, element)) => self.packages.get(pkg).and_then(|p| archive(p).get(element)),
            None => archive(&self.builtin).get(name).or_else(|| {
                self.packages
                    .get(name)
                    .and_then(|p| archive(p).default_element())
            }),
        };
        found.ok_or_else(|| ActuatorError::ConfigurationError(format!("unknown {role} '{name}'")))
    }

    pub fn has(&self, role: Role, name: &str) -> bool {
        match role {
            Role::Source => self.lookup(role, name, |p| &p.sources).is_ok(),
            Role::Operator => self.lookup(role, name, |p| &p.operators).is_ok(),
            Role::Sink => self.lookup(role, name, |p| &p.sinks).is_ok(),
            Role::Monitor => self.lookup(role, name, |p| &p.monitors).is_ok(),
        }
    }

    /// Every name that resolves for `role`, sorted.
    pub fn names(&self, role: Role) -> Vec<String> {
        let mut names: Vec<String> = self.builtin.names(role).into_iter().map(String::from).collect();
        for (pkg_name, pkg) in &self.packages {
            if pkg.has_default(role) && !names.iter().any(|n| n == pkg_name) {
                names.push(pkg_name.clone());
            }
            names.extend(pkg.names(role).into_iter().map(|e| format!("{pkg_name}.{e}")));
        }
        names.sort();
        names
    }

    pub fn build_source(&self, bp: &ComponentBlueprint) -> Result<Lifecycle<dyn Source>> {
        let factory = self.lookup(Role::Source, &bp.kind, |p| &p.sources)?;
        let deferred = Deferred::from(bp);
        let inner = factory(&deferred)?;
        Ok(Lifecycle::new(bp.kind.clone(), inner, deferred).with_name(bp.name.clone()))
    }

    pub fn build_operator(&self, bp: &ComponentBlueprint) -> Result<Lifecycle<dyn Operator>> {
        let factory = self.lookup(Role::Operator, &bp.kind, |p| &p.operators)?;
        let deferred = Deferred::from(bp);
        let inner = factory(&deferred)?;
        Ok(Lifecycle::new(bp.kind.clone(), inner, deferred).with_name(bp.name.clone()))
    }

    pub fn build_sink(&self, bp: &ComponentBlueprint) -> Result<Lifecycle<dyn Sink>> {
        let factory = self.lookup(Role::Sink, &bp.kind, |p| &p.sinks)?;
        let deferred = Deferred::from(bp);
        let inner = factory(&deferred)?;
        Ok(Lifecycle::new(bp.kind.clone(), inner, deferred).with_name(bp.name.clone()))
    }

    pub fn build_monitor(&self, bp: &ComponentBlueprint) -> Result<Lifecycle<dyn Monitor>> {
        let factory = self.lookup(Role::Monitor, &bp.kind, |p| &p.monitors)?;
        let deferred = Deferred::from(bp);
        let inner = factory(&deferred)?;
        Ok(Lifecycle::new(bp.kind.clone(), inner, deferred).with_name(bp.name.clone()))
    }

    /// Build an inline `to` link: the sink wrapped in a pass-through operator.
    pub fn build_tee(&self, sink: &ComponentBlueprint) -> Result<Lifecycle<dyn Operator>> {
        let sink = self.build_sink(sink)?;
        Ok(builtins::operators::tee(sink))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("packages", &self.packages.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Default registry factory
// ---------------------------------------------------------------------------

/// Registry with every built-in component and the `var`, `time`, `lst`,
/// `bool`, `fmt` and `file` packages.
pub fn default_registry() -> Registry {
    let mut reg = Registry::new();
    builtins::register(reg.builtin_mut());
    reg.register_package(builtins::var::package());
    reg.register_package(builtins::time::package());
    reg.register_package(builtins::lst::package());
    reg.register_package(builtins::boolean::package());
    reg.register_package(builtins::fmt::package());
    reg.register_package(builtins::file::package());
    reg
}
