//! Hierarchical variable scopes shared between flows.
//!
//! A FlowSet owns one root [`Scope`]; every Flow gets a child of it. Entries
//! are either plain values or nested scopes, which is how `"flow.var"` paths
//! reach into another flow's namespace.
//!
//! All scopes of one tree share a single claim signal, so a blocking
//! [`get`](Scope::get) issued from a flow scope wakes up when the key is
//! claimed anywhere along its ancestor chain.
//!
//! A scope can be [closed](Scope::close): readers blocked on it give up with
//! [`ActuatorError::Interrupted`]. Flows close their scope when they stop.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::{ActuatorError, Result, Value};

/// A single slot in a scope.
#[derive(Debug, Clone)]
pub enum Entry {
    Value(Value),
    Scope(Scope),
}

impl Entry {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Entry::Value(v) => Some(v),
            Entry::Scope(_) => None,
        }
    }

    pub fn as_scope(&self) -> Option<&Scope> {
        match self {
            Entry::Scope(s) => Some(s),
            Entry::Value(_) => None,
        }
    }
}

impl From<Value> for Entry {
    fn from(value: Value) -> Self {
        Entry::Value(value)
    }
}

impl From<Scope> for Entry {
    fn from(scope: Scope) -> Self {
        Entry::Scope(scope)
    }
}

/// Tree-wide wake-up for blocked readers. The counter only exists so the
/// condition variable has a mutex to pair with.
#[derive(Default)]
struct ClaimSignal {
    generation: Mutex<u64>,
    claimed: Condvar,
}

struct ScopeInner {
    parent: Option<Scope>,
    values: Mutex<HashMap<String, Entry>>,
    signal: Arc<ClaimSignal>,
    closed: AtomicBool,
}

/// Thread-safe namespace node.
///
/// Cloning a `Scope` yields another handle to the **same** namespace.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

fn split_key(key: &str) -> (&str, Option<&str>) {
    match key.split_once('.') {
        Some((head, tail)) => (head, Some(tail)),
        None => (key, None),
    }
}

impl Scope {
    /// Create a root scope with no parent.
    pub fn root() -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                parent: None,
                values: Mutex::new(HashMap::new()),
                signal: Arc::new(ClaimSignal::default()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Create a child scope whose lookups fall back to `self`.
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                parent: Some(self.clone()),
                values: Mutex::new(HashMap::new()),
                signal: self.inner.signal.clone(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn parent(&self) -> Option<&Scope> {
        self.inner.parent.as_ref()
    }

    /// Whether two handles refer to the same namespace.
    pub fn ptr_eq(&self, other: &Scope) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Local key names, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn values(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.inner
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Find `head` locally, then in each ancestor. Local entries shadow.
    fn find_head(&self, head: &str) -> Option<Entry> {
        let mut current = Some(self);
        while let Some(scope) = current {
            if let Some(entry) = scope.values().get(head).cloned() {
                return Some(entry);
            }
            current = scope.parent();
        }
        None
    }

    fn resolve_local(&self, key: &str) -> Option<Entry> {
        let (head, tail) = split_key(key);
        let entry = self.values().get(head).cloned()?;
        match tail {
            None => Some(entry),
            Some(rest) => entry.as_scope()?.resolve_local(rest),
        }
    }

    fn resolve(&self, key: &str) -> Option<Entry> {
        let (head, tail) = split_key(key);
        let entry = self.find_head(head)?;
        match tail {
            None => Some(entry),
            Some(rest) => entry.as_scope()?.resolve_local(rest),
        }
    }

    /// Resolve the scope that owns the last segment of a dotted key.
    fn owner_of<'k>(&self, key: &'k str) -> Result<(Scope, &'k str)> {
        match split_key(key) {
            (_, None) => Ok((self.clone(), key)),
            (head, Some(rest)) => match self.find_head(head) {
                Some(Entry::Scope(scope)) => scope.owner_of(rest),
                _ => Err(ActuatorError::UndefinedKey { key: key.into() }),
            },
        }
    }

    pub fn has_local(&self, key: &str) -> bool {
        self.resolve_local(key).is_some()
    }

    pub fn has(&self, key: &str) -> bool {
        self.resolve(key).is_some()
    }

    /// Look up `key`, walking from this scope to the root.
    ///
    /// With `blocking`, an absent key is waited on until some writer claims it
    /// or this scope is closed. Without it, an absent key is
    /// [`ActuatorError::UndefinedKey`].
    pub fn get(&self, key: &str, blocking: bool) -> Result<Entry> {
        if let Some(entry) = self.resolve(key) {
            return Ok(entry);
        }
        if !blocking {
            return Err(ActuatorError::UndefinedKey { key: key.into() });
        }

        let signal = &self.inner.signal;
        let mut generation = signal
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            // Re-checked under the signal lock: a claim cannot notify between
            // this check and the wait below.
            if let Some(entry) = self.resolve(key) {
                return Ok(entry);
            }
            if self.is_closed() {
                return Err(ActuatorError::Interrupted { key: key.into() });
            }
            tracing::trace!(key, "waiting for claim");
            generation = signal
                .claimed
                .wait(generation)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`get`](Scope::get), but the entry must be a value, not a scope.
    pub fn get_value(&self, key: &str, blocking: bool) -> Result<Value> {
        match self.get(key, blocking)? {
            Entry::Value(v) => Ok(v),
            Entry::Scope(_) => Err(ActuatorError::ConfigurationError(format!(
                "'{key}' names a scope, not a value"
            ))),
        }
    }

    /// Write `key`. With `claim`, the write must be the first one for this key
    /// and a lost claim is [`ActuatorError::ClaimConflict`]; otherwise the
    /// local entry is overwritten and nobody is woken.
    pub fn set(&self, key: &str, value: impl Into<Entry>, claim: bool) -> Result<()> {
        if claim {
            return if self.claim(key, value)? {
                Ok(())
            } else {
                Err(ActuatorError::ClaimConflict { key: key.into() })
            };
        }
        let (owner, leaf) = self.owner_of(key)?;
        owner.values().insert(leaf.to_string(), value.into());
        Ok(())
    }

    /// Write `initial` only if `key` is not yet defined in its owning scope.
    ///
    /// Returns whether this call won. The winner wakes every blocked reader.
    pub fn claim(&self, key: &str, initial: impl Into<Entry>) -> Result<bool> {
        let (owner, leaf) = self.owner_of(key)?;
        {
            let mut values = owner.values();
            if values.contains_key(leaf) {
                return Ok(false);
            }
            values.insert(leaf.to_string(), initial.into());
        }
        self.wake();
        tracing::trace!(key, "claimed");
        Ok(true)
    }

    /// Release every reader blocked in this scope. Blocking reads from it
    /// fail with [`ActuatorError::Interrupted`] from now on, unless the key is
    /// already there. Values stay readable.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.wake();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn wake(&self) {
        let signal = &self.inner.signal;
        let mut generation = signal
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *generation = generation.wrapping_add(1);
        signal.claimed.notify_all();
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("keys", &self.keys())
            .field("has_parent", &self.parent().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn set_and_get_local() {
        let scope = Scope::root();
        scope.set("a", json!(1), false).unwrap();
        assert!(scope.has_local("a"));
        assert_eq!(scope.get_value("a", false).unwrap(), json!(1));
    }

    #[test]
    fn non_blocking_miss_is_undefined() {
        let scope = Scope::root();
        let err = scope.get("missing", false).unwrap_err();
        assert!(matches!(err, ActuatorError::UndefinedKey { key } if key == "missing"));
    }

    #[test]
    fn child_falls_back_to_parent() {
        let root = Scope::root();
        root.set("shared", json!("root"), false).unwrap();
        let child = root.child();
        assert!(child.has("shared"));
        assert!(!child.has_local("shared"));
        assert_eq!(child.get_value("shared", false).unwrap(), json!("root"));
    }

    #[test]
    fn local_shadows_ancestor() {
        let root = Scope::root();
        root.set("x", json!("root"), false).unwrap();
        let child = root.child();
        child.set("x", json!("child"), false).unwrap();
        assert_eq!(child.get_value("x", false).unwrap(), json!("child"));
        assert_eq!(root.get_value("x", false).unwrap(), json!("root"));
    }

    #[test]
    fn plain_set_overwrites() {
        let scope = Scope::root();
        scope.set("k", json!(1), false).unwrap();
        scope.set("k", json!(2), false).unwrap();
        assert_eq!(scope.get_value("k", false).unwrap(), json!(2));
    }

    #[test]
    fn claim_once_only() {
        let scope = Scope::root();
        assert!(scope.claim("k", json!("first")).unwrap());
        assert!(!scope.claim("k", json!("second")).unwrap());
        assert_eq!(scope.get_value("k", false).unwrap(), json!("first"));
    }

    #[test]
    fn set_with_claim_conflict_errors() {
        let scope = Scope::root();
        scope.set("k", json!(1), true).unwrap();
        let err = scope.set("k", json!(2), true).unwrap_err();
        assert!(matches!(err, ActuatorError::ClaimConflict { .. }));
        assert_eq!(scope.get_value("k", false).unwrap(), json!(1));
    }

    #[test]
    fn dotted_path_reaches_nested_scope() {
        let root = Scope::root();
        let flow_a = root.child();
        flow_a.set("temp", json!(21.5), false).unwrap();
        root.claim("a", flow_a.clone()).unwrap();

        let flow_b = root.child();
        assert!(flow_b.has("a.temp"));
        assert_eq!(flow_b.get_value("a.temp", false).unwrap(), json!(21.5));
    }

    #[test]
    fn dotted_set_writes_into_nested_scope() {
        let root = Scope::root();
        let nested = root.child();
        root.claim("ns", nested.clone()).unwrap();
        root.set("ns.v", json!(true), false).unwrap();
        assert_eq!(nested.get_value("v", false).unwrap(), json!(true));
    }

    #[test]
    fn dotted_path_through_value_is_undefined() {
        let scope = Scope::root();
        scope.set("plain", json!({"inner": 1}), false).unwrap();
        assert!(!scope.has("plain.inner"));
        assert!(matches!(
            scope.get("plain.inner", false),
            Err(ActuatorError::UndefinedKey { .. })
        ));
        assert!(matches!(
            scope.set("plain.inner", json!(2), false),
            Err(ActuatorError::UndefinedKey { .. })
        ));
    }

    #[test]
    fn get_value_rejects_scope_entries() {
        let root = Scope::root();
        root.claim("child", root.child()).unwrap();
        assert!(root.get_value("child", false).is_err());
        assert!(root.get("child", false).unwrap().as_scope().is_some());
    }

    #[test]
    fn concurrent_claims_have_one_winner() {
        let scope = Scope::root();
        let barrier = Arc::new(Barrier::new(16));
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let scope = scope.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    (i, scope.claim("race", json!(i)).unwrap())
                })
            })
            .collect();

        let results: Vec<(i32, bool)> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners: Vec<_> = results.iter().filter(|(_, won)| *won).collect();
        assert_eq!(winners.len(), 1);
        let winner = winners[0].0;
        assert_eq!(scope.get_value("race", false).unwrap(), json!(winner));
    }

    #[test]
    fn blocking_get_waits_for_claim() {
        let scope = Scope::root();
        let reader = {
            let scope = scope.clone();
            thread::spawn(move || scope.get_value("later", true).unwrap())
        };
        thread::sleep(Duration::from_millis(50));
        assert!(scope.claim("later", json!("arrived")).unwrap());
        assert_eq!(reader.join().unwrap(), json!("arrived"));
    }

    #[test]
    fn blocking_get_in_child_wakes_on_ancestor_claim() {
        let root = Scope::root();
        let child = root.child();
        let reader = thread::spawn(move || child.get_value("from_root", true).unwrap());
        thread::sleep(Duration::from_millis(50));
        root.claim("from_root", json!(7)).unwrap();
        assert_eq!(reader.join().unwrap(), json!(7));
    }

    #[test]
    fn many_blocked_readers_all_wake() {
        let scope = Scope::root();
        let readers: Vec<_> = (0..8)
            .map(|_| {
                let scope = scope.clone();
                thread::spawn(move || scope.get_value("go", true).unwrap())
            })
            .collect();
        thread::sleep(Duration::from_millis(30));
        scope.claim("go", json!("now")).unwrap();
        for r in readers {
            assert_eq!(r.join().unwrap(), json!("now"));
        }
    }

    #[test]
    fn close_releases_blocked_reader() {
        let root = Scope::root();
        let flow = root.child();
        let reader = {
            let flow = flow.clone();
            thread::spawn(move || flow.get_value("never", true))
        };
        thread::sleep(Duration::from_millis(50));
        flow.close();
        let err = reader.join().unwrap().unwrap_err();
        assert!(matches!(err, ActuatorError::Interrupted { ref key } if key == "never"));
    }

    #[test]
    fn closed_scope_still_serves_present_keys() {
        let scope = Scope::root();
        scope.set("here", json!(1), false).unwrap();
        scope.close();
        assert!(scope.is_closed());
        assert_eq!(scope.get_value("here", true).unwrap(), json!(1));
        assert!(matches!(
            scope.get("absent", true),
            Err(ActuatorError::Interrupted { .. })
        ));
    }

    #[test]
    fn closing_one_scope_leaves_siblings_waiting() {
        let root = Scope::root();
        let closed = root.child();
        let open = root.child();
        let reader = {
            let open = open.clone();
            thread::spawn(move || open.get_value("late", true).unwrap())
        };
        thread::sleep(Duration::from_millis(30));
        closed.close();
        thread::sleep(Duration::from_millis(30));
        assert!(!reader.is_finished());
        root.claim("late", json!("ok")).unwrap();
        assert_eq!(reader.join().unwrap(), json!("ok"));
    }

    #[test]
    fn keys_are_sorted() {
        let scope = Scope::root();
        scope.set("b", json!(1), false).unwrap();
        scope.set("a", json!(2), false).unwrap();
        assert_eq!(scope.keys(), vec!["a".to_string(), "b".to_string()]);
    }
}
