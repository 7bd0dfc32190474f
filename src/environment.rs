use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use log::{debug, info};

use crate::error::{LoxError, Result};
use crate::value::Value;

/// Shared, mutable handle to a scope.  Closures keep their defining scope
/// alive through one of these.
pub type EnvRef = Rc<RefCell<Environment>>;

/// One lexical scope: its own bindings plus a link to the enclosing scope.
#[derive(Debug, Default)]
pub struct Environment {
    values: HashMap<String, Value>,
    enclosing: Option<EnvRef>,
}

impl Environment {
    pub fn new() -> Self {
        Environment {
            values: HashMap::new(),
            enclosing: None,
        }
    }

    pub fn with_enclosing(enclosing: EnvRef) -> Self {
        Environment {
            values: HashMap::new(),
            enclosing: Some(enclosing),
        }
    }

    /// Wrap a fresh child of `enclosing` in a shared handle.
    pub fn child_of(enclosing: &EnvRef) -> EnvRef {
        Rc::new(RefCell::new(Environment::with_enclosing(Rc::clone(enclosing))))
    }

    /// Bind `name` in this scope, shadowing any previous binding here.
    pub fn define(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str, line: usize) -> Result<Value> {
        if let Some(value) = self.values.get(name) {
            Ok(value.clone())
        } else if let Some(enclosing) = &self.enclosing {
            enclosing.borrow().get(name, line)
        } else {
            Err(undefined(name, line))
        }
    }

    pub fn assign(&mut self, name: &str, value: Value, line: usize) -> Result<()> {
        if let Some(slot) = self.values.get_mut(name) {
            *slot = value;
            Ok(())
        } else if let Some(enclosing) = &self.enclosing {
            enclosing.borrow_mut().assign(name, value, line)
        } else {
            Err(undefined(name, line))
        }
    }

    /// Walk exactly `hops` enclosing links up from `env`.
    pub fn ancestor(env: &EnvRef, hops: usize) -> Option<EnvRef> {
        let mut current = Rc::clone(env);

        for _ in 0..hops {
            let next = current.borrow().enclosing.clone()?;
            current = next;
        }

        Some(current)
    }

    /// Read `name` from the scope exactly `hops` levels up, without searching.
    pub fn get_at(env: &EnvRef, hops: usize, name: &str, line: usize) -> Result<Value> {
        debug!("get_at '{}' {} hop(s) up", name, hops);

        let target = Self::ancestor(env, hops).ok_or_else(|| undefined(name, line))?;
        let value = target.borrow().values.get(name).cloned();

        value.ok_or_else(|| undefined(name, line))
    }

    /// Overwrite `name` in the scope exactly `hops` levels up.
    pub fn assign_at(
        env: &EnvRef,
        hops: usize,
        name: &str,
        value: Value,
        line: usize,
    ) -> Result<()> {
        debug!("assign_at '{}' {} hop(s) up", name, hops);

        let target = Self::ancestor(env, hops).ok_or_else(|| undefined(name, line))?;
        let mut scope = target.borrow_mut();

        let Some(slot) = scope.values.get_mut(name) else {
            return Err(undefined(name, line));
        };
        *slot = value;

        Ok(())
    }

    /// Remove and return every binding in this scope.
    pub fn take_bindings(&mut self) -> HashMap<String, Value> {
        std::mem::take(&mut self.values)
    }

    /// Names bound directly in this scope, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.values.keys().cloned().collect();
        names.sort();
        names
    }
}

fn undefined(name: &str, line: usize) -> LoxError {
    LoxError::runtime(line, format!("Undefined variable '{}'.", name))
}

/// Weak registry of every scope a closure has captured.
///
/// A closure stored in the scope it captured (a recursive local function, a
/// class whose methods close over the scope holding the class) is an `Rc`
/// cycle.  Such scopes stay alive for the whole session; when the registry is
/// dropped it empties each one that is still alive, which breaks the cycles
/// and lets everything be reclaimed.
#[derive(Debug)]
pub struct CapturedScopes {
    scopes: Vec<Weak<RefCell<Environment>>>,
    prune_at: usize,
}

impl Default for CapturedScopes {
    fn default() -> Self {
        Self::new()
    }
}

impl CapturedScopes {
    const MIN_PRUNE: usize = 64;

    pub fn new() -> Self {
        Self {
            scopes: Vec::new(),
            prune_at: Self::MIN_PRUNE,
        }
    }

    pub fn track(&mut self, env: &EnvRef) {
        if self.scopes.len() >= self.prune_at {
            self.scopes.retain(|weak| weak.strong_count() > 0);
            self.prune_at = (self.scopes.len() * 2).max(Self::MIN_PRUNE);

            debug!("Pruned captured scopes down to {}", self.scopes.len());
        }

        self.scopes.push(Rc::downgrade(env));
    }

    /// Number of registered scopes that are still alive.
    pub fn live(&self) -> usize {
        self.scopes.iter().filter(|w| w.strong_count() > 0).count()
    }
}

impl Drop for CapturedScopes {
    fn drop(&mut self) {
        info!("Releasing {} captured scope(s)", self.live());

        for weak in self.scopes.drain(..) {
            if let Some(env) = weak.upgrade() {
                // Take the bindings out first so nothing is dropped while the
                // scope is still mutably borrowed.
                let bindings = env.borrow_mut().take_bindings();
                drop(bindings);
            }
        }
    }
}
