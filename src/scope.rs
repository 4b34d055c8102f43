//! Scope chain
//!
//! Binding environments live in an arena keyed by [`ScopeId`]. A scope is
//! shared by whoever refers to it (a thread's state stack, a closure, an
//! inner scope) and only the id is ever copied.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::heap::FxIndexMap;
use crate::value::{JsString, Value};

/// Stable identity of a scope
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeId(pub u64);

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope#{}", self.0)
    }
}

impl fmt::Debug for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopeId({})", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScopeKind {
    Global,
    Function,
    Block,
    Catch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub value: Value,
    pub mutable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scope {
    pub id: ScopeId,
    pub kind: ScopeKind,
    pub outer: Option<ScopeId>,
    pub bindings: FxIndexMap<JsString, Binding>,
    /// `this` for function and global scopes; block scopes defer outward
    pub this_value: Value,
}

/// Result of assigning to a name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    Done,
    /// The binding is a `const`
    Immutable,
    /// No scope on the chain binds the name
    Unresolved,
}

/// Arena of scopes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeArena {
    scopes: BTreeMap<ScopeId, Scope>,
    next_id: u64,
}

impl ScopeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, kind: ScopeKind, outer: Option<ScopeId>, this_value: Value) -> ScopeId {
        self.next_id += 1;
        let id = ScopeId(self.next_id);
        self.scopes.insert(
            id,
            Scope {
                id,
                kind,
                outer,
                bindings: FxIndexMap::default(),
                this_value,
            },
        );
        id
    }

    pub fn get(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes.get(&id)
    }

    pub fn get_mut(&mut self, id: ScopeId) -> Option<&mut Scope> {
        self.scopes.get_mut(&id)
    }

    pub fn contains(&self, id: ScopeId) -> bool {
        self.scopes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scope> {
        self.scopes.values()
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id
    }

    pub(crate) fn from_parts(scopes: Vec<Scope>, next_id: u64) -> Self {
        let scopes = scopes.into_iter().map(|s| (s.id, s)).collect();
        Self { scopes, next_id }
    }

    pub(crate) fn retain(&mut self, live: &std::collections::BTreeSet<ScopeId>) -> usize {
        let before = self.scopes.len();
        self.scopes.retain(|id, _| live.contains(id));
        before - self.scopes.len()
    }

    /// Create or overwrite a binding in exactly this scope.
    pub fn declare(&mut self, scope: ScopeId, name: JsString, value: Value, mutable: bool) {
        if let Some(s) = self.get_mut(scope) {
            s.bindings.insert(name, Binding { value, mutable });
        }
    }

    /// Bind `name` to undefined unless this scope already binds it
    /// (`var` redeclaration keeps the current value).
    pub fn declare_var(&mut self, scope: ScopeId, name: &JsString) {
        if let Some(s) = self.get_mut(scope) {
            if !s.bindings.contains_key(name.as_str()) {
                s.bindings.insert(
                    name.clone(),
                    Binding {
                        value: Value::Undefined,
                        mutable: true,
                    },
                );
            }
        }
    }

    /// Find the scope binding `name`, walking outward.
    ///
    /// More than `max_depth` hops means the chain is corrupt (scope chains
    /// are acyclic by construction), which is a host error.
    pub fn resolve(
        &self,
        scope: ScopeId,
        name: &str,
        max_depth: usize,
    ) -> Result<Option<ScopeId>, EngineError> {
        let mut current = Some(scope);
        let mut depth = 0;
        while let Some(id) = current {
            if depth > max_depth {
                return Err(EngineError::corrupt(format!(
                    "scope chain from {} exceeds {} links",
                    scope, max_depth
                )));
            }
            let s = self.get(id).ok_or(EngineError::UnknownScope(id))?;
            if s.bindings.contains_key(name) {
                return Ok(Some(id));
            }
            current = s.outer;
            depth += 1;
        }
        Ok(None)
    }

    pub fn lookup(
        &self,
        scope: ScopeId,
        name: &str,
        max_depth: usize,
    ) -> Result<Option<Value>, EngineError> {
        Ok(self
            .resolve(scope, name, max_depth)?
            .and_then(|id| self.get(id))
            .and_then(|s| s.bindings.get(name))
            .map(|b| b.value.clone()))
    }

    pub fn assign(
        &mut self,
        scope: ScopeId,
        name: &str,
        value: Value,
        max_depth: usize,
    ) -> Result<Assignment, EngineError> {
        let Some(id) = self.resolve(scope, name, max_depth)? else {
            return Ok(Assignment::Unresolved);
        };
        let binding = self
            .get_mut(id)
            .and_then(|s| s.bindings.get_mut(name))
            .ok_or(EngineError::UnknownScope(id))?;
        if !binding.mutable {
            return Ok(Assignment::Immutable);
        }
        binding.value = value;
        Ok(Assignment::Done)
    }

    /// Set a binding in exactly this scope, ignoring mutability (`const`
    /// initialization).
    pub fn initialize(&mut self, scope: ScopeId, name: &str, value: Value) -> Result<(), EngineError> {
        let binding = self
            .get_mut(scope)
            .ok_or(EngineError::UnknownScope(scope))?
            .bindings
            .get_mut(name)
            .ok_or_else(|| EngineError::corrupt(format!("'{}' was never declared in {}", name, scope)))?;
        binding.value = value;
        Ok(())
    }

    /// `this` of the nearest function or global scope.
    pub fn this_value(&self, scope: ScopeId, max_depth: usize) -> Result<Value, EngineError> {
        let mut current = Some(scope);
        let mut depth = 0;
        while let Some(id) = current {
            if depth > max_depth {
                return Err(EngineError::corrupt(format!(
                    "scope chain from {} exceeds {} links",
                    scope, max_depth
                )));
            }
            let s = self.get(id).ok_or(EngineError::UnknownScope(id))?;
            if matches!(s.kind, ScopeKind::Function | ScopeKind::Global) {
                return Ok(s.this_value.clone());
            }
            current = s.outer;
            depth += 1;
        }
        Ok(Value::Undefined)
    }
}
