//! # Lexical scope
//!
//! Scopes hold definitions (type prototypes, never values) and are consulted
//! while an action tree is built, so references to undefined names fail
//! before any event arrives. Each layer is created by wrapping its parent;
//! combinators that introduce bindings add one layer per invocation.

use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};

use crate::{
    convert::StructType,
    expression::{Expression, Kind},
    parser::Node,
    Error, RuntimeResult,
};

/// A callable whose arguments are built before the call.
pub trait Function: Send + Sync {
    fn call(&self, scope: &ScopeRef, args: Vec<Expression>) -> RuntimeResult<Expression>;
}

/// A callable receiving raw syntax, free to build its arguments in a new
/// scope layer.
pub trait SpecialForm: Send + Sync {
    fn call(&self, scope: &ScopeRef, args: &[Node]) -> RuntimeResult<Expression>;
}

#[derive(Clone)]
pub enum Prototype {
    Value(Kind),
    Function(Arc<dyn Function>),
    SpecialForm(Arc<dyn SpecialForm>),
    Struct(Arc<StructType>),
}

impl Prototype {
    pub fn describe(&self) -> String {
        match self {
            Prototype::Value(kind) => kind.to_string(),
            Prototype::Function(_) => "function".to_string(),
            Prototype::SpecialForm(_) => "special form".to_string(),
            Prototype::Struct(ty) => format!("struct {}", ty.name),
        }
    }
}

impl std::fmt::Debug for Prototype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Prototype({})", self.describe())
    }
}

pub type ScopeRef = Arc<dyn Scope>;

pub trait Scope: Send + Sync {
    /// Fails with `AlreadyExists` when `name` is bound at this level.
    fn add_definition(&self, name: &str, prototype: Prototype) -> RuntimeResult<()>;

    fn lookup_local(&self, name: &str) -> Option<Prototype>;

    fn parent(&self) -> Option<ScopeRef>;

    fn local_names(&self) -> Vec<String>;

    /// Verbose lookup failures.
    fn debug(&self) -> bool {
        false
    }

    /// Local definition first, then each parent in turn.
    fn get_definition(&self, name: &str) -> RuntimeResult<Prototype> {
        if let Some(prototype) = self.lookup_local(name) {
            return Ok(prototype);
        }
        let mut current = self.parent();
        while let Some(scope) = current {
            if let Some(prototype) = scope.lookup_local(name) {
                return Ok(prototype);
            }
            current = scope.parent();
        }
        if self.debug() {
            Err(Error::not_found(format!(
                "{} is not defined, visible names: [{}]",
                name,
                self.visible_names().join(", ")
            )))
        } else {
            Err(Error::not_found(format!("{} is not defined", name)))
        }
    }

    /// Every name visible from here; parent names carry one `^` per level.
    fn visible_names(&self) -> Vec<String> {
        let mut names = self.local_names();
        names.sort();
        let mut prefix = String::from("^");
        let mut current = self.parent();
        while let Some(scope) = current {
            let mut local = scope.local_names();
            local.sort();
            names.extend(local.into_iter().map(|n| format!("{}{}", prefix, n)));
            prefix.push('^');
            current = scope.parent();
        }
        names
    }
}

/// A single layer of definitions.
pub struct LexicalScope {
    parent: Option<ScopeRef>,
    defs: DashMap<String, Prototype>,
    debug: bool,
}

impl LexicalScope {
    pub fn root(debug: bool) -> Arc<Self> {
        Arc::new(Self {
            parent: None,
            defs: DashMap::new(),
            debug,
        })
    }

    /// A new layer on top of `parent`.
    pub fn wrap(parent: ScopeRef) -> ScopeRef {
        let debug = parent.debug();
        Arc::new(Self {
            parent: Some(parent),
            defs: DashMap::new(),
            debug,
        })
    }
}

impl Scope for LexicalScope {
    fn add_definition(&self, name: &str, prototype: Prototype) -> RuntimeResult<()> {
        match self.defs.entry(name.to_string()) {
            Entry::Occupied(_) => Err(Error::already_exists(format!(
                "{} is already defined in this scope",
                name
            ))),
            Entry::Vacant(entry) => {
                entry.insert(prototype);
                Ok(())
            }
        }
    }

    fn lookup_local(&self, name: &str) -> Option<Prototype> {
        self.defs.get(name).map(|entry| entry.value().clone())
    }

    fn parent(&self) -> Option<ScopeRef> {
        self.parent.clone()
    }

    fn local_names(&self) -> Vec<String> {
        self.defs.iter().map(|entry| entry.key().clone()).collect()
    }

    fn debug(&self) -> bool {
        self.debug
    }
}
