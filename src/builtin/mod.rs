//! # Builtins
//!
//! Functions and special forms every group scope starts with. Special forms
//! receive raw syntax and build their arguments themselves, usually in a new
//! lexical layer; everything else goes through the schema converter like any
//! plugin function would.

mod flow;
mod log;
mod process;
mod quote;
mod values;
mod vars;

use std::{future::Future, sync::Arc};

use futures::FutureExt;

use crate::{
    action::Action,
    context::ExecutionContext,
    convert::{Converter, SchemaRegistry, Signature},
    expression::{ActionRef, EvalFn, SourceRef, Value},
    scope::{Prototype, ScopeRef},
    source::EventSource,
    Error, RuntimeResult,
};

pub(crate) use values::sprintf;

/// Defines every builtin in `scope`.
pub fn register(scope: &ScopeRef) -> RuntimeResult<()> {
    let registry = SchemaRegistry::new();
    let mut natives = Natives {
        scope,
        converter: Converter::new(&registry),
    };
    flow::register(&mut natives)?;
    vars::register(&mut natives)?;
    values::register(&mut natives)?;
    log::register(&mut natives)?;
    quote::register(&mut natives)?;
    process::register(&mut natives)?;
    Ok(())
}

/// Registration helper shared by the builtin modules.
pub(crate) struct Natives<'a> {
    scope: &'a ScopeRef,
    converter: Converter<'a>,
}

impl<'a> Natives<'a> {
    pub fn scope(&self) -> &ScopeRef {
        self.scope
    }

    pub fn define(&self, name: &str, prototype: Prototype) -> RuntimeResult<()> {
        self.scope.add_definition(name, prototype)
    }

    /// Converts `body` with `signature` and defines it under `name`.
    pub fn function<F, Fut>(&mut self, name: &str, signature: Signature, body: F) -> RuntimeResult<()>
    where
        F: Fn(ExecutionContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RuntimeResult<Value>> + Send + 'static,
    {
        let body: EvalFn = Arc::new(move |ctx, args| body(ctx, args).boxed());
        let function = self.converter.convert_function(name, &signature, body)?;
        self.define(name, Prototype::Function(Arc::new(function)))
    }
}

// Arguments reach native bodies already coerced to their parameter kinds, so
// a mismatch here means the signature and the body disagree.

fn arg<'v>(args: &'v [Value], index: usize) -> RuntimeResult<&'v Value> {
    args.get(index)
        .ok_or_else(|| Error::internal(format!("missing argument {}", index + 1)))
}

fn mismatch(index: usize, expected: &str, got: &Value) -> Error {
    Error::internal(format!(
        "argument {} should be {}, got {}",
        index + 1,
        expected,
        got.kind()
    ))
}

pub(crate) fn string_arg(args: &[Value], index: usize) -> RuntimeResult<String> {
    match arg(args, index)? {
        Value::String(s) => Ok(s.clone()),
        other => Err(mismatch(index, "string", other)),
    }
}

pub(crate) fn int_arg(args: &[Value], index: usize) -> RuntimeResult<i64> {
    match arg(args, index)? {
        Value::Int(i) => Ok(*i),
        other => Err(mismatch(index, "int", other)),
    }
}

pub(crate) fn bool_arg(args: &[Value], index: usize) -> RuntimeResult<bool> {
    match arg(args, index)? {
        Value::Bool(b) => Ok(*b),
        other => Err(mismatch(index, "bool", other)),
    }
}

pub(crate) fn list_arg(args: &[Value], index: usize) -> RuntimeResult<Vec<String>> {
    match arg(args, index)? {
        Value::StringList(items) => Ok(items.clone()),
        other => Err(mismatch(index, "[]string", other)),
    }
}

pub(crate) fn action_arg(args: &[Value], index: usize) -> RuntimeResult<Arc<dyn Action>> {
    match arg(args, index)? {
        Value::Action(ActionRef(action)) => Ok(action.clone()),
        other => Err(mismatch(index, "action", other)),
    }
}

pub(crate) fn source_arg(args: &[Value], index: usize) -> RuntimeResult<Arc<dyn EventSource>> {
    match arg(args, index)? {
        Value::Source(SourceRef(source)) => Ok(source.clone()),
        other => Err(mismatch(index, "source", other)),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::{expression::Expression, interpreter, parser, scope::LexicalScope};

    pub fn scope() -> ScopeRef {
        let scope: ScopeRef = LexicalScope::root(false);
        register(&scope).unwrap();
        scope
    }

    pub fn build(scope: &ScopeRef, source: &str) -> RuntimeResult<Expression> {
        interpreter::build(scope, &parser::parse(source)?)
    }
}
