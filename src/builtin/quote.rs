use std::sync::Arc;

use super::Natives;
use crate::{
    expression::Expression,
    marshal::{Marshal, Unquote},
    scope::{Function, Prototype, ScopeRef},
    Error, RuntimeResult,
};

pub(super) fn register(natives: &mut Natives) -> RuntimeResult<()> {
    natives.define("Marshal", Prototype::Function(Arc::new(MarshalFn)))?;
    natives.define("Unquote", Prototype::Function(Arc::new(UnquoteFn)))?;
    Ok(())
}

fn single(name: &str, mut args: Vec<Expression>) -> RuntimeResult<Expression> {
    match args.len() {
        1 => Ok(args.remove(0)),
        n => Err(Error::bad_parameter(format!(
            "{} expects 1 argument, got {}",
            name, n
        ))),
    }
}

/// `Marshal(expr)` takes its argument unevaluated, so it works on actions
/// and sources as well as values.
struct MarshalFn;

impl Function for MarshalFn {
    fn call(&self, _scope: &ScopeRef, args: Vec<Expression>) -> RuntimeResult<Expression> {
        let inner = single("Marshal", args)?;
        Ok(Expression::computed(Marshal::new(Arc::new(inner))))
    }
}

struct UnquoteFn;

impl Function for UnquoteFn {
    fn call(&self, _scope: &ScopeRef, args: Vec<Expression>) -> RuntimeResult<Expression> {
        let inner = single("Unquote", args)?;
        Ok(Expression::computed(Unquote::new(inner)))
    }
}
