//! # Expression model
//!
//! Every node of a built action tree is an [`Expression`]: a constant
//! [`Value`], a computed value that is evaluated against an
//! [`ExecutionContext`] when a run needs it, or an [`Action`].
//!
//! Computed forms must depend on nothing but the context they are evaluated
//! with, so the same tree can be run concurrently for many events.

mod call;
mod coerce;
mod value;

use std::sync::Arc;

use async_trait::async_trait;

pub use call::{Deferred, DeferredAction, EvalFn, FnCall, RunFn};
pub use coerce::coerce;
pub use value::{ActionRef, Kind, SourceRef, StructValue, Value};

use crate::{
    action::Action, context::ExecutionContext, marshal::MarshalCode, source::EventSource, Error,
    RuntimeResult,
};

/// A value whose content is only known once a run evaluates it.
#[async_trait]
pub trait Evaluate: MarshalCode {
    fn kind(&self) -> Kind;

    async fn eval(&self, ctx: &ExecutionContext) -> RuntimeResult<Value>;
}

#[derive(Clone)]
pub enum Expression {
    Constant(Value),
    Computed(Arc<dyn Evaluate>),
    Action(Arc<dyn Action>),
}

impl std::fmt::Debug for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expression::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
            Expression::Computed(c) => write!(f, "Computed({})", c.kind()),
            Expression::Action(_) => write!(f, "Action"),
        }
    }
}

impl Expression {
    pub fn string<S: Into<String>>(value: S) -> Self {
        Expression::Constant(Value::String(value.into()))
    }

    pub fn int(value: i64) -> Self {
        Expression::Constant(Value::Int(value))
    }

    pub fn bool(value: bool) -> Self {
        Expression::Constant(Value::Bool(value))
    }

    pub fn string_list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Expression::Constant(Value::StringList(items.into_iter().map(Into::into).collect()))
    }

    pub fn null() -> Self {
        Expression::Constant(Value::Null)
    }

    pub fn action<A: Action + 'static>(action: A) -> Self {
        Expression::Action(Arc::new(action))
    }

    pub fn computed<E: Evaluate + 'static>(computed: E) -> Self {
        Expression::Computed(Arc::new(computed))
    }

    pub fn source(source: Arc<dyn EventSource>) -> Self {
        Expression::Constant(Value::Source(SourceRef(source)))
    }

    pub fn kind(&self) -> Kind {
        match self {
            Expression::Constant(value) => value.kind(),
            Expression::Computed(computed) => computed.kind(),
            Expression::Action(_) => Kind::Action,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Expression::Constant(_))
    }

    pub async fn eval(&self, ctx: &ExecutionContext) -> RuntimeResult<Value> {
        match self {
            Expression::Constant(value) => Ok(value.clone()),
            Expression::Computed(computed) => computed.eval(ctx).await,
            Expression::Action(action) => Ok(Value::Action(ActionRef(action.clone()))),
        }
    }

    pub async fn eval_string(&self, ctx: &ExecutionContext) -> RuntimeResult<String> {
        match self.eval(ctx).await? {
            Value::String(s) => Ok(s),
            other => Err(mismatch(&Kind::String, &other)),
        }
    }

    pub async fn eval_int(&self, ctx: &ExecutionContext) -> RuntimeResult<i64> {
        match self.eval(ctx).await? {
            Value::Int(i) => Ok(i),
            other => Err(mismatch(&Kind::Int, &other)),
        }
    }

    pub async fn eval_bool(&self, ctx: &ExecutionContext) -> RuntimeResult<bool> {
        match self.eval(ctx).await? {
            Value::Bool(b) => Ok(b),
            other => Err(mismatch(&Kind::Bool, &other)),
        }
    }

    pub async fn eval_string_list(&self, ctx: &ExecutionContext) -> RuntimeResult<Vec<String>> {
        match coerce(self.eval(ctx).await?, &Kind::StringList)? {
            Value::StringList(items) => Ok(items),
            other => Err(mismatch(&Kind::StringList, &other)),
        }
    }

    /// Views the expression as an action. Computed expressions of action
    /// kind are resolved on every run.
    pub fn into_action(self) -> RuntimeResult<Arc<dyn Action>> {
        match self {
            Expression::Action(action) => Ok(action),
            Expression::Constant(Value::Action(ActionRef(action))) => Ok(action),
            Expression::Computed(computed) if computed.kind() == Kind::Action => {
                Ok(Arc::new(ComputedAction { computed }))
            }
            other => Err(Error::bad_parameter(format!(
                "expected action, got {}",
                other.kind()
            ))),
        }
    }
}

fn mismatch(expected: &Kind, got: &Value) -> Error {
    Error::bad_parameter(format!("expected {}, got {}", expected, got.kind()))
}

#[async_trait]
impl MarshalCode for Expression {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> RuntimeResult<String> {
        match self {
            Expression::Constant(value) => value.marshal_code(ctx).await,
            Expression::Computed(computed) => computed.marshal_code(ctx).await,
            Expression::Action(action) => action.marshal_code(ctx).await,
        }
    }
}

impl From<Value> for Expression {
    fn from(value: Value) -> Self {
        Expression::Constant(value)
    }
}

struct ComputedAction {
    computed: Arc<dyn Evaluate>,
}

#[async_trait]
impl MarshalCode for ComputedAction {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> RuntimeResult<String> {
        self.computed.marshal_code(ctx).await
    }
}

#[async_trait]
impl Action for ComputedAction {
    async fn run(&self, ctx: &ExecutionContext) -> RuntimeResult<()> {
        match self.computed.eval(ctx).await? {
            Value::Action(ActionRef(action)) => action.run(ctx).await,
            other => Err(mismatch(&Kind::Action, &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_typed_eval() {
        let ctx = ExecutionContext::background();
        assert_eq!(Expression::int(7).eval_int(&ctx).await.unwrap(), 7);
        assert_eq!(
            Expression::string("a").eval_string_list(&ctx).await.unwrap(),
            vec!["a".to_string()]
        );

        let err = Expression::bool(true).eval_string(&ctx).await.unwrap_err();
        assert!(err.is_bad_parameter());
    }

    #[test]
    fn test_into_action_rejects_values() {
        assert!(Expression::int(1).into_action().is_err());
        assert_eq!(Expression::string_list(["a", "b"]).kind(), Kind::StringList);
    }
}
