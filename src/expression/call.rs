use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{try_join_all, BoxFuture};

use super::{Evaluate, Expression, Kind, Value};
use crate::{action::Action, context::ExecutionContext, marshal::MarshalCode, RuntimeResult};

/// Body of a computed call, invoked with the evaluated arguments.
pub type EvalFn =
    Arc<dyn Fn(ExecutionContext, Vec<Value>) -> BoxFuture<'static, RuntimeResult<Value>> + Send + Sync>;

/// Body of an action call, invoked with the evaluated arguments.
pub type RunFn =
    Arc<dyn Fn(ExecutionContext, Vec<Value>) -> BoxFuture<'static, RuntimeResult<()>> + Send + Sync>;

/// A function name with its ordered, unevaluated arguments. `package`
/// disambiguates functions of the same name registered by different plugins.
#[derive(Clone, Debug)]
pub struct FnCall {
    pub package: Option<String>,
    pub name: String,
    pub args: Vec<Expression>,
}

impl FnCall {
    pub fn new<S: Into<String>>(name: S, args: Vec<Expression>) -> Self {
        Self {
            package: None,
            name: name.into(),
            args,
        }
    }

    pub fn with_package<S: Into<String>>(mut self, package: S) -> Self {
        self.package = Some(package.into());
        self
    }

    pub fn qualified_name(&self) -> String {
        match &self.package {
            Some(package) => format!("{}.{}", package, self.name),
            None => self.name.clone(),
        }
    }

    pub async fn eval_args(&self, ctx: &ExecutionContext) -> RuntimeResult<Vec<Value>> {
        try_join_all(self.args.iter().map(|arg| arg.eval(ctx))).await
    }
}

#[async_trait]
impl MarshalCode for FnCall {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> RuntimeResult<String> {
        let mut args = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            args.push(arg.marshal_code(ctx).await?);
        }
        Ok(format!("{}({})", self.qualified_name(), args.join(", ")))
    }
}

/// A call producing a value: the arguments are evaluated first, then the
/// body runs with their values.
pub struct Deferred {
    kind: Kind,
    call: FnCall,
    body: EvalFn,
}

impl Deferred {
    pub fn new(kind: Kind, call: FnCall, body: EvalFn) -> Self {
        Self { kind, call, body }
    }
}

#[async_trait]
impl MarshalCode for Deferred {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> RuntimeResult<String> {
        self.call.marshal_code(ctx).await
    }
}

#[async_trait]
impl Evaluate for Deferred {
    fn kind(&self) -> Kind {
        self.kind.clone()
    }

    async fn eval(&self, ctx: &ExecutionContext) -> RuntimeResult<Value> {
        let args = self.call.eval_args(ctx).await?;
        (self.body)(ctx.clone(), args).await
    }
}

/// An action call: the arguments are evaluated when the action runs.
pub struct DeferredAction {
    call: FnCall,
    body: RunFn,
}

impl DeferredAction {
    pub fn new(call: FnCall, body: RunFn) -> Self {
        Self { call, body }
    }
}

#[async_trait]
impl MarshalCode for DeferredAction {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> RuntimeResult<String> {
        self.call.marshal_code(ctx).await
    }
}

#[async_trait]
impl Action for DeferredAction {
    async fn run(&self, ctx: &ExecutionContext) -> RuntimeResult<()> {
        let args = self.call.eval_args(ctx).await?;
        (self.body)(ctx.clone(), args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[tokio::test]
    async fn test_deferred_evaluates_args_first() {
        let ctx = ExecutionContext::background();
        let body: EvalFn = Arc::new(|_ctx, args| {
            async move {
                let total = args
                    .iter()
                    .map(|v| match v {
                        Value::Int(i) => *i,
                        _ => 0,
                    })
                    .sum::<i64>();
                Ok(Value::Int(total))
            }
            .boxed()
        });
        let call = FnCall::new("Sum", vec![Expression::int(1), Expression::int(2)]);
        let expr = Expression::computed(Deferred::new(Kind::Int, call, body));

        assert_eq!(expr.eval_int(&ctx).await.unwrap(), 3);
        assert_eq!(expr.marshal_code(&ctx).await.unwrap(), "Sum(1, 2)");
    }

    #[tokio::test]
    async fn test_action_args_wait_for_run() {
        let ctx = ExecutionContext::background();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let body: RunFn = Arc::new(move |_ctx, args| {
            sink.lock().extend(args);
            async { Ok(()) }.boxed()
        });
        let action = DeferredAction::new(FnCall::new("Record", vec![Expression::int(7)]), body);

        assert!(seen.lock().is_empty());
        action.run(&ctx).await.unwrap();
        assert_eq!(*seen.lock(), vec![Value::Int(7)]);
        assert_eq!(action.marshal_code(&ctx).await.unwrap(), "Record(7)");
    }

    #[tokio::test]
    async fn test_package_prefix() {
        let ctx = ExecutionContext::background();
        let call = FnCall::new("Build", vec![Expression::string("app")]).with_package("docker");
        assert_eq!(call.marshal_code(&ctx).await.unwrap(), r#"docker.Build("app")"#);
    }
}
