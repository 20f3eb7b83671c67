use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use strum::Display;
use tracing::debug;

use super::{action_arg, Natives};
use crate::{
    action::{run_in_scope, Action, ScopeAction},
    context::{Closer, ExecutionContext},
    convert::{FieldKind, Signature},
    expression::{Expression, Kind, Value},
    interpreter,
    marshal::MarshalCode,
    parser::Node,
    scope::{LexicalScope, Prototype, ScopeRef, SpecialForm},
    Error, RuntimeResult,
};

pub(super) fn register(natives: &mut Natives) -> RuntimeResult<()> {
    for mode in [BlockMode::Sequence, BlockMode::Continue, BlockMode::Parallel] {
        natives.define(
            &mode.to_string(),
            Prototype::SpecialForm(Arc::new(BlockForm { mode })),
        )?;
    }
    natives.define("If", Prototype::SpecialForm(Arc::new(IfForm)))?;

    natives.function(
        "Defer",
        Signature::new(vec![FieldKind::Action], vec![FieldKind::Error]),
        |ctx, args| async move {
            let action = action_arg(&args, 0)?;
            ctx.add_closer(Arc::new(DeferredRun {
                action,
                ctx: ctx.clone(),
            }));
            Ok(Value::Null)
        },
    )?;
    natives.function(
        "Noop",
        Signature::new(vec![], vec![FieldKind::Error]),
        |_ctx, _args| async { Ok(Value::Null) },
    )?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
enum BlockMode {
    /// Stops at the first failure.
    Sequence,
    /// Runs everything and reports the last failure.
    Continue,
    /// Runs everything concurrently and reports every failure.
    Parallel,
}

/// Builds its children in a fresh lexical layer, so definitions made by
/// one child are visible to the siblings after it and nowhere else.
struct BlockForm {
    mode: BlockMode,
}

impl SpecialForm for BlockForm {
    fn call(&self, scope: &ScopeRef, args: &[Node]) -> RuntimeResult<Expression> {
        let inner = LexicalScope::wrap(scope.clone());
        let actions = args
            .iter()
            .enumerate()
            .map(|(i, node)| {
                interpreter::build(&inner, node)?
                    .into_action()
                    .map_err(|e| e.wrap(format!("argument {} of {}", i + 1, self.mode)))
            })
            .collect::<RuntimeResult<Vec<_>>>()?;
        Ok(Expression::Action(Arc::new(Block {
            mode: self.mode,
            actions,
        })))
    }
}

struct Block {
    mode: BlockMode,
    actions: Vec<Arc<dyn Action>>,
}

#[async_trait]
impl MarshalCode for Block {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> RuntimeResult<String> {
        let mut actions = Vec::with_capacity(self.actions.len());
        for action in &self.actions {
            actions.push(action.marshal_code(ctx).await?);
        }
        Ok(format!("{}({})", self.mode, actions.join(", ")))
    }
}

#[async_trait]
impl Action for Block {
    async fn run(&self, ctx: &ExecutionContext) -> RuntimeResult<()> {
        self.run_with_scope(&ctx.runtime_scope()).await
    }

    fn as_scope_action(&self) -> Option<&dyn ScopeAction> {
        Some(self)
    }
}

#[async_trait]
impl ScopeAction for Block {
    async fn run_with_scope(&self, scope: &ExecutionContext) -> RuntimeResult<()> {
        match self.mode {
            BlockMode::Sequence => {
                for action in &self.actions {
                    if let Some(e) = scope.err() {
                        return Err(e);
                    }
                    if let Err(e) = action.run(scope).await {
                        scope.set_error(e.clone());
                        return Err(e);
                    }
                }
                Ok(())
            }
            BlockMode::Continue => {
                let mut last = None;
                for action in &self.actions {
                    if let Some(e) = scope.err() {
                        return Err(e);
                    }
                    if let Err(e) = action.run(scope).await {
                        debug!("continuing after failure: {}", e);
                        scope.set_error(e.clone());
                        last = Some(e);
                    }
                }
                last.map_or(Ok(()), Err)
            }
            BlockMode::Parallel => {
                let results = join_all(self.actions.iter().map(|action| action.run(scope))).await;
                let errors = results.into_iter().filter_map(Result::err).collect();
                match Error::aggregate(errors) {
                    Some(e) => {
                        scope.set_error(e.clone());
                        Err(e)
                    }
                    None => Ok(()),
                }
            }
        }
    }
}

/// `If(cond, then[, else])`. Each branch is built in its own layer.
struct IfForm;

impl SpecialForm for IfForm {
    fn call(&self, scope: &ScopeRef, args: &[Node]) -> RuntimeResult<Expression> {
        let (cond, then, otherwise) = match args {
            [cond, then] => (cond, then, None),
            [cond, then, otherwise] => (cond, then, Some(otherwise)),
            _ => {
                return Err(Error::bad_parameter(format!(
                    "If expects 2 or 3 arguments, got {}",
                    args.len()
                )))
            }
        };
        let cond = interpreter::build(scope, cond)?;
        if !Kind::Bool.accepts(&cond.kind()) {
            return Err(Error::bad_parameter(format!(
                "If condition must be bool, got {}",
                cond.kind()
            )));
        }
        let branch = |node: &Node| {
            interpreter::build(&LexicalScope::wrap(scope.clone()), node)?.into_action()
        };
        Ok(Expression::Action(Arc::new(If {
            cond,
            then: branch(then)?,
            otherwise: otherwise.map(branch).transpose()?,
        })))
    }
}

struct If {
    cond: Expression,
    then: Arc<dyn Action>,
    otherwise: Option<Arc<dyn Action>>,
}

#[async_trait]
impl MarshalCode for If {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> RuntimeResult<String> {
        let mut parts = vec![
            self.cond.marshal_code(ctx).await?,
            self.then.marshal_code(ctx).await?,
        ];
        if let Some(otherwise) = &self.otherwise {
            parts.push(otherwise.marshal_code(ctx).await?);
        }
        Ok(format!("If({})", parts.join(", ")))
    }
}

#[async_trait]
impl Action for If {
    async fn run(&self, ctx: &ExecutionContext) -> RuntimeResult<()> {
        let branch = if self.cond.eval_bool(ctx).await? {
            &self.then
        } else {
            match &self.otherwise {
                Some(otherwise) => otherwise,
                None => return Ok(()),
            }
        };
        // one runtime layer per lexical layer
        run_in_scope(branch, &ctx.runtime_scope()).await
    }
}

/// Runs a deferred action when the run's context closes.
struct DeferredRun {
    action: Arc<dyn Action>,
    ctx: ExecutionContext,
}

#[async_trait]
impl Closer for DeferredRun {
    async fn close(&self) -> RuntimeResult<()> {
        self.action.run(&self.ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{build, scope};
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_sequence_stops_at_first_failure() {
        let scope = scope();
        let ctx = ExecutionContext::background();
        let action = build(
            &scope,
            r#"Sequence(Define(a, 1), Define(e, ExpectEnv("FORCE_TEST_UNSET_VARIABLE")), Define(b, 2))"#,
        )
        .unwrap()
        .into_action()
        .unwrap();

        let inner = ctx.runtime_scope();
        let err = crate::action::run_in_scope(&action, &inner).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(inner.value("a"), Some(Value::Int(1)));
        assert!(inner.value("b").is_none());
        assert!(inner.error().unwrap().is_not_found());
        // the caller's context is left alone
        assert!(ctx.error().is_none());
    }

    #[tokio::test]
    async fn test_continue_returns_last_failure() {
        let scope = scope();
        let ctx = ExecutionContext::background();
        let action = build(
            &scope,
            r#"Continue(
                Define(a, ExpectEnv("FORCE_TEST_UNSET_A")),
                Define(x, "ran"),
                Define(b, ExpectEnv("FORCE_TEST_UNSET_B")),
            )"#,
        )
        .unwrap()
        .into_action()
        .unwrap();

        let err = crate::action::run_in_scope(&action, &ctx).await.unwrap_err();
        assert!(err.to_string().contains("FORCE_TEST_UNSET_B"));
        assert_eq!(ctx.value("x"), Some(Value::from("ran")));
        assert!(ctx.error().unwrap().to_string().contains("FORCE_TEST_UNSET_B"));
    }

    #[tokio::test]
    async fn test_parallel_aggregates() {
        let scope = scope();
        let ctx = ExecutionContext::background();
        let action = build(
            &scope,
            r#"Parallel(
                Noop(),
                Define(a, ExpectEnv("FORCE_TEST_UNSET_A")),
                Define(b, ExpectEnv("FORCE_TEST_UNSET_B")),
            )"#,
        )
        .unwrap()
        .into_action()
        .unwrap();
        match action.run(&ctx).await.unwrap_err() {
            Error::Aggregate(agg) => assert_eq!(agg.errors.len(), 2),
            other => panic!("expected aggregate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_block_scoping() {
        let scope = scope();
        // definitions made inside a block do not leak out of it
        let err = build(&scope, "Sequence(Sequence(Define(x, 1)), Var(x))").unwrap_err();
        assert!(err.root_cause().is_not_found());

        // a nested block may shadow a name from an enclosing one
        let ctx = ExecutionContext::background();
        let action = build(
            &scope,
            r#"Sequence(Define(x, 1), Sequence(Define(x, "inner")), Define(y, x))"#,
        )
        .unwrap()
        .into_action()
        .unwrap();
        crate::action::run_in_scope(&action, &ctx).await.unwrap();
        assert_eq!(ctx.value("x"), Some(Value::Int(1)));
        assert_eq!(ctx.value("y"), Some(Value::Int(1)));
    }

    #[tokio::test]
    async fn test_if_branch_shadows() {
        let scope = scope();
        let ctx = ExecutionContext::background();
        let action = build(
            &scope,
            r#"Sequence(Define(x, 1), If(true, Define(x, "shadow")), Define(y, x))"#,
        )
        .unwrap()
        .into_action()
        .unwrap();
        crate::action::run_in_scope(&action, &ctx).await.unwrap();
        assert_eq!(ctx.value("x"), Some(Value::Int(1)));
        assert_eq!(ctx.value("y"), Some(Value::Int(1)));
    }

    #[tokio::test]
    async fn test_if() {
        let scope = scope();
        let ctx = ExecutionContext::background();
        let action = build(
            &scope,
            r#"If(Eq("a", "a"), Define(branch, "then"), Define(branch, "else"))"#,
        )
        .unwrap()
        .into_action()
        .unwrap();
        action.run(&ctx).await.unwrap();
        // branch definitions stay inside the branch
        assert!(ctx.value("branch").is_none());
        assert_eq!(
            action.marshal_code(&ctx).await.unwrap(),
            r#"If(Eq("a", "a"), Define(branch, "then"), Define(branch, "else"))"#
        );

        let pick = |cond: &str| {
            build(
                &scope,
                &format!(r#"If({}, Noop(), Define(e, ExpectEnv("FORCE_TEST_UNSET_ELSE")))"#, cond),
            )
            .unwrap()
            .into_action()
            .unwrap()
        };
        pick("true").run(&ctx).await.unwrap();
        assert!(pick("false").run(&ctx).await.unwrap_err().is_not_found());

        assert!(build(&scope, r#"If("yes", Noop())"#)
            .unwrap_err()
            .root_cause()
            .is_bad_parameter());
        assert!(build(&scope, "If(true)").unwrap_err().root_cause().is_bad_parameter());
    }

    #[tokio::test]
    async fn test_defer_runs_on_close() {
        let scope = scope();
        let ctx = ExecutionContext::background();
        let action = build(&scope, r#"Sequence(Defer(Define(closed, true)), Noop())"#)
            .unwrap()
            .into_action()
            .unwrap();
        crate::action::run_in_scope(&action, &ctx).await.unwrap();
        assert!(ctx.value("closed").is_none());

        ctx.close().await.unwrap();
        assert_eq!(ctx.value("closed"), Some(Value::Bool(true)));
    }
}
