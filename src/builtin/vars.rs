use std::sync::Arc;

use async_trait::async_trait;

use super::Natives;
use crate::{
    action::Action,
    context::ExecutionContext,
    expression::{Expression, Kind},
    interpreter,
    marshal::MarshalCode,
    parser::Node,
    scope::{Prototype, ScopeRef, SpecialForm},
    Error, RuntimeResult,
};

/// Variables every dispatched event sets on its run.
fn event_variables() -> [(&'static str, Kind); 5] {
    [
        ("event.kind", Kind::String),
        ("event.created", Kind::String),
        ("event.path", Kind::optional(Kind::String)),
        ("event.op", Kind::optional(Kind::String)),
        ("event.exit_code", Kind::optional(Kind::Int)),
    ]
}

pub(super) fn register(natives: &mut Natives) -> RuntimeResult<()> {
    natives.define("Define", Prototype::SpecialForm(Arc::new(DefineForm)))?;
    natives.define("Var", Prototype::SpecialForm(Arc::new(VarForm)))?;
    for (name, kind) in event_variables() {
        natives.define(name, Prototype::Value(kind))?;
    }
    Ok(())
}

fn variable_name<'n>(form: &str, node: &'n Node) -> RuntimeResult<&'n str> {
    match node {
        Node::Ident(name) | Node::String(name) => Ok(name.as_str()),
        other => Err(Error::bad_parameter(format!(
            "{} expects a variable name, got {:?}",
            form, other
        ))),
    }
}

/// `Define(name, expr)`: binds `name` in the enclosing lexical layer with
/// the kind of `expr`, and sets it on the run when executed.
struct DefineForm;

impl SpecialForm for DefineForm {
    fn call(&self, scope: &ScopeRef, args: &[Node]) -> RuntimeResult<Expression> {
        let [name, value] = args else {
            return Err(Error::bad_parameter(format!(
                "Define expects 2 arguments, got {}",
                args.len()
            )));
        };
        let name = variable_name("Define", name)?;
        // built before the name is bound, so `Define(x, x)` refers to an outer x
        let value = interpreter::build(scope, value)?;
        scope.add_definition(name, Prototype::Value(value.kind()))?;
        Ok(Expression::Action(Arc::new(Define {
            name: name.to_string(),
            value,
        })))
    }
}

struct Define {
    name: String,
    value: Expression,
}

#[async_trait]
impl MarshalCode for Define {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> RuntimeResult<String> {
        Ok(format!(
            "Define({}, {})",
            self.name,
            self.value.marshal_code(ctx).await?
        ))
    }
}

#[async_trait]
impl Action for Define {
    async fn run(&self, ctx: &ExecutionContext) -> RuntimeResult<()> {
        let value = self.value.eval(ctx).await?;
        ctx.set_value(self.name.clone(), value);
        Ok(())
    }
}

/// `Var(name)`: explicit variable reference, same as the bare identifier.
struct VarForm;

impl SpecialForm for VarForm {
    fn call(&self, scope: &ScopeRef, args: &[Node]) -> RuntimeResult<Expression> {
        let [name] = args else {
            return Err(Error::bad_parameter(format!(
                "Var expects 1 argument, got {}",
                args.len()
            )));
        };
        let name = variable_name("Var", name)?;
        interpreter::build(scope, &Node::ident(name))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{build, scope};
    use super::*;
    use crate::{event::Event, expression::Value};

    #[tokio::test]
    async fn test_define_and_read() {
        let scope = scope();
        let ctx = ExecutionContext::background();
        let action = build(
            &scope,
            r#"Sequence(Define(name, "world"), Define(greeting, Sprintf("hello %s", Var(name))))"#,
        )
        .unwrap()
        .into_action()
        .unwrap();
        crate::action::run_in_scope(&action, &ctx).await.unwrap();
        assert_eq!(ctx.value("greeting"), Some(Value::from("hello world")));
    }

    #[test]
    fn test_redefinition_fails() {
        let scope = scope();
        let err = build(&scope, "Sequence(Define(x, 1), Define(x, 2))").unwrap_err();
        assert!(err.root_cause().is_already_exists());
        // builtins cannot be shadowed at the root either
        let err = build(&scope, "Define(Sequence, 1)").unwrap_err();
        assert!(err.root_cause().is_already_exists());
    }

    #[test]
    fn test_kind_is_checked_at_build() {
        let scope = scope();
        let err = build(&scope, r#"Sequence(Define(n, 1), If(n, Noop()))"#).unwrap_err();
        assert!(err.root_cause().is_bad_parameter());
    }

    #[tokio::test]
    async fn test_event_variables() {
        let scope = scope();
        let ctx = ExecutionContext::background();
        let path = build(&scope, "event.path").unwrap();
        assert_eq!(path.eval(&ctx).await.unwrap(), Value::Null);

        Event::file_change("/src/main.rs", crate::event::FileOp::Write).add_metadata(&ctx);
        assert_eq!(path.eval(&ctx).await.unwrap(), Value::from("/src/main.rs"));

        let kind = build(&scope, "event.kind").unwrap();
        assert_eq!(kind.eval_string(&ctx).await.unwrap(), "FileChange");
    }
}
