//! # Interpreter
//!
//! Builds syntax trees into expression trees against a lexical scope. Every
//! name is resolved at build time; nothing is looked up by name while a run
//! executes except variable values.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::{debug, info, instrument};

use crate::{
    action::run_in_scope,
    context::ExecutionContext,
    expression::{coerce, Evaluate, Expression, Kind, Value},
    group::Group,
    marshal::MarshalCode,
    parser::{self, Node},
    scope::{Prototype, ScopeRef},
    Error, RuntimeResult,
};

/// Reference to a variable defined in an enclosing scope.
pub struct VarRef {
    name: String,
    kind: Kind,
}

impl VarRef {
    pub fn new<S: Into<String>>(name: S, kind: Kind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

#[async_trait]
impl MarshalCode for VarRef {
    async fn marshal_code(&self, _ctx: &ExecutionContext) -> RuntimeResult<String> {
        Ok(self.name.clone())
    }
}

#[async_trait]
impl Evaluate for VarRef {
    fn kind(&self) -> Kind {
        self.kind.clone()
    }

    async fn eval(&self, ctx: &ExecutionContext) -> RuntimeResult<Value> {
        match ctx.value(&self.name) {
            Some(value) => coerce(value, &self.kind),
            // optional variables read as null until set
            None if matches!(self.kind, Kind::Optional(_)) => Ok(Value::Null),
            None => Err(Error::not_found(format!(
                "variable {} is not set",
                self.name
            ))),
        }
    }
}

/// A list literal with at least one computed element.
struct StringListExpr {
    items: Vec<Expression>,
}

#[async_trait]
impl MarshalCode for StringListExpr {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> RuntimeResult<String> {
        let mut items = Vec::with_capacity(self.items.len());
        for item in &self.items {
            items.push(item.marshal_code(ctx).await?);
        }
        Ok(format!("[{}]", items.join(", ")))
    }
}

#[async_trait]
impl Evaluate for StringListExpr {
    fn kind(&self) -> Kind {
        Kind::StringList
    }

    async fn eval(&self, ctx: &ExecutionContext) -> RuntimeResult<Value> {
        let parts = try_join_all(self.items.iter().map(|item| item.eval_string_list(ctx))).await?;
        Ok(Value::StringList(parts.into_iter().flatten().collect()))
    }
}

/// Builds one syntax tree in `scope`.
pub fn build(scope: &ScopeRef, node: &Node) -> RuntimeResult<Expression> {
    match node {
        Node::String(s) => Ok(Expression::string(s.clone())),
        Node::Int(i) => Ok(Expression::int(*i)),
        Node::Bool(b) => Ok(Expression::bool(*b)),
        Node::Null => Ok(Expression::null()),
        Node::List(items) => build_list(scope, items),
        Node::Ident(name) => build_ident(scope, name),
        Node::Call {
            package,
            name,
            args,
        } => {
            let qualified = match package {
                Some(package) => format!("{}.{}", package, name),
                None => name.clone(),
            };
            match scope.get_definition(&qualified)? {
                Prototype::Function(function) => {
                    let args = args
                        .iter()
                        .map(|arg| build(scope, arg))
                        .collect::<RuntimeResult<Vec<_>>>()?;
                    function
                        .call(scope, args)
                        .map_err(|e| e.wrap(format!("in call to {}", qualified)))
                }
                Prototype::SpecialForm(form) => form
                    .call(scope, args)
                    .map_err(|e| e.wrap(format!("in {}", qualified))),
                other => Err(Error::bad_parameter(format!(
                    "{} is a {}, not a function",
                    qualified,
                    other.describe()
                ))),
            }
        }
        Node::Struct { name, fields } => match scope.get_definition(name)? {
            Prototype::Struct(ty) => {
                let fields = fields
                    .iter()
                    .map(|(field, node)| Ok((field.clone(), build(scope, node)?)))
                    .collect::<RuntimeResult<Vec<_>>>()?;
                ty.construct(fields)
            }
            other => Err(Error::bad_parameter(format!(
                "{} is a {}, not a struct type",
                name,
                other.describe()
            ))),
        },
    }
}

fn build_list(scope: &ScopeRef, items: &[Node]) -> RuntimeResult<Expression> {
    let items = items
        .iter()
        .map(|item| build(scope, item))
        .collect::<RuntimeResult<Vec<_>>>()?;
    for item in &items {
        if !Kind::StringList.accepts(&item.kind()) {
            return Err(Error::bad_parameter(format!(
                "list items must be strings, got {}",
                item.kind()
            )));
        }
    }
    let constants = items
        .iter()
        .map(|item| match item {
            Expression::Constant(Value::String(s)) => Some(s.clone()),
            _ => None,
        })
        .collect::<Option<Vec<_>>>();
    Ok(match constants {
        Some(strings) => Expression::Constant(Value::StringList(strings)),
        None => Expression::computed(StringListExpr { items }),
    })
}

fn build_ident(scope: &ScopeRef, name: &str) -> RuntimeResult<Expression> {
    match scope.get_definition(name)? {
        Prototype::Value(kind) => Ok(Expression::computed(VarRef::new(name, kind))),
        other => Err(Error::bad_parameter(format!(
            "{} is a {}, call it instead",
            name,
            other.describe()
        ))),
    }
}

/// Builds every top-level form of `source` in the group's scope. Forms that
/// build to actions run once, in order, as the setup phase.
#[instrument(level = "debug", skip(group, source))]
pub async fn run_script(group: &Arc<Group>, source: &str) -> RuntimeResult<()> {
    let scope = group.scope();
    let nodes = parser::parse_script(source)?;
    info!(forms = nodes.len(), "running script");
    for node in &nodes {
        let expr = build(&scope, node)?;
        if expr.kind() == Kind::Action {
            let action = expr.into_action()?;
            run_in_scope(&action, group.globals()).await?;
        } else {
            debug!(kind = %expr.kind(), "ignoring top-level value");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::RunnerConfig, runner::Runner, scope::LexicalScope};

    #[tokio::test]
    async fn test_list_collapses_constants() {
        let scope: ScopeRef = LexicalScope::root(false);
        let ctx = ExecutionContext::background();
        let expr = build(&scope, &parser::parse(r#"["a", "b"]"#).unwrap()).unwrap();
        assert!(expr.is_constant());
        assert_eq!(expr.eval_string_list(&ctx).await.unwrap(), vec!["a", "b"]);

        let err = build(&scope, &parser::parse("[1]").unwrap()).unwrap_err();
        assert!(err.is_bad_parameter());
    }

    #[tokio::test]
    async fn test_variable_reference() {
        let scope: ScopeRef = LexicalScope::root(false);
        scope
            .add_definition("names", Prototype::Value(Kind::StringList))
            .unwrap();
        let ctx = ExecutionContext::background();
        ctx.set_value("names", Value::StringList(vec!["x".into()]));

        let expr = build(&scope, &parser::parse(r#"["a", names]"#).unwrap()).unwrap();
        assert!(!expr.is_constant());
        assert_eq!(
            expr.eval_string_list(&ctx).await.unwrap(),
            vec!["a", "x"]
        );
        assert_eq!(expr.marshal_code(&ctx).await.unwrap(), r#"["a", names]"#);
    }

    #[test]
    fn test_undefined_names() {
        let scope: ScopeRef = LexicalScope::root(false);
        assert!(build(&scope, &Node::ident("nope")).unwrap_err().is_not_found());
        assert!(build(&scope, &Node::call("Nope", vec![]))
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_setup_defines_globals() {
        let runner = Runner::new(RunnerConfig::default());
        let group = Group::new(&runner).unwrap();
        run_script(&group, r#"Define(greeting, Sprintf("hi %s", "there"))"#)
            .await
            .unwrap();
        assert_eq!(
            group.globals().value("greeting"),
            Some(Value::from("hi there"))
        );
    }
}
