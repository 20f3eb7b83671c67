//! # Quoting
//!
//! Renders live expression trees back into script text. The output is valid
//! input for [`crate::parser`], so a marshaled tree can be parsed and built
//! again into an equivalent one.

use std::sync::Arc;

use async_recursion::async_recursion;
use async_trait::async_trait;

use crate::{
    context::ExecutionContext,
    expression::{ActionRef, Evaluate, Expression, Kind, SourceRef, Value},
    RuntimeResult,
};

/// Capability to render oneself as script text.
#[async_trait]
pub trait MarshalCode: Send + Sync {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> RuntimeResult<String>;
}

/// Quotes a string literal, escaping what the parser unescapes.
pub fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[async_recursion]
async fn marshal_value(value: &Value, ctx: &ExecutionContext) -> RuntimeResult<String> {
    Ok(match value {
        Value::Null => "null".to_string(),
        Value::String(s) => quote_string(s),
        Value::Int(i) => i.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::StringList(items) => format!(
            "[{}]",
            items
                .iter()
                .map(|item| quote_string(item))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Value::Struct(s) => {
            let mut fields = Vec::with_capacity(s.fields.len());
            for (name, field) in &s.fields {
                fields.push(format!("{}: {}", name, marshal_value(field, ctx).await?));
            }
            format!("{}{{{}}}", s.type_name, fields.join(", "))
        }
        Value::Action(ActionRef(action)) => action.marshal_code(ctx).await?,
        Value::Source(SourceRef(source)) => source.marshal_code(ctx).await?,
    })
}

#[async_trait]
impl MarshalCode for Value {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> RuntimeResult<String> {
        marshal_value(self, ctx).await
    }
}

/// `Marshal(expr)`: evaluates to the source text of `expr`.
pub struct Marshal {
    inner: Arc<dyn MarshalCode>,
}

impl Marshal {
    pub fn new(inner: Arc<dyn MarshalCode>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl MarshalCode for Marshal {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> RuntimeResult<String> {
        Ok(format!("Marshal({})", self.inner.marshal_code(ctx).await?))
    }
}

#[async_trait]
impl Evaluate for Marshal {
    fn kind(&self) -> Kind {
        Kind::String
    }

    async fn eval(&self, ctx: &ExecutionContext) -> RuntimeResult<Value> {
        Ok(Value::String(self.inner.marshal_code(ctx).await?))
    }
}

/// `Unquote(expr)`: behaves like `expr` when evaluated, but marshals as the
/// literal it evaluates to instead of the expression that computes it.
pub struct Unquote {
    inner: Expression,
}

impl Unquote {
    pub fn new(inner: Expression) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl MarshalCode for Unquote {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> RuntimeResult<String> {
        let value = self.inner.eval(ctx).await?;
        value.marshal_code(ctx).await
    }
}

#[async_trait]
impl Evaluate for Unquote {
    fn kind(&self) -> Kind {
        self.inner.kind()
    }

    async fn eval(&self, ctx: &ExecutionContext) -> RuntimeResult<Value> {
        self.inner.eval(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{Deferred, EvalFn, FnCall, StructValue};
    use futures::FutureExt;
    use pretty_assertions::assert_eq;

    fn concat(args: Vec<Expression>) -> Expression {
        let body: EvalFn = Arc::new(|_ctx, args| {
            async move { Ok(Value::String(args.iter().map(Value::to_text).collect())) }.boxed()
        });
        Expression::computed(Deferred::new(Kind::String, FnCall::new("Concat", args), body))
    }

    #[tokio::test]
    async fn test_marshal_fn_call() {
        let ctx = ExecutionContext::background();
        let call = FnCall::new("Foo", vec![Expression::int(1), Expression::string("a")]);
        let marshal = Expression::computed(Marshal::new(Arc::new(call)));
        assert_eq!(marshal.eval_string(&ctx).await.unwrap(), r#"Foo(1, "a")"#);
    }

    #[tokio::test]
    async fn test_unquote_snapshots_value() {
        let ctx = ExecutionContext::background();
        let computed = concat(vec![Expression::string("a"), Expression::string("b")]);
        let unquoted = Expression::computed(Unquote::new(computed.clone()));

        assert_eq!(computed.marshal_code(&ctx).await.unwrap(), r#"Concat("a", "b")"#);
        assert_eq!(unquoted.marshal_code(&ctx).await.unwrap(), r#""ab""#);
        assert_eq!(unquoted.eval_string(&ctx).await.unwrap(), "ab");

        let outer = FnCall::new("Echo", vec![unquoted]);
        assert_eq!(outer.marshal_code(&ctx).await.unwrap(), r#"Echo("ab")"#);
    }

    #[tokio::test]
    async fn test_literals() {
        let ctx = ExecutionContext::background();
        let mut image = StructValue::new("Image");
        image.fields.insert("Name".into(), Value::from("a\"b\n"));
        image
            .fields
            .insert("Tags".into(), Value::StringList(vec!["x".into(), "y".into()]));
        image.fields.insert("Base".into(), Value::Null);

        assert_eq!(
            Value::Struct(image).marshal_code(&ctx).await.unwrap(),
            r#"Image{Base: null, Name: "a\"b\n", Tags: ["x", "y"]}"#
        );
        assert_eq!(Value::Int(-4).marshal_code(&ctx).await.unwrap(), "-4");
    }
}
