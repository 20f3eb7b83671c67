use super::{bool_arg, list_arg, string_arg, Natives};
use crate::{
    convert::{FieldKind, Signature},
    expression::Value,
    Error, RuntimeResult,
};

pub(super) fn register(natives: &mut Natives) -> RuntimeResult<()> {
    let string = || vec![FieldKind::String];
    let boolean = || vec![FieldKind::Bool];

    natives.function(
        "Sprintf",
        Signature::new(vec![FieldKind::String, FieldKind::Any], string()).variadic(),
        |_ctx, args| async move {
            let (format, rest) = split_format(&args)?;
            Ok(Value::String(sprintf(&format, rest)?))
        },
    )?;
    natives.function(
        "Strings",
        Signature::new(vec![FieldKind::String], vec![FieldKind::list(FieldKind::String)])
            .variadic(),
        |_ctx, args| async move {
            let items = (0..args.len())
                .map(|i| string_arg(&args, i))
                .collect::<RuntimeResult<Vec<_>>>()?;
            Ok(Value::StringList(items))
        },
    )?;
    natives.function(
        "Contains",
        Signature::new(
            vec![FieldKind::list(FieldKind::String), FieldKind::String],
            boolean(),
        ),
        |_ctx, args| async move {
            let list = list_arg(&args, 0)?;
            let item = string_arg(&args, 1)?;
            Ok(Value::Bool(list.contains(&item)))
        },
    )?;
    natives.function(
        "Eq",
        Signature::new(vec![FieldKind::Any, FieldKind::Any], boolean()),
        |_ctx, args| async move { Ok(Value::Bool(args.first() == args.get(1))) },
    )?;
    natives.function(
        "Not",
        Signature::new(boolean(), boolean()),
        |_ctx, args| async move { Ok(Value::Bool(!bool_arg(&args, 0)?)) },
    )?;
    natives.function(
        "And",
        Signature::new(boolean(), boolean()).variadic(),
        |_ctx, args| async move {
            for i in 0..args.len() {
                if !bool_arg(&args, i)? {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        },
    )?;
    natives.function(
        "Or",
        Signature::new(boolean(), boolean()).variadic(),
        |_ctx, args| async move {
            for i in 0..args.len() {
                if bool_arg(&args, i)? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        },
    )?;
    natives.function(
        "ID",
        Signature::new(vec![], string()),
        |ctx, _args| async move { Ok(Value::String(ctx.id().to_string())) },
    )?;
    natives.function(
        "Env",
        Signature::new(string(), string()),
        |_ctx, args| async move {
            let name = string_arg(&args, 0)?;
            Ok(Value::String(std::env::var(name).unwrap_or_default()))
        },
    )?;
    natives.function(
        "ExpectEnv",
        Signature::new(string(), vec![FieldKind::String, FieldKind::Error]),
        |_ctx, args| async move {
            let name = string_arg(&args, 0)?;
            match std::env::var(&name) {
                Ok(value) => Ok(Value::String(value)),
                Err(_) => Err(Error::not_found(format!(
                    "environment variable {} is not set",
                    name
                ))),
            }
        },
    )?;
    natives.function(
        "LastError",
        Signature::new(vec![], string()),
        |ctx, _args| async move {
            Ok(Value::String(
                ctx.error().map(|e| e.to_string()).unwrap_or_default(),
            ))
        },
    )?;
    Ok(())
}

pub(super) fn split_format(args: &[Value]) -> RuntimeResult<(String, &[Value])> {
    let format = string_arg(args, 0)?;
    Ok((format, &args[1..]))
}

/// Formats `args` into `format`. Supports `%v` (any value), `%s` (strings),
/// `%d` (integers) and `%%`.
pub(crate) fn sprintf(format: &str, args: &[Value]) -> RuntimeResult<String> {
    let mut out = String::with_capacity(format.len());
    let mut args = args.iter();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let verb = chars
            .next()
            .ok_or_else(|| Error::bad_parameter("format ends with a lone %"))?;
        if verb == '%' {
            out.push('%');
            continue;
        }
        let arg = args
            .next()
            .ok_or_else(|| Error::bad_parameter(format!("missing argument for %{}", verb)))?;
        match (verb, arg) {
            ('v', arg) => out.push_str(&arg.to_text()),
            ('s', Value::String(s)) => out.push_str(s),
            ('d', Value::Int(i)) => out.push_str(&i.to_string()),
            ('s' | 'd', arg) => {
                return Err(Error::bad_parameter(format!(
                    "%{} does not accept {}",
                    verb,
                    arg.kind()
                )))
            }
            (verb, _) => {
                return Err(Error::bad_parameter(format!(
                    "unsupported format verb %{}",
                    verb
                )))
            }
        }
    }
    let extra = args.count();
    if extra > 0 {
        return Err(Error::bad_parameter(format!(
            "{} arguments left over after formatting",
            extra
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::super::testing::{build, scope};
    use super::*;
    use crate::context::ExecutionContext;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sprintf() {
        let args = [Value::from("x"), Value::Int(3), Value::Bool(true)];
        assert_eq!(
            sprintf("%s=%d (%v) 100%%", &args).unwrap(),
            "x=3 (true) 100%"
        );
        assert!(sprintf("%d", &[Value::from("x")]).unwrap_err().is_bad_parameter());
        assert!(sprintf("%s %s", &[Value::from("x")]).unwrap_err().is_bad_parameter());
        assert!(sprintf("%s", &args).unwrap_err().is_bad_parameter());
        assert!(sprintf("%q", &args).unwrap_err().is_bad_parameter());
    }

    #[tokio::test]
    async fn test_value_builtins() {
        let scope = scope();
        let ctx = ExecutionContext::background();
        let eval = |source: &str| {
            let expr = build(&scope, source).unwrap();
            let ctx = ctx.clone();
            async move { expr.eval(&ctx).await.unwrap() }
        };

        assert_eq!(
            eval(r#"Strings("a", ["b", "c"])"#).await,
            Value::StringList(vec!["a".into(), "b".into(), "c".into()])
        );
        assert_eq!(eval(r#"Contains(["a", "b"], "b")"#).await, Value::Bool(true));
        assert_eq!(eval(r#"Contains("a", "b")"#).await, Value::Bool(false));
        assert_eq!(eval(r#"Eq(1, 1)"#).await, Value::Bool(true));
        assert_eq!(eval(r#"Eq(1, "1")"#).await, Value::Bool(false));
        assert_eq!(eval("And(true, Not(false))").await, Value::Bool(true));
        assert_eq!(eval("Or(false, false)").await, Value::Bool(false));
        assert_eq!(eval("And()").await, Value::Bool(true));
        assert_eq!(eval("ID()").await, Value::String(ctx.id().to_string()));
        assert_eq!(
            eval(r#"Env("FORCE_TEST_UNSET_VARIABLE")"#).await,
            Value::from("")
        );
        assert_eq!(eval("LastError()").await, Value::from(""));
    }

    #[tokio::test]
    async fn test_last_error() {
        let scope = scope();
        let ctx = ExecutionContext::background();
        ctx.set_error(Error::not_found("image app:v1"));
        let expr = build(&scope, "LastError()").unwrap();
        assert_eq!(
            expr.eval_string(&ctx).await.unwrap(),
            "not found: image app:v1"
        );

        let expr = build(&scope, r#"ExpectEnv("FORCE_TEST_UNSET_VARIABLE")"#).unwrap();
        assert!(expr.eval(&ctx).await.unwrap_err().is_not_found());
    }

    #[test]
    fn test_argument_kinds_checked_at_build() {
        let scope = scope();
        assert!(build(&scope, "Not(1)").unwrap_err().root_cause().is_bad_parameter());
        assert!(build(&scope, "Sprintf()").unwrap_err().root_cause().is_bad_parameter());
    }
}
