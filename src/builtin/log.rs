use super::{sprintf, values::split_format, Natives};
use crate::{
    convert::{FieldKind, Signature},
    expression::Value,
    RuntimeResult,
};

pub(super) fn register(natives: &mut Natives) -> RuntimeResult<()> {
    let signature = || {
        Signature::new(vec![FieldKind::String, FieldKind::Any], vec![FieldKind::Error]).variadic()
    };

    natives.function("Infof", signature(), |ctx, args| async move {
        let (format, rest) = split_format(&args)?;
        ctx.logger().info(&sprintf(&format, rest)?);
        Ok(Value::Null)
    })?;
    natives.function("Errorf", signature(), |ctx, args| async move {
        let (format, rest) = split_format(&args)?;
        ctx.logger().error(&sprintf(&format, rest)?);
        Ok(Value::Null)
    })?;
    natives.function(
        "LogURL",
        Signature::new(vec![], vec![FieldKind::String]),
        |ctx, _args| async move { Ok(Value::String(ctx.logger().url(&ctx))) },
    )?;
    Ok(())
}
