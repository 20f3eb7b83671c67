use super::{Kind, Value};
use crate::{Error, RuntimeResult};

/// Converts a value into the shape `target` expects.
///
/// The rules are closed:
/// - `Any` accepts everything unchanged
/// - a value already of the target kind is returned as is
/// - a string becomes a one-element string list
/// - `null` is accepted by optional kinds; non-null values are coerced to
///   the optional's inner kind
/// - structs only convert to a struct kind of the same name
///
/// Anything else is a `BadParameter` error.
pub fn coerce(value: Value, target: &Kind) -> RuntimeResult<Value> {
    match (value, target) {
        (value, Kind::Any) => Ok(value),
        (Value::Null, Kind::Optional(_)) => Ok(Value::Null),
        (value, Kind::Optional(inner)) => coerce(value, inner),
        (Value::String(s), Kind::StringList) => Ok(Value::StringList(vec![s])),
        (value @ Value::String(_), Kind::String)
        | (value @ Value::Int(_), Kind::Int)
        | (value @ Value::Bool(_), Kind::Bool)
        | (value @ Value::StringList(_), Kind::StringList)
        | (value @ Value::Action(_), Kind::Action)
        | (value @ Value::Source(_), Kind::Source) => Ok(value),
        (Value::Struct(s), Kind::Struct(name)) if &s.type_name == name => Ok(Value::Struct(s)),
        (value, target) => Err(Error::bad_parameter(format!(
            "cannot convert {} to {}",
            value.kind(),
            target
        ))),
    }
}
