use std::{collections::BTreeMap, fmt, sync::Arc};

use serde::de::DeserializeOwned;

use crate::{action::Action, source::EventSource, Error, RuntimeResult};

/// Static type of an expression, known at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Kind {
    String,
    Int,
    Bool,
    StringList,
    Action,
    Source,
    /// A converted struct type, by name.
    Struct(String),
    /// A value that may be absent (`null`).
    Optional(Box<Kind>),
    /// Only valid as the trailing return of a function signature.
    Error,
    /// Unknown until evaluation; accepted wherever a kind is expected.
    Any,
}

impl Kind {
    pub fn optional(inner: Kind) -> Self {
        Kind::Optional(Box::new(inner))
    }

    /// Whether an expression of kind `other` may be passed where `self` is
    /// expected. `Any` on either side defers the check to evaluation.
    pub fn accepts(&self, other: &Kind) -> bool {
        match (self, other) {
            (Kind::Any, _) | (_, Kind::Any) => true,
            (Kind::Optional(inner), Kind::Optional(other_inner)) => inner.accepts(other_inner),
            (Kind::Optional(inner), other) => inner.accepts(other),
            (Kind::StringList, Kind::String) => true,
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::String => write!(f, "string"),
            Kind::Int => write!(f, "int"),
            Kind::Bool => write!(f, "bool"),
            Kind::StringList => write!(f, "[]string"),
            Kind::Action => write!(f, "action"),
            Kind::Source => write!(f, "source"),
            Kind::Struct(name) => write!(f, "{}", name),
            Kind::Optional(inner) => write!(f, "*{}", inner),
            Kind::Error => write!(f, "error"),
            Kind::Any => write!(f, "any"),
        }
    }
}

/// Result of evaluating an expression.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    String(String),
    Int(i64),
    Bool(bool),
    StringList(Vec<String>),
    Struct(StructValue),
    Action(ActionRef),
    Source(SourceRef),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Null => Kind::Any,
            Value::String(_) => Kind::String,
            Value::Int(_) => Kind::Int,
            Value::Bool(_) => Kind::Bool,
            Value::StringList(_) => Kind::StringList,
            Value::Struct(s) => Kind::Struct(s.type_name.clone()),
            Value::Action(_) => Kind::Action,
            Value::Source(_) => Kind::Source,
        }
    }

    /// Zero value used for struct fields that were not set explicitly.
    pub fn zero(kind: &Kind) -> Value {
        match kind {
            Kind::String => Value::String(String::new()),
            Kind::Int => Value::Int(0),
            Kind::Bool => Value::Bool(false),
            Kind::StringList => Value::StringList(Vec::new()),
            _ => Value::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Plain text rendering used by `Sprintf("%v")` and log output.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => "<nil>".to_string(),
            Value::String(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::StringList(items) => format!("[{}]", items.join(" ")),
            Value::Struct(s) => s.to_json().map(|j| j.to_string()).unwrap_or_default(),
            Value::Action(_) => "<action>".to_string(),
            Value::Source(_) => "<source>".to_string(),
        }
    }

    pub fn to_json(&self) -> RuntimeResult<serde_json::Value> {
        Ok(match self {
            Value::Null => serde_json::Value::Null,
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::StringList(items) => serde_json::Value::from(items.clone()),
            Value::Struct(s) => s.to_json()?,
            Value::Action(_) | Value::Source(_) => {
                return Err(Error::bad_parameter(format!(
                    "{} values have no data representation",
                    self.kind()
                )))
            }
        })
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Value::StringList(value)
    }
}

/// Instance of a converted struct type. `type_name` is the hidden link back
/// to the schema the type was converted from, so the value can be decoded
/// into the plugin's own Rust type.
#[derive(Clone, Debug, PartialEq)]
pub struct StructValue {
    pub type_name: String,
    pub fields: BTreeMap<String, Value>,
}

impl StructValue {
    pub fn new<S: Into<String>>(type_name: S) -> Self {
        Self {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn to_json(&self) -> RuntimeResult<serde_json::Value> {
        let mut map = serde_json::Map::new();
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.to_json()?);
        }
        Ok(serde_json::Value::Object(map))
    }

    /// Coerces the value back into its source form.
    pub fn decode<T: DeserializeOwned>(&self) -> RuntimeResult<T> {
        serde_json::from_value(self.to_json()?).map_err(|e| {
            Error::bad_parameter(format!("cannot decode {}: {}", self.type_name, e))
        })
    }
}

/// Shared handle to an action carried as a value.
#[derive(Clone)]
pub struct ActionRef(pub Arc<dyn Action>);

impl fmt::Debug for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActionRef({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

impl PartialEq for ActionRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::as_ptr(&self.0) as *const () == Arc::as_ptr(&other.0) as *const ()
    }
}

/// Shared handle to an event source carried as a value.
#[derive(Clone)]
pub struct SourceRef(pub Arc<dyn EventSource>);

impl fmt::Debug for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceRef({})", self.0.id())
    }
}

impl PartialEq for SourceRef {
    fn eq(&self, other: &Self) -> bool {
        self.0.id() == other.0.id()
    }
}
