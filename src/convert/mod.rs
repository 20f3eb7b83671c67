//! # Schema conversion
//!
//! Plugins describe their configuration structs and functions with small
//! declarative [`Schema`]s and [`Signature`]s. The [`Converter`] turns those
//! descriptions into types and functions the interpreter understands, so a
//! plain data struct becomes usable from scripts without hand-written
//! bindings.
//!
//! ```ignore
//! let registry = SchemaRegistry::new();
//! registry.register(
//!     Schema::new("Image")
//!         .field("Name", FieldKind::String)
//!         .field("Tags", FieldKind::list(FieldKind::String))
//!         .field("Base", FieldKind::optional(FieldKind::Struct("Image".into()))),
//! )?;
//! let image = Converter::new(&registry).convert_struct("Image")?;
//! ```

mod function;

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

pub use function::{NativeFunction, Signature};

use crate::{
    context::ExecutionContext,
    expression::{coerce, Evaluate, Expression, Kind, StructValue, Value},
    marshal::MarshalCode,
    scope::{Prototype, Scope},
    Error, RuntimeResult,
};

/// Declared kind of a struct field or function parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    Int,
    String,
    /// Pointer-like wrapper; the value may be absent.
    Optional(Box<FieldKind>),
    List(Box<FieldKind>),
    Struct(String),
    Action,
    Source,
    Any,
    /// Only valid as the trailing return of a signature.
    Error,
    Channel,
    /// A named interface. Only `error`, `Expression` and `any` convert.
    Interface(String),
}

impl FieldKind {
    pub fn optional(inner: FieldKind) -> Self {
        FieldKind::Optional(Box::new(inner))
    }

    pub fn list(inner: FieldKind) -> Self {
        FieldKind::List(Box::new(inner))
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Bool => write!(f, "bool"),
            FieldKind::Int => write!(f, "int"),
            FieldKind::String => write!(f, "string"),
            FieldKind::Optional(inner) => write!(f, "*{}", inner),
            FieldKind::List(inner) => write!(f, "[]{}", inner),
            FieldKind::Struct(name) => write!(f, "{}", name),
            FieldKind::Action => write!(f, "action"),
            FieldKind::Source => write!(f, "source"),
            FieldKind::Any => write!(f, "any"),
            FieldKind::Error => write!(f, "error"),
            FieldKind::Channel => write!(f, "chan"),
            FieldKind::Interface(name) => write!(f, "interface {}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    pub name: String,
    pub kind: FieldKind,
    pub exported: bool,
    pub skip: bool,
}

/// Declarative description of a plugin struct.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
}

impl Schema {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    fn push(mut self, name: &str, kind: FieldKind, exported: bool, skip: bool) -> Self {
        self.fields.push(FieldSchema {
            name: name.to_string(),
            kind,
            exported,
            skip,
        });
        self
    }

    pub fn field(self, name: &str, kind: FieldKind) -> Self {
        self.push(name, kind, true, false)
    }

    /// Internal state; never visible to scripts.
    pub fn private_field(self, name: &str, kind: FieldKind) -> Self {
        self.push(name, kind, false, false)
    }

    /// Exported, but opted out of conversion.
    pub fn skipped_field(self, name: &str, kind: FieldKind) -> Self {
        self.push(name, kind, true, true)
    }
}

/// Every schema a group knows about, by name.
#[derive(Default)]
pub struct SchemaRegistry {
    schemas: DashMap<String, Arc<Schema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, schema: Schema) -> RuntimeResult<()> {
        match self.schemas.entry(schema.name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::already_exists(format!(
                "schema {} is already registered",
                schema.name
            ))),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Arc::new(schema));
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> RuntimeResult<Arc<Schema>> {
        self.schemas
            .get(name)
            .map(|s| s.value().clone())
            .ok_or_else(|| Error::not_found(format!("schema {} is not registered", name)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructField {
    pub name: String,
    pub kind: Kind,
}

/// Interpreter-visible struct type built from a schema. `origin` names the
/// schema it came from, so values can be decoded back into the plugin's own
/// type.
#[derive(Debug, Clone, PartialEq)]
pub struct StructType {
    pub name: String,
    pub fields: Vec<StructField>,
    pub origin: String,
}

impl StructType {
    pub fn field(&self, name: &str) -> Option<&StructField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Builds a struct literal. Unknown fields and fields of the wrong kind
    /// are rejected; fields not given are zero-filled on evaluation.
    pub fn construct(
        self: &Arc<Self>,
        fields: Vec<(String, Expression)>,
    ) -> RuntimeResult<Expression> {
        let mut seen = HashSet::new();
        for (name, expr) in &fields {
            let field = self.field(name).ok_or_else(|| {
                Error::bad_parameter(format!("{} has no field {}", self.name, name))
            })?;
            if !field.kind.accepts(&expr.kind()) {
                return Err(Error::bad_parameter(format!(
                    "field {}.{} expects {}, got {}",
                    self.name,
                    name,
                    field.kind,
                    expr.kind()
                )));
            }
            if !seen.insert(name.as_str()) {
                return Err(Error::bad_parameter(format!(
                    "field {}.{} is set twice",
                    self.name, name
                )));
            }
        }
        Ok(Expression::computed(StructLiteral {
            ty: self.clone(),
            fields,
        }))
    }
}

struct StructLiteral {
    ty: Arc<StructType>,
    fields: Vec<(String, Expression)>,
}

#[async_trait]
impl MarshalCode for StructLiteral {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> RuntimeResult<String> {
        let mut fields = Vec::with_capacity(self.fields.len());
        for (name, expr) in &self.fields {
            fields.push(format!("{}: {}", name, expr.marshal_code(ctx).await?));
        }
        Ok(format!("{}{{{}}}", self.ty.name, fields.join(", ")))
    }
}

#[async_trait]
impl Evaluate for StructLiteral {
    fn kind(&self) -> Kind {
        Kind::Struct(self.ty.name.clone())
    }

    async fn eval(&self, ctx: &ExecutionContext) -> RuntimeResult<Value> {
        let mut value = StructValue::new(self.ty.origin.clone());
        for field in &self.ty.fields {
            let given = self.fields.iter().find(|(name, _)| name == &field.name);
            let field_value = match given {
                Some((_, expr)) => coerce(expr.eval(ctx).await?, &field.kind)?,
                None => Value::zero(&field.kind),
            };
            value.fields.insert(field.name.clone(), field_value);
        }
        Ok(Value::Struct(value))
    }
}

/// Turns schemas into struct types. Converted types are cached; the chain of
/// types on the current path is tracked so self-referential fields end up as
/// `Kind::Any` instead of recursing forever.
pub struct Converter<'a> {
    registry: &'a SchemaRegistry,
    cache: HashMap<String, Arc<StructType>>,
    path: Vec<String>,
}

impl<'a> Converter<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Self {
            registry,
            cache: HashMap::new(),
            path: Vec::new(),
        }
    }

    pub fn convert_struct(&mut self, name: &str) -> RuntimeResult<Arc<StructType>> {
        if let Some(ty) = self.cache.get(name) {
            return Ok(ty.clone());
        }
        let schema = self.registry.get(name)?;
        self.path.push(schema.name.clone());
        let fields = self.convert_fields(&schema);
        self.path.pop();

        let ty = Arc::new(StructType {
            name: schema.name.clone(),
            fields: fields?,
            origin: schema.name.clone(),
        });
        self.cache.insert(name.to_string(), ty.clone());
        debug!(name, fields = ty.fields.len(), "struct converted");
        Ok(ty)
    }

    fn convert_fields(&mut self, schema: &Schema) -> RuntimeResult<Vec<StructField>> {
        let mut fields = Vec::new();
        for field in schema.fields.iter().filter(|f| f.exported && !f.skip) {
            let kind = self.convert_kind(&field.kind).map_err(|e| {
                e.wrap(format!("converting field {}.{}", schema.name, field.name))
            })?;
            fields.push(StructField {
                name: field.name.clone(),
                kind,
            });
        }
        Ok(fields)
    }

    /// Maps a declared kind onto the expression vocabulary.
    pub fn convert_kind(&mut self, kind: &FieldKind) -> RuntimeResult<Kind> {
        Ok(match kind {
            FieldKind::Bool => Kind::Bool,
            FieldKind::Int => Kind::Int,
            FieldKind::String => Kind::String,
            FieldKind::Action => Kind::Action,
            FieldKind::Source => Kind::Source,
            FieldKind::Any => Kind::Any,
            FieldKind::Error => Kind::Error,
            FieldKind::Optional(inner) => match self.convert_kind(inner)? {
                Kind::Any => Kind::Any,
                inner => Kind::optional(inner),
            },
            FieldKind::List(inner) => match inner.as_ref() {
                FieldKind::String => Kind::StringList,
                other => {
                    return Err(Error::not_implemented(format!(
                        "lists of {} are not supported",
                        other
                    )))
                }
            },
            FieldKind::Struct(name) => {
                if self.path.iter().any(|visited| visited == name) {
                    debug!(name, "self-referential field, using any");
                    Kind::Any
                } else {
                    Kind::Struct(self.convert_struct(name)?.name.clone())
                }
            }
            FieldKind::Interface(name) if matches!(name.as_str(), "error" | "Expression" | "any") => {
                Kind::Any
            }
            FieldKind::Channel | FieldKind::Interface(_) => {
                return Err(Error::not_implemented(format!("{} is not supported", kind)))
            }
        })
    }
}

/// Converts `name` and every struct it references, and defines them in
/// `scope`.
pub fn define_struct(
    scope: &dyn Scope,
    registry: &SchemaRegistry,
    name: &str,
) -> RuntimeResult<Arc<StructType>> {
    let mut converter = Converter::new(registry);
    let ty = converter.convert_struct(name)?;
    for (type_name, converted) in converter.cache {
        if scope.lookup_local(&type_name).is_none() {
            scope.add_definition(&type_name, Prototype::Struct(converted))?;
        }
    }
    Ok(ty)
}
