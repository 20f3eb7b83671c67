use std::sync::Arc;

use async_trait::async_trait;

use super::{Converter, FieldKind};
use crate::{
    action::Action,
    context::ExecutionContext,
    expression::{coerce, ActionRef, EvalFn, Evaluate, Expression, FnCall, Kind, Value},
    marshal::MarshalCode,
    scope::{Function, ScopeRef},
    Error, RuntimeResult,
};

/// Declared shape of a plugin function. With `variadic` set, the last
/// parameter describes each of any number of trailing arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub params: Vec<FieldKind>,
    pub variadic: bool,
    pub returns: Vec<FieldKind>,
}

impl Signature {
    pub fn new(params: Vec<FieldKind>, returns: Vec<FieldKind>) -> Self {
        Self {
            params,
            variadic: false,
            returns,
        }
    }

    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }
}

/// A converted plugin function. Calling it checks the arguments and returns
/// a proxy: the arguments are evaluated and the body invoked only when a run
/// evaluates the proxy. Functions returning an action, or only an error,
/// produce action proxies whose run is the body.
pub struct NativeFunction {
    name: String,
    package: Option<String>,
    params: Vec<Kind>,
    variadic: bool,
    returns: Kind,
    body: EvalFn,
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("package", &self.package)
            .field("params", &self.params)
            .field("variadic", &self.variadic)
            .field("returns", &self.returns)
            .finish()
    }
}

impl<'a> Converter<'a> {
    pub fn convert_function(
        &mut self,
        name: &str,
        signature: &Signature,
        body: EvalFn,
    ) -> RuntimeResult<NativeFunction> {
        if signature.variadic && signature.params.is_empty() {
            return Err(Error::bad_parameter(format!(
                "variadic function {} needs at least one parameter",
                name
            )));
        }
        let params = signature
            .params
            .iter()
            .map(|p| self.convert_kind(p))
            .collect::<RuntimeResult<Vec<_>>>()?;

        let returns = match signature.returns.as_slice() {
            [FieldKind::Error] => Kind::Action,
            [single] | [single, FieldKind::Error] => self.convert_kind(single)?,
            other => {
                return Err(Error::bad_parameter(format!(
                    "function {} must return one value, optionally followed by an error, got {} values",
                    name,
                    other.len()
                )))
            }
        };
        if returns == Kind::Error || params.contains(&Kind::Error) {
            return Err(Error::bad_parameter(format!(
                "function {} uses error outside of the trailing return",
                name
            )));
        }

        Ok(NativeFunction {
            name: name.to_string(),
            package: None,
            params,
            variadic: signature.variadic,
            returns,
            body,
        })
    }
}

impl NativeFunction {
    pub fn with_package<S: Into<String>>(mut self, package: S) -> Self {
        self.package = Some(package.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn returns(&self) -> &Kind {
        &self.returns
    }

    fn fixed_params(&self) -> usize {
        if self.variadic {
            self.params.len() - 1
        } else {
            self.params.len()
        }
    }

    fn check_args(&self, args: &[Expression]) -> RuntimeResult<()> {
        let fixed = self.fixed_params();
        if self.variadic && args.len() < fixed {
            return Err(Error::bad_parameter(format!(
                "{} expects at least {} arguments, got {}",
                self.name,
                fixed,
                args.len()
            )));
        }
        if !self.variadic && args.len() != fixed {
            return Err(Error::bad_parameter(format!(
                "{} expects {} arguments, got {}",
                self.name,
                fixed,
                args.len()
            )));
        }
        for (i, arg) in args.iter().enumerate() {
            let expected = &self.params[i.min(self.params.len() - 1)];
            let spread = i >= fixed && *expected == Kind::String && arg.kind() == Kind::StringList;
            if !spread && !expected.accepts(&arg.kind()) {
                return Err(Error::bad_parameter(format!(
                    "argument {} of {} expects {}, got {}",
                    i + 1,
                    self.name,
                    expected,
                    arg.kind()
                )));
            }
        }
        Ok(())
    }
}

impl Function for NativeFunction {
    fn call(&self, _scope: &ScopeRef, args: Vec<Expression>) -> RuntimeResult<Expression> {
        self.check_args(&args)?;
        let proxy = Arc::new(NativeCall {
            call: FnCall {
                package: self.package.clone(),
                name: self.name.clone(),
                args,
            },
            params: self.params.clone(),
            fixed: self.fixed_params(),
            returns: self.returns.clone(),
            body: self.body.clone(),
        });
        Ok(if self.returns == Kind::Action {
            Expression::Action(proxy)
        } else {
            Expression::Computed(proxy)
        })
    }
}

struct NativeCall {
    call: FnCall,
    params: Vec<Kind>,
    fixed: usize,
    returns: Kind,
    body: EvalFn,
}

impl NativeCall {
    /// Evaluates the arguments and coerces them to the parameter kinds.
    /// Trailing string lists are spread into a string variadic.
    async fn values(&self, ctx: &ExecutionContext) -> RuntimeResult<Vec<Value>> {
        let mut values = Vec::with_capacity(self.call.args.len());
        for (i, arg) in self.call.args.iter().enumerate() {
            let value = arg.eval(ctx).await?;
            if i < self.fixed {
                values.push(coerce(value, &self.params[i])?);
                continue;
            }
            let element = &self.params[self.params.len() - 1];
            match value {
                Value::StringList(items) if *element == Kind::String => {
                    values.extend(items.into_iter().map(Value::String))
                }
                value => values.push(coerce(value, element)?),
            }
        }
        Ok(values)
    }

    async fn invoke(&self, ctx: &ExecutionContext) -> RuntimeResult<Value> {
        let values = self.values(ctx).await?;
        (self.body)(ctx.clone(), values).await
    }
}

#[async_trait]
impl MarshalCode for NativeCall {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> RuntimeResult<String> {
        self.call.marshal_code(ctx).await
    }
}

#[async_trait]
impl Evaluate for NativeCall {
    fn kind(&self) -> Kind {
        self.returns.clone()
    }

    async fn eval(&self, ctx: &ExecutionContext) -> RuntimeResult<Value> {
        coerce(self.invoke(ctx).await?, &self.returns)
    }
}

#[async_trait]
impl Action for NativeCall {
    async fn run(&self, ctx: &ExecutionContext) -> RuntimeResult<()> {
        // functions declared to return an action hand back the action to run
        match self.invoke(ctx).await? {
            Value::Action(ActionRef(action)) => action.run(ctx).await,
            _ => Ok(()),
        }
    }
}
