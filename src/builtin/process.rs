use std::sync::Arc;

use tracing::debug;

use super::{action_arg, int_arg, source_arg, string_arg, Natives};
use crate::{
    context::ExecutionContext,
    convert::{FieldKind, Signature},
    event::Event,
    expression::{SourceRef, Value},
    group::Group,
    process::ProcessSpec,
    retry::Backoff,
    source::{Duplicate, EventSource, FanIn, Oneshot, Ticker, Watch},
    Error, RuntimeResult,
};

pub(super) fn register(natives: &mut Natives) -> RuntimeResult<()> {
    let source = || vec![FieldKind::Source, FieldKind::Error];

    natives.function(
        "Oneshot",
        Signature::new(vec![], vec![FieldKind::Source]),
        |_ctx, _args| async { Ok(source_value(Oneshot::new())) },
    )?;
    natives.function(
        "Ticker",
        Signature::new(vec![FieldKind::String], source()),
        |_ctx, args| async move {
            let period = string_arg(&args, 0)?;
            Ok(source_value(Ticker::new(&period)?))
        },
    )?;
    natives.function(
        "Watch",
        Signature::new(vec![FieldKind::String], source()).variadic(),
        |ctx, args| async move {
            let patterns = (0..args.len())
                .map(|i| string_arg(&args, i))
                .collect::<RuntimeResult<Vec<_>>>()?;
            let mut watch = Watch::new(patterns)?;
            if let Some(group) = ctx.group() {
                let runner = group.runner()?;
                watch = watch.with_backoff(Backoff::from(&runner.config().backoff));
            }
            Ok(source_value(watch))
        },
    )?;
    natives.function(
        "FanIn",
        Signature::new(vec![FieldKind::Source], vec![FieldKind::Source]).variadic(),
        |_ctx, args| async move {
            let children = (0..args.len())
                .map(|i| source_arg(&args, i))
                .collect::<RuntimeResult<Vec<_>>>()?;
            Ok(source_value(FanIn::new(children)))
        },
    )?;
    natives.function(
        "Duplicate",
        Signature::new(vec![FieldKind::Source, FieldKind::Int], source()),
        |_ctx, args| async move {
            let upstream = source_arg(&args, 0)?;
            let count = int_arg(&args, 1)?;
            Ok(source_value(Duplicate::new(upstream, count)?))
        },
    )?;
    natives.function(
        "Process",
        Signature::new(
            vec![FieldKind::String, FieldKind::Source, FieldKind::Action],
            vec![FieldKind::Error],
        ),
        |ctx, args| async move {
            let spec = ProcessSpec {
                name: string_arg(&args, 0)?,
                source: source_arg(&args, 1)?,
                action: action_arg(&args, 2)?,
            };
            require_group(&ctx)?.process(spec)?;
            Ok(Value::Null)
        },
    )?;
    natives.function(
        "Exit",
        Signature::new(vec![FieldKind::Int], vec![FieldKind::Error]).variadic(),
        |ctx, args| async move {
            let code = match args.len() {
                0 => 0,
                1 => int_arg(&args, 0)?,
                n => {
                    return Err(Error::bad_parameter(format!(
                        "Exit expects at most 1 argument, got {}",
                        n
                    )))
                }
            };
            let code = i32::try_from(code)
                .map_err(|_| Error::bad_parameter(format!("exit code {} is out of range", code)))?;
            debug!(code, "exit requested by script");
            require_group(&ctx)?.broadcast(Event::exit(code))?;
            Ok(Value::Null)
        },
    )?;
    Ok(())
}

fn source_value<S: EventSource + 'static>(source: S) -> Value {
    Value::Source(SourceRef(Arc::new(source)))
}

fn require_group(ctx: &ExecutionContext) -> RuntimeResult<Arc<Group>> {
    ctx.group()
        .ok_or_else(|| Error::bad_parameter("processes can only be managed inside a group"))
}
