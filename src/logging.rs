use std::{collections::BTreeMap, sync::Arc};

use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::{context::ExecutionContext, Error, RuntimeResult};

/// Logger handed to actions through their execution context.
pub trait Logger: Send + Sync {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn warning(&self, message: &str);
    fn error(&self, message: &str);

    /// Link to the logs of the run `ctx` belongs to. Empty when unknown.
    fn url(&self, ctx: &ExecutionContext) -> String;

    fn add_fields(&self, fields: BTreeMap<String, String>) -> Arc<dyn Logger>;
}

/// Forwards to `tracing`, with accumulated fields rendered as `key=value`.
#[derive(Debug, Clone, Default)]
pub struct TracingLogger {
    fields: BTreeMap<String, String>,
    url_template: Option<String>,
}

impl TracingLogger {
    pub fn new(url_template: Option<String>) -> Self {
        Self {
            fields: BTreeMap::new(),
            url_template,
        }
    }

    fn render_fields(&self) -> String {
        self.fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Logger for TracingLogger {
    fn debug(&self, message: &str) {
        debug!(fields = %self.render_fields(), "{}", message);
    }

    fn info(&self, message: &str) {
        info!(fields = %self.render_fields(), "{}", message);
    }

    fn warning(&self, message: &str) {
        warn!(fields = %self.render_fields(), "{}", message);
    }

    fn error(&self, message: &str) {
        error!(fields = %self.render_fields(), "{}", message);
    }

    fn url(&self, ctx: &ExecutionContext) -> String {
        match &self.url_template {
            Some(template) => template.replace("{run_id}", &ctx.id().to_string()),
            None => String::new(),
        }
    }

    fn add_fields(&self, fields: BTreeMap<String, String>) -> Arc<dyn Logger> {
        let mut merged = self.fields.clone();
        merged.extend(fields);
        Arc::new(TracingLogger {
            fields: merged,
            url_template: self.url_template.clone(),
        })
    }
}

/// Used when no logger is installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn debug(&self, _message: &str) {}
    fn info(&self, _message: &str) {}
    fn warning(&self, _message: &str) {}
    fn error(&self, _message: &str) {}

    fn url(&self, _ctx: &ExecutionContext) -> String {
        String::new()
    }

    fn add_fields(&self, _fields: BTreeMap<String, String>) -> Arc<dyn Logger> {
        Arc::new(NoopLogger)
    }
}

/// Installs the global `tracing` subscriber. `RUST_LOG` wins when set.
pub fn init(verbose: bool) -> RuntimeResult<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::internal(format!("failed to set tracing subscriber: {}", e)))
}
