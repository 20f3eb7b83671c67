use std::{fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use strum::Display;

use crate::{context::ExecutionContext, expression::Value};

/// Events defined outside the runtime, e.g. a pull request or a chat
/// message, attach their own data to the run they trigger.
pub trait PluginEvent: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn add_metadata(&self, _ctx: &ExecutionContext) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum FileOp {
    Write,
    Remove,
}

#[derive(Debug, Clone, Display)]
pub enum EventKind {
    Oneshot,
    Tick { period: Duration },
    FileChange { path: String, op: FileOp },
    Exit { code: i32 },
    Plugin(Arc<dyn PluginEvent>),
}

#[derive(Debug, Clone)]
pub struct Event {
    pub created: DateTime<Utc>,
    pub kind: EventKind,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            created: Utc::now(),
            kind,
        }
    }

    pub fn oneshot() -> Self {
        Self::new(EventKind::Oneshot)
    }

    pub fn tick(period: Duration) -> Self {
        Self::new(EventKind::Tick { period })
    }

    pub fn file_change<S: Into<String>>(path: S, op: FileOp) -> Self {
        Self::new(EventKind::FileChange {
            path: path.into(),
            op,
        })
    }

    pub fn exit(code: i32) -> Self {
        Self::new(EventKind::Exit { code })
    }

    pub fn plugin(event: Arc<dyn PluginEvent>) -> Self {
        Self::new(EventKind::Plugin(event))
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.kind {
            EventKind::Exit { code } => Some(code),
            _ => None,
        }
    }

    pub fn name(&self) -> String {
        match &self.kind {
            EventKind::Plugin(event) => event.name().to_string(),
            kind => kind.to_string(),
        }
    }

    /// Attaches event data to a freshly built context before the action
    /// runs.
    pub fn add_metadata(&self, ctx: &ExecutionContext) {
        ctx.set_value("event.kind", Value::String(self.name()));
        ctx.set_value("event.created", Value::String(self.created.to_rfc3339()));
        match &self.kind {
            EventKind::FileChange { path, op } => {
                ctx.set_value("event.path", Value::String(path.clone()));
                ctx.set_value("event.op", Value::String(op.to_string()));
            }
            EventKind::Exit { code } => {
                ctx.set_value("event.exit_code", Value::Int(i64::from(*code)));
            }
            EventKind::Plugin(event) => event.add_metadata(ctx),
            EventKind::Oneshot | EventKind::Tick { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct PullRequest {
        number: i64,
    }

    impl PluginEvent for PullRequest {
        fn name(&self) -> &str {
            "PullRequest"
        }

        fn add_metadata(&self, ctx: &ExecutionContext) {
            ctx.set_value("pr.number", Value::Int(self.number));
        }
    }

    #[test]
    fn test_file_change_metadata() {
        let ctx = ExecutionContext::background();
        Event::file_change("/tmp/a.txt", FileOp::Remove).add_metadata(&ctx);
        assert_eq!(ctx.value("event.kind"), Some(Value::from("FileChange")));
        assert_eq!(ctx.value("event.path"), Some(Value::from("/tmp/a.txt")));
        assert_eq!(ctx.value("event.op"), Some(Value::from("remove")));
    }

    #[test]
    fn test_plugin_metadata() {
        let ctx = ExecutionContext::background();
        Event::plugin(Arc::new(PullRequest { number: 42 })).add_metadata(&ctx);
        assert_eq!(ctx.value("event.kind"), Some(Value::from("PullRequest")));
        assert_eq!(ctx.value("pr.number"), Some(Value::Int(42)));
    }

    #[test]
    fn test_exit_code() {
        assert_eq!(Event::exit(3).exit_code(), Some(3));
        assert_eq!(Event::oneshot().exit_code(), None);
    }
}
