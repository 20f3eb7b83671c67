//! # Execution context
//!
//! One [`ExecutionContext`] is built for every dispatched event. It carries
//! the triggering event, the owning process and group, a run id for log
//! correlation, a variable table and the closers that must run when the run
//! ends.
//!
//! Runtime scopes derived with [`ExecutionContext::runtime_scope`] shadow
//! variables and the recorded error without touching their parent, but share
//! the run's id and closers. Cancellation always comes from the root token,
//! so cancelling it reaches every derived context.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    event::Event,
    expression::Value,
    group::Group,
    logging::{Logger, NoopLogger},
    process::Process,
    Error, RuntimeResult,
};

/// A scoped resource released when the run's context is closed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Closer: Send + Sync {
    async fn close(&self) -> RuntimeResult<()>;
}

#[derive(Default)]
struct RunState {
    closers: Mutex<Vec<Arc<dyn Closer>>>,
    closed: AtomicBool,
}

struct Inner {
    id: Uuid,
    token: CancellationToken,
    deadline: Option<Instant>,
    parent: Option<ExecutionContext>,
    event: Option<Event>,
    process: Option<Arc<Process>>,
    group: Option<Weak<Group>>,
    vars: RwLock<HashMap<String, Value>>,
    error: Mutex<Option<Error>>,
    run: Arc<RunState>,
}

#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.inner.id)
            .field("event", &self.inner.event)
            .finish()
    }
}

pub struct ContextBuilder {
    token: CancellationToken,
    deadline: Option<Instant>,
    parent: Option<ExecutionContext>,
    event: Option<Event>,
    process: Option<Arc<Process>>,
    group: Option<Weak<Group>>,
}

impl ContextBuilder {
    /// Values not set locally are looked up in `parent`.
    pub fn parent(mut self, parent: ExecutionContext) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn event(mut self, event: Event) -> Self {
        self.event = Some(event);
        self
    }

    pub fn process(mut self, process: Arc<Process>) -> Self {
        self.process = Some(process);
        self
    }

    /// The group is held weakly; it is kept alive by its processes.
    pub fn group(mut self, group: &Arc<Group>) -> Self {
        self.group = Some(Arc::downgrade(group));
        self
    }

    pub(crate) fn weak_group(mut self, group: Weak<Group>) -> Self {
        self.group = Some(group);
        self
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn build(self) -> ExecutionContext {
        ExecutionContext {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                token: self.token,
                deadline: self.deadline,
                parent: self.parent,
                event: self.event,
                process: self.process,
                group: self.group,
                vars: RwLock::new(HashMap::new()),
                error: Mutex::new(None),
                run: Arc::new(RunState::default()),
            }),
        }
    }
}

impl ExecutionContext {
    pub fn builder(token: CancellationToken) -> ContextBuilder {
        ContextBuilder {
            token,
            deadline: None,
            parent: None,
            event: None,
            process: None,
            group: None,
        }
    }

    /// A detached context with its own root token.
    pub fn background() -> Self {
        Self::builder(CancellationToken::new()).build()
    }

    fn derive(&self, deadline: Option<Instant>) -> Self {
        ExecutionContext {
            inner: Arc::new(Inner {
                id: self.inner.id,
                token: self.inner.token.clone(),
                deadline: deadline.or(self.inner.deadline),
                parent: Some(self.clone()),
                event: None,
                process: None,
                group: None,
                vars: RwLock::new(HashMap::new()),
                error: Mutex::new(None),
                run: self.inner.run.clone(),
            }),
        }
    }

    /// A nested scope whose variables shadow this context's without
    /// modifying it.
    pub fn runtime_scope(&self) -> Self {
        self.derive(None)
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline() {
            Some(current) if current < deadline => current,
            _ => deadline,
        };
        self.derive(Some(deadline))
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Per-run identifier used for log correlation.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Resolves once the root token is cancelled or the deadline passes.
    pub async fn done(&self) {
        match self.deadline() {
            Some(deadline) => {
                tokio::select! {
                    _ = self.inner.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.inner.token.cancelled().await,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.err().is_some()
    }

    /// Why the context is done, or `None` while it is live.
    pub fn err(&self) -> Option<Error> {
        if self.inner.token.is_cancelled() {
            return Some(Error::Cancelled);
        }
        match self.deadline() {
            Some(deadline) if Instant::now() >= deadline => Some(Error::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn set_value<S: Into<String>>(&self, key: S, value: Value) {
        self.inner.vars.write().insert(key.into(), value);
    }

    /// Local value first, then the parent chain.
    pub fn value(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.inner.vars.read().get(key) {
            return Some(value.clone());
        }
        self.inner.parent.as_ref().and_then(|parent| parent.value(key))
    }

    pub fn event(&self) -> Option<&Event> {
        match &self.inner.event {
            Some(event) => Some(event),
            None => self.inner.parent.as_ref().and_then(|p| p.event()),
        }
    }

    pub fn process(&self) -> Option<&Arc<Process>> {
        match &self.inner.process {
            Some(process) => Some(process),
            None => self.inner.parent.as_ref().and_then(|p| p.process()),
        }
    }

    pub fn group(&self) -> Option<Arc<Group>> {
        match &self.inner.group {
            Some(group) => group.upgrade(),
            None => self.inner.parent.as_ref().and_then(|p| p.group()),
        }
    }

    /// The group's logger tagged with this run, or a no-op logger when
    /// there is no group.
    pub fn logger(&self) -> Arc<dyn Logger> {
        let base: Arc<dyn Logger> = match self.group() {
            Some(group) => group.logger(),
            None => Arc::new(NoopLogger),
        };
        let mut fields = BTreeMap::from([("run_id".to_string(), self.id().to_string())]);
        if let Some(process) = self.process() {
            fields.insert("process".to_string(), process.name().to_string());
        }
        base.add_fields(fields)
    }

    /// Records a failure for later inspection by status-reporting actions.
    pub fn set_error(&self, error: Error) {
        *self.inner.error.lock() = Some(error);
    }

    /// The most recent error recorded here, else the nearest one recorded by
    /// an enclosing scope.
    pub fn error(&self) -> Option<Error> {
        if let Some(error) = self.inner.error.lock().clone() {
            return Some(error);
        }
        self.inner.parent.as_ref().and_then(|parent| parent.error())
    }

    pub fn add_closer(&self, closer: Arc<dyn Closer>) {
        self.inner.run.closers.lock().push(closer);
    }

    /// Runs every registered closer, most recent first, even when earlier
    /// ones fail. Failures are aggregated. Only the first call does work.
    pub async fn close(&self) -> RuntimeResult<()> {
        if self.inner.run.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let closers = std::mem::take(&mut *self.inner.run.closers.lock());
        let mut errors = Vec::new();
        for closer in closers.iter().rev() {
            if let Err(e) = closer.close().await {
                errors.push(e);
            }
        }
        match Error::aggregate(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::Sequence;

    #[test]
    fn test_runtime_scope_shadows() {
        let ctx = ExecutionContext::background();
        ctx.set_value("cwd", Value::from("/"));
        ctx.set_value("user", Value::from("root"));

        let scope = ctx.runtime_scope();
        scope.set_value("cwd", Value::from("/tmp"));

        assert_eq!(scope.value("cwd"), Some(Value::from("/tmp")));
        assert_eq!(scope.value("user"), Some(Value::from("root")));
        assert_eq!(ctx.value("cwd"), Some(Value::from("/")));
        assert_eq!(scope.id(), ctx.id());
        assert!(ctx.value("missing").is_none());
    }

    #[tokio::test]
    async fn test_close_runs_every_closer() {
        let ctx = ExecutionContext::background();
        let mut seq = Sequence::new();

        let mut first = MockCloser::new();
        let mut second = MockCloser::new();
        let mut third = MockCloser::new();
        third
            .expect_close()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        second
            .expect_close()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(Error::internal("disk busy")));
        first
            .expect_close()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));

        ctx.add_closer(Arc::new(first));
        ctx.add_closer(Arc::new(second));
        ctx.add_closer(Arc::new(third));

        let err = ctx.close().await.unwrap_err();
        assert!(err.to_string().contains("disk busy"));

        // idempotent
        assert!(ctx.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_closers_aggregate() {
        let ctx = ExecutionContext::background();
        for message in ["a", "b"] {
            let mut closer = MockCloser::new();
            closer
                .expect_close()
                .times(1)
                .returning(move || Err(Error::internal(message)));
            ctx.add_closer(Arc::new(closer));
        }
        match ctx.close().await.unwrap_err() {
            Error::Aggregate(agg) => assert_eq!(agg.errors.len(), 2),
            other => panic!("expected aggregate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancellation_reaches_scopes() {
        let token = CancellationToken::new();
        let ctx = ExecutionContext::builder(token.clone()).build();
        let scope = ctx.runtime_scope().runtime_scope();
        assert!(scope.err().is_none());

        token.cancel();
        scope.done().await;
        assert!(matches!(scope.err(), Some(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_deadline() {
        let ctx = ExecutionContext::background().with_timeout(Duration::from_millis(10));
        ctx.done().await;
        assert!(matches!(ctx.err(), Some(Error::DeadlineExceeded)));
    }

    #[test]
    fn test_logger_fallback() {
        let ctx = ExecutionContext::background();
        ctx.logger().info("no group installed");
    }

    #[test]
    fn test_error_scoped_like_values() {
        let ctx = ExecutionContext::background();
        let scope = ctx.runtime_scope();
        scope.set_error(Error::not_found("x"));
        assert!(scope.error().unwrap().is_not_found());
        assert!(ctx.error().is_none());

        // nested scopes see the enclosing error until they record their own
        ctx.set_error(Error::internal("outer"));
        let nested = ctx.runtime_scope();
        assert_eq!(nested.error().unwrap().to_string(), ctx.error().unwrap().to_string());
        nested.set_error(Error::bad_parameter("inner"));
        assert!(nested.error().unwrap().is_bad_parameter());
        assert!(!ctx.error().unwrap().is_bad_parameter());
    }
}
