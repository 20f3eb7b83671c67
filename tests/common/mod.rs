#![allow(dead_code)]

use std::{
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use force::{
    config::RunnerConfig,
    convert::{Converter, FieldKind, SchemaRegistry, Signature},
    expression::{EvalFn, Value},
    scope::{Prototype, Scope},
    Group, Runner,
};
use futures::FutureExt;
use tracing_subscriber::{fmt::MakeWriter, EnvFilter, FmtSubscriber};

#[ctor::ctor]
fn init_tests() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

pub fn group_with(config: RunnerConfig) -> (Arc<Runner>, Arc<Group>) {
    let runner = Runner::new(config);
    let group = Group::new(&runner).expect("group");
    (runner, group)
}

pub fn group() -> (Arc<Runner>, Arc<Group>) {
    group_with(RunnerConfig::default())
}

/// Defines `Count()`, an action plugin that counts its runs.
pub fn counter(group: &Arc<Group>) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let runs = count.clone();
    let body: EvalFn = Arc::new(move |_ctx, _args| {
        runs.fetch_add(1, Ordering::SeqCst);
        async { Ok(Value::Null) }.boxed()
    });
    let registry = SchemaRegistry::new();
    let function = Converter::new(&registry)
        .convert_function(
            "Count",
            &Signature::new(vec![], vec![FieldKind::Error]),
            body,
        )
        .expect("convert Count");
    group
        .add_definition("Count", Prototype::Function(Arc::new(function)))
        .expect("define Count");
    count
}

/// Polls until `count` reaches `n`, panicking after five seconds.
pub async fn wait_for(count: &AtomicUsize, n: usize) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while count.load(Ordering::SeqCst) < n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(
        reached.is_ok(),
        "expected {} runs, saw {}",
        n,
        count.load(Ordering::SeqCst)
    );
}

/// Log lines written while a scoped subscriber is installed.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    buf: Arc<Mutex<Vec<u8>>>,
}

pub struct CapturedWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    pub fn contents(&self) -> String {
        let buf = self.buf.lock().expect("log buffer poisoned");
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CapturedWriter {
            buf: self.buf.clone(),
        }
    }
}

impl io::Write for CapturedWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf
            .lock()
            .map_err(|_| io::Error::other("log buffer poisoned"))?
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs `f` with a warn-level subscriber on this thread and returns what it
/// logged.
pub fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, String) {
    let logs = CapturedLogs::default();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .with_writer(logs.clone())
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, logs.contents())
}
