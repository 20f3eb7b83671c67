use std::path::PathBuf;

use async_trait::async_trait;
use notify::{
    event::ModifyKind, EventKind as NotifyKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{DoneSignal, EventSource, SourceCore, SourceId, DEFAULT_SOURCE_CAPACITY};
use crate::{
    context::ExecutionContext,
    event::{Event, FileOp},
    marshal::{quote_string, MarshalCode},
    retry::{retry, Backoff},
    Error, RuntimeResult,
};

/// Emits an event whenever one of the watched files is written or removed.
///
/// Glob patterns are expanded once, at construction. Notifications are
/// delivered from the watcher's own thread with a non-blocking send: while
/// the output queue is full, further file events are dropped and logged.
pub struct Watch {
    core: SourceCore,
    patterns: Vec<String>,
    paths: Vec<PathBuf>,
    backoff: Backoff,
}

impl std::fmt::Debug for Watch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watch")
            .field("id", &self.core.id())
            .field("patterns", &self.patterns)
            .field("paths", &self.paths)
            .finish()
    }
}

impl Watch {
    pub fn new(patterns: Vec<String>) -> RuntimeResult<Self> {
        Self::with_capacity(patterns, DEFAULT_SOURCE_CAPACITY)
    }

    pub fn with_capacity(patterns: Vec<String>, capacity: usize) -> RuntimeResult<Self> {
        let mut paths = Vec::new();
        for pattern in &patterns {
            let entries = glob::glob(pattern)
                .map_err(|e| Error::bad_parameter(format!("pattern {:?}: {}", pattern, e)))?;
            for entry in entries {
                match entry {
                    Ok(path) => paths.push(path),
                    Err(e) => warn!("skipping unreadable path: {}", e),
                }
            }
        }
        if paths.is_empty() {
            return Err(Error::not_found(format!(
                "no files match {}",
                patterns.join(", ")
            )));
        }
        Ok(Self {
            core: SourceCore::new(capacity),
            patterns,
            paths,
            backoff: Backoff::default(),
        })
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

fn file_op(kind: &NotifyKind) -> Option<FileOp> {
    match kind {
        NotifyKind::Modify(ModifyKind::Data(_)) | NotifyKind::Modify(ModifyKind::Any) => {
            Some(FileOp::Write)
        }
        NotifyKind::Remove(_) => Some(FileOp::Remove),
        _ => None,
    }
}

fn classify(err: notify::Error) -> Error {
    match err.kind {
        notify::ErrorKind::PathNotFound | notify::ErrorKind::Io(_) => {
            Error::retryable(err.to_string())
        }
        _ => Error::from(err),
    }
}

fn subscribe(
    paths: &[PathBuf],
    tx: mpsc::Sender<Event>,
    stop: CancellationToken,
) -> RuntimeResult<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(
        move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) => {
                let Some(op) = file_op(&event.kind) else {
                    return;
                };
                for path in event.paths {
                    let path = path.display().to_string();
                    match tx.try_send(Event::file_change(path.clone(), op)) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!(%path, %op, "watch queue full, dropping file event")
                        }
                        Err(TrySendError::Closed(_)) => stop.cancel(),
                    }
                }
            }
            Err(e) => {
                error!("watch error: {}", e);
                stop.cancel();
            }
        },
    )
    .map_err(classify)?;

    for path in paths {
        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(classify)?;
    }
    Ok(watcher)
}

#[async_trait]
impl MarshalCode for Watch {
    async fn marshal_code(&self, _ctx: &ExecutionContext) -> RuntimeResult<String> {
        let patterns = self
            .patterns
            .iter()
            .map(|p| quote_string(p))
            .collect::<Vec<_>>();
        Ok(format!("Watch({})", patterns.join(", ")))
    }
}

impl EventSource for Watch {
    fn id(&self) -> SourceId {
        self.core.id()
    }

    fn start(&self, token: CancellationToken) -> RuntimeResult<()> {
        self.core.mark_started("watch")?;
        let tx = self.core.sender();
        let done = self.core.done();
        let paths = self.paths.clone();
        let backoff = self.backoff.clone();
        let stop = token.child_token();

        tokio::spawn(async move {
            let subscribed = retry(&token, backoff, || {
                let result = subscribe(&paths, tx.clone(), stop.clone());
                async move { result }
            })
            .await;

            match subscribed {
                Ok(watcher) => {
                    debug!(paths = ?paths, "watching");
                    stop.cancelled().await;
                    drop(watcher);
                }
                Err(e) if e.is_cancelled() => {}
                Err(e) => error!("failed to watch {:?}: {}", paths, e),
            }
            done.close();
        });
        Ok(())
    }

    fn events(&self) -> RuntimeResult<mpsc::Receiver<Event>> {
        self.core.take_events("watch")
    }

    fn done(&self) -> DoneSignal {
        self.core.done()
    }
}
