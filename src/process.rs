use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, warn};

use crate::{
    action::{run_in_scope, Action},
    context::ExecutionContext,
    event::Event,
    group::Group,
    source::{DoneSignal, EventSource},
};

/// What `Group::process` needs to create a process.
pub struct ProcessSpec {
    pub name: String,
    pub source: Arc<dyn EventSource>,
    pub action: Arc<dyn Action>,
}

/// Binds one event source to one action. Every event delivered to the
/// process triggers one run of the action in a fresh execution context.
pub struct Process {
    name: String,
    source: Arc<dyn EventSource>,
    action: Arc<dyn Action>,
    group: Arc<Group>,
    inbound_tx: mpsc::Sender<Event>,
    inbound_rx: Mutex<Option<mpsc::Receiver<Event>>>,
    done: DoneSignal,
    dropped: AtomicU64,
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("name", &self.name)
            .field("source", &self.source.id())
            .finish()
    }
}

impl Process {
    pub(crate) fn new(spec: ProcessSpec, group: Arc<Group>, queue_size: usize) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::channel(queue_size.max(1));
        Arc::new(Self {
            name: spec.name,
            source: spec.source,
            action: spec.action,
            group,
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            done: DoneSignal::new(),
            dropped: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &Arc<dyn EventSource> {
        &self.source
    }

    pub fn action(&self) -> &Arc<dyn Action> {
        &self.action
    }

    pub fn group(&self) -> &Arc<Group> {
        &self.group
    }

    /// Closed once the dispatch loop has exited.
    pub fn done(&self) -> DoneSignal {
        self.done.clone()
    }

    /// Events dropped because the inbound queue was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Queues an event without waiting. A full queue drops the event and
    /// returns `false`.
    pub fn deliver(&self, event: Event) -> bool {
        match self.inbound_tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    process = %self.name,
                    event = %event.name(),
                    dropped,
                    "inbound queue full, dropping event"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(process = %self.name, "process stopped, dropping event");
                false
            }
        }
    }

    /// Pulls the inbound queue until `token` is cancelled, starting one
    /// tracked run per event without waiting for earlier runs to finish.
    pub(crate) async fn dispatch(self: Arc<Self>, token: CancellationToken, tracker: TaskTracker) {
        let Some(mut inbound) = self.inbound_rx.lock().take() else {
            warn!(process = %self.name, "dispatch loop already running");
            return;
        };
        debug!(process = %self.name, "dispatch loop started");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = inbound.recv() => match event {
                    Some(event) => self.launch(event, &token, &tracker),
                    None => break,
                },
            }
        }
        debug!(process = %self.name, "dispatch loop stopped");
        self.done.close();
    }

    fn launch(self: &Arc<Self>, event: Event, token: &CancellationToken, tracker: &TaskTracker) {
        let ctx = ExecutionContext::builder(token.clone())
            .parent(self.group.globals().clone())
            .group(&self.group)
            .process(self.clone())
            .event(event.clone())
            .build();
        event.add_metadata(&ctx);

        let action = self.action.clone();
        let name = self.name.clone();
        tracker.spawn(async move {
            debug!(process = %name, run_id = %ctx.id(), "run started");
            if let Err(e) = run_in_scope(&action, &ctx).await {
                ctx.set_error(e.clone());
                ctx.logger().error(&format!("run failed: {}", e));
            }
            if let Err(e) = ctx.close().await {
                warn!(process = %name, run_id = %ctx.id(), "closing run failed: {}", e);
            }
            debug!(process = %name, run_id = %ctx.id(), "run finished");
        });
    }
}
