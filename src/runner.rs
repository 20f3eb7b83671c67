//! # Runner
//!
//! Owns every process and event source of a group and moves events between
//! them:
//!
//! ```text
//! source ─┐                          ┌─> process inbound ─> dispatch ─> runs
//! source ─┼─> fan-in queue ─> fan-out┼─> process inbound ─> dispatch ─> runs
//! source ─┘                          └─> ...
//! ```
//!
//! The fan-in queue is bounded and sources wait when it is full. Delivery to
//! a process never waits: when its inbound queue is full the event is dropped
//! and counted, so one slow process cannot stall the others.

use std::{collections::HashSet, sync::Arc};

use parking_lot::{Mutex, RwLock};
use strum::Display;
use tokio::sync::{broadcast, mpsc};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::{
    config::RunnerConfig,
    event::Event,
    process::Process,
    source::{nested_ids, EventSource, SourceId},
    Error, RuntimeResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum RunnerState {
    Stopped,
    Running,
}

/// An event tagged with the source that produced it.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub source: SourceId,
    pub event: Event,
}

pub struct Runner {
    config: RunnerConfig,
    token: CancellationToken,
    state: Mutex<RunnerState>,
    sources: Mutex<Vec<Arc<dyn EventSource>>>,
    processes: RwLock<Vec<Arc<Process>>>,
    tracker: TaskTracker,
    broadcast: broadcast::Sender<Event>,
    exit_code: Mutex<Option<i32>>,
    exited: CancellationToken,
}

impl Runner {
    pub fn new(config: RunnerConfig) -> Arc<Self> {
        let (broadcast, _) = broadcast::channel(config.event_buffer_size.max(1));
        Arc::new(Self {
            config,
            token: CancellationToken::new(),
            state: Mutex::new(RunnerState::Stopped),
            sources: Mutex::new(Vec::new()),
            processes: RwLock::new(Vec::new()),
            tracker: TaskTracker::new(),
            broadcast,
            exit_code: Mutex::new(None),
            exited: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Root token; every source, dispatch loop and run derives from it.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn state(&self) -> RunnerState {
        *self.state.lock()
    }

    pub fn processes(&self) -> Vec<Arc<Process>> {
        self.processes.read().clone()
    }

    pub fn process(&self, name: &str) -> Option<Arc<Process>> {
        self.processes
            .read()
            .iter()
            .find(|p| p.name() == name)
            .cloned()
    }

    /// Registers a process and its source. Processes must be added before
    /// the runner starts.
    pub fn add_process(&self, process: Arc<Process>) -> RuntimeResult<()> {
        if self.state() == RunnerState::Running {
            return Err(Error::bad_parameter(format!(
                "cannot add process {} to a running runner",
                process.name()
            )));
        }
        let mut processes = self.processes.write();
        if processes.iter().any(|p| p.name() == process.name()) {
            return Err(Error::already_exists(format!(
                "process {} is already registered",
                process.name()
            )));
        }
        let mut sources = self.sources.lock();
        let source_id = process.source().id();
        if !sources.iter().any(|s| s.id() == source_id) {
            claim_source(&sources, process.name(), process.source().as_ref())?;
            sources.push(process.source().clone());
        }
        processes.push(process);
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.broadcast.subscribe()
    }

    /// Sends `event` to broadcast subscribers. An exit event records its
    /// code and releases `wait`.
    pub fn broadcast(&self, event: Event) {
        if let Some(code) = event.exit_code() {
            let mut exit_code = self.exit_code.lock();
            if exit_code.is_none() {
                info!(code, "exit requested");
                *exit_code = Some(code);
            }
            self.exited.cancel();
        }
        // no subscribers is fine
        let _ = self.broadcast.send(event);
    }

    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_code.lock()
    }

    /// Delivers an envelope to every process bound to its source and
    /// returns how many accepted it.
    pub fn route(&self, envelope: Envelope) -> usize {
        let processes = self.processes.read();
        let mut delivered = 0;
        for process in processes.iter().filter(|p| p.source().id() == envelope.source) {
            if process.deliver(envelope.event.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Starts sources, the fan-in and fan-out loops and one dispatch loop
    /// per process. Returns without waiting.
    pub fn start(self: &Arc<Self>) -> RuntimeResult<()> {
        {
            let mut state = self.state.lock();
            if *state == RunnerState::Running {
                return Err(Error::bad_parameter("runner is already running"));
            }
            if self.token.is_cancelled() {
                return Err(Error::bad_parameter("a stopped runner cannot be restarted"));
            }
            *state = RunnerState::Running;
        }

        let (tx, mut rx) = mpsc::channel::<Envelope>(self.config.event_buffer_size.max(1));

        let sources = self.sources.lock().clone();
        for source in sources {
            let id = source.id();
            let mut events = match source.events() {
                Ok(events) => events,
                Err(e) => {
                    error!(source = %id, "cannot read source: {}", e);
                    continue;
                }
            };
            if let Err(e) = source.start(self.token.child_token()) {
                error!(source = %id, "cannot start source: {}", e);
                continue;
            }
            let tx = tx.clone();
            let token = self.token.clone();
            self.tracker.spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        event = events.recv() => {
                            let Some(event) = event else {
                                break;
                            };
                            tokio::select! {
                                _ = token.cancelled() => break,
                                sent = tx.send(Envelope { source: id, event }) => {
                                    if sent.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                    }
                }
                debug!(source = %id, "fan-in stopped");
            });
        }
        drop(tx);

        let runner = self.clone();
        let token = self.token.clone();
        self.tracker.spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    envelope = rx.recv() => match envelope {
                        Some(envelope) => {
                            runner.route(envelope);
                        }
                        None => break,
                    },
                }
            }
            debug!("fan-out stopped");
        });

        for process in self.processes() {
            self.tracker
                .spawn(process.dispatch(self.token.clone(), self.tracker.clone()));
        }

        info!(
            processes = self.processes.read().len(),
            sources = self.sources.lock().len(),
            "runner started"
        );
        Ok(())
    }

    /// Blocks until an exit event arrives or the runner is stopped, then
    /// shuts down. Returns the exit code, 0 when none was requested.
    pub async fn wait(&self) -> RuntimeResult<i32> {
        tokio::select! {
            _ = self.exited.cancelled() => {}
            _ = self.token.cancelled() => {}
        }
        self.stop().await?;
        Ok(self.exit_code().unwrap_or(0))
    }

    /// Cancels the root token and waits for in-flight runs, at most
    /// `shutdown_timeout`.
    pub async fn stop(&self) -> RuntimeResult<()> {
        self.token.cancel();
        self.tracker.close();
        if tokio::time::timeout(self.config.shutdown_timeout, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                timeout = ?self.config.shutdown_timeout,
                "in-flight runs did not finish in time"
            );
        }
        *self.state.lock() = RunnerState::Stopped;
        info!("runner stopped");
        Ok(())
    }
}

/// Fails when `source`, or a source nested in it, is already consumed by one
/// of the registered sources. A source's events can only be read once.
fn claim_source(
    registered: &[Arc<dyn EventSource>],
    process: &str,
    source: &dyn EventSource,
) -> RuntimeResult<()> {
    let roots: HashSet<SourceId> = registered.iter().map(|s| s.id()).collect();
    let mut claimed: HashSet<SourceId> = registered
        .iter()
        .flat_map(|s| nested_ids(s.as_ref()))
        .collect();
    if claimed.contains(&source.id()) {
        return Err(Error::bad_parameter(format!(
            "source of process {} is already consumed by another source",
            process
        )));
    }
    for id in nested_ids(source) {
        if roots.contains(&id) || !claimed.insert(id) {
            return Err(Error::bad_parameter(format!(
                "source of process {} reads source {}, which is already consumed elsewhere",
                process, id
            )));
        }
    }
    Ok(())
}
