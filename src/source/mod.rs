//! # Event sources
//!
//! A source produces a stream of [`Event`]s. `start` spawns the producer and
//! returns immediately; `events` hands out the receiving end of the source's
//! bounded queue; `done` closes once the source will produce nothing more.
//!
//! | Source      | Emits                               | Done closes            |
//! |-------------|-------------------------------------|------------------------|
//! | `Oneshot`   | one event on start                  | never                  |
//! | `Ticker`    | one event per period                | on cancellation        |
//! | `Watch`     | file writes and removals            | on cancellation/error  |
//! | `FanIn`     | every child's events, interleaved   | when all children are  |
//! | `Duplicate` | each upstream event N times         | when upstream is       |

mod duplicate;
mod fan_in;
mod oneshot;
mod ticker;
mod watch;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use duplicate::Duplicate;
pub use fan_in::FanIn;
pub use oneshot::Oneshot;
pub use ticker::{parse_period, Ticker, MAX_PERIOD};
pub use watch::Watch;

use crate::{event::Event, marshal::MarshalCode, Error, RuntimeResult};

pub type SourceId = Uuid;

/// Capacity of a source's own output queue.
pub const DEFAULT_SOURCE_CAPACITY: usize = 1024;

pub trait EventSource: MarshalCode {
    fn id(&self) -> SourceId;

    /// Spawns the producer and returns without waiting for events. A source
    /// can be started once.
    fn start(&self, token: CancellationToken) -> RuntimeResult<()>;

    /// The receiving end of the output queue. It can be taken once.
    fn events(&self) -> RuntimeResult<mpsc::Receiver<Event>>;

    fn done(&self) -> DoneSignal;

    /// Sources this one consumes. Their events belong to this source alone.
    fn children(&self) -> Vec<Arc<dyn EventSource>> {
        Vec::new()
    }
}

/// Ids of every source nested below `source`, depth first.
pub fn nested_ids(source: &dyn EventSource) -> Vec<SourceId> {
    let mut ids = Vec::new();
    for child in source.children() {
        ids.push(child.id());
        ids.extend(nested_ids(child.as_ref()));
    }
    ids
}

/// Closed once a source has stopped producing.
#[derive(Debug, Clone, Default)]
pub struct DoneSignal(CancellationToken);

impl DoneSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self) {
        self.0.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_cancelled()
    }

    pub async fn closed(&self) {
        self.0.cancelled().await
    }
}

/// State every source carries: identity, output queue and lifecycle flags.
pub(crate) struct SourceCore {
    id: SourceId,
    tx: mpsc::Sender<Event>,
    rx: Mutex<Option<mpsc::Receiver<Event>>>,
    done: DoneSignal,
    started: AtomicBool,
}

impl SourceCore {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            id: Uuid::new_v4(),
            tx,
            rx: Mutex::new(Some(rx)),
            done: DoneSignal::new(),
            started: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> SourceId {
        self.id
    }

    pub(crate) fn sender(&self) -> mpsc::Sender<Event> {
        self.tx.clone()
    }

    pub(crate) fn done(&self) -> DoneSignal {
        self.done.clone()
    }

    pub(crate) fn mark_started(&self, name: &str) -> RuntimeResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::bad_parameter(format!(
                "{} source {} is already started",
                name, self.id
            )));
        }
        Ok(())
    }

    pub(crate) fn take_events(&self, name: &str) -> RuntimeResult<mpsc::Receiver<Event>> {
        self.rx.lock().take().ok_or_else(|| {
            Error::bad_parameter(format!(
                "events of {} source {} are already taken",
                name, self.id
            ))
        })
    }
}
