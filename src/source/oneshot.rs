use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{DoneSignal, EventSource, SourceCore, SourceId, DEFAULT_SOURCE_CAPACITY};
use crate::{context::ExecutionContext, event::Event, marshal::MarshalCode, Error, RuntimeResult};

/// Emits exactly one event when started. Its done signal never closes, so
/// nothing may wait on it for termination.
pub struct Oneshot {
    core: SourceCore,
}

impl Oneshot {
    pub fn new() -> Self {
        Self {
            core: SourceCore::new(DEFAULT_SOURCE_CAPACITY),
        }
    }
}

impl Default for Oneshot {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarshalCode for Oneshot {
    async fn marshal_code(&self, _ctx: &ExecutionContext) -> RuntimeResult<String> {
        Ok("Oneshot()".to_string())
    }
}

impl EventSource for Oneshot {
    fn id(&self) -> SourceId {
        self.core.id()
    }

    fn start(&self, _token: CancellationToken) -> RuntimeResult<()> {
        self.core.mark_started("oneshot")?;
        self.core
            .sender()
            .try_send(Event::oneshot())
            .map_err(|e| Error::internal(format!("oneshot: {}", e)))
    }

    fn events(&self) -> RuntimeResult<mpsc::Receiver<Event>> {
        self.core.take_events("oneshot")
    }

    fn done(&self) -> DoneSignal {
        self.core.done()
    }
}
