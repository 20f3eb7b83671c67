use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{DoneSignal, EventSource, SourceCore, SourceId, DEFAULT_SOURCE_CAPACITY};
use crate::{context::ExecutionContext, event::Event, marshal::MarshalCode, Error, RuntimeResult};

/// Replays every upstream event `count` times. Mostly useful in tests.
pub struct Duplicate {
    core: SourceCore,
    upstream: Arc<dyn EventSource>,
    count: usize,
}

impl Duplicate {
    pub fn new(upstream: Arc<dyn EventSource>, count: i64) -> RuntimeResult<Self> {
        let count = usize::try_from(count)
            .ok()
            .filter(|c| *c > 0)
            .ok_or_else(|| Error::bad_parameter(format!("duplicate count {} must be positive", count)))?;
        Ok(Self {
            core: SourceCore::new(DEFAULT_SOURCE_CAPACITY),
            upstream,
            count,
        })
    }
}

#[async_trait]
impl MarshalCode for Duplicate {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> RuntimeResult<String> {
        Ok(format!(
            "Duplicate({}, {})",
            self.upstream.marshal_code(ctx).await?,
            self.count
        ))
    }
}

impl EventSource for Duplicate {
    fn id(&self) -> SourceId {
        self.core.id()
    }

    fn start(&self, token: CancellationToken) -> RuntimeResult<()> {
        self.core.mark_started("duplicate")?;
        let mut upstream_events = self.upstream.events()?;
        self.upstream.start(token.clone())?;

        let upstream_done = self.upstream.done();
        let tx = self.core.sender();
        let done = self.core.done();
        let count = self.count;

        tokio::spawn(async move {
            'outer: loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    Some(event) = upstream_events.recv() => {
                        for _ in 0..count {
                            tokio::select! {
                                _ = token.cancelled() => break 'outer,
                                sent = tx.send(event.clone()) => {
                                    if sent.is_err() {
                                        break 'outer;
                                    }
                                }
                            }
                        }
                    }
                    _ = upstream_done.closed() => break,
                }
            }
            done.close();
        });
        Ok(())
    }

    fn events(&self) -> RuntimeResult<mpsc::Receiver<Event>> {
        self.core.take_events("duplicate")
    }

    fn done(&self) -> DoneSignal {
        self.core.done()
    }

    fn children(&self) -> Vec<Arc<dyn EventSource>> {
        vec![self.upstream.clone()]
    }
}
