use std::sync::Arc;

use async_trait::async_trait;
use futures::{future::join_all, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamMap};
use tokio_util::sync::CancellationToken;

use super::{DoneSignal, EventSource, SourceCore, SourceId, DEFAULT_SOURCE_CAPACITY};
use crate::{context::ExecutionContext, event::Event, marshal::MarshalCode, RuntimeResult};

/// Merges several sources into one stream. Each child's events keep their
/// order; events of different children interleave. Done closes once every
/// child is done, or when the fan-in is cancelled.
pub struct FanIn {
    core: SourceCore,
    children: Vec<Arc<dyn EventSource>>,
}

impl FanIn {
    pub fn new(children: Vec<Arc<dyn EventSource>>) -> Self {
        Self {
            core: SourceCore::new(DEFAULT_SOURCE_CAPACITY),
            children,
        }
    }
}

#[async_trait]
impl MarshalCode for FanIn {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> RuntimeResult<String> {
        let mut children = Vec::with_capacity(self.children.len());
        for child in &self.children {
            children.push(child.marshal_code(ctx).await?);
        }
        Ok(format!("FanIn({})", children.join(", ")))
    }
}

impl EventSource for FanIn {
    fn id(&self) -> SourceId {
        self.core.id()
    }

    fn start(&self, token: CancellationToken) -> RuntimeResult<()> {
        self.core.mark_started("fan-in")?;

        let mut streams = StreamMap::new();
        let mut dones = Vec::with_capacity(self.children.len());
        for (i, child) in self.children.iter().enumerate() {
            let events = child.events()?;
            child.start(token.clone())?;
            streams.insert(i, ReceiverStream::new(events));
            dones.push(child.done());
        }

        let tx = self.core.sender();
        let done = self.core.done();
        let all_done = join_all(dones.into_iter().map(|d| async move { d.closed().await }));

        tokio::spawn(async move {
            tokio::pin!(all_done);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    Some((_, event)) = streams.next() => {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            sent = tx.send(event) => {
                                if sent.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    // children have no buffered events left at this point
                    _ = &mut all_done => break,
                }
            }
            done.close();
        });
        Ok(())
    }

    fn events(&self) -> RuntimeResult<mpsc::Receiver<Event>> {
        self.core.take_events("fan-in")
    }

    fn done(&self) -> DoneSignal {
        self.core.done()
    }

    fn children(&self) -> Vec<Arc<dyn EventSource>> {
        self.children.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event::EventKind,
        source::{Oneshot, Ticker},
    };
    use std::time::Duration;

    #[tokio::test]
    async fn test_merges_children() {
        let ticker = Arc::new(Ticker::with_period(Duration::from_millis(5)).unwrap());
        let children: Vec<Arc<dyn EventSource>> = vec![Arc::new(Oneshot::new()), ticker];
        let fan_in = FanIn::new(children);
        let mut events = fan_in.events().unwrap();
        let token = CancellationToken::new();
        fan_in.start(token.clone()).unwrap();

        let mut oneshots = 0;
        let mut ticks = 0;
        while oneshots == 0 || ticks < 2 {
            let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .unwrap()
                .unwrap();
            match event.kind {
                EventKind::Oneshot => oneshots += 1,
                EventKind::Tick { .. } => ticks += 1,
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(oneshots, 1);
        assert!(!fan_in.done().is_closed());

        token.cancel();
        fan_in.done().closed().await;
    }

    #[tokio::test]
    async fn test_done_on_cancel() {
        let token = CancellationToken::new();
        let child = Arc::new(Ticker::with_period(Duration::from_millis(5)).unwrap());
        let fan_in = FanIn::new(vec![child.clone() as Arc<dyn EventSource>]);
        let _events = fan_in.events().unwrap();
        fan_in.start(token.child_token()).unwrap();
        assert!(!fan_in.done().is_closed());

        token.cancel();
        child.done().closed().await;
        tokio::time::timeout(Duration::from_secs(1), fan_in.done().closed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_marshal() {
        let ctx = ExecutionContext::background();
        let children: Vec<Arc<dyn EventSource>> = vec![
            Arc::new(Oneshot::new()),
            Arc::new(Ticker::new("1m").unwrap()),
        ];
        let fan_in = FanIn::new(children);
        assert_eq!(
            fan_in.marshal_code(&ctx).await.unwrap(),
            r#"FanIn(Oneshot(), Ticker("1m"))"#
        );
    }
}
