use std::{future::Future, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{config::BackoffConfig, Error, RuntimeResult};

/// Exponential backoff capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: u32,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: u32) -> Self {
        Self {
            initial,
            max,
            multiplier: multiplier.max(1),
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.max);
        self.current = self
            .current
            .checked_mul(self.multiplier)
            .unwrap_or(self.max)
            .min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl From<&BackoffConfig> for Backoff {
    fn from(config: &BackoffConfig) -> Self {
        Backoff::new(config.initial, config.max, config.multiplier)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::from(&BackoffConfig::default())
    }
}

/// Re-runs `op` while it fails with a retryable error. Gives up on any
/// other error, or with `Cancelled` once `token` is cancelled.
pub async fn retry<T, F, Fut>(
    token: &CancellationToken,
    mut backoff: Backoff,
    mut op: F,
) -> RuntimeResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RuntimeResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                let delay = backoff.next_delay();
                warn!(attempt, ?delay, "retrying after error: {}", e);
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("retry cancelled");
                        return Err(Error::Cancelled);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    #[test]
    fn test_backoff_is_capped() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(350), 2);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(2), 2);

        let counter = calls.clone();
        let result = retry(&token, backoff, || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::retryable("not yet"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_on_permanent_error() {
        let token = CancellationToken::new();
        let result: RuntimeResult<()> =
            retry(&token, Backoff::default(), || async { Err(Error::bad_parameter("x")) }).await;
        assert!(result.unwrap_err().is_bad_parameter());
    }

    #[tokio::test]
    async fn test_retry_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let result: RuntimeResult<()> =
            retry(&token, Backoff::default(), || async { Err(Error::retryable("x")) }).await;
        assert!(result.unwrap_err().is_cancelled());
    }
}
