use std::time::Duration;

use async_trait::async_trait;
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::digit1,
    combinator::{all_consuming, map_res},
    error::{context, VerboseError},
    multi::many1,
    sequence::pair,
    IResult,
};
use tokio::{
    sync::mpsc,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{DoneSignal, EventSource, SourceCore, SourceId, DEFAULT_SOURCE_CAPACITY};
use crate::{
    context::ExecutionContext,
    event::Event,
    marshal::{quote_string, MarshalCode},
    Error, RuntimeResult,
};

fn unit_millis(unit: &str) -> u64 {
    match unit {
        "ms" => 1,
        "m" => 60_000,
        "h" => 60 * 60_000,
        "d" => 24 * 60 * 60_000,
        _ => 1_000,
    }
}

fn period_part(input: &str) -> IResult<&str, u64, VerboseError<&str>> {
    context(
        "period part",
        map_res(
            pair(digit1, alt((tag("ms"), tag("s"), tag("m"), tag("h"), tag("d")))),
            |(n, unit): (&str, &str)| n.parse::<u64>().map(|n| n.saturating_mul(unit_millis(unit))),
        ),
    )(input)
}

/// Parses periods such as `10s`, `5m`, `1h30m` or `250ms`.
pub fn parse_period(input: &str) -> RuntimeResult<Duration> {
    let (_, parts) = all_consuming(many1(period_part))(input.trim())
        .map_err(|_| Error::bad_parameter(format!("invalid period {:?}", input)))?;
    let millis = parts.into_iter().fold(0u64, u64::saturating_add);
    check_period(Duration::from_millis(millis))
}

/// Longest period a ticker accepts.
pub const MAX_PERIOD: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn check_period(period: Duration) -> RuntimeResult<Duration> {
    if period.is_zero() {
        return Err(Error::bad_parameter("period must be greater than zero"));
    }
    if period > MAX_PERIOD {
        return Err(Error::bad_parameter(format!(
            "period {:?} exceeds the maximum of {:?}",
            period, MAX_PERIOD
        )));
    }
    Ok(period)
}

/// Renders `period` in the form `parse_period` reads back.
fn format_period(period: Duration) -> String {
    let millis = period.as_millis();
    if millis % 1_000 == 0 {
        format!("{}s", millis / 1_000)
    } else {
        format!("{}ms", millis)
    }
}

/// Emits one tick per period until cancelled.
pub struct Ticker {
    core: SourceCore,
    period: Duration,
    text: String,
}

impl Ticker {
    pub fn new(period: &str) -> RuntimeResult<Self> {
        Ok(Self {
            core: SourceCore::new(DEFAULT_SOURCE_CAPACITY),
            period: parse_period(period)?,
            text: period.to_string(),
        })
    }

    /// Periods are kept to whole milliseconds, the finest unit scripts
    /// can spell.
    pub fn with_period(period: Duration) -> RuntimeResult<Self> {
        if period.subsec_nanos() % 1_000_000 != 0 {
            return Err(Error::bad_parameter(format!(
                "period {:?} is not a whole number of milliseconds",
                period
            )));
        }
        let period = check_period(period)?;
        Ok(Self {
            core: SourceCore::new(DEFAULT_SOURCE_CAPACITY),
            period,
            text: format_period(period),
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

#[async_trait]
impl MarshalCode for Ticker {
    async fn marshal_code(&self, _ctx: &ExecutionContext) -> RuntimeResult<String> {
        Ok(format!("Ticker({})", quote_string(&self.text)))
    }
}

impl EventSource for Ticker {
    fn id(&self) -> SourceId {
        self.core.id()
    }

    fn start(&self, token: CancellationToken) -> RuntimeResult<()> {
        self.core.mark_started("ticker")?;
        let tx = self.core.sender();
        let done = self.core.done();
        let period = self.period;

        tokio::spawn(async move {
            // the timer is dropped, and so stopped, when the loop exits
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            sent = tx.send(Event::tick(period)) => {
                                if sent.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            debug!(?period, "ticker stopped");
            done.close();
        });
        Ok(())
    }

    fn events(&self) -> RuntimeResult<mpsc::Receiver<Event>> {
        self.core.take_events("ticker")
    }

    fn done(&self) -> DoneSignal {
        self.core.done()
    }
}
