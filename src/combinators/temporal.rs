//! Temporal combinators (spec §4.6). `debounce` implements the
//! "burst-last" variant spec §9 settles on as the minimal correct default.

use std::time::Duration;

use futures::StreamExt;
use tokio_stream::StreamExt as TokioStreamExt;

use crate::error::{FlowError, FlowResult};
use crate::flow::Flow;
use crate::stream::boxed;

/// `delay(seconds)`: delay each item's emission by the given duration;
/// preserves order.
pub fn delay<T: Send + 'static>(seconds: f64) -> Flow<T, T> {
    let duration = Duration::from_secs_f64(seconds.max(0.0));
    Flow::new("delay", move |mut input| {
        boxed(async_stream::stream! {
            while let Some(item) = futures::StreamExt::next(&mut input).await {
                tokio::time::sleep(duration).await;
                let is_err = item.is_err();
                yield item;
                if is_err {
                    return;
                }
            }
        })
    })
}

/// `debounce(seconds)`: emit an input only if no further input arrives
/// within `seconds` after it (the burst-last variant: only the final
/// input of a burst is emitted). On input completion, emit the last
/// pending item.
pub fn debounce<T: Send + 'static>(seconds: f64) -> Flow<T, T> {
    let duration = Duration::from_secs_f64(seconds.max(0.0));
    Flow::new("debounce", move |mut input| {
        boxed(async_stream::stream! {
            let mut pending: Option<T> = None;
            loop {
                match pending.take() {
                    None => match futures::StreamExt::next(&mut input).await {
                        Some(Ok(v)) => pending = Some(v),
                        Some(Err(e)) => { yield Err(e); return; }
                        None => return,
                    },
                    Some(value) => {
                        tokio::select! {
                            biased;
                            next = futures::StreamExt::next(&mut input) => match next {
                                Some(Ok(v)) => pending = Some(v),
                                Some(Err(e)) => { yield Ok(value); yield Err(e); return; }
                                None => { yield Ok(value); return; }
                            },
                            _ = tokio::time::sleep(duration) => {
                                yield Ok(value);
                            }
                        }
                    }
                }
            }
        })
    })
}

/// `throttle(rate)`: limit emission rate to `rate` items per second,
/// spacing items out by at least `1 / rate` seconds. Rejects a
/// non-positive `rate` at construction.
pub fn throttle<T: Send + 'static>(rate: f64) -> FlowResult<Flow<T, T>> {
    if rate <= 0.0 {
        return Err(FlowError::configuration(
            "throttle",
            "throttle rate must be positive",
        ));
    }
    let min_interval = Duration::from_secs_f64(1.0 / rate);
    Ok(Flow::new("throttle", move |mut input| {
        boxed(async_stream::stream! {
            let mut last_emit: Option<tokio::time::Instant> = None;
            while let Some(item) = futures::StreamExt::next(&mut input).await {
                if let Ok(_) = item {
                    if let Some(last) = last_emit {
                        let elapsed = last.elapsed();
                        if elapsed < min_interval {
                            tokio::time::sleep(min_interval - elapsed).await;
                        }
                    }
                    last_emit = Some(tokio::time::Instant::now());
                }
                let is_err = item.is_err();
                yield item;
                if is_err {
                    return;
                }
            }
        })
    }))
}

/// `sample(period)`: on a fixed period, emit the most-recent input item
/// received since the previous sample; skip periods with no new input.
pub fn sample<T: Send + 'static>(period_seconds: f64) -> Flow<T, T> {
    let period = Duration::from_secs_f64(period_seconds.max(0.000_001));
    Flow::new("sample", move |mut input| {
        boxed(async_stream::stream! {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut latest: Option<T> = None;
            let mut input_done = false;
            loop {
                tokio::select! {
                    biased;
                    next = futures::StreamExt::next(&mut input), if !input_done => {
                        match next {
                            Some(Ok(v)) => latest = Some(v),
                            Some(Err(e)) => { yield Err(e); return; }
                            None => { input_done = true; }
                        }
                    }
                    _ = ticker.tick() => {
                        if let Some(v) = latest.take() {
                            yield Ok(v);
                        } else if input_done {
                            return;
                        }
                    }
                }
                if input_done && latest.is_none() {
                    return;
                }
            }
        })
    })
}

/// `timeout(seconds)`: fail with [`FlowError::Timeout`] if the stream is
/// idle (no item, no termination) for longer than `seconds`.
pub fn timeout<T: Send + 'static>(seconds: f64) -> Flow<T, T> {
    let duration = Duration::from_secs_f64(seconds.max(0.0));
    Flow::new("timeout", move |input| {
        let timed = TokioStreamExt::timeout(input, duration);
        boxed(futures::StreamExt::map(timed, move |result| match result {
            Ok(item) => item,
            Err(_elapsed) => Err(FlowError::Timeout {
                combinator: "timeout",
                elapsed_secs: duration.as_secs_f64(),
            }),
        }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::time::Duration as StdDuration;

    fn ints(xs: Vec<i32>) -> crate::stream::FlowStream<'static, i32> {
        boxed(stream::iter(xs.into_iter().map(Ok)))
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_after_idle_period() {
        let flow: Flow<i32, i32> = timeout(0.01);
        let stalling = boxed(async_stream::stream! {
            yield Ok(1);
            tokio::time::sleep(StdDuration::from_millis(100)).await;
            yield Ok(2);
        });
        let mut out = flow.apply(stalling);
        assert_eq!(out.next().await.unwrap().unwrap(), 1);
        let err = out.next().await.unwrap().unwrap_err();
        assert!(matches!(err, FlowError::Timeout { .. }));
    }

    #[tokio::test]
    async fn delay_preserves_order() {
        let flow: Flow<i32, i32> = delay(0.0);
        let out = flow.to_list(ints(vec![1, 2, 3])).await.unwrap();
        assert_eq!(out, vec![1, 2, 3]);
    }
}
