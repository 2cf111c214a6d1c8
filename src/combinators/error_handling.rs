//! Error-handling combinators (spec §4.8). Every recovery combinator here
//! wraps a fallible per-item async function directly, the same shape as
//! `flow::from_value_fn`, so it always has the original item in hand to
//! retry or hand to a recovery handler — a generic `Flow<In, Out>` loses
//! that item the moment its output stream yields an error.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;

use crate::error::{FlowError, OffendingItem};
use crate::flow::Flow;
use crate::stream::{boxed, FlowStream};

/// Backoff policy between retry attempts, in seconds.
#[derive(Debug, Clone, Copy)]
pub enum BackoffPolicy {
    Fixed(f64),
    Linear(f64),
    Exponential { base: f64, factor: f64 },
}

impl BackoffPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let secs = match *self {
            BackoffPolicy::Fixed(s) => s,
            BackoffPolicy::Linear(s) => s * attempt as f64,
            BackoffPolicy::Exponential { base, factor } => base * factor.powi(attempt as i32 - 1),
        };
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// `catch_and_continue(f, handler)`: apply the fallible `f` to each item;
/// on failure, call `handler(item, error)`. If it returns `Some(out)`,
/// emit `out` and continue; if it returns `None`, skip the item entirely
/// without emitting or re-raising (spec §4.8).
pub fn catch_and_continue<In, Out, F, Fut, H>(f: F, handler: H) -> Flow<In, Out>
where
    In: Clone + Send + 'static,
    Out: Send + 'static,
    F: Fn(In) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Out, FlowError>> + Send + 'static,
    H: Fn(In, FlowError) -> Option<Out> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let handler = Arc::new(handler);
    Flow::new("catch_and_continue", move |mut input: FlowStream<'_, In>| {
        let f = f.clone();
        let handler = handler.clone();
        boxed(async_stream::stream! {
            while let Some(item) = input.next().await {
                match item {
                    Ok(v) => {
                        let attempt = v.clone();
                        match f(v).await {
                            Ok(out) => yield Ok(out),
                            Err(e) => {
                                if let Some(out) = handler(attempt, e) {
                                    yield Ok(out);
                                }
                            }
                        }
                    }
                    Err(e) => { yield Err(e); return; }
                }
            }
        })
    })
}

/// `recover(f, handler)`: apply the fallible `f` to each item; on failure,
/// `handler(item, error)` produces a stream spliced into the output at the
/// failure point — zero items to skip, one to substitute, or several to
/// insert (spec §4.8). An error from the recovery stream itself terminates
/// the output stream.
pub fn recover<In, Out, F, Fut, H>(f: F, handler: H) -> Flow<In, Out>
where
    In: Clone + Send + 'static,
    Out: Send + 'static,
    F: Fn(In) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Out, FlowError>> + Send + 'static,
    H: Fn(In, FlowError) -> crate::stream::FlowStream<'static, Out> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let handler = Arc::new(handler);
    Flow::new("recover", move |mut input: FlowStream<'_, In>| {
        let f = f.clone();
        let handler = handler.clone();
        boxed(async_stream::stream! {
            while let Some(item) = input.next().await {
                match item {
                    Ok(v) => {
                        let attempt = v.clone();
                        match f(v).await {
                            Ok(out) => yield Ok(out),
                            Err(e) => {
                                let mut recovery = handler(attempt, e);
                                while let Some(recovered) = recovery.next().await {
                                    let is_err = recovered.is_err();
                                    yield recovered;
                                    if is_err {
                                        return;
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => { yield Err(e); return; }
                }
            }
        })
    })
}

/// `retry(f, max_attempts, backoff)`: re-invoke `f` on the same item up to
/// `max_attempts` times total, waiting `backoff` between attempts. The
/// final failure is surfaced with the offending item attached.
pub fn retry<In, Out, F, Fut>(
    f: F,
    max_attempts: u32,
    backoff: BackoffPolicy,
) -> Result<Flow<In, Out>, FlowError>
where
    In: Clone + Send + 'static,
    Out: Send + 'static,
    F: Fn(In) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Out, FlowError>> + Send + 'static,
{
    if max_attempts < 1 {
        return Err(FlowError::configuration(
            "retry",
            "max_attempts must be at least 1",
        ));
    }
    let f = Arc::new(f);
    Ok(Flow::new("retry", move |mut input: FlowStream<'_, In>| {
        let f = f.clone();
        boxed(async_stream::stream! {
            while let Some(item) = input.next().await {
                match item {
                    Ok(v) => {
                        let mut last_err = None;
                        let mut emitted = None;
                        for attempt in 1..=max_attempts {
                            match f(v.clone()).await {
                                Ok(out) => { emitted = Some(out); break; }
                                Err(e) => {
                                    last_err = Some(e);
                                    if attempt < max_attempts {
                                        tokio::time::sleep(backoff.delay_for_attempt(attempt)).await;
                                    }
                                }
                            }
                        }
                        match emitted {
                            Some(out) => yield Ok(out),
                            None => {
                                let err = last_err.expect("at least one attempt was made");
                                yield Err(attach_item(err, v));
                                return;
                            }
                        }
                    }
                    Err(e) => { yield Err(e); return; }
                }
            }
        })
    }))
}

fn attach_item<In: Send + 'static>(error: FlowError, item: In) -> FlowError {
    match error {
        FlowError::Execution { combinator, source, .. } => FlowError::Execution {
            combinator,
            source,
            offending_item: Some(OffendingItem::new(item)),
        },
        FlowError::Validation { combinator, message, .. } => FlowError::Validation {
            combinator,
            message,
            offending_item: Some(OffendingItem::new(item)),
        },
        other => other,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct CircuitBreakerState {
    state: Mutex<CircuitState>,
    failure_count: AtomicU32,
    opened_at: Mutex<Option<Instant>>,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreakerState {
    fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: Mutex::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            opened_at: Mutex::new(None),
            threshold,
            cooldown,
        }
    }

    fn before_call(&self) -> Result<(), FlowError> {
        let mut state = self.state.lock().unwrap();
        match *state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let opened_at = self.opened_at.lock().unwrap();
                if opened_at.map(|t| t.elapsed() >= self.cooldown).unwrap_or(false) {
                    *state = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    // Runtime rejection, not a construction-time failure —
                    // must not be `Configuration`, which spec §7 reserves
                    // for bad constructor parameters detected eagerly.
                    Err(FlowError::execution(
                        "circuit_breaker",
                        "circuit is open; rejecting call",
                    ))
                }
            }
        }
    }

    fn on_success(&self) {
        self.failure_count.store(0, Ordering::SeqCst);
        *self.state.lock().unwrap() = CircuitState::Closed;
    }

    fn on_failure(&self) {
        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.lock().unwrap();
        if *state == CircuitState::HalfOpen || count >= self.threshold {
            *state = CircuitState::Open;
            *self.opened_at.lock().unwrap() = Some(Instant::now());
        }
    }
}

/// `circuit_breaker(f, threshold, cooldown)`: once `threshold` consecutive
/// failures occur, reject further calls immediately (without invoking
/// `f`) until `cooldown` elapses, then allow one trial call to decide
/// whether to close the circuit again.
pub fn circuit_breaker<In, Out, F, Fut>(
    f: F,
    threshold: u32,
    cooldown_seconds: f64,
) -> Result<Flow<In, Out>, FlowError>
where
    In: Clone + Send + 'static,
    Out: Send + 'static,
    F: Fn(In) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Out, FlowError>> + Send + 'static,
{
    if threshold < 1 {
        return Err(FlowError::configuration(
            "circuit_breaker",
            "threshold must be at least 1",
        ));
    }
    let state = Arc::new(CircuitBreakerState::new(
        threshold,
        Duration::from_secs_f64(cooldown_seconds.max(0.0)),
    ));
    let f = Arc::new(f);
    Ok(Flow::new("circuit_breaker", move |mut input: FlowStream<'_, In>| {
        let f = f.clone();
        let state = state.clone();
        boxed(async_stream::stream! {
            while let Some(item) = input.next().await {
                match item {
                    Ok(v) => {
                        if let Err(e) = state.before_call() {
                            yield Err(attach_item(e, v));
                            continue;
                        }
                        match f(v.clone()).await {
                            Ok(out) => {
                                state.on_success();
                                yield Ok(out);
                            }
                            Err(e) => {
                                // Record this failure against the threshold
                                // and surface it for this item only; do not
                                // terminate the stream, or the circuit could
                                // never accumulate consecutive failures past
                                // the first and would never reach `Open`.
                                state.on_failure();
                                yield Err(attach_item(e, v));
                            }
                        }
                    }
                    Err(e) => { yield Err(e); return; }
                }
            }
        })
    }))
}

/// `log_errors(flow, sink)`: observe every error flowing through `flow`
/// by handing it to `sink`, then re-raise it unchanged. Generic over any
/// `Flow<In, Out>` since it only needs to observe, not recover.
pub fn log_errors<In, Out, S>(flow: Flow<In, Out>, sink: S) -> Flow<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
    S: Fn(&FlowError) + Send + Sync + 'static,
{
    let sink = Arc::new(sink);
    Flow::new("log_errors", move |input| {
        let mut out = flow.apply(input);
        let sink = sink.clone();
        boxed(async_stream::stream! {
            while let Some(item) = out.next().await {
                if let Err(ref e) = item {
                    sink(e);
                }
                let is_err = item.is_err();
                yield item;
                if is_err {
                    return;
                }
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn ints(xs: Vec<i32>) -> crate::stream::FlowStream<'static, i32> {
        boxed(stream::iter(xs.into_iter().map(Ok)))
    }

    #[tokio::test]
    async fn retry_succeeds_within_attempt_budget() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter2 = counter.clone();
        let flow = retry(
            move |x: i32| {
                let counter = counter2.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(FlowError::execution("test", "not yet"))
                    } else {
                        Ok(x * 2)
                    }
                }
            },
            5,
            BackoffPolicy::Fixed(0.0),
        )
        .unwrap();
        let out = flow.to_list(ints(vec![10])).await.unwrap();
        assert_eq!(out, vec![20]);
    }

    #[tokio::test]
    async fn catch_and_continue_keeps_stream_alive() {
        let flow = catch_and_continue(
            |x: i32| async move {
                if x == 2 {
                    Err(FlowError::execution("test", "bad"))
                } else {
                    Ok(x)
                }
            },
            |x: i32, _e| Some(-1 * x),
        );
        let out = flow.to_list(ints(vec![1, 2, 3])).await.unwrap();
        assert_eq!(out, vec![1, -2, 3]);
    }

    #[tokio::test]
    async fn catch_and_continue_skips_item_on_none() {
        let flow = catch_and_continue(
            |x: i32| async move {
                if x == 2 {
                    Err(FlowError::execution("test", "bad"))
                } else {
                    Ok(x)
                }
            },
            |_x: i32, _e| None,
        );
        let out = flow.to_list(ints(vec![1, 2, 3])).await.unwrap();
        assert_eq!(out, vec![1, 3]);
    }

    #[tokio::test]
    async fn recover_splices_a_multi_item_stream_at_the_failure_point() {
        let flow = recover(
            |x: i32| async move {
                if x == 2 {
                    Err(FlowError::execution("test", "bad"))
                } else {
                    Ok(x)
                }
            },
            |x: i32, _e| boxed(stream::iter(vec![Ok(x * 10), Ok(x * 100)])),
        );
        let out = flow.to_list(ints(vec![1, 2, 3])).await.unwrap();
        assert_eq!(out, vec![1, 20, 200, 3]);
    }

    #[tokio::test]
    async fn recover_skips_item_on_empty_stream() {
        let flow = recover(
            |x: i32| async move {
                if x == 2 {
                    Err(FlowError::execution("test", "bad"))
                } else {
                    Ok(x)
                }
            },
            |_x: i32, _e| boxed(stream::empty()),
        );
        let out = flow.to_list(ints(vec![1, 2, 3])).await.unwrap();
        assert_eq!(out, vec![1, 3]);
    }

    #[tokio::test]
    async fn circuit_breaker_opens_after_threshold() {
        let flow = circuit_breaker(
            |_x: i32| async move { Err::<i32, _>(FlowError::execution("test", "down")) },
            2,
            60.0,
        )
        .unwrap();
        let err = flow.to_list(ints(vec![1])).await.unwrap_err();
        assert!(matches!(err, FlowError::Execution { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn circuit_breaker_opens_after_threshold_and_recovers_after_cooldown() {
        let calls = Arc::new(AtomicU32::new(0));
        let fail_until = Arc::new(AtomicU32::new(u32::MAX));
        let calls2 = calls.clone();
        let fail_until2 = fail_until.clone();
        let flow = circuit_breaker(
            move |x: i32| {
                let calls = calls2.clone();
                let fail_until = fail_until2.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < fail_until.load(Ordering::SeqCst) {
                        Err(FlowError::execution("test", "down"))
                    } else {
                        Ok(x)
                    }
                }
            },
            2,
            10.0,
        )
        .unwrap();

        let mut stream = flow.apply(ints(vec![1, 2, 3, 4, 5]));

        // Items 1 and 2 fail and push the circuit past `threshold`, both
        // actually invoking `f`.
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.unwrap().is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Item 3 is rejected without calling `f` — the circuit is open.
        assert!(stream.next().await.unwrap().is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Advance past the cooldown window and let the next call succeed,
        // which should close the circuit again.
        tokio::time::advance(Duration::from_secs(11)).await;
        fail_until.store(0, Ordering::SeqCst);
        assert_eq!(stream.next().await.unwrap().unwrap(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // Circuit is closed again: item 5 is called directly, no rejection.
        assert_eq!(stream.next().await.unwrap().unwrap(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn retry_rejects_zero_attempts() {
        let err = retry(
            |x: i32| async move { Ok::<_, FlowError>(x) },
            0,
            BackoffPolicy::Fixed(0.0),
        )
        .unwrap_err();
        assert!(matches!(err, FlowError::Configuration { .. }));
    }
}
