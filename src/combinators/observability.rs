//! Observability combinators (spec §4.9). These never change what a
//! stream emits to its consumer; they only add side channels (structured
//! logs, trace events, counters) alongside the pass-through data.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tracing::Level;

use crate::flow::Flow;
use crate::stream::{boxed, Notification};

/// `log(name, level, prefix)`: emit a `tracing` event per item, error, and
/// on completion, tagged with `prefix`. Pass-through otherwise.
pub fn log<T>(name: &'static str, level: Level, prefix: impl Into<String>) -> Flow<T, T>
where
    T: std::fmt::Debug + Send + 'static,
{
    let prefix: Arc<str> = Arc::from(prefix.into());
    Flow::new(name, move |mut input| {
        let prefix = prefix.clone();
        boxed(async_stream::stream! {
            loop {
                match input.next().await {
                    Some(Ok(v)) => {
                        log_at(level, &format!("{prefix}: item {v:?}"));
                        yield Ok(v);
                    }
                    Some(Err(e)) => {
                        log_at(level, &format!("{prefix}: error {e}"));
                        yield Err(e);
                        return;
                    }
                    None => {
                        log_at(level, &format!("{prefix}: completed"));
                        return;
                    }
                }
            }
        })
    })
}

fn log_at(level: Level, message: &str) {
    match level {
        Level::ERROR => tracing::error!("{message}"),
        Level::WARN => tracing::warn!("{message}"),
        Level::INFO => tracing::info!("{message}"),
        Level::DEBUG => tracing::debug!("{message}"),
        Level::TRACE => tracing::trace!("{message}"),
    }
}

/// A single lifecycle event handed to a [`trace`] tracer callback.
#[derive(Debug)]
pub enum TraceEvent<'a, T> {
    StreamStart,
    Item(&'a T),
    Error(&'a crate::error::FlowError),
    StreamEnd,
}

/// `trace(tracer)`: call `tracer` with every lifecycle event as the stream
/// runs. Pass-through otherwise.
pub fn trace<T, F>(tracer: F) -> Flow<T, T>
where
    T: Send + 'static,
    F: Fn(TraceEvent<'_, T>) + Send + Sync + 'static,
{
    let tracer = Arc::new(tracer);
    Flow::new("trace", move |mut input| {
        let tracer = tracer.clone();
        boxed(async_stream::stream! {
            tracer(TraceEvent::StreamStart);
            loop {
                match input.next().await {
                    Some(Ok(v)) => {
                        tracer(TraceEvent::Item(&v));
                        yield Ok(v);
                    }
                    Some(Err(e)) => {
                        tracer(TraceEvent::Error(&e));
                        yield Err(e);
                        return;
                    }
                    None => {
                        tracer(TraceEvent::StreamEnd);
                        return;
                    }
                }
            }
        })
    })
}

/// A minimal counter sink for [`metrics`]: `incr(name)` bumps a named
/// counter by one, `observe(name, value)` records a point value.
pub trait MetricsSink: Send + Sync + 'static {
    fn incr(&self, name: &str);
    fn observe(&self, name: &str, value: u64);
}

/// `metrics(counter)`: record stream lifecycle counters (`stream.started`,
/// `stream.item`, `stream.error`, `stream.completed`,
/// `stream.total_items`) against `counter`. Pass-through otherwise.
pub fn metrics<T, C>(counter: C) -> Flow<T, T>
where
    T: Send + 'static,
    C: MetricsSink,
{
    let counter = Arc::new(counter);
    Flow::new("metrics", move |mut input| {
        let counter = counter.clone();
        boxed(async_stream::stream! {
            let total = Arc::new(AtomicU64::new(0));
            counter.incr("stream.started");
            loop {
                match input.next().await {
                    Some(Ok(v)) => {
                        counter.incr("stream.item");
                        let n = total.fetch_add(1, Ordering::SeqCst) + 1;
                        counter.observe("stream.total_items", n);
                        yield Ok(v);
                    }
                    Some(Err(e)) => {
                        counter.incr("stream.error");
                        yield Err(e);
                        return;
                    }
                    None => {
                        counter.incr("stream.completed");
                        return;
                    }
                }
            }
        })
    })
}

/// Positional and timing metadata handed to an [`inspect`] callback.
#[derive(Debug, Clone, Copy)]
pub struct InspectMeta {
    /// Zero-based index of this item among all items seen so far.
    pub item_index: u64,
    /// One-based ordinal position of this item in the stream, i.e.
    /// `item_index + 1` — how many items have been delivered including
    /// this one.
    pub stream_position: u64,
    pub elapsed_time: std::time::Duration,
}

/// `inspect(f)`: call `f(&item, meta)` for every item as it passes
/// through, without altering it.
pub fn inspect<T, F>(f: F) -> Flow<T, T>
where
    T: Send + 'static,
    F: Fn(&T, InspectMeta) + Send + Sync + 'static,
{
    let f = Arc::new(f);
    Flow::new("inspect", move |mut input| {
        let f = f.clone();
        boxed(async_stream::stream! {
            let start = Instant::now();
            let mut index = 0u64;
            while let Some(item) = input.next().await {
                match item {
                    Ok(v) => {
                        f(&v, InspectMeta {
                            item_index: index,
                            stream_position: index + 1,
                            elapsed_time: start.elapsed(),
                        });
                        index += 1;
                        yield Ok(v);
                    }
                    Err(e) => { yield Err(e); return; }
                }
            }
        })
    })
}

/// `materialize`: convert items and termination into [`Notification`]
/// values. Errors never surface out-of-band as a `FlowError` here; they
/// are delivered as an in-band `Notification::OnError` and the stream
/// completes normally afterward.
pub fn materialize<T: Send + 'static>() -> Flow<T, Notification<T>> {
    Flow::new("materialize", |mut input| {
        boxed(async_stream::stream! {
            loop {
                match input.next().await {
                    Some(Ok(v)) => yield Ok(Notification::OnNext(v)),
                    Some(Err(e)) => {
                        yield Ok(Notification::OnError(e.to_string()));
                        return;
                    }
                    None => {
                        yield Ok(Notification::OnComplete);
                        return;
                    }
                }
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::Mutex;

    fn ints(xs: Vec<i32>) -> crate::stream::FlowStream<'static, i32> {
        boxed(stream::iter(xs.into_iter().map(Ok)))
    }

    struct CountingSink {
        events: Mutex<Vec<String>>,
    }

    impl MetricsSink for Arc<CountingSink> {
        fn incr(&self, name: &str) {
            self.events.lock().unwrap().push(name.to_string());
        }
        fn observe(&self, name: &str, value: u64) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{name}={value}"));
        }
    }

    #[tokio::test]
    async fn materialize_converts_completion() {
        let flow: Flow<i32, Notification<i32>> = materialize();
        let out = flow.to_list(ints(vec![1, 2])).await.unwrap();
        assert_eq!(
            out,
            vec![
                Notification::OnNext(1),
                Notification::OnNext(2),
                Notification::OnComplete
            ]
        );
    }

    #[tokio::test]
    async fn inspect_sees_every_item_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let flow = inspect(move |v: &i32, meta: InspectMeta| {
            seen2
                .lock()
                .unwrap()
                .push((*v, meta.item_index, meta.stream_position));
        });
        let out = flow.to_list(ints(vec![10, 20, 30])).await.unwrap();
        assert_eq!(out, vec![10, 20, 30]);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(10, 0, 1), (20, 1, 2), (30, 2, 3)]
        );
    }

    #[tokio::test]
    async fn metrics_counts_lifecycle_events() {
        let sink = Arc::new(CountingSink {
            events: Mutex::new(Vec::new()),
        });
        let flow = metrics(sink.clone());
        let out = flow.to_list(ints(vec![1, 2])).await.unwrap();
        assert_eq!(out, vec![1, 2]);
        let events = sink.events.lock().unwrap();
        assert!(events.contains(&"stream.started".to_string()));
        assert!(events.contains(&"stream.completed".to_string()));
    }
}
