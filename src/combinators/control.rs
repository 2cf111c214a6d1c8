//! Control combinators (spec §4.4).

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

use crate::flow::Flow;
use crate::stream::{boxed, FlowStream};

/// `take(n)`: emit at most the first `n` items, then complete and cancel
/// the upstream (dropping it stops polling, releasing its resources).
pub fn take<T: Send + 'static>(n: usize) -> Flow<T, T> {
    Flow::new("take", move |input| boxed(input.take(n)))
}

/// `skip(n)`: discard the first `n` items, emit the rest.
pub fn skip<T: Send + 'static>(n: usize) -> Flow<T, T> {
    Flow::new("skip", move |input| boxed(input.skip(n)))
}

/// `until(p)`: emit items up to and including the first `x` with `p(x)`
/// true, then complete.
pub fn until<T, F>(p: F) -> Flow<T, T>
where
    T: Send + 'static,
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    let p = Arc::new(p);
    Flow::new("until", move |mut input| {
        let p = p.clone();
        boxed(async_stream::stream! {
            while let Some(item) = input.next().await {
                match item {
                    Ok(v) => {
                        let stop = p(&v);
                        yield Ok(v);
                        if stop {
                            return;
                        }
                    }
                    Err(e) => { yield Err(e); return; }
                }
            }
        })
    })
}

/// `collect`: buffer the entire stream into one list value; emit it as a
/// single item when the stream completes.
pub fn collect<T: Send + 'static>() -> Flow<T, Vec<T>> {
    Flow::new("collect", |mut input| {
        boxed(async_stream::stream! {
            let mut buf = Vec::new();
            while let Some(item) = input.next().await {
                match item {
                    Ok(v) => buf.push(v),
                    Err(e) => { yield Err(e); return; }
                }
            }
            yield Ok(buf);
        })
    })
}

/// A multi-subscriber handle produced by [`share`]. Unlike every other
/// combinator, `share` cannot return a plain `Flow`: the whole point is to
/// turn a single-consumer stream into one that many consumers can attach
/// to, which breaks the one-`Stream`-out-per-`apply` shape. Call
/// [`Shared::subscribe`] once per consumer; the upstream flow is driven
/// exactly once, in a background task, on first subscription.
pub struct Shared<T> {
    tx: broadcast::Sender<Result<T, String>>,
    driver: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
    token: Arc<CancellationToken>,
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            driver: self.driver.clone(),
            token: self.token.clone(),
        }
    }
}

impl<T> Drop for Shared<T> {
    /// Cancels the background driver task once the last handle to this
    /// shared flow goes away, per spec §5's "cancellation releases" rule —
    /// without this, a `share()`d flow with no remaining subscribers would
    /// keep its driver task (and whatever it holds) alive indefinitely.
    fn drop(&mut self) {
        if Arc::strong_count(&self.token) == 1 {
            self.token.cancel();
        }
    }
}

impl<T: Clone + Send + 'static> Shared<T> {
    /// Attach a new subscriber. Backpressure is the minimum of all
    /// subscribers' demand: a slow subscriber's unconsumed broadcast queue
    /// fills up and lags rather than slowing down the others, since a
    /// true "wait for the slowest" fan-out would let one stalled consumer
    /// block every other.
    pub fn subscribe(&self) -> FlowStream<'static, T> {
        let mut rx = self.tx.subscribe();
        boxed(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(Ok(v)) => yield Ok(v),
                    Ok(Err(e)) => {
                        yield Err(crate::error::FlowError::execution("share", e));
                        return;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        })
    }
}

/// Turn `flow` applied to `input` into a [`Shared`] fan-out handle with up
/// to `capacity` buffered items per subscriber before lagging.
pub fn share<In, Out>(flow: &Flow<In, Out>, input: FlowStream<'static, In>, capacity: usize) -> Shared<Out>
where
    In: Send + 'static,
    Out: Clone + Send + Sync + 'static,
{
    let (tx, _rx) = broadcast::channel(capacity.max(1));
    let tx2 = tx.clone();
    let token = Arc::new(CancellationToken::new());
    let child_token = token.child_token();
    let mut stream = flow.apply(input);
    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = child_token.cancelled() => break,
                item = stream.next() => match item {
                    Some(item) => {
                        let forwarded = item.map_err(|e| e.to_string());
                        let is_err = forwarded.is_err();
                        let _ = tx2.send(forwarded);
                        if is_err {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });
    Shared {
        tx,
        driver: Arc::new(Mutex::new(Some(handle))),
        token,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn ints(xs: Vec<i32>) -> FlowStream<'static, i32> {
        boxed(stream::iter(xs.into_iter().map(Ok)))
    }

    #[tokio::test]
    async fn take_stops_after_n() {
        let flow: Flow<i32, i32> = take(2);
        let out = flow.to_list(ints(vec![1, 2, 3, 4])).await.unwrap();
        assert_eq!(out, vec![1, 2]);
    }

    #[tokio::test]
    async fn skip_drops_first_n() {
        let flow: Flow<i32, i32> = skip(2);
        let out = flow.to_list(ints(vec![1, 2, 3, 4])).await.unwrap();
        assert_eq!(out, vec![3, 4]);
    }

    #[tokio::test]
    async fn until_includes_matching_item() {
        let flow: Flow<i32, i32> = until(|x: &i32| *x == 3);
        let out = flow.to_list(ints(vec![1, 2, 3, 4, 5])).await.unwrap();
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn collect_buffers_whole_stream() {
        let flow: Flow<i32, Vec<i32>> = collect();
        let out = flow.to_list(ints(vec![1, 2, 3])).await.unwrap();
        assert_eq!(out, vec![vec![1, 2, 3]]);
    }
}
