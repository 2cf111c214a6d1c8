//! Aggregation combinators (spec §4.5). Ordering within a window/batch is
//! input order.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use futures::StreamExt;

use crate::error::{FlowError, FlowResult};
use crate::flow::Flow;
use crate::stream::{boxed, FlowStream};

/// `batch(n)`: group into lists of exactly `n` items, emitting a final
/// partial list if the stream ends. Rejects `n == 0` at construction
/// with [`FlowError::Configuration`], never at first poll.
pub fn batch<T: Send + 'static>(n: usize) -> FlowResult<Flow<T, Vec<T>>> {
    if n == 0 {
        return Err(FlowError::configuration("batch", "batch size must be positive"));
    }
    Ok(Flow::new("batch", move |mut input| {
        boxed(async_stream::stream! {
            let mut buf: Vec<T> = Vec::with_capacity(n);
            while let Some(item) = input.next().await {
                match item {
                    Ok(v) => {
                        buf.push(v);
                        if buf.len() == n {
                            yield Ok(std::mem::replace(&mut buf, Vec::with_capacity(n)));
                        }
                    }
                    Err(e) => {
                        if !buf.is_empty() {
                            yield Ok(std::mem::take(&mut buf));
                        }
                        yield Err(e);
                        return;
                    }
                }
            }
            if !buf.is_empty() {
                yield Ok(buf);
            }
        })
    }))
}

/// `chunk(n)`: alias of [`batch`].
pub fn chunk<T: Send + 'static>(n: usize) -> FlowResult<Flow<T, Vec<T>>> {
    batch(n)
}

/// `window(size, step)`: emit sliding lists of length `size` advancing by
/// `step`; partial trailing windows are never emitted. Rejects a
/// non-positive `size` or `step` at construction.
pub fn window<T: Clone + Send + 'static>(size: usize, step: usize) -> FlowResult<Flow<T, Vec<T>>> {
    if size == 0 || step == 0 {
        return Err(FlowError::configuration(
            "window",
            "window size and step must be positive",
        ));
    }
    Ok(Flow::new("window", move |mut input| {
        boxed(async_stream::stream! {
            let mut buf: VecDeque<T> = VecDeque::with_capacity(size);
            while let Some(item) = input.next().await {
                match item {
                    Ok(v) => {
                        buf.push_back(v);
                        if buf.len() == size {
                            yield Ok(buf.iter().cloned().collect());
                            let mut to_drop = step;
                            while to_drop > 0 && !buf.is_empty() {
                                buf.pop_front();
                                to_drop -= 1;
                            }
                            // `step > size`: the window skips items between
                            // emissions that were never buffered at all —
                            // pull and discard them straight from upstream.
                            while to_drop > 0 {
                                match input.next().await {
                                    Some(Ok(_)) => to_drop -= 1,
                                    Some(Err(e)) => { yield Err(e); return; }
                                    None => break,
                                }
                            }
                        }
                    }
                    Err(e) => { yield Err(e); return; }
                }
            }
        })
    }))
}

/// `scan(f, seed)`: emit `seed`, then for each input `x` emit
/// `f(acc, x)` where `acc` is the previously emitted value.
pub fn scan<T, A, F>(f: F, seed: A) -> Flow<T, A>
where
    T: Send + 'static,
    A: Clone + Send + Sync + 'static,
    F: Fn(&A, T) -> A + Send + Sync + 'static,
{
    let f = Arc::new(f);
    Flow::new("scan", move |mut input: FlowStream<'_, T>| {
        let f = f.clone();
        let seed = seed.clone();
        boxed(async_stream::stream! {
            let mut acc = seed;
            yield Ok(acc.clone());
            while let Some(item) = input.next().await {
                match item {
                    Ok(v) => {
                        acc = f(&acc, v);
                        yield Ok(acc.clone());
                    }
                    Err(e) => { yield Err(e); return; }
                }
            }
        })
    })
}

/// `group_by(key)`: at stream end, emit `(k, [xs])` pairs — one per
/// distinct key — in first-appearance order, each list in input order.
pub fn group_by<T, K, F>(key: F) -> Flow<T, (K, Vec<T>)>
where
    T: Send + 'static,
    K: Eq + Hash + Clone + Send + 'static,
    F: Fn(&T) -> K + Send + Sync + 'static,
{
    let key = Arc::new(key);
    Flow::new("group_by", move |mut input| {
        let key = key.clone();
        boxed(async_stream::stream! {
            let mut order: Vec<K> = Vec::new();
            let mut groups: HashMap<K, Vec<T>> = HashMap::new();
            while let Some(item) = input.next().await {
                match item {
                    Ok(v) => {
                        let k = key(&v);
                        match groups.get_mut(&k) {
                            Some(bucket) => bucket.push(v),
                            None => {
                                order.push(k.clone());
                                groups.insert(k, vec![v]);
                            }
                        }
                    }
                    Err(e) => { yield Err(e); return; }
                }
            }
            for k in order {
                if let Some(bucket) = groups.remove(&k) {
                    yield Ok((k, bucket));
                }
            }
        })
    })
}

/// `distinct(key)`: emit only the first occurrence of each key. The
/// internal key set is bounded only by cardinality; callers are
/// responsible for not running this over an unbounded-cardinality stream.
pub fn distinct<T, K, F>(key: F) -> Flow<T, T>
where
    T: Send + 'static,
    K: Eq + Hash + Send + 'static,
    F: Fn(&T) -> K + Send + Sync + 'static,
{
    let key = Arc::new(key);
    Flow::new("distinct", move |mut input| {
        let key = key.clone();
        boxed(async_stream::stream! {
            let mut seen = rustc_hash::FxHashSet::default();
            while let Some(item) = input.next().await {
                match item {
                    Ok(v) => {
                        if seen.insert(key(&v)) {
                            yield Ok(v);
                        }
                    }
                    Err(e) => { yield Err(e); return; }
                }
            }
        })
    })
}

/// `distinct` with the identity key, the common case.
pub fn distinct_by_value<T>() -> Flow<T, T>
where
    T: Eq + Hash + Clone + Send + 'static,
{
    distinct(|v: &T| v.clone())
}

/// `pairwise`: emit consecutive `(prev, curr)` tuples; an input shorter
/// than 2 emits nothing.
pub fn pairwise<T: Clone + Send + 'static>() -> Flow<T, (T, T)> {
    Flow::new("pairwise", |mut input: FlowStream<'_, T>| {
        boxed(async_stream::stream! {
            let mut prev: Option<T> = None;
            while let Some(item) = input.next().await {
                match item {
                    Ok(v) => {
                        if let Some(p) = prev.take() {
                            yield Ok((p, v.clone()));
                        }
                        prev = Some(v);
                    }
                    Err(e) => { yield Err(e); return; }
                }
            }
        })
    })
}

/// `memoize(key)`: every item is emitted, but items whose key has been
/// seen before are replaced by the cached first value for that key.
pub fn memoize<T, K, F>(key: F) -> Flow<T, T>
where
    T: Clone + Send + 'static,
    K: Eq + Hash + Send + 'static,
    F: Fn(&T) -> K + Send + Sync + 'static,
{
    let key = Arc::new(key);
    Flow::new("memoize", move |mut input| {
        let key = key.clone();
        boxed(async_stream::stream! {
            let mut cache: HashMap<K, T> = HashMap::new();
            while let Some(item) = input.next().await {
                match item {
                    Ok(v) => {
                        let k = key(&v);
                        if let Some(cached) = cache.get(&k) {
                            yield Ok(cached.clone());
                        } else {
                            cache.insert(k, v.clone());
                            yield Ok(v);
                        }
                    }
                    Err(e) => { yield Err(e); return; }
                }
            }
        })
    })
}

/// `buffer(trigger)`: accumulate items into a list; whenever `trigger`
/// emits, flush the accumulated list as one item and reset; flush any
/// remainder at input completion.
pub fn buffer<T, Trigger>(trigger: crate::stream::FlowStream<'static, Trigger>) -> Flow<T, Vec<T>>
where
    T: Send + 'static,
    Trigger: Send + 'static,
{
    let trigger = Arc::new(tokio::sync::Mutex::new(Some(trigger)));
    Flow::new("buffer", move |mut input| {
        let trigger = trigger.clone();
        boxed(async_stream::stream! {
            let mut trigger = trigger.lock().await.take().expect("buffer applied more than once");
            let mut buf: Vec<T> = Vec::new();
            let mut input_done = false;
            let mut trigger_done = false;
            loop {
                if input_done && trigger_done {
                    break;
                }
                tokio::select! {
                    biased;
                    next = input.next(), if !input_done => {
                        match next {
                            Some(Ok(v)) => buf.push(v),
                            Some(Err(e)) => { yield Err(e); return; }
                            None => input_done = true,
                        }
                    }
                    next = trigger.next(), if !trigger_done => {
                        match next {
                            Some(Ok(_)) => {
                                yield Ok(std::mem::take(&mut buf));
                            }
                            Some(Err(e)) => { yield Err(e); return; }
                            None => trigger_done = true,
                        }
                    }
                }
            }
            if !buf.is_empty() {
                yield Ok(buf);
            }
        })
    })
}

/// `expand(g, max_depth)`: recursive frontier expansion. Emits every
/// input item, then for each, recursively expands via `g` up to
/// `max_depth` generations, emitting every visited item in
/// parent-before-children order.
pub fn expand<T, F, Fut>(g: F, max_depth: u32) -> Flow<T, T>
where
    T: Clone + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Vec<T>> + Send + 'static,
{
    let g = Arc::new(g);
    Flow::new("expand", move |mut input: FlowStream<'_, T>| {
        let g = g.clone();
        boxed(async_stream::stream! {
            while let Some(item) = input.next().await {
                match item {
                    Ok(root) => {
                        let mut frontier: VecDeque<(T, u32)> = VecDeque::new();
                        frontier.push_back((root.clone(), 0));
                        yield Ok(root);
                        while let Some((node, depth)) = frontier.pop_front() {
                            if depth >= max_depth {
                                continue;
                            }
                            for child in g(node).await {
                                frontier.push_back((child.clone(), depth + 1));
                                yield Ok(child);
                            }
                        }
                    }
                    Err(e) => { yield Err(e); return; }
                }
            }
        })
    })
}

/// `finalize(fn)`: identity over items; invokes `fn` exactly once on
/// stream termination regardless of outcome (completion, error, or
/// cancellation). Implemented as a `Drop` guard rather than an
/// end-of-stream check, since cancellation means the stream is simply
/// dropped without ever observing `None`.
pub fn finalize<T, Fn_>(on_terminate: Fn_) -> Flow<T, T>
where
    T: Send + 'static,
    Fn_: FnOnce() + Send + Sync + 'static,
{
    Flow::new("finalize", move |input: FlowStream<'_, T>| {
        boxed(FinalizeStream {
            inner: input,
            on_terminate: Some(Box::new(on_terminate)),
        })
    })
}

/// `inner` is already `Pin<Box<dyn Stream>>`, so `FinalizeStream` itself
/// needs no structural pinning and stays `Unpin`.
struct FinalizeStream<'a, T> {
    inner: crate::stream::FlowStream<'a, T>,
    on_terminate: Option<Box<dyn FnOnce() + Send>>,
}

impl<'a, T> Drop for FinalizeStream<'a, T> {
    fn drop(&mut self) {
        if let Some(f) = self.on_terminate.take() {
            f();
        }
    }
}

impl<'a, T: Send> futures::Stream for FinalizeStream<'a, T> {
    type Item = Result<T, FlowError>;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let poll = this.inner.as_mut().poll_next(cx);
        if matches!(poll, std::task::Poll::Ready(None)) {
            if let Some(f) = this.on_terminate.take() {
                f();
            }
        }
        poll
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn ints(xs: Vec<i32>) -> crate::stream::FlowStream<'static, i32> {
        boxed(stream::iter(xs.into_iter().map(Ok)))
    }

    #[tokio::test]
    async fn batch_rejects_zero_size() {
        assert!(matches!(
            batch::<i32>(0).unwrap_err(),
            FlowError::Configuration { .. }
        ));
    }

    #[tokio::test]
    async fn batch_totality() {
        let flow: Flow<i32, Vec<i32>> = batch(3).unwrap();
        let out = flow
            .to_list(ints((1..=7).collect()))
            .await
            .unwrap();
        assert_eq!(out, vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]);
    }

    #[tokio::test]
    async fn scan_emits_seed_first() {
        let flow: Flow<i32, i32> = scan(|acc, x| acc + x, 0);
        let out = flow.to_list(ints(vec![1, 2, 3, 4])).await.unwrap();
        assert_eq!(out, vec![0, 1, 3, 6, 10]);

        let empty: crate::stream::FlowStream<'static, i32> = boxed(stream::iter(Vec::<Result<i32, FlowError>>::new()));
        let out_empty = flow.to_list(empty).await.unwrap();
        assert_eq!(out_empty, vec![0]);
    }

    #[tokio::test]
    async fn distinct_first_occurrence() {
        let flow: Flow<i32, i32> = distinct_by_value();
        let out = flow
            .to_list(ints(vec![1, 1, 2, 3, 3, 3, 4]))
            .await
            .unwrap();
        assert_eq!(out, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn distinct_by_key() {
        let words = vec!["a", "bb", "c", "dd", "eee"]
            .into_iter()
            .map(String::from);
        let stream = boxed(stream::iter(words.map(Ok)));
        let flow: Flow<String, String> = distinct(|s: &String| s.len());
        let out = flow.to_list(stream).await.unwrap();
        assert_eq!(out, vec!["a", "bb", "eee"]);
    }

    #[tokio::test]
    async fn window_sliding() {
        let flow: Flow<i32, Vec<i32>> = window(3, 2).unwrap();
        let out = flow.to_list(ints((0..10).collect())).await.unwrap();
        assert_eq!(
            out,
            vec![
                vec![0, 1, 2],
                vec![2, 3, 4],
                vec![4, 5, 6],
                vec![6, 7, 8],
            ]
        );
    }

    #[tokio::test]
    async fn window_step_larger_than_size_skips_items() {
        let flow: Flow<i32, Vec<i32>> = window(2, 3).unwrap();
        let out = flow.to_list(ints((0..6).collect())).await.unwrap();
        assert_eq!(out, vec![vec![0, 1], vec![3, 4]]);
    }

    #[tokio::test]
    async fn group_by_preserves_first_appearance() {
        let flow: Flow<i32, (i32, Vec<i32>)> = group_by(|x: &i32| x % 2);
        let out = flow
            .to_list(ints(vec![1, 2, 3, 4, 5, 6]))
            .await
            .unwrap();
        assert_eq!(out, vec![(1, vec![1, 3, 5]), (0, vec![2, 4, 6])]);
    }

    #[tokio::test]
    async fn pairwise_emits_consecutive_tuples() {
        let flow: Flow<i32, (i32, i32)> = pairwise();
        let out = flow.to_list(ints(vec![1, 2, 3])).await.unwrap();
        assert_eq!(out, vec![(1, 2), (2, 3)]);
    }

    #[tokio::test]
    async fn finalize_runs_once_on_normal_completion() {
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count2 = count.clone();
        let flow: Flow<i32, i32> = finalize(move || {
            count2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        let _ = flow.to_list(ints(vec![1, 2, 3])).await.unwrap();
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn finalize_runs_once_on_cancellation() {
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count2 = count.clone();
        let flow: Flow<i32, i32> = finalize(move || {
            count2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        {
            let mut stream = flow.apply(ints(vec![1, 2, 3]));
            let _ = stream.next().await;
            // Dropping `stream` here cancels it mid-flight.
        }
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
