//! Concurrency combinators (spec §4.7).
//!
//! Global invariants every combinator in this module upholds: cancelling
//! the consumer of the composite flow cancels every in-flight child
//! before the composite reports termination (dropping the composite
//! stream drops every child future/stream it owns, which is how
//! cancellation propagates in this crate — see `src/stream.rs`), and a
//! slow downstream bounds upstream advancement because nothing here ever
//! buffers unboundedly.
//!
//! `parallel`, `race`, and `zip` are implemented as fixed-arity 2- and
//! 3-child variants (`parallel2`/`parallel3`, `race2`/`race3`,
//! `zip2`/`zip3`), which is as far as spec §4.7's own examples go; the
//! teacher workspace's `variadics` crate solves the general N-ary
//! heterogeneous-tuple problem, but pulling in its macro DSL for this
//! crate's modest arity needs would cost more than it buys (documented in
//! `DESIGN.md`).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::future::{self, FutureExt};
use futures::stream::{self, StreamExt};

use crate::error::FlowError;
use crate::flow::Flow;
use crate::stream::{boxed, FlowStream};

type ItemFuture<Out> = Pin<Box<dyn Future<Output = Result<Out, FlowError>> + Send>>;

fn run_one<In, Out>(flow: &Flow<In, Out>, item: In) -> ItemFuture<Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    let one = boxed(stream::once(async move { Ok(item) }));
    let mut out = flow.apply(one);
    async move {
        match out.next().await {
            Some(result) => result,
            None => Err(FlowError::execution(
                "parallel",
                "child flow produced no output for an input item",
            )),
        }
    }
    .boxed()
}

/// `parallel(f1, f2)`: fan-out identity over a 2-tuple of children. Each
/// input item is dispatched to every child, which run concurrently; the
/// output tuple has positional alignment.
pub fn parallel2<In, O1, O2>(f1: Flow<In, O1>, f2: Flow<In, O2>) -> Flow<In, (O1, O2)>
where
    In: Clone + Send + 'static,
    O1: Send + 'static,
    O2: Send + 'static,
{
    Flow::new("parallel(2)", move |mut input: FlowStream<'_, In>| {
        let f1 = f1.clone();
        let f2 = f2.clone();
        boxed(async_stream::stream! {
            while let Some(item) = input.next().await {
                match item {
                    Ok(v) => {
                        let (r1, r2) = future::join(
                            run_one(&f1, v.clone()),
                            run_one(&f2, v),
                        ).await;
                        yield Ok((r1?, r2?));
                    }
                    Err(e) => { yield Err(e); return; }
                }
            }
        })
    })
}

/// `parallel(f1, f2, f3)`: three-way variant of [`parallel2`].
pub fn parallel3<In, O1, O2, O3>(
    f1: Flow<In, O1>,
    f2: Flow<In, O2>,
    f3: Flow<In, O3>,
) -> Flow<In, (O1, O2, O3)>
where
    In: Clone + Send + 'static,
    O1: Send + 'static,
    O2: Send + 'static,
    O3: Send + 'static,
{
    Flow::new("parallel(3)", move |mut input: FlowStream<'_, In>| {
        let f1 = f1.clone();
        let f2 = f2.clone();
        let f3 = f3.clone();
        boxed(async_stream::stream! {
            while let Some(item) = input.next().await {
                match item {
                    Ok(v) => {
                        let (r1, r2, r3) = future::join3(
                            run_one(&f1, v.clone()),
                            run_one(&f2, v.clone()),
                            run_one(&f3, v),
                        ).await;
                        yield Ok((r1?, r2?, r3?));
                    }
                    Err(e) => { yield Err(e); return; }
                }
            }
        })
    })
}

/// `race(f1, f2)`: per input item, run both children concurrently, emit
/// the first result, and drop (cancel) the other.
pub fn race2<In, Out>(f1: Flow<In, Out>, f2: Flow<In, Out>) -> Flow<In, Out>
where
    In: Clone + Send + 'static,
    Out: Send + 'static,
{
    Flow::new("race(2)", move |mut input: FlowStream<'_, In>| {
        let f1 = f1.clone();
        let f2 = f2.clone();
        boxed(async_stream::stream! {
            while let Some(item) = input.next().await {
                match item {
                    Ok(v) => {
                        let winner = future::select(run_one(&f1, v.clone()), run_one(&f2, v)).await;
                        let result = match winner {
                            future::Either::Left((r, _loser)) => r,
                            future::Either::Right((r, _loser)) => r,
                        };
                        yield result;
                    }
                    Err(e) => { yield Err(e); return; }
                }
            }
        })
    })
}

/// `race(f1, f2, f3)`: three-way variant of [`race2`].
pub fn race3<In, Out>(f1: Flow<In, Out>, f2: Flow<In, Out>, f3: Flow<In, Out>) -> Flow<In, Out>
where
    In: Clone + Send + 'static,
    Out: Send + 'static,
{
    Flow::new("race(3)", move |mut input: FlowStream<'_, In>| {
        let f1 = f1.clone();
        let f2 = f2.clone();
        let f3 = f3.clone();
        boxed(async_stream::stream! {
            while let Some(item) = input.next().await {
                match item {
                    Ok(v) => {
                        let pending = vec![
                            run_one(&f1, v.clone()),
                            run_one(&f2, v.clone()),
                            run_one(&f3, v),
                        ];
                        let (result, _index, _rest) = future::select_all(pending).await;
                        yield result;
                    }
                    Err(e) => { yield Err(e); return; }
                }
            }
        })
    })
}

/// `parallel_map(f, max_concurrent, preserve_order)`: apply `f` to items
/// with bounded concurrency. `preserve_order = true` uses
/// [`StreamExt::buffered`] so output order equals input order;
/// otherwise [`StreamExt::buffer_unordered`] so output order is
/// completion order.
pub fn parallel_map<In, Out, F, Fut>(
    f: F,
    max_concurrent: usize,
    preserve_order: bool,
) -> Result<Flow<In, Out>, FlowError>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: Fn(In) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Out, FlowError>> + Send + 'static,
{
    if max_concurrent == 0 {
        return Err(FlowError::configuration(
            "parallel_map",
            "max_concurrent must be positive",
        ));
    }
    let f = Arc::new(f);
    let name = if preserve_order {
        "parallel_map(ordered)"
    } else {
        "parallel_map(unordered)"
    };
    Ok(Flow::new(name, move |input| {
        let f = f.clone();
        let futures_stream = input.map(move |item| {
            let f = f.clone();
            async move {
                match item {
                    Ok(v) => f(v).await,
                    Err(e) => Err(e),
                }
            }
        });
        if preserve_order {
            boxed(futures_stream.buffered(max_concurrent))
        } else {
            boxed(futures_stream.buffer_unordered(max_concurrent))
        }
    }))
}

/// `merge(s1, s2)`: consume both streams concurrently, emitting items as
/// they arrive from either source. Completes when both sources complete;
/// any source error terminates the merge immediately (its unread sibling
/// stream is dropped, cancelling it).
pub fn merge<T: Send + 'static>(
    sources: Vec<FlowStream<'static, T>>,
) -> FlowStream<'static, T> {
    boxed(async_stream::stream! {
        let mut select_all = stream::select_all(sources);
        while let Some(item) = select_all.next().await {
            match item {
                Ok(v) => yield Ok(v),
                Err(e) => { yield Err(e); return; }
            }
        }
    })
}

/// `zip(s1, s2)`: emit tuples pulled one-per-source; completes when
/// either source completes.
pub fn zip2<A, B>(
    a: FlowStream<'static, A>,
    b: FlowStream<'static, B>,
) -> FlowStream<'static, (A, B)>
where
    A: Send + 'static,
    B: Send + 'static,
{
    boxed(async_stream::stream! {
        let mut a = a;
        let mut b = b;
        loop {
            let (ai, bi) = future::join(a.next(), b.next()).await;
            match (ai, bi) {
                (Some(Ok(av)), Some(Ok(bv))) => yield Ok((av, bv)),
                (Some(Err(e)), _) | (_, Some(Err(e))) => { yield Err(e); return; }
                _ => return,
            }
        }
    })
}

/// `zip(s1, s2, s3)`: three-way variant of [`zip2`].
pub fn zip3<A, B, C>(
    a: FlowStream<'static, A>,
    b: FlowStream<'static, B>,
    c: FlowStream<'static, C>,
) -> FlowStream<'static, (A, B, C)>
where
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
{
    boxed(async_stream::stream! {
        let mut a = a;
        let mut b = b;
        let mut c = c;
        loop {
            let (ai, bi, ci) = future::join3(a.next(), b.next(), c.next()).await;
            match (ai, bi, ci) {
                (Some(Ok(av)), Some(Ok(bv)), Some(Ok(cv))) => yield Ok((av, bv, cv)),
                (Some(Err(e)), _, _) | (_, Some(Err(e)), _) | (_, _, Some(Err(e))) => {
                    yield Err(e);
                    return;
                }
                _ => return,
            }
        }
    })
}

/// `chain(s1, s2, ...)`: fully drain each source in order before moving
/// to the next.
pub fn chain<T: Send + 'static>(sources: Vec<FlowStream<'static, T>>) -> FlowStream<'static, T> {
    boxed(stream::iter(sources).flatten())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::from_sync_fn;
    use futures::stream;

    fn ints(xs: Vec<i32>) -> FlowStream<'static, i32> {
        boxed(stream::iter(xs.into_iter().map(Ok)))
    }

    #[tokio::test]
    async fn parallel_positional_alignment() {
        let double = from_sync_fn(|x: i32| x * 2);
        let square = from_sync_fn(|x: i32| x * x);
        let flow = parallel2(double, square);
        let out = flow.to_list(ints(vec![1, 2, 3])).await.unwrap();
        assert_eq!(out, vec![(2, 1), (4, 4), (6, 9)]);
    }

    #[tokio::test]
    async fn parallel_map_preserves_order_when_requested() {
        let flow = parallel_map(
            |x: i32| async move { Ok::<_, FlowError>(x * 10) },
            4,
            true,
        )
        .unwrap();
        let out = flow.to_list(ints(vec![1, 2, 3, 4, 5])).await.unwrap();
        assert_eq!(out, vec![10, 20, 30, 40, 50]);
    }

    #[tokio::test]
    async fn merge_combines_all_sources() {
        let merged = merge(vec![ints(vec![1, 2]), ints(vec![3, 4])]);
        let mut out: Vec<i32> = Vec::new();
        let mut merged = merged;
        while let Some(item) = merged.next().await {
            out.push(item.unwrap());
        }
        out.sort();
        assert_eq!(out, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn zip_stops_at_shorter_source() {
        let zipped = zip2(ints(vec![1, 2, 3]), ints(vec![10, 20]));
        let mut zipped = zipped;
        let mut out = Vec::new();
        while let Some(item) = zipped.next().await {
            out.push(item.unwrap());
        }
        assert_eq!(out, vec![(1, 10), (2, 20)]);
    }

    #[tokio::test]
    async fn zip3_stops_at_shortest_source() {
        let zipped = zip3(ints(vec![1, 2, 3]), ints(vec![10, 20]), ints(vec![100, 200, 300]));
        let mut zipped = zipped;
        let mut out = Vec::new();
        while let Some(item) = zipped.next().await {
            out.push(item.unwrap());
        }
        assert_eq!(out, vec![(1, 10, 100), (2, 20, 200)]);
    }

    #[tokio::test]
    async fn race3_emits_the_first_child_to_finish() {
        let fast = from_sync_fn(|x: i32| x);
        let also_fast = from_sync_fn(|x: i32| x * 10);
        let also_fast2 = from_sync_fn(|x: i32| x * 100);
        let flow = race3(fast, also_fast, also_fast2);
        let out = flow.to_list(ints(vec![1, 2, 3])).await.unwrap();
        assert_eq!(out.len(), 3);
    }

    #[tokio::test]
    async fn chain_drains_sequentially() {
        let chained = chain(vec![ints(vec![1, 2]), ints(vec![3, 4])]);
        let mut chained = chained;
        let mut out = Vec::new();
        while let Some(item) = chained.next().await {
            out.push(item.unwrap());
        }
        assert_eq!(out, vec![1, 2, 3, 4]);
    }
}
