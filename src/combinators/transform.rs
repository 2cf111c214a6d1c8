//! Transformation combinators (spec §4.3): one-to-one or one-to-many at
//! the item level, strictly order-preserving unless stated otherwise.

use std::sync::Arc;

use futures::StreamExt;

use crate::error::FlowError;
use crate::flow::Flow;
use crate::stream::boxed;

/// `map(f)`: emit `f(x)` per input item.
pub fn map<In, Out, F>(f: F) -> Flow<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: Fn(In) -> Out + Send + Sync + 'static,
{
    let f = Arc::new(f);
    Flow::new("map", move |input| {
        let f = f.clone();
        boxed(input.map(move |item| item.map(|v| f(v))))
    })
}

/// `filter(p)`: emit `x` only if `p(x)` is true.
pub fn filter<T, F>(p: F) -> Flow<T, T>
where
    T: Send + 'static,
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    let p = Arc::new(p);
    Flow::new("filter", move |input| {
        let p = p.clone();
        boxed(input.filter_map(move |item| {
            let p = p.clone();
            async move {
                match item {
                    Ok(v) => {
                        if p(&v) {
                            Some(Ok(v))
                        } else {
                            None
                        }
                    }
                    Err(e) => Some(Err(e)),
                }
            }
        }))
    })
}

/// `flat_map(g)`: for each input item, fully drain the synchronous
/// sub-sequence produced by `g(x)` before pulling the next input.
pub fn flat_map<In, Out, I, F>(g: F) -> Flow<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
    I: IntoIterator<Item = Out> + Send + 'static,
    I::IntoIter: Send + 'static,
    F: Fn(In) -> I + Send + Sync + 'static,
{
    let g = Arc::new(g);
    Flow::new("flat_map", move |mut input| {
        let g = g.clone();
        boxed(async_stream::stream! {
            while let Some(item) = input.next().await {
                match item {
                    Ok(v) => {
                        for out in g(v) {
                            yield Ok(out);
                        }
                    }
                    Err(e) => { yield Err(e); return; }
                }
            }
        })
    })
}

/// `flatten`: equivalent to `flat_map(identity)` over a stream of
/// iterables; sub-sequences are drained in arrival order.
pub fn flatten<Out, I>() -> Flow<I, Out>
where
    Out: Send + 'static,
    I: IntoIterator<Item = Out> + Send + 'static,
    I::IntoIter: Send + 'static,
{
    flat_map(|xs: I| xs)
}

/// `guard(p, msg)`: identity if `p(x)` holds for every item; fails with
/// [`FlowError::Validation`] on the first violation and does not emit the
/// offending item.
pub fn guard<T, F>(p: F, message: impl Into<String>) -> Flow<T, T>
where
    T: Clone + Send + 'static,
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    let p = Arc::new(p);
    let message: Arc<str> = Arc::from(message.into());
    Flow::new("guard", move |mut input| {
        let p = p.clone();
        let message = message.clone();
        boxed(async_stream::stream! {
            while let Some(item) = input.next().await {
                match item {
                    Ok(v) => {
                        if p(&v) {
                            yield Ok(v);
                        } else {
                            yield Err(FlowError::validation_with_item("guard", message.to_string(), v));
                            return;
                        }
                    }
                    Err(e) => { yield Err(e); return; }
                }
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::from_iterable;
    use crate::stream::boxed;
    use futures::stream;

    fn ints(xs: Vec<i32>) -> crate::stream::FlowStream<'static, i32> {
        boxed(stream::iter(xs.into_iter().map(Ok)))
    }

    #[tokio::test]
    async fn map_then_filter_scenario_a() {
        let flow = map(|x: i32| x + 1).then(&filter(|x: &i32| x % 2 == 0));
        let out = flow.to_list(ints(vec![0, 1, 2, 3, 4])).await.unwrap();
        assert_eq!(out, vec![2, 4]);
    }

    #[tokio::test]
    async fn guard_stops_on_first_violation() {
        let flow: Flow<i32, i32> = guard(|x: &i32| *x < 3, "too big");
        let err = flow.to_list(ints(vec![1, 2, 3, 4])).await.unwrap_err();
        assert!(matches!(err, FlowError::Validation { .. }));
    }

    #[tokio::test]
    async fn flat_map_drains_in_order() {
        let flow = flat_map(|x: i32| vec![x, x * 10]);
        let out = flow.to_list(ints(vec![1, 2])).await.unwrap();
        assert_eq!(out, vec![1, 10, 2, 20]);
    }

    #[tokio::test]
    async fn from_iterable_ignores_input() {
        let flow: Flow<i32, i32> = from_iterable(vec![7, 8, 9]);
        let out = flow.to_list(ints(vec![])).await.unwrap();
        assert_eq!(out, vec![7, 8, 9]);
    }
}
