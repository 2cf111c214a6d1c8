//! The flow core type (spec §4.1) and core constructors (spec §4.2).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;

use crate::error::{BoxError, FlowError, FlowResult};
use crate::metadata::{CompositionNode, Metadata};
use crate::stream::{boxed, FlowStream};

type Transform<In, Out> =
    dyn for<'a> Fn(FlowStream<'a, In>) -> FlowStream<'a, Out> + Send + Sync;

/// A named, immutable wrapper around a `Stream<In> -> Stream<Out>`
/// transform, plus metadata (spec §3 "Flow"). Cloning a `Flow` is cheap —
/// the transform is reference counted — and every clone is interchangeable
/// with the original: applying a flow never mutates it, so the same
/// instance may be applied to many streams.
pub struct Flow<In, Out> {
    name: Arc<str>,
    metadata: Metadata,
    transform: Arc<Transform<In, Out>>,
}

impl<In, Out> Clone for Flow<In, Out> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            metadata: self.metadata.clone(),
            transform: self.transform.clone(),
        }
    }
}

impl<In, Out> std::fmt::Debug for Flow<In, Out> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Flow({})", self.name)
    }
}

impl<In, Out> std::fmt::Display for Flow<In, Out> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl<In, Out> Flow<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Build a flow from a name and a transform function. Most callers
    /// should prefer a constructor in this module or a combinator in
    /// [`crate::combinators`]; this is the escape hatch for host
    /// applications wrapping their own collaborators (spec §6) as a flow.
    pub fn new<F>(name: impl Into<String>, transform: F) -> Self
    where
        F: for<'a> Fn(FlowStream<'a, In>) -> FlowStream<'a, Out> + Send + Sync + 'static,
    {
        let name: Arc<str> = Arc::from(name.into());
        let metadata = Metadata::new().with_node(CompositionNode::Leaf {
            name: name.to_string(),
            complexity: 1,
        });
        Self {
            name,
            metadata,
            transform: Arc::new(transform),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        // Preserve the recorded composition node unless the caller supplied
        // their own, so analysis can still walk the graph.
        let node = self.metadata.node().cloned();
        self.metadata = metadata;
        if self.metadata.node().is_none() {
            if let Some(node) = node {
                self.metadata = self.metadata.clone().with_node(node);
            }
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Apply this flow to a stream, producing the transformed stream. The
    /// only required operation (spec §4.1).
    pub fn apply<'a>(&self, input: FlowStream<'a, In>) -> FlowStream<'a, Out> {
        (self.transform)(input)
    }

    /// Sequential composition: `self` then `other`. Preserves the ordering
    /// and termination semantics of `self` followed by `other` (spec
    /// §4.1). Associative and has `identity` as a two-sided neutral
    /// element.
    pub fn then<Next>(&self, other: &Flow<Out, Next>) -> Flow<In, Next>
    where
        Next: Send + 'static,
    {
        let left = self.transform.clone();
        let right = other.transform.clone();
        let name: Arc<str> = Arc::from(format!("{} ∘ {}", self.name, other.name));
        let node = CompositionNode::Sequence(vec![
            self.metadata
                .node()
                .cloned()
                .map(Arc::new)
                .unwrap_or_else(|| {
                    Arc::new(CompositionNode::Leaf {
                        name: self.name.to_string(),
                        complexity: 1,
                    })
                }),
            other
                .metadata
                .node()
                .cloned()
                .map(Arc::new)
                .unwrap_or_else(|| {
                    Arc::new(CompositionNode::Leaf {
                        name: other.name.to_string(),
                        complexity: 1,
                    })
                }),
        ]);
        Flow {
            name,
            metadata: Metadata::new().with_node(node),
            transform: Arc::new(move |input| (right)((left)(input))),
        }
    }

    /// Alias of [`Flow::then`], read left-to-right as a pipe.
    pub fn pipe<Next>(&self, other: &Flow<Out, Next>) -> Flow<In, Next>
    where
        Next: Send + 'static,
    {
        self.then(other)
    }
}

impl<In, Out> Flow<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Drive `input` through this flow to completion, buffering every
    /// item into a `Vec` (spec §4.1 helper, identical in contract to the
    /// [`crate::combinators::control::collect`] combinator).
    pub async fn to_list(&self, input: FlowStream<'static, In>) -> FlowResult<Vec<Out>> {
        let mut out = Vec::new();
        let mut stream = self.apply(input);
        while let Some(item) = stream.next().await {
            out.push(item?);
        }
        Ok(out)
    }

    /// Alias of [`Flow::to_list`].
    pub async fn collect(&self, input: FlowStream<'static, In>) -> FlowResult<Vec<Out>> {
        self.to_list(input).await
    }

    /// Drive `input` through this flow, stopping after at most `n` items
    /// (and cancelling upstream, per the `take` contract).
    pub async fn preview(&self, input: FlowStream<'static, In>, n: usize) -> FlowResult<Vec<Out>> {
        let mut out = Vec::with_capacity(n);
        let mut stream = self.apply(input);
        while out.len() < n {
            match stream.next().await {
                Some(item) => out.push(item?),
                None => break,
            }
        }
        Ok(out)
    }
}

impl<In, Out> Flow<In, Out>
where
    In: Send + 'static,
    Out: Clone + Send + Sync + 'static,
{
    /// Emit `fallback` if the stream ends having produced nothing.
    pub fn with_fallback(&self, fallback: Out) -> Flow<In, Out> {
        let inner = self.transform.clone();
        let name: Arc<str> = Arc::from(format!("{}.with_fallback", self.name));
        Flow {
            name,
            metadata: self.metadata.clone(),
            transform: Arc::new(move |input| {
                let mut upstream = (inner)(input);
                let fallback = fallback.clone();
                boxed(async_stream::stream! {
                    let mut any = false;
                    while let Some(item) = upstream.next().await {
                        any = true;
                        yield item;
                    }
                    if !any {
                        yield Ok(fallback);
                    }
                })
            }),
        }
    }
}

/// `identity`: passes items through unchanged (spec §4.2). The two-sided
/// neutral element for [`Flow::then`].
pub fn identity<T: Send + 'static>() -> Flow<T, T> {
    Flow::new("identity", |input| input)
}

/// `pure(v)`: ignores its input and emits `v` exactly once, then
/// completes (spec §4.2).
pub fn pure<In, Out>(value: Out) -> Flow<In, Out>
where
    In: Send + 'static,
    Out: Clone + Send + Sync + 'static,
{
    Flow::new("pure", move |_input| {
        let value = value.clone();
        boxed(stream::once(async move { Ok(value) }))
    })
}

/// `from_iterable(xs)`: emits the elements of `xs` in order, then
/// completes. The input stream is ignored entirely (spec §4.2).
pub fn from_iterable<In, Out, I>(items: I) -> Flow<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
    I: IntoIterator<Item = Out> + Clone + Send + Sync + 'static,
    I::IntoIter: Send + 'static,
{
    Flow::new("from_iterable", move |_input| {
        boxed(stream::iter(items.clone().into_iter().map(Ok)))
    })
}

/// `from_sync_fn(f)`: emits `f(item)` per input item, synchronously.
/// Ordering preserved (spec §4.2).
pub fn from_sync_fn<In, Out, F>(f: F) -> Flow<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: Fn(In) -> Out + Send + Sync + 'static,
{
    let f = Arc::new(f);
    Flow::new("from_sync_fn", move |mut input| {
        let f = f.clone();
        boxed(async_stream::stream! {
            use futures::StreamExt as _;
            while let Some(item) = input.next().await {
                match item {
                    Ok(v) => yield Ok(f(v)),
                    Err(e) => { yield Err(e); return; }
                }
            }
        })
    })
}

/// `from_value_fn(f)`: per item, awaits `f(item)` then emits it. Each item
/// is fully awaited before the next is pulled (spec §4.2). `f` may fail;
/// failures are surfaced as [`FlowError::Execution`] carrying the
/// offending item, unless intercepted by an error-handling combinator.
pub fn from_value_fn<In, Out, F, Fut>(f: F) -> Flow<In, Out>
where
    In: Clone + Send + 'static,
    Out: Send + 'static,
    F: Fn(In) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Out, BoxError>> + Send + 'static,
{
    let f = Arc::new(f);
    Flow::new("from_value_fn", move |mut input: FlowStream<'_, In>| {
        let f = f.clone();
        boxed(async_stream::stream! {
            use futures::StreamExt as _;
            while let Some(item) = input.next().await {
                match item {
                    Ok(v) => {
                        let original = v.clone();
                        match f(v).await {
                            Ok(out) => yield Ok(out),
                            Err(e) => {
                                yield Err(FlowError::execution_with_item("from_value_fn", e, original));
                                return;
                            }
                        }
                    }
                    Err(e) => { yield Err(e); return; }
                }
            }
        })
    })
}

/// `from_event_fn(g)`: per item, runs `g(item)` as an async generator and
/// flattens its emissions in order before pulling the next input (spec
/// §4.2). Equivalent in drain order to [`crate::combinators::transform::flat_map`]
/// but `g` is explicitly fallible, matching the other effectful
/// constructors in this module.
pub fn from_event_fn<In, Out, F, S>(g: F) -> Flow<In, Out>
where
    In: Clone + Send + 'static,
    Out: Send + 'static,
    F: Fn(In) -> S + Send + Sync + 'static,
    S: futures::Stream<Item = Result<Out, BoxError>> + Send + 'static,
{
    let g = Arc::new(g);
    Flow::new("from_event_fn", move |mut input: FlowStream<'_, In>| {
        let g = g.clone();
        boxed(async_stream::stream! {
            use futures::StreamExt as _;
            while let Some(item) = input.next().await {
                match item {
                    Ok(v) => {
                        let original = v.clone();
                        let mut sub = Box::pin(g(v));
                        while let Some(sub_item) = sub.next().await {
                            match sub_item {
                                Ok(out) => yield Ok(out),
                                Err(e) => {
                                    yield Err(FlowError::execution_with_item("from_event_fn", e, original));
                                    return;
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

/// A callback handle passed once to an [`from_emitter`] registration
/// function. Every call to [`Emitter::emit`] buffers a value into the
/// output stream until [`Emitter::complete`] or [`Emitter::fail`] ends it.
#[derive(Clone)]
pub struct Emitter<T> {
    tx: mpsc::UnboundedSender<EmitterMsg<T>>,
}

enum EmitterMsg<T> {
    Next(T),
    Error(FlowError),
    Complete,
}

impl<T: Send + 'static> Emitter<T> {
    pub fn emit(&self, value: T) {
        let _ = self.tx.send(EmitterMsg::Next(value));
    }

    pub fn fail(&self, err: FlowError) {
        let _ = self.tx.send(EmitterMsg::Error(err));
    }

    pub fn complete(&self) {
        let _ = self.tx.send(EmitterMsg::Complete);
    }
}

/// `from_emitter(register)`: calls `register(cb)` once; buffers every
/// `cb(v)` into the output stream; completes when the registration's
/// lifetime ends (the registration drops its `Emitter` without calling
/// `complete`/`fail`) or on an explicit signal. The input stream is pulled
/// only to allow cancellation (spec §4.2).
pub fn from_emitter<In, Out, R>(register: R) -> Flow<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
    R: Fn(Emitter<Out>) + Send + Sync + 'static,
{
    let register = Arc::new(register);
    Flow::new("from_emitter", move |mut input| {
        let register = register.clone();
        boxed(async_stream::stream! {
            use futures::StreamExt as _;
            let (tx, mut rx) = mpsc::unbounded_channel();
            (register)(Emitter { tx });
            loop {
                tokio::select! {
                    biased;
                    msg = rx.recv() => {
                        match msg {
                            Some(EmitterMsg::Next(v)) => yield Ok(v),
                            Some(EmitterMsg::Error(e)) => { yield Err(e); return; }
                            Some(EmitterMsg::Complete) | None => return,
                        }
                    }
                    upstream = input.next() => {
                        if upstream.is_none() {
                            return;
                        }
                    }
                }
            }
        })
    })
}

/// Marker re-export so downstream code can name the boxed stream type
/// without importing [`crate::stream`] directly.
pub type BoxedFlowStream<T> = Pin<Box<dyn futures::Stream<Item = Result<T, FlowError>> + Send>>;
