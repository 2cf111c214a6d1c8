//! The stream contract (spec §3): a lazy, forward-only, single-consumer
//! asynchronous sequence that terminates in exhaustion, error, or
//! cancellation.
//!
//! Rather than invent a bespoke trait, a flow's stream is a boxed
//! [`futures::Stream`] whose items are `Result<T, FlowError>`. Exhaustion is
//! `None` from `poll_next`; a single trailing `Err` followed by `None` is
//! the error termination; cancellation is modeled by the consumer simply
//! dropping the stream, which every combinator in this crate is written to
//! treat as releasing its resources (see the module docs under
//! `combinators`).

use std::pin::Pin;

use futures::Stream;

use crate::error::FlowError;

/// A boxed, owned, `Send` stream of fallible items — the concrete type
/// every [`crate::flow::Flow`] transform produces and consumes.
pub type FlowStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T, FlowError>> + Send + 'a>>;

/// Box up any compatible stream into a [`FlowStream`].
pub fn boxed<'a, T, S>(stream: S) -> FlowStream<'a, T>
where
    S: Stream<Item = Result<T, FlowError>> + Send + 'a,
{
    Box::pin(stream)
}

/// Tagged termination values produced by the [`materialize`][crate::combinators::observability::materialize]
/// combinator (spec §3 "Notification").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification<T> {
    OnNext(T),
    OnError(String),
    OnComplete,
}

impl<T> Notification<T> {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Notification::OnError(_) | Notification::OnComplete)
    }
}
