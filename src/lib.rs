//! `cascade_rs`: a typed, composable asynchronous stream-processing
//! engine.
//!
//! A [`Flow`] is a named, immutable function from one asynchronous
//! stream to another. Pipelines are built by composing flows with
//! [`Flow::then`]/[`Flow::pipe`] and the combinator library under
//! [`combinators`]. See [`stream`] for the contract every flow's
//! underlying stream upholds, and [`error`] for the error taxonomy every
//! fallible point in a flow resolves to.
//!
//! ```
//! use cascade_rs::combinators::transform::{filter, map};
//! use cascade_rs::flow::from_iterable;
//!
//! # async fn run() -> cascade_rs::error::FlowResult<()> {
//! let pipeline = map(|x: i32| x + 1).then(&filter(|x: &i32| x % 2 == 0));
//! let source = from_iterable(vec![0, 1, 2, 3, 4]);
//! let input = cascade_rs::stream::boxed(futures::stream::iter(
//!     Vec::<i32>::new().into_iter().map(Ok),
//! ));
//! let _ = source.apply(input);
//! let out = pipeline.to_list(cascade_rs::stream::boxed(futures::stream::iter(
//!     vec![0, 1, 2, 3, 4].into_iter().map(Ok),
//! ))).await?;
//! assert_eq!(out, vec![2, 4]);
//! # Ok(())
//! # }
//! ```

pub mod combinators;
pub mod error;
pub mod flow;
pub mod metadata;
pub mod stream;

#[cfg(feature = "context")]
pub mod context;

#[cfg(feature = "registry")]
pub mod registry;

#[cfg(feature = "analysis")]
pub mod analysis;

pub use error::{FlowError, FlowResult};
pub use flow::{
    from_emitter, from_event_fn, from_iterable, from_sync_fn, from_value_fn, identity, pure,
    Emitter, Flow,
};
pub use metadata::Metadata;
pub use stream::{boxed, FlowStream, Notification};
