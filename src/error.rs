//! The error taxonomy described in spec §7.
//!
//! Every fallible point in a flow resolves to one [`FlowError`] variant.
//! Cancellation is deliberately not a variant here: it is a distinct
//! termination mode (see [`crate::stream`]) that never reaches a
//! `FlowError` consumer.

use std::any::Any;
use std::fmt;

/// Boxed source error from a user-supplied function, the shape every
/// fallible combinator closure is expected to return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The crate-wide result alias used by driver methods ([`crate::flow::Flow::to_list`]
/// and friends) and by fallible combinator closures.
pub type FlowResult<T> = Result<T, FlowError>;

/// Type-erased payload carried by [`FlowError::Execution`] so that
/// error-recovery combinators (`catch_and_continue`, `retry`, `recover`,
/// `circuit_breaker`) can hand the offending input item back to their
/// caller without every combinator in the library needing to know about
/// item recovery.
pub struct OffendingItem(Box<dyn Any + Send>);

impl OffendingItem {
    pub fn new<T: Send + 'static>(item: T) -> Self {
        Self(Box::new(item))
    }

    /// Attempt to recover the original item as `T`. Returns `None` if the
    /// combinator that raised the error did not attach one, or attached a
    /// different type.
    pub fn downcast<T: 'static>(self) -> Option<T> {
        self.0.downcast::<T>().ok().map(|b| *b)
    }
}

impl fmt::Debug for OffendingItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OffendingItem(..)")
    }
}

/// The error kinds a flow can terminate with (spec §7).
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// A guard, schema check, or required-key check failed.
    #[error("validation failed in `{combinator}`: {message}")]
    Validation {
        combinator: &'static str,
        message: String,
        offending_item: Option<OffendingItem>,
    },

    /// A user function or upstream stream raised.
    #[error("execution failed in `{combinator}`: {source}")]
    Execution {
        combinator: &'static str,
        #[source]
        source: BoxError,
        offending_item: Option<OffendingItem>,
    },

    /// A temporal bound was exceeded.
    #[error("`{combinator}` timed out after {elapsed_secs}s")]
    Timeout {
        combinator: &'static str,
        elapsed_secs: f64,
    },

    /// A combinator was constructed with invalid parameters. Detected at
    /// construction, never surfaced through a stream.
    #[error("invalid configuration for `{combinator}`: {message}")]
    Configuration {
        combinator: &'static str,
        message: String,
    },

    /// A context-key read found a value whose type tag did not match the
    /// key's declared type.
    #[error("type mismatch reading key `{path}`: expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    /// A context-key read found no value bound at all.
    #[error("missing key `{path}`")]
    MissingKey { path: String },
}

impl FlowError {
    pub fn validation(combinator: &'static str, message: impl Into<String>) -> Self {
        FlowError::Validation {
            combinator,
            message: message.into(),
            offending_item: None,
        }
    }

    pub fn validation_with_item<T: Send + 'static>(
        combinator: &'static str,
        message: impl Into<String>,
        item: T,
    ) -> Self {
        FlowError::Validation {
            combinator,
            message: message.into(),
            offending_item: Some(OffendingItem::new(item)),
        }
    }

    pub fn execution(combinator: &'static str, source: impl Into<BoxError>) -> Self {
        FlowError::Execution {
            combinator,
            source: source.into(),
            offending_item: None,
        }
    }

    pub fn execution_with_item<T: Send + 'static>(
        combinator: &'static str,
        source: impl Into<BoxError>,
        item: T,
    ) -> Self {
        FlowError::Execution {
            combinator,
            source: source.into(),
            offending_item: Some(OffendingItem::new(item)),
        }
    }

    pub fn configuration(combinator: &'static str, message: impl Into<String>) -> Self {
        FlowError::Configuration {
            combinator,
            message: message.into(),
        }
    }

    /// Takes the offending item out of this error, if one was attached and
    /// it downcasts to `T`. Consumes the slot so it can only be recovered
    /// once.
    pub fn take_offending_item<T: 'static>(&mut self) -> Option<T> {
        match self {
            FlowError::Validation {
                offending_item, ..
            }
            | FlowError::Execution {
                offending_item, ..
            } => offending_item.take().and_then(OffendingItem::downcast),
            _ => None,
        }
    }
}
