//! Combinator algebra (spec §4): functions that build or transform
//! [`crate::flow::Flow`] values. Organized by the families spec §4
//! defines; each submodule's doc comment cites its section.

pub mod aggregate;
pub mod concurrency;
pub mod control;
pub mod error_handling;
pub mod observability;
pub mod temporal;
pub mod transform;
