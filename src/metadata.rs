//! Open key-value metadata carried by every [`crate::flow::Flow`] (spec
//! §3 "Flow"): at least an input/output type tag, plus combinator-specific
//! keys such as batch size or parallelism. Also the substrate the
//! [`crate::analysis`] module walks to reconstruct a flow's composition
//! shape, since `Flow::transform` itself is an opaque closure.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A metadata value. Kept to the small set of primitives combinators
/// actually need to record (sizes, durations, rates, flags, nested
/// structure) rather than a fully open `dyn Any`, so that `Metadata` stays
/// `Clone + Debug` and exportable as JSON by [`crate::analysis`].
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Node(Arc<CompositionNode>),
    List(Vec<MetaValue>),
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        MetaValue::Str(v.to_string())
    }
}
impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        MetaValue::Str(v)
    }
}
impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        MetaValue::Int(v)
    }
}
impl From<usize> for MetaValue {
    fn from(v: usize) -> Self {
        MetaValue::Int(v as i64)
    }
}
impl From<f64> for MetaValue {
    fn from(v: f64) -> Self {
        MetaValue::Float(v)
    }
}
impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        MetaValue::Bool(v)
    }
}

/// Recorded shape of how a flow was built, used only by [`crate::analysis`].
/// Every constructor produces a `Leaf`; `Flow::then` produces `Sequence`;
/// the concurrency combinators that fan out to children produce `Parallel`.
#[derive(Debug, Clone, PartialEq)]
pub enum CompositionNode {
    Leaf {
        name: String,
        complexity: u32,
    },
    Sequence(Vec<Arc<CompositionNode>>),
    Parallel(Vec<Arc<CompositionNode>>),
}

/// An open, cheap-to-clone map of metadata. Flows are immutable values so
/// `Metadata` clones share storage via [`Arc`] until mutated.
#[derive(Clone, Default)]
pub struct Metadata(Arc<HashMap<String, MetaValue>>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        Arc::make_mut(&mut self.0).insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.0.get(key)
    }

    pub fn node(&self) -> Option<&CompositionNode> {
        match self.get("__node") {
            Some(MetaValue::Node(n)) => Some(n),
            _ => None,
        }
    }

    pub fn with_node(self, node: CompositionNode) -> Self {
        self.with("__node", MetaValue::Node(Arc::new(node)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetaValue)> {
        self.0.iter()
    }

    /// Merge `other` into a clone of `self`, right-biased on key conflicts.
    pub fn merged(&self, other: &Metadata) -> Metadata {
        let mut out = (*self.0).clone();
        for (k, v) in other.0.iter() {
            out.insert(k.clone(), v.clone());
        }
        Metadata(Arc::new(out))
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.iter().filter(|(k, _)| *k != "__node"))
            .finish()
    }
}
