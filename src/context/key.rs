//! Typed keys (spec §3 "Typed key"): a `(path, type-tag, description)`
//! triple. Equality and hashing are by path only, so two keys with the
//! same path collide even if their declared `T` differs — reading
//! through the wrong one is exactly the `TypeMismatch` case `get_key`
//! exists to report.

use std::any::{type_name, Any};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

/// A typed binding path into a [`super::Context`]. Keys are process-wide
/// values: cloning a `TypedKey` gives you another handle to the same
/// path, not a new path.
pub struct TypedKey<T> {
    path: Arc<str>,
    description: Arc<str>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedKey<T> {
    pub fn new(path: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            path: Arc::from(path.into()),
            description: Arc::from(description.into()),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl<T> Clone for TypedKey<T> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            description: self.description.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for TypedKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypedKey({} : {})", self.path, type_name::<T>())
    }
}

impl<T> PartialEq for TypedKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}
impl<T> Eq for TypedKey<T> {}

impl<T> Hash for TypedKey<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

/// Type-erased storage slot for a bound value, downcast by [`super::Context::get`].
pub(super) struct BoundValue {
    pub(super) value: Arc<dyn Any + Send + Sync>,
    pub(super) type_name: &'static str,
}

impl BoundValue {
    pub(super) fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_name: type_name::<T>(),
        }
    }
}

impl Clone for BoundValue {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            type_name: self.type_name,
        }
    }
}
