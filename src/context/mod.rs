//! The context substrate (spec §3 "Context", §4.10): a typed key-value
//! environment carried alongside items for flows that need cross-cutting
//! state. Behind the `context` feature.

mod combinators;
mod key;

pub use combinators::{
    context_flow, copy_key, forget_key, get_key, move_key, optional_key, require_keys, set_key,
    transform_key,
};
pub use key::TypedKey;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use key::BoundValue;

/// One layer of key-value bindings in a [`Context`]'s frame stack.
#[derive(Clone, Default)]
struct Frame {
    bindings: HashMap<String, BoundValue>,
}

/// A logical frame stack threaded through context-aware combinators
/// (spec §3). Lookup walks the stack top-down; only the top frame is
/// written to. Cloning a `Context` is cheap (frames are reference
/// counted) and produces an independent value: mutating the clone never
/// affects the original, matching [`Context::fork`]'s contract.
#[derive(Clone)]
pub struct Context {
    frames: Vec<Arc<Frame>>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Context({} frame(s))", self.frames.len())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// A context with a single, empty root frame. The root frame can
    /// never be popped (spec §3 invariant).
    pub fn new() -> Self {
        Self {
            frames: vec![Arc::new(Frame::default())],
        }
    }

    /// Bind `key` to `value` in the top frame, copy-on-write: frames
    /// shared with other `Context` clones are cloned before mutation, so
    /// forked siblings are unaffected.
    pub fn set<T: Send + Sync + 'static>(&mut self, key: &TypedKey<T>, value: T) {
        let top = self.frames.last_mut().expect("root frame always present");
        Arc::make_mut(top)
            .bindings
            .insert(key.path().to_string(), BoundValue::new(value));
    }

    /// Read `key`, walking the frame stack top-down. `Ok(None)` means
    /// absent; `Err` means a value was found at this path but does not
    /// downcast to `T` (a different key sharing this path bound a
    /// different type).
    pub fn get<T: Clone + Send + Sync + 'static>(
        &self,
        key: &TypedKey<T>,
    ) -> Result<Option<T>, &'static str> {
        for frame in self.frames.iter().rev() {
            if let Some(bound) = frame.bindings.get(key.path()) {
                return match bound.value.clone().downcast::<T>() {
                    Ok(value) => Ok(Some((*value).clone())),
                    Err(_) => Err(bound.type_name),
                };
            }
        }
        Ok(None)
    }

    /// Remove `key`'s binding from the top frame, if present there. A
    /// binding from a lower frame is shadowed by nothing being re-added
    /// to the top frame rather than being deleted from underneath.
    pub fn remove<T>(&mut self, key: &TypedKey<T>) {
        let top = self.frames.last_mut().expect("root frame always present");
        if top.bindings.contains_key(key.path()) {
            Arc::make_mut(top).bindings.remove(key.path());
        }
    }

    /// Copy-on-write child: an isolated context over the same frames.
    /// Mutating the child never affects `self` (the first write clones
    /// the shared frame via [`Arc::make_mut`]).
    pub fn fork(&self) -> Context {
        self.clone()
    }

    /// Push a new, empty, writable frame on top of the stack.
    pub fn push_layer(&mut self) {
        self.frames.push(Arc::new(Frame::default()));
    }

    /// Pop the top frame. A no-op if only the root frame remains — the
    /// root frame can never be popped (spec §3 invariant).
    pub fn pop_layer(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    /// Shallow, right-biased merge: for each path present in `other`,
    /// the merged context's value is `other`'s. Implemented by pushing
    /// `other`'s flattened top-down view as one frame above `self`'s
    /// stack, so `self`'s bindings remain visible underneath anything
    /// `other` didn't override.
    pub fn merge(&self, other: &Context) -> Context {
        let mut merged = self.clone();
        let mut flattened = Frame::default();
        for frame in &other.frames {
            for (path, value) in &frame.bindings {
                flattened.bindings.insert(path.clone(), value.clone());
            }
        }
        merged.frames.push(Arc::new(flattened));
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_isolates_mutations() {
        let key: TypedKey<i32> = TypedKey::new("count", "a counter");
        let mut base = Context::new();
        base.set(&key, 1);
        let mut child = base.fork();
        child.set(&key, 2);
        assert_eq!(base.get(&key).unwrap(), Some(1));
        assert_eq!(child.get(&key).unwrap(), Some(2));
    }

    #[test]
    fn root_frame_cannot_be_popped() {
        let mut ctx = Context::new();
        ctx.pop_layer();
        let key: TypedKey<i32> = TypedKey::new("x", "");
        ctx.set(&key, 42);
        assert_eq!(ctx.get(&key).unwrap(), Some(42));
    }

    #[test]
    fn merge_is_right_biased() {
        let k: TypedKey<i32> = TypedKey::new("x", "");
        let mut a = Context::new();
        a.set(&k, 1);
        let mut b = Context::new();
        b.set(&k, 2);
        let merged = a.merge(&b);
        assert_eq!(merged.get(&k).unwrap(), Some(2));
    }

    #[test]
    fn type_mismatch_surfaces_on_get() {
        let int_key: TypedKey<i32> = TypedKey::new("shared", "");
        let str_key: TypedKey<String> = TypedKey::new("shared", "");
        let mut ctx = Context::new();
        ctx.set(&int_key, 7);
        assert!(ctx.get(&str_key).is_err());
    }
}
