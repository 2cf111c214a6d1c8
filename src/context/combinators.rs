//! Context-aware combinators (spec §4.10). Each consumes and produces a
//! stream of [`super::Context`] values (or reads one out), never bare
//! items — that's what tells them apart from the rest of the combinator
//! algebra.

use std::sync::Arc;

use futures::StreamExt;

use super::{Context, TypedKey};
use crate::error::FlowError;
use crate::flow::Flow;
use crate::stream::{boxed, FlowStream};

fn type_name_of<T>() -> &'static str {
    std::any::type_name::<T>()
}

/// `get_key(K)`: per context in, emit the value at `K`.
pub fn get_key<T>(key: TypedKey<T>) -> Flow<Context, T>
where
    T: Clone + Send + Sync + 'static,
{
    Flow::new("get_key", move |mut input: FlowStream<'_, Context>| {
        let key = key.clone();
        boxed(async_stream::stream! {
            while let Some(item) = input.next().await {
                match item {
                    Ok(ctx) => match ctx.get(&key) {
                        Ok(Some(v)) => yield Ok(v),
                        Ok(None) => {
                            yield Err(FlowError::MissingKey { path: key.path().to_string() });
                            return;
                        }
                        Err(found) => {
                            yield Err(FlowError::TypeMismatch {
                                path: key.path().to_string(),
                                expected: type_name_of::<T>(),
                                found,
                            });
                            return;
                        }
                    },
                    Err(e) => { yield Err(e); return; }
                }
            }
        })
    })
}

/// `set_key(K, v)`: per context in, emit a forked child context with `K`
/// bound to `v`.
pub fn set_key<T>(key: TypedKey<T>, value: T) -> Flow<Context, Context>
where
    T: Clone + Send + Sync + 'static,
{
    Flow::new("set_key", move |mut input: FlowStream<'_, Context>| {
        let key = key.clone();
        let value = value.clone();
        boxed(async_stream::stream! {
            while let Some(item) = input.next().await {
                match item {
                    Ok(ctx) => {
                        let mut child = ctx.fork();
                        child.set(&key, value.clone());
                        yield Ok(child);
                    }
                    Err(e) => { yield Err(e); return; }
                }
            }
        })
    })
}

/// Type-erased check used by [`require_keys`], since its keys may each
/// bind a different `T`.
pub trait KeyCheck: Send + Sync {
    fn check(&self, ctx: &Context) -> Result<(), FlowError>;
}

impl<T: Clone + Send + Sync + 'static> KeyCheck for TypedKey<T> {
    fn check(&self, ctx: &Context) -> Result<(), FlowError> {
        match ctx.get(self) {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(FlowError::MissingKey {
                path: self.path().to_string(),
            }),
            Err(found) => Err(FlowError::TypeMismatch {
                path: self.path().to_string(),
                expected: type_name_of::<T>(),
                found,
            }),
        }
    }
}

/// `require_keys(K1, …, Kn)`: identity if every key is present with a
/// matching type; fails with the first violation otherwise.
pub fn require_keys(keys: Vec<Arc<dyn KeyCheck>>) -> Flow<Context, Context> {
    Flow::new("require_keys", move |mut input| {
        let keys = keys.clone();
        boxed(async_stream::stream! {
            while let Some(item) = input.next().await {
                match item {
                    Ok(ctx) => {
                        let mut failed = None;
                        for key in &keys {
                            if let Err(e) = key.check(&ctx) {
                                failed = Some(e);
                                break;
                            }
                        }
                        match failed {
                            None => yield Ok(ctx),
                            Some(e) => { yield Err(e); return; }
                        }
                    }
                    Err(e) => { yield Err(e); return; }
                }
            }
        })
    })
}

/// `optional_key(K, default)`: emit the value at `K` if present and
/// well-typed, otherwise `default`. Never fails.
pub fn optional_key<T>(key: TypedKey<T>, default: T) -> Flow<Context, T>
where
    T: Clone + Send + Sync + 'static,
{
    Flow::new("optional_key", move |mut input: FlowStream<'_, Context>| {
        let key = key.clone();
        let default = default.clone();
        boxed(async_stream::stream! {
            while let Some(item) = input.next().await {
                match item {
                    Ok(ctx) => {
                        let value = ctx.get(&key).ok().flatten().unwrap_or_else(|| default.clone());
                        yield Ok(value);
                    }
                    Err(e) => { yield Err(e); return; }
                }
            }
        })
    })
}

/// `move_key(Src, Dst)`: bind `Dst` to `Src`'s value and remove `Src`.
/// Fails with `MissingKeyError`/`TypeMismatchError` exactly as `get_key`.
pub fn move_key<T>(src: TypedKey<T>, dst: TypedKey<T>) -> Flow<Context, Context>
where
    T: Clone + Send + Sync + 'static,
{
    Flow::new("move_key", move |mut input: FlowStream<'_, Context>| {
        let src = src.clone();
        let dst = dst.clone();
        boxed(async_stream::stream! {
            while let Some(item) = input.next().await {
                match item {
                    Ok(ctx) => match ctx.get(&src) {
                        Ok(Some(v)) => {
                            let mut child = ctx.fork();
                            child.remove(&src);
                            child.set(&dst, v);
                            yield Ok(child);
                        }
                        Ok(None) => {
                            yield Err(FlowError::MissingKey { path: src.path().to_string() });
                            return;
                        }
                        Err(found) => {
                            yield Err(FlowError::TypeMismatch {
                                path: src.path().to_string(),
                                expected: type_name_of::<T>(),
                                found,
                            });
                            return;
                        }
                    },
                    Err(e) => { yield Err(e); return; }
                }
            }
        })
    })
}

/// `copy_key(Src, Dst)`: bind `Dst` to a copy of `Src`'s value, keeping
/// `Src` bound.
pub fn copy_key<T>(src: TypedKey<T>, dst: TypedKey<T>) -> Flow<Context, Context>
where
    T: Clone + Send + Sync + 'static,
{
    Flow::new("copy_key", move |mut input: FlowStream<'_, Context>| {
        let src = src.clone();
        let dst = dst.clone();
        boxed(async_stream::stream! {
            while let Some(item) = input.next().await {
                match item {
                    Ok(ctx) => match ctx.get(&src) {
                        Ok(Some(v)) => {
                            let mut child = ctx.fork();
                            child.set(&dst, v);
                            yield Ok(child);
                        }
                        Ok(None) => {
                            yield Err(FlowError::MissingKey { path: src.path().to_string() });
                            return;
                        }
                        Err(found) => {
                            yield Err(FlowError::TypeMismatch {
                                path: src.path().to_string(),
                                expected: type_name_of::<T>(),
                                found,
                            });
                            return;
                        }
                    },
                    Err(e) => { yield Err(e); return; }
                }
            }
        })
    })
}

/// `forget_key(K)`: remove `K`'s binding, if present. Never fails.
pub fn forget_key<T: Send + Sync + 'static>(key: TypedKey<T>) -> Flow<Context, Context> {
    Flow::new("forget_key", move |mut input: FlowStream<'_, Context>| {
        let key = key.clone();
        boxed(async_stream::stream! {
            while let Some(item) = input.next().await {
                match item {
                    Ok(ctx) => {
                        let mut child = ctx.fork();
                        child.remove(&key);
                        yield Ok(child);
                    }
                    Err(e) => { yield Err(e); return; }
                }
            }
        })
    })
}

/// `transform_key(K, f [, Dst])`: rebind `f(value at K)`, either back to
/// `K` (`dst = None`) or to a distinct `dst` key, leaving `K` untouched.
pub fn transform_key<T, U, F>(
    key: TypedKey<T>,
    f: F,
    dst: Option<TypedKey<U>>,
) -> Flow<Context, Context>
where
    T: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
    F: Fn(T) -> U + Send + Sync + 'static,
{
    let f = Arc::new(f);
    Flow::new("transform_key", move |mut input: FlowStream<'_, Context>| {
        let key = key.clone();
        let dst = dst.clone();
        let f = f.clone();
        boxed(async_stream::stream! {
            while let Some(item) = input.next().await {
                match item {
                    Ok(ctx) => match ctx.get(&key) {
                        Ok(Some(v)) => {
                            let mut child = ctx.fork();
                            let transformed = f(v);
                            match &dst {
                                Some(dst_key) => child.set(dst_key, transformed),
                                None => {
                                    // `f` produced a `U`; rebinding `K : T` in place
                                    // requires `U = T`, enforced by the caller
                                    // choosing `dst = None` only in that case.
                                    let same_key: TypedKey<U> = TypedKey::new(key.path(), key.description());
                                    child.set(&same_key, transformed);
                                }
                            }
                            yield Ok(child);
                        }
                        Ok(None) => {
                            yield Err(FlowError::MissingKey { path: key.path().to_string() });
                            return;
                        }
                        Err(found) => {
                            yield Err(FlowError::TypeMismatch {
                                path: key.path().to_string(),
                                expected: type_name_of::<T>(),
                                found,
                            });
                            return;
                        }
                    },
                    Err(e) => { yield Err(e); return; }
                }
            }
        })
    })
}

/// `context_flow(inputs, outputs)`: attach a declared dependency
/// footprint to `flow`'s metadata, without altering its behavior.
/// Compose-time validation that `inputs` are produced by earlier flows
/// is left to callers walking the composed metadata (see
/// `crate::analysis`).
pub fn context_flow(
    flow: Flow<Context, Context>,
    inputs: Vec<&'static str>,
    outputs: Vec<&'static str>,
) -> Flow<Context, Context> {
    let metadata = flow
        .metadata()
        .clone()
        .with("context.inputs", inputs.join(","))
        .with("context.outputs", outputs.join(","));
    flow.with_metadata(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn contexts(xs: Vec<Context>) -> crate::stream::FlowStream<'static, Context> {
        boxed(stream::iter(xs.into_iter().map(Ok)))
    }

    #[tokio::test]
    async fn get_key_reads_bound_value() {
        let key: TypedKey<i32> = TypedKey::new("n", "a number");
        let mut ctx = Context::new();
        ctx.set(&key, 42);
        let flow = get_key(key);
        let out = flow.to_list(contexts(vec![ctx])).await.unwrap();
        assert_eq!(out, vec![42]);
    }

    #[tokio::test]
    async fn get_key_missing_fails() {
        let key: TypedKey<i32> = TypedKey::new("n", "");
        let flow = get_key(key);
        let err = flow.to_list(contexts(vec![Context::new()])).await.unwrap_err();
        assert!(matches!(err, FlowError::MissingKey { .. }));
    }

    #[tokio::test]
    async fn require_keys_passes_when_all_present() {
        let a: TypedKey<i32> = TypedKey::new("a", "");
        let b: TypedKey<String> = TypedKey::new("b", "");
        let mut ctx = Context::new();
        ctx.set(&a, 1);
        ctx.set(&b, "x".to_string());
        let flow = require_keys(vec![Arc::new(a), Arc::new(b)]);
        let out = flow.to_list(contexts(vec![ctx])).await;
        assert!(out.is_ok());
    }

    #[tokio::test]
    async fn optional_key_falls_back_to_default() {
        let key: TypedKey<i32> = TypedKey::new("missing", "");
        let flow = optional_key(key, -1);
        let out = flow.to_list(contexts(vec![Context::new()])).await.unwrap();
        assert_eq!(out, vec![-1]);
    }

    #[tokio::test]
    async fn move_key_rebinds_and_removes_source() {
        let src: TypedKey<i32> = TypedKey::new("src", "");
        let dst: TypedKey<i32> = TypedKey::new("dst", "");
        let mut ctx = Context::new();
        ctx.set(&src, 9);
        let flow = move_key(src.clone(), dst.clone());
        let out_ctx = flow.to_list(contexts(vec![ctx])).await.unwrap().remove(0);
        assert_eq!(out_ctx.get(&dst).unwrap(), Some(9));
        assert_eq!(out_ctx.get(&src).unwrap(), None);
    }
}
