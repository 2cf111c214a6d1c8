//! The flow registry (spec §4.11): a catalogue mapping names and tags to
//! flow instances, for discovery and reuse. Behind the `registry`
//! feature.
//!
//! A `Registry` is an ordinary value — construct one per subsystem that
//! needs its own namespace. [`global`] additionally exposes a
//! process-wide instance for the common case of one shared catalogue,
//! mirroring spec §3's "Registry entry" being process-wide state with no
//! persistence.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use crate::flow::Flow;
use crate::metadata::Metadata;

struct Entry {
    flow: Arc<dyn Any + Send + Sync>,
    in_type: TypeId,
    out_type: TypeId,
    categories: Vec<String>,
    metadata: Metadata,
    repr: String,
}

/// A snapshot of one registry entry, returned by [`Registry::info`].
#[derive(Debug, Clone)]
pub struct EntryInfo {
    pub name: String,
    pub categories: Vec<String>,
    pub metadata_keys: Vec<String>,
    pub repr: String,
}

/// A process-wide (or subsystem-local) catalogue of named flows.
/// Registration is last-write-wins; there is no persistence across
/// process restarts.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.read().unwrap();
        write!(f, "Registry({} entries)", entries.len())
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `flow` under `name` with the given `categories`.
    /// Overwrites any existing entry with the same name.
    pub fn register<In, Out>(&self, name: impl Into<String>, flow: Flow<In, Out>, categories: Vec<String>)
    where
        In: Send + 'static,
        Out: Send + 'static,
    {
        let name = name.into();
        let repr = flow.to_string();
        let metadata = flow.metadata().clone();
        let entry = Entry {
            in_type: TypeId::of::<In>(),
            out_type: TypeId::of::<Out>(),
            flow: Arc::new(flow),
            categories,
            metadata,
            repr,
        };
        self.entries.write().unwrap().insert(name, entry);
    }

    /// Look up `name` as a `Flow<In, Out>`. Returns `None` if absent, or
    /// registered under different `In`/`Out` types.
    pub fn get<In, Out>(&self, name: &str) -> Option<Flow<In, Out>>
    where
        In: Send + 'static,
        Out: Send + 'static,
    {
        let entries = self.entries.read().unwrap();
        let entry = entries.get(name)?;
        if entry.in_type != TypeId::of::<In>() || entry.out_type != TypeId::of::<Out>() {
            return None;
        }
        entry.flow.clone().downcast::<Flow<In, Out>>().ok().map(|f| (*f).clone())
    }

    /// List every registered name, optionally filtered to entries tagged
    /// with `category`.
    pub fn list(&self, category: Option<&str>) -> Vec<String> {
        let entries = self.entries.read().unwrap();
        entries
            .iter()
            .filter(|(_, e)| category.map(|c| e.categories.iter().any(|t| t == c)).unwrap_or(true))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Full-text search across entry name and metadata description
    /// (case-insensitive substring match).
    pub fn search(&self, substring: &str) -> Vec<String> {
        let needle = substring.to_lowercase();
        let entries = self.entries.read().unwrap();
        entries
            .iter()
            .filter(|(name, e)| {
                name.to_lowercase().contains(&needle) || e.repr.to_lowercase().contains(&needle)
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Remove `name`'s entry, if present. Returns whether one existed.
    pub fn remove(&self, name: &str) -> bool {
        self.entries.write().unwrap().remove(name).is_some()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }

    /// Snapshot `name`'s name, categories, metadata keys, and repr.
    pub fn info(&self, name: &str) -> Option<EntryInfo> {
        let entries = self.entries.read().unwrap();
        let entry = entries.get(name)?;
        Some(EntryInfo {
            name: name.to_string(),
            categories: entry.categories.clone(),
            metadata_keys: entry.metadata.iter().map(|(k, _)| k.clone()).collect(),
            repr: entry.repr.clone(),
        })
    }
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// The process-wide registry instance.
pub fn global() -> &'static Registry {
    GLOBAL.get_or_init(Registry::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::identity;

    #[test]
    fn register_and_get_roundtrip() {
        let registry = Registry::new();
        registry.register("id", identity::<i32>(), vec!["core".to_string()]);
        let flow: Option<Flow<i32, i32>> = registry.get("id");
        assert!(flow.is_some());
    }

    #[test]
    fn get_with_wrong_types_returns_none() {
        let registry = Registry::new();
        registry.register("id", identity::<i32>(), vec![]);
        let flow: Option<Flow<String, String>> = registry.get("id");
        assert!(flow.is_none());
    }

    #[test]
    fn last_write_wins() {
        let registry = Registry::new();
        registry.register("id", identity::<i32>(), vec!["a".to_string()]);
        registry.register("id", identity::<i32>(), vec!["b".to_string()]);
        let info = registry.info("id").unwrap();
        assert_eq!(info.categories, vec!["b".to_string()]);
    }

    #[test]
    fn list_filters_by_category() {
        let registry = Registry::new();
        registry.register("a", identity::<i32>(), vec!["x".to_string()]);
        registry.register("b", identity::<i32>(), vec!["y".to_string()]);
        let xs = registry.list(Some("x"));
        assert_eq!(xs, vec!["a".to_string()]);
    }

    #[test]
    fn remove_and_clear() {
        let registry = Registry::new();
        registry.register("a", identity::<i32>(), vec![]);
        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));
        registry.register("b", identity::<i32>(), vec![]);
        registry.clear();
        assert!(registry.list(None).is_empty());
    }
}
