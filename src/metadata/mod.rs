//! Live run metadata readable concurrently with execution.
//!
//! The runner owns one [`MetadataSet`] per run and distributes it through
//! the task context. Aggregates are created on first use and mutated in
//! place under their own locks; external observers take eventually
//! consistent snapshots through [`MetadataSet::snapshot`].

pub mod error;
pub mod form;
pub mod progress;

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

/// One metadata aggregate: a named, concurrency-safe value that serializes
/// into the run's metadata snapshot with a stable kind name.
pub trait Metadata: Send + Sync + 'static {
    /// The stable key this aggregate serializes under. Part of the external
    /// contract; changing it is a breaking change.
    fn kind(&self) -> &'static str;

    fn to_serializable(&self) -> serde_json::Value;
}

struct MetadataEntry {
    any: Arc<dyn Any + Send + Sync>,
    meta: Arc<dyn Metadata>,
}

/// The metadata map attached to one run.
#[derive(Default)]
pub struct MetadataSet {
    entries: DashMap<TypeId, MetadataEntry>,
}

impl MetadataSet {
    pub fn new() -> MetadataSet {
        MetadataSet::default()
    }

    /// Returns the aggregate of type `M`, creating it on first use.
    pub fn get_or_init<M: Metadata + Default>(&self) -> Arc<M> {
        let entry = self.entries.entry(TypeId::of::<M>()).or_insert_with(|| {
            let aggregate = Arc::new(M::default());
            MetadataEntry {
                any: aggregate.clone(),
                meta: aggregate,
            }
        });
        entry
            .value()
            .any
            .clone()
            .downcast::<M>()
            .expect("metadata entry stored under its own TypeId")
    }

    /// Returns the aggregate of type `M` when it has been created.
    pub fn get<M: Metadata>(&self) -> Option<Arc<M>> {
        self.entries
            .get(&TypeId::of::<M>())
            .and_then(|entry| entry.value().any.clone().downcast::<M>().ok())
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.entries.iter().map(|e| e.value().meta.kind()).collect();
        kinds.sort_unstable();
        kinds
    }

    /// A read-only snapshot of every aggregate, keyed by kind and sorted for
    /// determinism. Safe to call while the run mutates the aggregates.
    pub fn snapshot(&self) -> serde_json::Value {
        let mut entries: Vec<(&'static str, serde_json::Value)> = self
            .entries
            .iter()
            .map(|e| (e.value().meta.kind(), e.value().meta.to_serializable()))
            .collect();
        entries.sort_by_key(|(kind, _)| *kind);
        let mut map = serde_json::Map::new();
        for (kind, value) in entries {
            map.insert(kind.to_string(), value);
        }
        serde_json::Value::Object(map)
    }
}

impl fmt::Debug for MetadataSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataSet").field("kinds", &self.kinds()).finish()
    }
}
