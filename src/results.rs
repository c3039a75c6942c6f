use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use tracing::warn;

use crate::digest::ContentDigest;
use crate::task::TaskValue;
use crate::taskid::TaskRef;

type DigestThunk = Arc<dyn Fn() -> String + Send + Sync>;

struct ResultEntry {
    value: Arc<dyn Any + Send + Sync>,
    digest: DigestThunk,
}

/// The shared result map of one run.
///
/// Keyed by reference identifier; written once per key by the task selected
/// for that reference, read by its dependants after the write. Each entry
/// keeps a lazily-computed content digest so the result cache can key on
/// dependency values without forcing digests for runs that never cache.
#[derive(Default)]
pub struct TaskResults {
    entries: DashMap<String, ResultEntry>,
}

impl TaskResults {
    pub fn new() -> TaskResults {
        TaskResults::default()
    }

    /// Stores `value` under `reference_id`.
    ///
    /// The runner writes each reference at most once per run; a second write
    /// indicates an initial value shadowed by a provider and is logged.
    pub fn insert<T: TaskValue>(&self, reference_id: &str, value: T) {
        let digest_source = value.clone();
        let cell: OnceLock<String> = OnceLock::new();
        let digest: DigestThunk =
            Arc::new(move || cell.get_or_init(|| digest_source.digest()).clone());
        let entry = ResultEntry {
            value: Arc::new(value),
            digest,
        };
        if self.entries.insert(reference_id.to_string(), entry).is_some() {
            warn!(reference = reference_id, "result written more than once");
        }
    }

    /// Reads the value stored under `reference_id`. Returns `None` when the
    /// reference has not produced yet or holds a value of another type.
    pub fn get<T: TaskValue>(&self, reference_id: &str) -> Option<T> {
        self.entries
            .get(reference_id)
            .and_then(|entry| entry.value().value.downcast_ref::<T>().cloned())
    }

    /// The content digest of the value under `reference_id`, computed on
    /// first use and memoized.
    pub fn digest(&self, reference_id: &str) -> Option<String> {
        self.entries.get(reference_id).map(|entry| (entry.value().digest)())
    }

    pub fn contains(&self, reference_id: &str) -> bool {
        self.entries.contains_key(reference_id)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for TaskResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys = self.keys();
        keys.sort();
        f.debug_struct("TaskResults").field("keys", &keys).finish()
    }
}

/// Reads the result produced for `reference`, typed by the reference itself.
pub fn get_result<T: TaskValue>(results: &TaskResults, reference: &TaskRef<T>) -> Option<T> {
    results.get(reference.id())
}
