use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;

/// A key into a [`TypedMap`]: a string identifier paired with a static type
/// marker. Two keys with equal identifiers but different type parameters
/// address the same slot; reading through the wrong one behaves as a miss.
pub struct TypedKey<T> {
    id: String,
    _value: PhantomData<fn() -> T>,
}

impl<T> TypedKey<T> {
    pub fn new(id: impl Into<String>) -> TypedKey<T> {
        TypedKey {
            id: id.into(),
            _value: PhantomData,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<T> Clone for TypedKey<T> {
    fn clone(&self) -> Self {
        TypedKey {
            id: self.id.clone(),
            _value: PhantomData,
        }
    }
}

impl<T> fmt::Debug for TypedKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// A concurrency-safe map from typed keys to values of the keys' types.
///
/// Used for shared run state, label sets and caller-supplied context values.
/// Values are stored behind `Arc`s, so cloning the map is a shallow snapshot
/// sharing the same values.
///
/// Type-mismatch policy: a value stored under an identifier and read back
/// through a key of a different type is reported as missing. The map never
/// panics on mismatched reads.
#[derive(Clone, Default)]
pub struct TypedMap {
    values: DashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl TypedMap {
    pub fn new() -> TypedMap {
        TypedMap::default()
    }

    /// Stores `value` under `key`, overwriting any previous value.
    pub fn set<T: Send + Sync + 'static>(&self, key: &TypedKey<T>, value: T) {
        self.values.insert(key.id().to_string(), Arc::new(value));
    }

    /// Reads the value under `key`. Returns `None` when the slot is empty or
    /// holds a value of a different type.
    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &TypedKey<T>) -> Option<T> {
        self.values
            .get(key.id())
            .and_then(|entry| entry.value().downcast_ref::<T>().cloned())
    }

    pub fn get_or_default<T: Clone + Send + Sync + 'static>(
        &self,
        key: &TypedKey<T>,
        default: T,
    ) -> T {
        self.get(key).unwrap_or(default)
    }

    pub fn remove(&self, id: &str) {
        self.values.remove(id);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.values.contains_key(id)
    }

    pub fn keys(&self) -> Vec<String> {
        self.values.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for TypedMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys = self.keys();
        keys.sort();
        f.debug_struct("TypedMap").field("keys", &keys).finish()
    }
}
