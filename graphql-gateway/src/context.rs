//! Provide a [`Context`] for a single GraphQL execution.
//!
//! The context is a concurrent map that the gateway fills before execution (see
//! [`crate::customizer`]) and that resolvers read or extend while the engine runs. Each invocation
//! gets its own context, it is never shared between operations.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tower::BoxError;

use crate::json_ext::Value;

type Entry = Arc<dyn Any + Send + Sync>;

/// Holds [`Context`] entries.
pub(crate) type Entries = Arc<DashMap<String, Entry>>;

/// Key/value bag threaded through one execution.
///
/// Values are type-erased. Typed access clones the stored value, so store expensive values
/// behind an `Arc`.
#[derive(Clone, Default)]
pub struct Context {
    entries: Entries,
}

impl Context {
    pub fn new() -> Self {
        Default::default()
    }

    /// Inserts a value, returns `true` if a previous value was replaced.
    pub fn insert<K, V>(&self, key: K, value: V) -> bool
    where
        K: Into<String>,
        V: Any + Send + Sync,
    {
        self.entries.insert(key.into(), Arc::new(value)).is_some()
    }

    /// Returns a clone of the value stored under `key` if it has type `V`.
    pub fn get<V>(&self, key: &str) -> Option<V>
    where
        V: Any + Clone,
    {
        self.entries
            .get(key)
            .and_then(|entry| entry.value().downcast_ref::<V>().cloned())
    }

    /// Serializes `value` to JSON before storing it.
    pub fn insert_json<K, V>(&self, key: K, value: V) -> Result<bool, BoxError>
    where
        K: Into<String>,
        V: Serialize,
    {
        let value = serde_json_bytes::to_value(value)?;
        Ok(self.insert(key, value))
    }

    /// Reads back a value stored with [`Context::insert_json`].
    pub fn get_json<V>(&self, key: &str) -> Result<Option<V>, BoxError>
    where
        V: DeserializeOwned,
    {
        self.get::<Value>(key)
            .map(serde_json_bytes::from_value)
            .transpose()
            .map_err(|e| e.into())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Removes the entry, returns `true` if it existed.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use crate::Context;

    #[test]
    fn test_context_insert() {
        let c = Context::new();
        assert!(!c.insert("key1", 1));
        assert_eq!(c.get::<i32>("key1"), Some(1));
        assert!(c.contains_key("key1"));
    }

    #[test]
    fn test_context_overwrite() {
        let c = Context::new();
        assert!(!c.insert("overwrite", 2));
        assert!(c.insert("overwrite", 3));
        assert_eq!(c.get::<i32>("overwrite"), Some(3));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_context_type_mismatch() {
        let c = Context::new();
        c.insert("string", "Some value".to_string());
        assert_eq!(c.get::<i32>("string"), None);
        assert_eq!(c.get::<String>("string").as_deref(), Some("Some value"));
    }

    #[test]
    fn test_context_json() {
        let c = Context::new();
        assert!(!c.insert_json("claims", vec!["read", "write"]).unwrap());
        assert_eq!(
            c.get_json::<Vec<String>>("claims").unwrap(),
            Some(vec!["read".to_string(), "write".to_string()])
        );
        assert!(c.get_json::<u64>("claims").is_err());
        assert_eq!(c.get_json::<u64>("missing").unwrap(), None);
    }

    #[test]
    fn test_context_clones_share_entries() {
        let c = Context::new();
        let cloned = c.clone();
        cloned.insert("shared", Arc::new(5_u8));
        assert_eq!(c.get::<Arc<u8>>("shared").as_deref(), Some(&5));
        assert!(c.remove("shared"));
        assert!(!cloned.remove("shared"));
        assert!(c.is_empty());
    }

    #[test]
    fn test_context_keys_are_sorted() {
        let c = Context::new();
        c.insert("b", ());
        c.insert("a", ());
        assert_eq!(c.keys(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(format!("{c:?}"), r#"Context { keys: ["a", "b"] }"#);
    }
}
