//! Key-value persistence of layouts, transforms and flags.
//!
//! The diagram never owns a storage engine. It talks to a [`KeyValueStore`] through a [`Store`]
//! that scopes keys by diagram id and turns every failure into a silent no-op.

mod debounce;
mod layout;

pub use debounce::Debounce;
pub use layout::{FixedEntry, LayoutRecord, LayoutStore};

use serde::de::DeserializeOwned;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

const PROBE_KEY: &str = "storage test";

/// A string key-value backend.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<String>;
    /// Stores `value`; returns false if the backend refused the write.
    fn set(&self, key: &str, value: &str) -> bool;
    fn remove(&self, key: &str);
    /// Every key currently stored.
    fn keys(&self) -> Vec<String>;
}

/// In-memory backend. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Rc<RefCell<BTreeMap<String, String>>>,
}

impl MemoryStore {
    pub fn from_entries(entries: BTreeMap<String, String>) -> Self {
        Self {
            entries: Rc::new(RefCell::new(entries)),
        }
    }

    /// Copy of all entries.
    pub fn entries(&self) -> BTreeMap<String, String> {
        self.entries.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> bool {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        true
    }

    fn remove(&self, key: &str) {
        self.entries.borrow_mut().remove(key);
    }

    fn keys(&self) -> Vec<String> {
        self.entries.borrow().keys().cloned().collect()
    }
}

/// Diagram-scoped access to an optional backend.
///
/// Layer records live under `{diagramId}.{layerId}.{path}` and diagram-wide flags under
/// `{diagramId}.{path}`. Without a backend every read returns `None` and every write `false`.
pub struct Store {
    diagram_id: String,
    backend: Option<Box<dyn KeyValueStore>>,
}

impl Store {
    /// Probes `backend` once with a throwaway write and keeps it only if the probe succeeds.
    pub fn new(diagram_id: impl Into<String>, backend: Option<Box<dyn KeyValueStore>>) -> Self {
        let diagram_id = diagram_id.into();
        let backend = backend.filter(|backend| {
            let ok = backend.set(PROBE_KEY, PROBE_KEY);
            backend.remove(PROBE_KEY);
            ok
        });
        if backend.is_none() {
            log::warn!("storage unavailable for diagram {diagram_id}; layout will not persist");
        }
        Self {
            diagram_id,
            backend,
        }
    }

    /// A store without a backend.
    pub fn unavailable(diagram_id: impl Into<String>) -> Self {
        Self::new(diagram_id, None)
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    pub fn diagram_id(&self) -> &str {
        &self.diagram_id
    }

    /// Key of a layer-scoped record.
    pub fn layer_key(&self, layer_id: &str, path: &str) -> String {
        format!("{}.{}.{}", self.diagram_id, layer_id, path)
    }

    /// Key of a diagram-wide flag.
    pub fn flag_key(&self, path: &str) -> String {
        format!("{}.{}", self.diagram_id, path)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.backend.as_ref()?.get(key)
    }

    pub fn set(&self, key: &str, value: &str) -> bool {
        match &self.backend {
            Some(backend) => backend.set(key, value),
            None => false,
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        match &self.backend {
            Some(backend) => {
                backend.remove(key);
                true
            }
            None => false,
        }
    }

    /// Keys of every layer-scoped record of this diagram stored under `path`.
    pub fn layer_keys(&self, path: &str) -> Vec<String> {
        let Some(backend) = &self.backend else {
            return Vec::new();
        };
        let prefix = format!("{}.", self.diagram_id);
        let suffix = format!(".{path}");
        backend
            .keys()
            .into_iter()
            .filter(|key| {
                key.strip_prefix(&prefix)
                    .and_then(|rest| rest.strip_suffix(&suffix))
                    .is_some_and(|layer_id| !layer_id.is_empty())
            })
            .collect()
    }

    pub fn get_flag(&self, path: &str) -> Option<String> {
        self.get(&self.flag_key(path))
    }

    pub fn set_flag(&self, path: &str, value: &str) -> bool {
        self.set(&self.flag_key(path), value)
    }

    /// Reads and parses a JSON record. Malformed records are logged and treated as absent.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                log::error!("ignoring malformed record {key}: {err}");
                None
            }
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("diagram_id", &self.diagram_id)
            .field("available", &self.is_available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RefusingStore;

    impl KeyValueStore for RefusingStore {
        fn get(&self, _key: &str) -> Option<String> {
            None
        }

        fn set(&self, _key: &str, _value: &str) -> bool {
            false
        }

        fn remove(&self, _key: &str) {}

        fn keys(&self) -> Vec<String> {
            Vec::new()
        }
    }

    #[test]
    fn test_layer_keys_lists_records_of_this_diagram_only() {
        let backend = MemoryStore::default();
        let store = Store::new("net", Some(Box::new(backend.clone())));
        store.set("net.main.layout", "{}");
        store.set("net.Cloud-10.0.0.0.layout", "{}");
        store.set("net.main.transform", "{}");
        store.set("net.grouping", "true");
        store.set("other.main.layout", "{}");

        let mut keys = store.layer_keys("layout");
        keys.sort();
        assert_eq!(keys, vec!["net.Cloud-10.0.0.0.layout", "net.main.layout"]);
        assert!(Store::unavailable("net").layer_keys("layout").is_empty());
    }

    #[test]
    fn test_keys_are_scoped_by_diagram() {
        let store = Store::new("net", Some(Box::new(MemoryStore::default())));
        assert_eq!(store.layer_key("main", "layout"), "net.main.layout");
        assert_eq!(store.flag_key("grouping"), "net.grouping");
    }

    #[test]
    fn test_probe_leaves_no_entry() {
        let backend = MemoryStore::default();
        let store = Store::new("net", Some(Box::new(backend.clone())));
        assert!(store.is_available());
        assert!(backend.is_empty());
    }

    #[test]
    fn test_refusing_backend_is_unavailable() {
        let store = Store::new("net", Some(Box::new(RefusingStore)));
        assert!(!store.is_available());
        assert!(!store.set_flag("grouping", "true"));
        assert_eq!(store.get_flag("grouping"), None);
        assert!(!store.remove("net.grouping"));
    }

    #[test]
    fn test_malformed_json_reads_as_absent() {
        let backend = MemoryStore::default();
        let store = Store::new("net", Some(Box::new(backend.clone())));
        store.set("net.main.transform", "{not json");
        assert_eq!(store.get_json::<crate::types::Transform>("net.main.transform"), None);
    }
}
