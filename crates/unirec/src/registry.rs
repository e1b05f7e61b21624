//! Process-scoped canonical registry: one record instance per live identity
//! key. The registry is an explicit service object handed to every unique
//! record, never an implicit global, so tests and multi-tenant setups can run
//! isolated instances side by side.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::record::Record;
use crate::value::Id;

/// The identity triple a canonical record is registered under. Type and id
/// are mandatory; the namespace partitions otherwise-colliding ids.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistryKey {
    pub record_type: String,
    pub id: Id,
    pub namespace: Option<String>,
}

impl RegistryKey {
    /// Derive the key from a record's current identity. `None` when the type
    /// or id is missing, i.e. the record is not yet identifiable.
    pub fn for_record(record: &Record) -> Option<RegistryKey> {
        let record_type = record.get_type()?;
        let id = record.get_id()?;
        Some(RegistryKey { record_type,
                           id,
                           namespace: record.get_namespace() })
    }
}

impl fmt::Debug for RegistryKey {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(fmt, "{}/{}@{}", self.record_type, self.id, ns),
            None => write!(fmt, "{}/{}", self.record_type, self.id),
        }
    }
}

/// Keyed store of canonical records. The registry stores the first record
/// instance registered for a key and reuses it as the canonical source
/// directly; the registering holder is responsible for removing it again on
/// its own teardown (see `UniqueRecord`).
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Mutex<HashMap<RegistryKey, Record>>>,
}

pub struct WeakRegistry {
    inner: Weak<Mutex<HashMap<RegistryKey, Record>>>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry { inner: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Insert-if-absent under the record's own identity key. Returns the key
    /// only when this call inserted the record (the registrant signal);
    /// `None` when the record is unidentifiable or an entry already exists.
    pub fn store(&self, record: &Record) -> Option<RegistryKey> {
        let key = RegistryKey::for_record(record)?;
        let mut map = self.inner.lock().unwrap();
        if map.contains_key(&key) {
            return None;
        }
        debug!("Registry.store({:?})", key);
        map.insert(key.clone(), record.clone());
        Some(key)
    }

    pub fn lookup(&self, record_type: &str, id: &Id, namespace: Option<&str>) -> Option<Record> {
        let key = RegistryKey { record_type: record_type.to_string(),
                                id: id.clone(),
                                namespace: namespace.map(|s| s.to_string()) };
        self.inner.lock().unwrap().get(&key).cloned()
    }

    /// Exact-match retrieval by the record's current identity. An incomplete
    /// identity resolves to nothing.
    pub fn lookup_record(&self, record: &Record) -> Option<Record> {
        let key = RegistryKey::for_record(record)?;
        self.inner.lock().unwrap().get(&key).cloned()
    }

    /// Delete and return the entry for `key`, if any.
    pub fn remove(&self, key: &RegistryKey) -> Option<Record> {
        let removed = self.inner.lock().unwrap().remove(key);
        if removed.is_some() {
            debug!("Registry.remove({:?})", key);
        }
        removed
    }

    /// Remove the entry for `key` only when it is this exact record instance.
    /// Used at registrant teardown so a later re-registration under the same
    /// key is never torn down by a stale holder.
    pub fn unregister(&self, key: &RegistryKey, record: &Record) -> bool {
        let mut map = self.inner.lock().unwrap();
        match map.get(key) {
            Some(entry) if Record::ptr_eq(entry, record) => {
                debug!("Registry.unregister({:?})", key);
                map.remove(key);
                true
            },
            _ => false,
        }
    }

    /// Empty the registry. Primarily a test/reset hook.
    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    pub fn weak(&self) -> WeakRegistry {
        WeakRegistry { inner: Arc::downgrade(&self.inner) }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

impl WeakRegistry {
    pub fn upgrade(&self) -> Option<Registry> {
        self.inner.upgrade().map(|inner| Registry { inner })
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let map = self.inner.lock().unwrap();
        fmt.debug_struct("Registry").field("entries", &map.len()).finish()
    }
}
