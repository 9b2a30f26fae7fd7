//! Key/value persistence boundary used by every durable kernel component.

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use serde::{de::DeserializeOwned, Serialize};

use crate::sanitize::parse_document;

/// Host service for durable string blobs keyed by name.
///
/// The kernel assumes nothing about the backing medium. `get` never fails (an unreadable entry is
/// reported as absent); writes surface host failures as `Err(String)` so callers can keep their
/// dirty state and retry.
pub trait KvStore {
    /// Reads the raw string stored under `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<(), String>;

    /// Removes `key`. Removing an absent key succeeds.
    fn remove(&self, key: &str) -> Result<(), String>;
}

impl<S: KvStore + ?Sized> KvStore for &S {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), String> {
        (**self).remove(key)
    }
}

impl<S: KvStore + ?Sized> KvStore for Rc<S> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), String> {
        (**self).remove(key)
    }
}

#[derive(Debug, Clone, Copy, Default)]
/// Store that remembers nothing; every read is absent and every write succeeds.
pub struct NoopKvStore;

impl KvStore for NoopKvStore {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), String> {
        Ok(())
    }

    fn remove(&self, _key: &str) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
/// In-memory store. Clones share the same backing map, so a kernel can be rebooted from a clone.
pub struct MemoryKvStore {
    inner: Rc<RefCell<HashMap<String, String>>>,
}

impl MemoryKvStore {
    /// Returns all keys currently present, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = self.inner.borrow().keys().cloned().collect::<Vec<_>>();
        keys.sort();
        keys
    }

    /// Returns `true` when `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.borrow().contains_key(key)
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.borrow().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        self.inner
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), String> {
        self.inner.borrow_mut().remove(key);
        Ok(())
    }
}

/// Loads, sanitizes, and deserializes a typed document through a [`KvStore`].
///
/// Absent keys, unparseable text, and shape mismatches all resolve to `None`.
pub fn load_json_with<S: KvStore + ?Sized, T: DeserializeOwned>(store: &S, key: &str) -> Option<T> {
    let raw = store.get(key)?;
    let parsed = parse_document(&raw);
    if parsed.is_none() {
        log::warn!("stored document `{key}` is corrupt; treating it as absent");
    }
    parsed
}

/// Serializes and saves a typed document through a [`KvStore`].
///
/// # Errors
///
/// Returns an error when serialization or the store write fails.
pub fn save_json_with<S: KvStore + ?Sized, T: Serialize>(
    store: &S,
    key: &str,
    value: &T,
) -> Result<(), String> {
    let raw = serde_json::to_string(value).map_err(|e| e.to_string())?;
    store.set(key, &raw)
}
