//! Key-value store seam.
//!
//! The host supplies a block-scoped byte store; this crate only needs `get/set/has/delete`
//! and ordered prefix iteration. [MemStore] is the in-memory implementation used by tests
//! and tooling, [Overlay] buffers writes so a failed handler can be discarded as a whole.
//!
//! Structured values are CBOR-encoded (`ciborium`); counters are decimal strings.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Cursor;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error at key {key}: {reason}")]
    Decode { key: String, reason: String },
}

impl StoreError {
    fn decode(key: &[u8], reason: impl ToString) -> Self {
        StoreError::Decode {
            key: hex::encode(key),
            reason: reason.to_string(),
        }
    }
}

/// Byte-oriented store. Iteration is in ascending key order.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    fn set(&mut self, key: &[u8], value: Vec<u8>);

    fn delete(&mut self, key: &[u8]);

    fn has(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// All entries whose key starts with `prefix`.
    fn prefix_iter(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)>;
}

/// Typed helpers over any [KvStore].
pub trait StoreExt: KvStore {
    fn get_value<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>, StoreError> {
        match self.get(key) {
            Some(bytes) => decode(key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    fn set_value<T: Serialize>(&mut self, key: &[u8], value: &T) -> Result<(), StoreError> {
        let bytes = encode(value)?;
        self.set(key, bytes);
        Ok(())
    }

    /// Read a counter stored as a decimal string.
    fn get_decimal(&self, key: &[u8]) -> Result<Option<u64>, StoreError> {
        match self.get(key) {
            Some(bytes) => {
                let s = std::str::from_utf8(&bytes).map_err(|e| StoreError::decode(key, e))?;
                s.parse::<u64>()
                    .map(Some)
                    .map_err(|e| StoreError::decode(key, e))
            }
            None => Ok(None),
        }
    }

    fn set_decimal(&mut self, key: &[u8], value: u64) {
        self.set(key, value.to_string().into_bytes());
    }
}

impl<S: KvStore + ?Sized> StoreExt for S {}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(|e| StoreError::Encode(e.to_string()))?;
    Ok(buf)
}

pub fn decode<T: DeserializeOwned>(key: &[u8], bytes: &[u8]) -> Result<T, StoreError> {
    ciborium::de::from_reader(Cursor::new(bytes)).map_err(|e| StoreError::decode(key, e))
}

/// In-memory ordered store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemStore {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KvStore for MemStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &[u8], value: Vec<u8>) {
        self.entries.insert(key.to_vec(), value);
    }

    fn delete(&mut self, key: &[u8]) {
        self.entries.remove(key);
    }

    fn has(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    fn prefix_iter(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.entries
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Write buffer over a read-only base store.
///
/// Reads see buffered writes first. Nothing reaches the base until the caller applies
/// [Overlay::into_changes] to it.
pub struct Overlay<'a> {
    base: &'a dyn KvStore,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a> Overlay<'a> {
    pub fn new(base: &'a dyn KvStore) -> Self {
        Self {
            base,
            writes: BTreeMap::new(),
        }
    }

    pub fn into_changes(self) -> Changes {
        Changes(self.writes)
    }
}

impl KvStore for Overlay<'_> {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self.writes.get(key) {
            Some(write) => write.clone(),
            None => self.base.get(key),
        }
    }

    fn set(&mut self, key: &[u8], value: Vec<u8>) {
        self.writes.insert(key.to_vec(), Some(value));
    }

    fn delete(&mut self, key: &[u8]) {
        self.writes.insert(key.to_vec(), None);
    }

    fn prefix_iter(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.base.prefix_iter(prefix).into_iter().collect();
        for (k, v) in self
            .writes
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            match v {
                Some(v) => merged.insert(k.clone(), v.clone()),
                None => merged.remove(k),
            };
        }
        merged.into_iter().collect()
    }
}

/// Buffered writes taken out of an [Overlay].
#[derive(Debug, Default)]
pub struct Changes(BTreeMap<Vec<u8>, Option<Vec<u8>>>);

impl Changes {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn apply(self, store: &mut dyn KvStore) {
        for (k, v) in self.0 {
            match v {
                Some(v) => store.set(&k, v),
                None => store.delete(&k),
            }
        }
    }
}
