use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::entry::PersistedEntry;

/// Key of the body blob belonging to a metadata record. Embedding the
/// entry id means a stale in-flight write keyed by an older id can never
/// be mistaken for the current entry's body.
pub fn blob_key(id: &str, url: &str) -> String {
    format!("{id}|{url}")
}

/// Key/value store for metadata records. Keyed by effective URL. Eviction
/// and TTL are the store's own business; the engine only gets, sets, and
/// deletes.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<PersistedEntry>>;
    async fn set(&self, key: &str, entry: PersistedEntry) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Key/value store for response bodies, keyed by [`blob_key`]. Bodies are
/// raw byte sequences with no framing.
#[async_trait]
pub trait BodyStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;
    async fn set(&self, key: &str, body: Bytes) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// In-process implementation of both stores. Suitable for tests and for
/// callers that do not need persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, PersistedEntry>>,
    bodies: Mutex<HashMap<String, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn body_count(&self) -> usize {
        self.bodies.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count() == 0 && self.body_count() == 0
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<PersistedEntry>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, entry: PersistedEntry) -> Result<()> {
        self.entries.lock().insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

#[async_trait]
impl BodyStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.bodies.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, body: Bytes) -> Result<()> {
        self.bodies.lock().insert(key.to_string(), body);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.bodies.lock().remove(key);
        Ok(())
    }
}
