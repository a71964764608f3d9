//! in-memory share store
//!
//! no persistence, no network. mirrors the metadata service semantics
//! closely enough to stand in for it in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::store::{Lookup, RemoteRecord, ShareStore};
use crate::{Error, Result};

enum Slot {
    Record(RemoteRecord),
    Tombstone,
}

#[derive(Default)]
pub struct MemoryStore {
    slots: RwLock<HashMap<String, Slot>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// number of upserts and deletes applied so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn poisoned<E: std::fmt::Display>(e: E) -> Error {
        Error::RemoteRejected(format!("store lock poisoned: {}", e))
    }
}

#[async_trait]
impl ShareStore for MemoryStore {
    async fn fetch(&self, identity: &str) -> Result<Lookup> {
        let slots = self.slots.read().map_err(Self::poisoned)?;
        Ok(match slots.get(identity) {
            None => Lookup::Absent,
            Some(Slot::Tombstone) => Lookup::Tombstoned,
            Some(Slot::Record(record)) => Lookup::Found(record.clone()),
        })
    }

    async fn upsert(&self, identity: &str, record: &RemoteRecord) -> Result<()> {
        let mut slots = self.slots.write().map_err(Self::poisoned)?;

        let mut record = record.clone();
        if record.label.is_none() {
            if let Some(Slot::Record(previous)) = slots.get(identity) {
                record.label = previous.label.clone();
            }
        }

        slots.insert(identity.to_string(), Slot::Record(record));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, identity: &str) -> Result<()> {
        let mut slots = self.slots.write().map_err(Self::poisoned)?;
        slots.insert(identity.to_string(), Slot::Tombstone);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Secret;
    use crate::poly::split;

    fn record(label: Option<&str>) -> RemoteRecord {
        let set = split(&Secret::from_hex("1").unwrap(), 2, 3).unwrap();
        RemoteRecord {
            share: set.provider().unwrap().clone(),
            share_indexes: set.indexes(),
            label: label.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_absent_found_tombstoned() {
        let store = MemoryStore::new();
        assert_eq!(store.fetch("alice").await.unwrap(), Lookup::Absent);

        let rec = record(Some("alice@example.com"));
        store.upsert("alice", &rec).await.unwrap();
        assert_eq!(store.fetch("alice").await.unwrap(), Lookup::Found(rec));

        store.delete("alice").await.unwrap();
        assert_eq!(store.fetch("alice").await.unwrap(), Lookup::Tombstoned);
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_label_kept_when_omitted() {
        let store = MemoryStore::new();
        store.upsert("alice", &record(Some("first"))).await.unwrap();
        store.upsert("alice", &record(None)).await.unwrap();

        let found = store.fetch("alice").await.unwrap().into_record().unwrap();
        assert_eq!(found.label.as_deref(), Some("first"));

        // a tombstone drops the label
        store.delete("alice").await.unwrap();
        store.upsert("alice", &record(None)).await.unwrap();
        let found = store.fetch("alice").await.unwrap().into_record().unwrap();
        assert_eq!(found.label, None);
    }
}
