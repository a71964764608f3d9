//! remote share store trait and implementations
//!
//! a store keeps at most one provider record per identity. a record can be
//! absent (never written), present, or tombstoned (explicitly deleted), and
//! the three are distinguishable on fetch.
//!
//! implementations:
//! - memory: in-process map, for tests and offline hosts
//! - http: metadata service client (feature `network`)

pub mod memory;

#[cfg(feature = "network")]
pub mod http;

use async_trait::async_trait;

use crate::share::Share;
use crate::Result;

pub use memory::MemoryStore;

#[cfg(feature = "network")]
pub use http::MetadataClient;

/// the persisted provider share of one identity
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteRecord {
    /// the index 1 share
    pub share: Share,
    /// indexes issued for the share's polynomial
    pub share_indexes: Vec<u32>,
    /// free text descriptor, e.g. the login identifier
    pub label: Option<String>,
}

/// outcome of a fetch
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lookup {
    /// nothing was ever written for this identity
    Absent,
    /// the record was deleted
    Tombstoned,
    Found(RemoteRecord),
}

impl Lookup {
    pub fn into_record(self) -> Option<RemoteRecord> {
        match self {
            Lookup::Found(record) => Some(record),
            Lookup::Absent | Lookup::Tombstoned => None,
        }
    }
}

/// identity keyed provider share storage
///
/// every call may fail with `TransientNetwork` (retry is safe) or
/// `RemoteRejected` (it is not). writes are last-write-wins.
#[async_trait]
pub trait ShareStore: Send + Sync {
    /// fetch the record for `identity`
    async fn fetch(&self, identity: &str) -> Result<Lookup>;

    /// write the record, replacing any previous one or tombstone.
    /// a `None` label leaves an existing descriptor untouched.
    async fn upsert(&self, identity: &str, record: &RemoteRecord) -> Result<()>;

    /// replace the record with a tombstone
    async fn delete(&self, identity: &str) -> Result<()>;
}
