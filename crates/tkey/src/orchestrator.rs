//! share lifecycle: split, save, fetch, reconstruct, delete
//!
//! the state of an identity is never stored as such; it is derived from
//! what the remote store holds plus the shares the caller brings:
//!
//! ```text
//!   NEW ──split──▶ PROVIDER_ONLY ──reconstruct──▶ RECONSTRUCTED
//!    ▲                  │
//!    │                delete
//!    │                  ▼
//!    └──(split)──── TOMBSTONED
//! ```
//!
//! every operation is fetch → compute → write, suspending only on the
//! store. operations on the same identity are serialized by a per-identity
//! async mutex so a split cannot interleave with a delete.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::config::{Config, ResplitPolicy};
use crate::credential::fingerprint;
use crate::field::Secret;
use crate::poly::{
    self, derive_missing_share, is_complete_index_set, rebuild_share_set, PolynomialId,
    MAX_SHARES, SHARE_COUNT, THRESHOLD,
};
use crate::share::{Share, ShareSet};
use crate::store::{Lookup, RemoteRecord, ShareStore};
use crate::{Error, Result};

/// derived state of an identity
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdentityState {
    /// no record was ever written
    New,
    /// a provider share is stored, local shares are with the caller
    ProviderOnly { polynomial_id: PolynomialId },
    /// the record was deleted; splits treat this like `New`
    Tombstoned,
}

/// outcome of `reconstruct_key`
#[derive(Debug)]
pub enum Reconstruction {
    Reconstructed {
        secret: Secret,
        /// a share the caller did not bring, so full custody can be restored
        derived_share: Share,
    },
    /// nothing stored for this identity (new user, or deleted)
    NoShareFound,
}

/// per-identity async locks
#[derive(Default)]
struct IdentityLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl IdentityLocks {
    async fn acquire(&self, identity: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // drop entries nobody is waiting on
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks
                .entry(identity.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// the lifecycle engine, one per process
pub struct Orchestrator {
    store: Arc<dyn ShareStore>,
    config: Arc<Config>,
    locks: IdentityLocks,
}

fn check_identity(identity: &str) -> Result<()> {
    if identity.is_empty() {
        return Err(Error::InvalidIdentity);
    }
    Ok(())
}

impl Orchestrator {
    pub fn new(store: Arc<dyn ShareStore>, config: Arc<Config>) -> Self {
        Self {
            store,
            config,
            locks: IdentityLocks::default(),
        }
    }

    /// orchestrator with default configuration
    pub fn with_store(store: Arc<dyn ShareStore>) -> Self {
        Self::new(store, Arc::new(Config::default()))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// split `secret` for `identity`, persisting the provider share
    ///
    /// if the store already holds a complete split of the same key, that
    /// split is returned unchanged and nothing is written.
    ///
    /// hazard: when the stored share belongs to a different key and the
    /// resplit policy is `Force`, the stored share is overwritten and the
    /// old key can no longer be recovered through this identity.
    pub async fn split_key(&self, identity: &str, secret: &Secret) -> Result<ShareSet> {
        let _guard = self.locks.acquire(identity).await;
        self.split_key_locked(identity, secret)
            .await
            .map_err(|e| {
                warn!(identity = %fingerprint(identity), error = %e, "key split failed");
                e.key_split()
            })
    }

    async fn split_key_locked(&self, identity: &str, secret: &Secret) -> Result<ShareSet> {
        check_identity(identity)?;
        let fp = fingerprint(identity);

        let record = match self.store.fetch(identity).await? {
            Lookup::Found(record) => record,
            Lookup::Absent => {
                debug!(identity = %fp, "new identity");
                return self.fresh_split(identity, secret).await;
            }
            Lookup::Tombstoned => {
                debug!(identity = %fp, "identity was deleted, splitting fresh");
                return self.fresh_split(identity, secret).await;
            }
        };

        let existing = &record.share.polynomial_id;
        if existing.public_key() == secret.public_key() {
            if is_complete_index_set(&record.share_indexes) && record.share.verify().is_ok() {
                let set = rebuild_share_set(secret, &record.share, &record.share_indexes)?;
                info!(identity = %fp, "returning existing share set");
                return Ok(set);
            }
            info!(
                identity = %fp,
                issued = record.share_indexes.len(),
                "active polynomial incomplete, re-splitting"
            );
        } else {
            // shares still needed beyond the provider share to recover the old key
            let required_shares = existing.threshold().saturating_sub(1);
            let refused = Error::ResplitRefused {
                public_key: existing.public_key_hex(),
                required_shares,
            };
            match self.config.resplit_policy {
                ResplitPolicy::Refuse => return Err(refused),
                ResplitPolicy::Force if required_shares > 1 => return Err(refused),
                ResplitPolicy::Force => {
                    warn!(
                        identity = %fp,
                        previous_key = %existing.public_key_hex(),
                        "stored share belongs to another key, overwriting it"
                    );
                }
            }
        }

        self.fresh_split(identity, secret).await
    }

    async fn fresh_split(&self, identity: &str, secret: &Secret) -> Result<ShareSet> {
        let set = poly::split(secret, THRESHOLD, SHARE_COUNT)?;
        let provider = set.provider().cloned().ok_or(Error::NotProviderShare(0))?;

        self.store
            .upsert(
                identity,
                &RemoteRecord {
                    share: provider,
                    share_indexes: set.indexes(),
                    label: None,
                },
            )
            .await?;

        info!(
            identity = %fingerprint(identity),
            polynomial = ?set.polynomial_id(),
            "split key and stored provider share"
        );
        Ok(set)
    }

    /// persist a provider share with its label
    ///
    /// saving what is already stored writes nothing.
    pub async fn save_provider_share(&self, identity: &str, share: &Share, label: &str) -> Result<()> {
        let _guard = self.locks.acquire(identity).await;
        self.save_locked(identity, share, label)
            .await
            .map_err(|e| {
                warn!(identity = %fingerprint(identity), error = %e, "save failed");
                e.save()
            })
    }

    async fn save_locked(&self, identity: &str, share: &Share, label: &str) -> Result<()> {
        check_identity(identity)?;
        if !share.is_provider() {
            return Err(Error::NotProviderShare(share.index));
        }
        share.verify()?;

        let label = (!label.is_empty()).then(|| label.to_string());
        let existing = self.store.fetch(identity).await?.into_record();

        let share_indexes = match &existing {
            Some(record) if record.share == *share => {
                if label.is_none() || record.label == label {
                    debug!(identity = %fingerprint(identity), "provider share unchanged");
                    return Ok(());
                }
                poly::normalize_indexes(record.share_indexes.clone())
            }
            Some(record) if record.share.polynomial_id == share.polynomial_id => {
                poly::normalize_indexes(record.share_indexes.clone())
            }
            _ => (1..=SHARE_COUNT as u32).collect(),
        };

        self.store
            .upsert(
                identity,
                &RemoteRecord {
                    share: share.clone(),
                    share_indexes,
                    label,
                },
            )
            .await?;

        info!(identity = %fingerprint(identity), "provider share saved");
        Ok(())
    }

    /// the stored provider share, or `None` for new and deleted identities
    pub async fn get_provider_share(&self, identity: &str) -> Result<Option<Share>> {
        self.get_locked(identity).await.map_err(|e| {
            warn!(identity = %fingerprint(identity), error = %e, "retrieve failed");
            e.retrieve()
        })
    }

    async fn get_locked(&self, identity: &str) -> Result<Option<Share>> {
        check_identity(identity)?;
        match self.store.fetch(identity).await? {
            Lookup::Found(record) => {
                record.share.verify()?;
                Ok(Some(record.share))
            }
            Lookup::Absent | Lookup::Tombstoned => Ok(None),
        }
    }

    /// tombstone the stored provider share
    pub async fn delete_provider_share(&self, identity: &str) -> Result<()> {
        let _guard = self.locks.acquire(identity).await;
        let result = match check_identity(identity) {
            Ok(()) => self.store.delete(identity).await,
            Err(e) => Err(e),
        };
        result.map_err(|e| {
            warn!(identity = %fingerprint(identity), error = %e, "delete failed");
            e.delete()
        })?;

        info!(identity = %fingerprint(identity), "provider share tombstoned");
        Ok(())
    }

    /// reconstruct the key from the stored provider share and one local share
    ///
    /// also derives the local share the caller did not bring.
    pub async fn reconstruct_key(&self, identity: &str, local: &Share) -> Result<Reconstruction> {
        let _guard = self.locks.acquire(identity).await;
        self.reconstruct_locked(identity, local)
            .await
            .map_err(|e| {
                warn!(identity = %fingerprint(identity), error = %e, "reconstruct failed");
                e.reconstruct()
            })
    }

    async fn reconstruct_locked(&self, identity: &str, local: &Share) -> Result<Reconstruction> {
        check_identity(identity)?;

        let record = match self.store.fetch(identity).await? {
            Lookup::Found(record) => record,
            Lookup::Absent | Lookup::Tombstoned => {
                info!(identity = %fingerprint(identity), "no provider share stored");
                return Ok(Reconstruction::NoShareFound);
            }
        };

        let provider = record.share;
        provider.verify()?;
        let secret = poly::reconstruct(&provider, local)?;

        let target = record
            .share_indexes
            .iter()
            .copied()
            .filter(|&i| (2..=MAX_SHARES as u32).contains(&i) && i != local.index)
            .min()
            .or_else(|| (2..=MAX_SHARES as u32).find(|&i| i != local.index))
            .ok_or(Error::InsufficientShares {
                have: 2,
                need: SHARE_COUNT,
            })?;

        let derived_share =
            derive_missing_share(&[provider.clone(), local.clone()], target, &provider.polynomial_id)?;

        info!(identity = %fingerprint(identity), derived = target, "key reconstructed");
        Ok(Reconstruction::Reconstructed {
            secret,
            derived_share,
        })
    }

    /// reconstruct from two caller held shares, no store access
    pub fn reconstruct_key_from_two_local_shares(&self, a: &Share, b: &Share) -> Result<Secret> {
        poly::reconstruct(a, b).map_err(Error::reconstruct)
    }

    /// audit view of an identity
    pub async fn identity_state(&self, identity: &str) -> Result<IdentityState> {
        check_identity(identity).map_err(Error::retrieve)?;
        let lookup = self.store.fetch(identity).await.map_err(Error::retrieve)?;
        Ok(match lookup {
            Lookup::Absent => IdentityState::New,
            Lookup::Tombstoned => IdentityState::Tombstoned,
            Lookup::Found(record) => IdentityState::ProviderOnly {
                polynomial_id: record.share.polynomial_id,
            },
        })
    }
}
