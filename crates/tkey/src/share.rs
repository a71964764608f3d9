//! share types and their canonical json form
//!
//! a share serializes as
//!
//! ```text
//! {"polynomialID":"02…|03…","share":{"share":"<64 hex>","shareIndex":"2"}}
//! ```
//!
//! decoding is strict: the value must be exactly 64 lowercase hex digits
//! below the group order and the index minimal lowercase hex, so every
//! share has exactly one accepted encoding.

use std::collections::BTreeMap;

use core::fmt;

use k256::Scalar;
use serde::{Deserialize, Serialize, Serializer};

use crate::field::{scalar_from_bytes, scalar_to_hex, SCALAR_HEX_LEN};
use crate::poly::{PolynomialId, MAX_SHARES, PROVIDER_INDEX};
use crate::{Error, Result};

/// one evaluation of a sharing polynomial
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "ShareStoreJson")]
pub struct Share {
    /// x coordinate, 1-indexed
    pub index: u32,
    /// f(index)
    pub(crate) value: Scalar,
    /// polynomial this share belongs to
    pub polynomial_id: PolynomialId,
}

impl Share {
    pub(crate) fn new(index: u32, value: Scalar, polynomial_id: PolynomialId) -> Self {
        Self {
            index,
            value,
            polynomial_id,
        }
    }

    /// share value as 64 lowercase hex digits
    pub fn value_hex(&self) -> String {
        scalar_to_hex(&self.value)
    }

    /// the share destined for the remote store
    pub fn is_provider(&self) -> bool {
        self.index == PROVIDER_INDEX
    }

    /// check the value against the polynomial commitments
    pub fn verify(&self) -> Result<()> {
        if self.polynomial_id.verifies(self.index, &self.value) {
            Ok(())
        } else {
            Err(Error::ShareVerificationFailed)
        }
    }

    /// canonical json string
    pub fn encode(&self) -> String {
        self.to_json().to_string()
    }

    /// parse and validate a canonical json string
    pub fn decode(s: &str) -> Result<Self> {
        let raw: ShareStoreJson =
            serde_json::from_str(s).map_err(|e| Error::MalformedShare(e.to_string()))?;
        Self::try_from(raw)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "share": {
                "share": self.value_hex(),
                "shareIndex": format!("{:x}", self.index),
            },
            "polynomialID": self.polynomial_id.to_string(),
        })
    }
}

impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Share")
            .field("index", &self.index)
            .field("polynomial_id", &self.polynomial_id)
            .finish_non_exhaustive()
    }
}

impl Serialize for Share {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// wire layout before validation
#[derive(Deserialize)]
struct ShareStoreJson {
    share: ShareJson,
    #[serde(rename = "polynomialID")]
    polynomial_id: String,
}

#[derive(Deserialize)]
struct ShareJson {
    share: String,
    #[serde(rename = "shareIndex")]
    share_index: String,
}

impl TryFrom<ShareStoreJson> for Share {
    type Error = Error;

    fn try_from(raw: ShareStoreJson) -> Result<Self> {
        let index = parse_index(&raw.share.share_index)?;
        let value = parse_value(&raw.share.share)?;
        let polynomial_id = raw.polynomial_id.parse()?;
        Ok(Share::new(index, value, polynomial_id))
    }
}

fn is_lower_hex(s: &str) -> bool {
    s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn parse_value(s: &str) -> Result<Scalar> {
    if s.len() != SCALAR_HEX_LEN || !is_lower_hex(s) {
        return Err(Error::MalformedShare(format!(
            "share value must be {} lowercase hex digits",
            SCALAR_HEX_LEN
        )));
    }
    let bytes = hex::decode(s).map_err(|e| Error::MalformedShare(e.to_string()))?;
    scalar_from_bytes(&bytes)
        .ok_or_else(|| Error::MalformedShare("share value exceeds group order".into()))
}

fn parse_index(s: &str) -> Result<u32> {
    if s.is_empty() || !is_lower_hex(s) || s.starts_with('0') || s.len() > 2 {
        return Err(Error::MalformedShare(format!("non-canonical share index: {:?}", s)));
    }
    let index = u32::from_str_radix(s, 16).map_err(|e| Error::MalformedShare(e.to_string()))?;
    if index as usize > MAX_SHARES {
        return Err(Error::MalformedShare(format!("share index {} out of range", index)));
    }
    Ok(index)
}

/// all shares produced by one split
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShareSet {
    polynomial_id: PolynomialId,
    shares: BTreeMap<u32, Share>,
}

impl ShareSet {
    pub(crate) fn new(polynomial_id: PolynomialId, shares: Vec<Share>) -> Self {
        Self {
            polynomial_id,
            shares: shares.into_iter().map(|s| (s.index, s)).collect(),
        }
    }

    pub fn polynomial_id(&self) -> &PolynomialId {
        &self.polynomial_id
    }

    pub fn get(&self, index: u32) -> Option<&Share> {
        self.shares.get(&index)
    }

    /// the index 1 share
    pub fn provider(&self) -> Option<&Share> {
        self.get(PROVIDER_INDEX)
    }

    /// shares held by the caller, ascending by index
    pub fn local_shares(&self) -> impl Iterator<Item = &Share> {
        self.shares.values().filter(|s| !s.is_provider())
    }

    /// every share, ascending by index
    pub fn shares(&self) -> impl Iterator<Item = &Share> {
        self.shares.values()
    }

    pub fn indexes(&self) -> Vec<u32> {
        self.shares.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.shares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }

    pub fn into_shares(self) -> Vec<Share> {
        self.shares.into_values().collect()
    }

    /// role keyed triple for the host: ts = provider, ds/ss = local shares
    pub fn encode(&self) -> Result<EncodedShareSet> {
        let ts = self.provider().ok_or(Error::NotProviderShare(0))?;
        let mut locals = self.local_shares();
        match (locals.next(), locals.next()) {
            (Some(ds), Some(ss)) => Ok(EncodedShareSet {
                ts: ts.clone(),
                ds: ds.clone(),
                ss: ss.clone(),
            }),
            _ => Err(Error::InsufficientShares {
                have: self.len(),
                need: crate::poly::SHARE_COUNT,
            }),
        }
    }
}

/// share set as delivered to the host
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedShareSet {
    /// provider (torus) share
    pub ts: Share,
    /// device share
    pub ds: Share,
    /// server share
    pub ss: Share,
}
