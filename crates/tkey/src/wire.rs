//! metadata service wire types
//!
//! shared by the http store client and the metadata server. a record is
//! addressed by (pub_key_X, pub_key_Y, namespace); its content is an
//! opaque string. the empty string means nothing was ever written and
//! [`TOMBSTONE`] means the record was deleted.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use k256::ecdsa::signature::Verifier;
use k256::ecdsa::{Signature, VerifyingKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::share::Share;
use crate::{Error, Result};

/// content of a deleted record
pub const TOMBSTONE: &str = "SHARE_DELETED";

/// module tag on share descriptions
pub const DESCRIPTION_MODULE: &str = "serviceProvider";

/// largest accepted `set_data.data`
pub const MAX_DATA_LEN: usize = 16 * 1024;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetRequest {
    #[serde(rename = "pub_key_X")]
    pub pub_key_x: String,
    #[serde(rename = "pub_key_Y")]
    pub pub_key_y: String,
    pub namespace: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetResponse {
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetData {
    pub data: String,
    /// unix seconds, lowercase hex
    pub timestamp: String,
}

impl SetData {
    /// bytes covered by the request signature
    pub fn signing_bytes(&self) -> Vec<u8> {
        serde_json::json!({ "data": self.data, "timestamp": self.timestamp })
            .to_string()
            .into_bytes()
    }

    pub fn timestamp_secs(&self) -> Option<u64> {
        u64::from_str_radix(&self.timestamp, 16).ok()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetRequest {
    #[serde(rename = "pub_key_X")]
    pub pub_key_x: String,
    #[serde(rename = "pub_key_Y")]
    pub pub_key_y: String,
    pub namespace: String,
    pub set_data: SetData,
    /// hex compact ecdsa signature over [`SetData::signing_bytes`]
    pub signature: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetResponse {
    pub message: String,
}

/// provider record as stored in the share namespace
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredShare {
    pub share: Share,
    /// indexes issued for the share's polynomial
    #[serde(rename = "shareIndexes", deserialize_with = "normalized_indexes")]
    pub share_indexes: Vec<u32>,
}

fn normalized_indexes<'de, D>(deserializer: D) -> std::result::Result<Vec<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Vec::<u32>::deserialize(deserializer).map(crate::poly::normalize_indexes)
}

/// label entry stored in the description namespace
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareDescription {
    pub module: String,
    pub id: String,
}

impl ShareDescription {
    pub fn new(label: &str) -> Self {
        Self {
            module: DESCRIPTION_MODULE.into(),
            id: label.into(),
        }
    }
}

/// namespace holding labels for `namespace`
pub fn description_namespace(namespace: &str) -> String {
    format!("{}/descriptions", namespace)
}

/// base64(json(value))
pub fn encode_payload<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value).map_err(|e| Error::MalformedShare(e.to_string()))?;
    Ok(STANDARD.encode(json))
}

pub fn decode_payload<T: DeserializeOwned>(data: &str) -> Result<T> {
    let json = STANDARD
        .decode(data)
        .map_err(|e| Error::MalformedShare(format!("payload is not base64: {}", e)))?;
    serde_json::from_slice(&json).map_err(|e| Error::MalformedShare(e.to_string()))
}

/// check a hex compact signature against an uncompressed (x, y) key
pub fn verify_signature(pub_key_x: &str, pub_key_y: &str, payload: &[u8], signature: &str) -> bool {
    let (Ok(x), Ok(y), Ok(sig)) = (hex::decode(pub_key_x), hex::decode(pub_key_y), hex::decode(signature))
    else {
        return false;
    };
    if x.len() != 32 || y.len() != 32 {
        return false;
    }

    let mut sec1 = Vec::with_capacity(65);
    sec1.push(0x04);
    sec1.extend_from_slice(&x);
    sec1.extend_from_slice(&y);

    let Ok(key) = VerifyingKey::from_sec1_bytes(&sec1) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(&sig) else {
        return false;
    };
    key.verify(payload, &sig).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Secret;
    use crate::poly::split;

    #[test]
    fn test_wire_field_names() {
        let req = GetRequest {
            pub_key_x: "aa".into(),
            pub_key_y: "bb".into(),
            namespace: "tkey".into(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["pub_key_X"], "aa");
        assert_eq!(json["pub_key_Y"], "bb");
    }

    #[test]
    fn test_stored_share_payload() {
        let set = split(&Secret::from_hex("1").unwrap(), 2, 3).unwrap();
        let stored = StoredShare {
            share: set.provider().unwrap().clone(),
            share_indexes: set.indexes(),
        };
        let data = encode_payload(&stored).unwrap();
        let back: StoredShare = decode_payload(&data).unwrap();
        assert_eq!(back, stored);

        assert!(decode_payload::<StoredShare>(TOMBSTONE).is_err());
        assert!(decode_payload::<StoredShare>("!!!").is_err());
    }

    #[test]
    fn test_stored_share_indexes_normalized() {
        let set = split(&Secret::from_hex("1").unwrap(), 2, 3).unwrap();
        let mut json = serde_json::to_value(StoredShare {
            share: set.provider().unwrap().clone(),
            share_indexes: vec![],
        })
        .unwrap();
        json["shareIndexes"] = serde_json::json!([3, 0, 2, 2, 1, 4096]);

        let data = STANDARD.encode(json.to_string());
        let back: StoredShare = decode_payload(&data).unwrap();
        assert_eq!(back.share_indexes, vec![1, 2, 3]);
    }

    #[test]
    fn test_timestamp_hex() {
        let data = SetData {
            data: "x".into(),
            timestamp: format!("{:x}", 1_700_000_000u64),
        };
        assert_eq!(data.timestamp_secs(), Some(1_700_000_000));
    }
}
