//! metadata service client
//!
//! talks to a tkey metadata service (or a compatible deployment) over
//! `POST /get` and `POST /set`. each identity maps to a signing
//! credential; its public key addresses the record and signs writes.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use crate::config::Config;
use crate::credential::{fingerprint, ServiceCredential};
use crate::store::{Lookup, RemoteRecord, ShareStore};
use crate::wire::{
    decode_payload, description_namespace, encode_payload, GetRequest, GetResponse, SetData,
    SetRequest, ShareDescription, StoredShare, TOMBSTONE,
};
use crate::{Error, Result};

/// http client for the metadata service
pub struct MetadataClient {
    http: reqwest::Client,
    base_url: String,
    namespace: String,
}

/// raw content of one namespace slot
enum Content {
    Empty,
    Tombstone,
    Data(String),
}

impl MetadataClient {
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url().to_string(),
            namespace: config.namespace.clone(),
        })
    }

    /// check the service is reachable
    pub async fn health(&self) -> Result<()> {
        let resp = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(classify)?;
        check_status(resp).await.map(|_| ())
    }

    async fn get(&self, credential: &ServiceCredential, namespace: &str) -> Result<Content> {
        let req = GetRequest {
            pub_key_x: credential.pub_key_x().to_string(),
            pub_key_y: credential.pub_key_y().to_string(),
            namespace: namespace.to_string(),
        };

        let resp = self
            .http
            .post(format!("{}/get", self.base_url))
            .json(&req)
            .send()
            .await
            .map_err(classify)?;

        // nothing ever written under this key
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(Content::Empty);
        }

        let body: GetResponse = check_status(resp).await?.json().await.map_err(classify)?;

        Ok(match body.message.as_str() {
            "" => Content::Empty,
            TOMBSTONE => Content::Tombstone,
            _ => Content::Data(body.message),
        })
    }

    async fn set(&self, credential: &ServiceCredential, namespace: &str, data: String) -> Result<()> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let set_data = SetData {
            data,
            timestamp: format!("{:x}", timestamp),
        };
        let signature = credential.sign(&set_data.signing_bytes());

        let req = SetRequest {
            pub_key_x: credential.pub_key_x().to_string(),
            pub_key_y: credential.pub_key_y().to_string(),
            namespace: namespace.to_string(),
            set_data,
            signature,
        };

        let resp = self
            .http
            .post(format!("{}/set", self.base_url))
            .json(&req)
            .send()
            .await
            .map_err(classify)?;

        check_status(resp).await.map(|_| ())
    }
}

/// connect failures, timeouts and the like are worth retrying;
/// a body we cannot decode will not get better
fn classify(err: reqwest::Error) -> Error {
    if err.is_decode() {
        Error::RemoteRejected(format!("undecodable response: {}", err))
    } else {
        Error::TransientNetwork(err.to_string())
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = format!("{}: {}", status, body);
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(Error::TransientNetwork(message))
    } else {
        Err(Error::RemoteRejected(message))
    }
}

#[async_trait]
impl ShareStore for MetadataClient {
    async fn fetch(&self, identity: &str) -> Result<Lookup> {
        let credential = ServiceCredential::from_identity(identity)?;
        debug!(identity = %fingerprint(identity), "fetching provider record");

        let stored: StoredShare = match self.get(&credential, &self.namespace).await? {
            Content::Empty => return Ok(Lookup::Absent),
            Content::Tombstone => return Ok(Lookup::Tombstoned),
            Content::Data(data) => decode_payload(&data)?,
        };

        let label = match self
            .get(&credential, &description_namespace(&self.namespace))
            .await?
        {
            Content::Empty | Content::Tombstone => None,
            Content::Data(data) => Some(decode_payload::<ShareDescription>(&data)?.id),
        };

        Ok(Lookup::Found(RemoteRecord {
            share: stored.share,
            share_indexes: stored.share_indexes,
            label,
        }))
    }

    async fn upsert(&self, identity: &str, record: &RemoteRecord) -> Result<()> {
        let credential = ServiceCredential::from_identity(identity)?;
        debug!(identity = %fingerprint(identity), "writing provider record");

        let stored = StoredShare {
            share: record.share.clone(),
            share_indexes: record.share_indexes.clone(),
        };
        self.set(&credential, &self.namespace, encode_payload(&stored)?)
            .await?;

        if let Some(label) = &record.label {
            let description = encode_payload(&ShareDescription::new(label))?;
            self.set(&credential, &description_namespace(&self.namespace), description)
                .await?;
        }
        Ok(())
    }

    async fn delete(&self, identity: &str) -> Result<()> {
        let credential = ServiceCredential::from_identity(identity)?;
        debug!(identity = %fingerprint(identity), "tombstoning provider record");

        self.set(&credential, &self.namespace, TOMBSTONE.into())
            .await?;
        self.set(
            &credential,
            &description_namespace(&self.namespace),
            TOMBSTONE.into(),
        )
        .await
    }
}
