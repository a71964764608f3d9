//! # tkey
//!
//! 2-of-3 threshold custody of a secp256k1 private key.
//!
//! the key is split into three shares over the secp256k1 scalar field.
//! one share (index 1, the provider or "torus" share) is kept by a remote
//! metadata service under an identity, the other two stay with the host
//! (device share and server share). any two shares recover the key.
//!
//! ## architecture
//!
//! ```text
//!  host shell (webview / driver)
//!        │ Command (json)            ▲ Event (json)
//!        ▼                           │
//!  ┌────────────────────────────────────┐
//!  │ bridge: readiness gate + fifo queue│
//!  └────────────────┬───────────────────┘
//!                   ▼
//!  ┌────────────────────────────────────┐
//!  │ orchestrator: split / save / get / │
//!  │ reconstruct / delete per identity  │
//!  └───────┬──────────────────┬─────────┘
//!          ▼                  ▼
//!   ┌────────────┐     ┌─────────────┐   http   ┌──────────────┐
//!   │ poly/share │     │ ShareStore  │─────────▶│ metadata svc │
//!   │ (math+json)│     │ (trait)     │          └──────────────┘
//!   └────────────┘     └─────────────┘
//! ```
//!
//! ## security properties
//!
//! - a single share reveals nothing about the key
//! - every split uses fresh random coefficients, so shares of different
//!   splits never combine
//! - shares carry feldman commitments and are verified before use
//! - identities are never logged, only a sha-256 fingerprint
//!
//! ## usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tkey::{Config, MetadataClient, Orchestrator, Reconstruction, Secret};
//!
//! let config = Arc::new(Config::from_env()?);
//! let store = Arc::new(MetadataClient::new(&config)?);
//! let engine = Orchestrator::new(store, config);
//!
//! let secret = Secret::from_hex("0x1")?;
//! let shares = engine.split_key("postbox key", &secret).await?;
//!
//! // later, on a device holding only the device share
//! let device = shares.get(2).unwrap();
//! if let Reconstruction::Reconstructed { secret, .. } =
//!     engine.reconstruct_key("postbox key", device).await?
//! {
//!     println!("recovered {}", secret.public_key_hex());
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod credential;
pub mod error;
pub mod field;
pub mod orchestrator;
pub mod poly;
pub mod share;
pub mod store;
pub mod wire;

pub use bridge::{Bridge, Command, Event, FailureReason, Inbound};
pub use config::{Config, ResplitPolicy};
pub use error::{Error, Result};
pub use field::Secret;
pub use orchestrator::{IdentityState, Orchestrator, Reconstruction};
pub use poly::PolynomialId;
pub use share::{EncodedShareSet, Share, ShareSet};
pub use store::{Lookup, MemoryStore, RemoteRecord, ShareStore};

#[cfg(feature = "network")]
pub use store::MetadataClient;
