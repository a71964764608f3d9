//! identity → provider credential
//!
//! the remote store addresses a record by a secp256k1 public key and only
//! accepts writes signed by the matching private key. both are derived
//! from the identity string handed over by the login flow.

use hkdf::Hkdf;
use k256::ecdsa::signature::Signer;
use k256::ecdsa::{Signature, SigningKey};
use k256::FieldBytes;
use sha2::{Digest, Sha256};

use crate::{Error, Result};

const SALT: &[u8] = b"tkey:identity:v1";
const INFO: &[u8] = b"tkey:service-provider:v1";

/// signing key and store address for one identity
pub struct ServiceCredential {
    signing_key: SigningKey,
    pub_key_x: String,
    pub_key_y: String,
}

impl ServiceCredential {
    /// derive the credential with hkdf-sha256
    pub fn from_identity(identity: &str) -> Result<Self> {
        if identity.is_empty() {
            return Err(Error::InvalidIdentity);
        }

        let hk = Hkdf::<Sha256>::new(Some(SALT), identity.as_bytes());

        // a 32 byte output lands outside [1, n) with probability ~2^-128,
        // step a counter in that case
        for counter in 0u8..=u8::MAX {
            let mut okm = [0u8; 32];
            hk.expand_multi_info(&[INFO, &[counter]], &mut okm)
                .map_err(|_| Error::InvalidIdentity)?;

            let bytes = FieldBytes::clone_from_slice(&okm);
            if let Ok(signing_key) = SigningKey::from_bytes(&bytes) {
                let point = signing_key.verifying_key().to_encoded_point(false);
                let (Some(x), Some(y)) = (point.x(), point.y()) else {
                    continue;
                };
                return Ok(Self {
                    pub_key_x: hex::encode(x),
                    pub_key_y: hex::encode(y),
                    signing_key,
                });
            }
        }

        Err(Error::InvalidIdentity)
    }

    /// x coordinate of the store address, 64 hex digits
    pub fn pub_key_x(&self) -> &str {
        &self.pub_key_x
    }

    /// y coordinate of the store address, 64 hex digits
    pub fn pub_key_y(&self) -> &str {
        &self.pub_key_y
    }

    /// ecdsa-sha256 over `payload`, compact 64 byte form as hex
    pub fn sign(&self, payload: &[u8]) -> String {
        let signature: Signature = self.signing_key.sign(payload);
        hex::encode(signature.to_bytes())
    }
}

/// short stable tag for log lines; identities are never logged raw
pub fn fingerprint(identity: &str) -> String {
    let digest = Sha256::digest(identity.as_bytes());
    hex::encode(&digest[..6])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::verify_signature;

    #[test]
    fn test_derivation_is_deterministic() {
        let a = ServiceCredential::from_identity("alice").unwrap();
        let b = ServiceCredential::from_identity("alice").unwrap();
        let c = ServiceCredential::from_identity("bob").unwrap();

        assert_eq!(a.pub_key_x(), b.pub_key_x());
        assert_eq!(a.pub_key_y(), b.pub_key_y());
        assert_ne!(a.pub_key_x(), c.pub_key_x());
        assert_eq!(a.pub_key_x().len(), 64);
    }

    #[test]
    fn test_empty_identity_rejected() {
        assert!(matches!(
            ServiceCredential::from_identity(""),
            Err(Error::InvalidIdentity)
        ));
    }

    #[test]
    fn test_signature_verifies() {
        let cred = ServiceCredential::from_identity("alice").unwrap();
        let sig = cred.sign(b"payload");
        assert!(verify_signature(cred.pub_key_x(), cred.pub_key_y(), b"payload", &sig));
        assert!(!verify_signature(cred.pub_key_x(), cred.pub_key_y(), b"other", &sig));

        let bob = ServiceCredential::from_identity("bob").unwrap();
        assert!(!verify_signature(bob.pub_key_x(), bob.pub_key_y(), b"payload", &sig));
    }

    #[test]
    fn test_fingerprint_hides_identity() {
        let fp = fingerprint("alice@example.com");
        assert_eq!(fp.len(), 12);
        assert!(!fp.contains("alice"));
    }
}
