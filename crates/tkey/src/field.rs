//! secp256k1 scalar field helpers and the secret being protected
//!
//! every share value and every secret lives in the scalar field of
//! secp256k1 (the group order n). arithmetic is delegated to
//! `k256::Scalar`, which reduces modulo n on every operation.

use core::fmt;

use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::elliptic_curve::PrimeField;
use k256::{FieldBytes, ProjectivePoint, Scalar};
use zeroize::Zeroize;

use crate::{Error, Result};

/// byte length of a serialized scalar
pub const SCALAR_BYTES: usize = 32;

/// hex length of a serialized scalar
pub const SCALAR_HEX_LEN: usize = SCALAR_BYTES * 2;

/// byte length of a compressed sec1 point
pub const POINT_BYTES: usize = 33;

/// the private key under custody
///
/// only ever lives in memory, wiped on drop
pub struct Secret(Scalar);

impl Secret {
    /// parse a hex private key
    ///
    /// accepts an optional `0x` prefix and up to 64 hex digits in either
    /// case, short input is left padded. zero and values >= n are rejected.
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.trim();
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);

        if digits.is_empty() || digits.len() > SCALAR_HEX_LEN {
            return Err(Error::InvalidSecret);
        }

        let mut padded = format!("{:0>width$}", digits, width = SCALAR_HEX_LEN);
        let decoded = hex::decode(&padded);
        padded.zeroize();
        let mut bytes = decoded.map_err(|_| Error::InvalidSecret)?;
        let scalar = scalar_from_bytes(&bytes);
        bytes.zeroize();

        Self::from_scalar(scalar.ok_or(Error::InvalidSecret)?)
    }

    /// wrap a scalar, rejecting zero
    pub fn from_scalar(scalar: Scalar) -> Result<Self> {
        if bool::from(scalar.is_zero()) {
            return Err(Error::InvalidSecret);
        }
        Ok(Self(scalar))
    }

    /// 64 lowercase hex digits, zero padded
    pub fn to_hex(&self) -> String {
        scalar_to_hex(&self.0)
    }

    /// G·s
    pub fn public_key(&self) -> ProjectivePoint {
        ProjectivePoint::GENERATOR * self.0
    }

    /// compressed sec1 hex of the public key
    pub fn public_key_hex(&self) -> String {
        encode_point(&self.public_key())
    }

    pub(crate) fn scalar(&self) -> &Scalar {
        &self.0
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// canonical big-endian scalar decoding, None if >= n
pub fn scalar_from_bytes(bytes: &[u8]) -> Option<Scalar> {
    if bytes.len() != SCALAR_BYTES {
        return None;
    }
    let repr = FieldBytes::clone_from_slice(bytes);
    Option::from(Scalar::from_repr(repr))
}

/// 64 lowercase hex digits
pub fn scalar_to_hex(scalar: &Scalar) -> String {
    hex::encode(scalar.to_bytes())
}

pub fn scalar_from_index(index: u32) -> Scalar {
    Scalar::from(index as u64)
}

/// compressed sec1 encoding as lowercase hex
pub fn encode_point(point: &ProjectivePoint) -> String {
    hex::encode(point.to_affine().to_encoded_point(true).as_bytes())
}

/// decode a compressed sec1 point; rejects the identity and off-curve input
pub fn decode_point(s: &str) -> Option<ProjectivePoint> {
    if s.len() != POINT_BYTES * 2 {
        return None;
    }
    let bytes = hex::decode(s).ok()?;
    k256::PublicKey::from_sec1_bytes(&bytes)
        .ok()
        .map(|pk| pk.to_projective())
}
