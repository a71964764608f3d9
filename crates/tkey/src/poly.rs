//! shamir sharing over the secp256k1 scalar field
//!
//! a split samples f(x) = s + a1·x + … + a(t-1)·x^(t-1) and hands out
//! f(1)..f(n). the polynomial is identified by its public commitment
//! [G·s, G·a1, …], which doubles as a feldman check for every share and
//! names the public key of the secret.
//!
//! lagrange coefficients use the common denominator technique: one field
//! inversion per interpolation regardless of the number of points.

use std::collections::BTreeSet;

use core::fmt;
use core::str::FromStr;

use k256::elliptic_curve::Field;
use k256::{ProjectivePoint, Scalar};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use zeroize::Zeroize;

use crate::field::{decode_point, encode_point, scalar_from_index, Secret};
use crate::share::{Share, ShareSet};
use crate::{Error, Result};

/// shares needed to reconstruct
pub const THRESHOLD: usize = 2;

/// shares produced per split
pub const SHARE_COUNT: usize = 3;

/// index reserved for the remotely held share
pub const PROVIDER_INDEX: u32 = 1;

/// largest share index a split will hand out
pub const MAX_SHARES: usize = 255;

const ID_SEPARATOR: char = '|';

/// public commitment to a sharing polynomial
#[derive(Clone, PartialEq, Eq)]
pub struct PolynomialId {
    commitments: Vec<ProjectivePoint>,
}

impl PolynomialId {
    fn from_coefficients(coefficients: &[Scalar]) -> Self {
        Self {
            commitments: coefficients
                .iter()
                .map(|a| ProjectivePoint::GENERATOR * a)
                .collect(),
        }
    }

    /// shares needed to reconstruct (degree + 1)
    pub fn threshold(&self) -> usize {
        self.commitments.len()
    }

    /// G·s, the public key of the shared secret
    pub fn public_key(&self) -> ProjectivePoint {
        self.commitments[0]
    }

    pub fn public_key_hex(&self) -> String {
        encode_point(&self.public_key())
    }

    /// G·f(index), computed from the commitments alone
    pub fn commitment_at(&self, index: u32) -> ProjectivePoint {
        let x = scalar_from_index(index);
        self.commitments
            .iter()
            .rev()
            .fold(ProjectivePoint::IDENTITY, |acc, c| acc * x + c)
    }

    /// feldman check: G·value == Σ Cj·index^j
    pub fn verifies(&self, index: u32, value: &Scalar) -> bool {
        index != 0 && ProjectivePoint::GENERATOR * value == self.commitment_at(index)
    }
}

impl fmt::Display for PolynomialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in self.commitments.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", ID_SEPARATOR)?;
            }
            f.write_str(&encode_point(c))?;
        }
        Ok(())
    }
}

impl fmt::Debug for PolynomialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let first = encode_point(&self.commitments[0]);
        write!(f, "PolynomialId({}…, t={})", &first[..12], self.threshold())
    }
}

impl FromStr for PolynomialId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::MalformedShare("empty polynomial id".into()));
        }

        let commitments = s
            .split(ID_SEPARATOR)
            .map(|part| {
                decode_point(part).ok_or_else(|| {
                    Error::MalformedShare(format!("invalid polynomial commitment: {}", part))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if commitments.len() > MAX_SHARES {
            return Err(Error::MalformedShare("polynomial degree too large".into()));
        }

        Ok(Self { commitments })
    }
}

/// lagrange basis coefficients λ_i(at) for the points xs
///
/// returns None when two xs coincide
fn lagrange_coefficients(xs: &[Scalar], at: &Scalar) -> Option<Vec<Scalar>> {
    let k = xs.len();
    let mut numerators = vec![Scalar::ONE; k];
    let mut denominators = vec![Scalar::ONE; k];

    for i in 0..k {
        for j in 0..k {
            if i != j {
                numerators[i] *= *at - xs[j];
                denominators[i] *= xs[i] - xs[j];
            }
        }
    }

    // prefix products so a single inversion serves every denominator
    let mut prefix = Vec::with_capacity(k);
    let mut acc = Scalar::ONE;
    for d in &denominators {
        prefix.push(acc);
        acc *= *d;
    }

    let mut inv: Scalar = Option::from(acc.invert())?;
    let mut coefficients = vec![Scalar::ZERO; k];
    for i in (0..k).rev() {
        coefficients[i] = numerators[i] * inv * prefix[i];
        inv *= denominators[i];
    }

    Some(coefficients)
}

/// evaluate the polynomial through `points` at `at`
fn interpolate(points: &[(Scalar, Scalar)], at: &Scalar) -> Option<Scalar> {
    let xs: Vec<Scalar> = points.iter().map(|(x, _)| *x).collect();
    let lambdas = lagrange_coefficients(&xs, at)?;
    Some(
        lambdas
            .iter()
            .zip(points)
            .fold(Scalar::ZERO, |acc, (l, (_, y))| acc + *l * y),
    )
}

fn evaluate(coefficients: &[Scalar], index: u32) -> Scalar {
    let x = scalar_from_index(index);
    coefficients
        .iter()
        .rev()
        .fold(Scalar::ZERO, |acc, a| acc * x + a)
}

fn check_parameters(threshold: usize, total: usize) -> Result<()> {
    if threshold == 0 || threshold > total || total > MAX_SHARES {
        return Err(Error::InvalidThreshold { threshold, total });
    }
    Ok(())
}

/// split a secret into `total` shares, any `threshold` of which reconstruct it
pub fn split(secret: &Secret, threshold: usize, total: usize) -> Result<ShareSet> {
    split_with_rng(secret, threshold, total, &mut OsRng)
}

pub fn split_with_rng<R: RngCore + CryptoRng>(
    secret: &Secret,
    threshold: usize,
    total: usize,
    rng: &mut R,
) -> Result<ShareSet> {
    check_parameters(threshold, total)?;

    let mut coefficients = Vec::with_capacity(threshold);
    coefficients.push(*secret.scalar());
    for _ in 1..threshold {
        coefficients.push(Scalar::random(&mut *rng));
    }

    let polynomial_id = PolynomialId::from_coefficients(&coefficients);
    let shares = (1..=total as u32)
        .map(|index| Share::new(index, evaluate(&coefficients, index), polynomial_id.clone()))
        .collect();

    coefficients.zeroize();

    Ok(ShareSet::new(polynomial_id, shares))
}

fn ensure_same_polynomial(expected: &PolynomialId, share: &Share) -> Result<()> {
    if share.polynomial_id != *expected {
        return Err(Error::PolynomialMismatch {
            left: expected.to_string(),
            right: share.polynomial_id.to_string(),
        });
    }
    Ok(())
}

/// first `threshold` shares of one polynomial, checked for duplicates
fn select_points<'a>(
    shares: &'a [Share],
    polynomial_id: &PolynomialId,
) -> Result<Vec<&'a Share>> {
    let need = polynomial_id.threshold();
    if shares.len() < need {
        return Err(Error::InsufficientShares {
            have: shares.len(),
            need,
        });
    }

    for (i, share) in shares.iter().enumerate() {
        ensure_same_polynomial(polynomial_id, share)?;
        if shares[..i].iter().any(|s| s.index == share.index) {
            return Err(Error::DegenerateShares(share.index));
        }
    }

    Ok(shares.iter().take(need).collect())
}

fn secret_from_points(points: &[(Scalar, Scalar)], polynomial_id: &PolynomialId) -> Result<Secret> {
    let value = interpolate(points, &Scalar::ZERO).ok_or(Error::ShareVerificationFailed)?;

    // tampered share values interpolate to some other key
    if ProjectivePoint::GENERATOR * value != polynomial_id.public_key() {
        return Err(Error::ShareVerificationFailed);
    }
    Secret::from_scalar(value)
}

/// two-point reconstruction at x = 0
pub fn reconstruct(a: &Share, b: &Share) -> Result<Secret> {
    ensure_same_polynomial(&a.polynomial_id, b)?;
    if a.index == b.index {
        return Err(Error::DegenerateShares(a.index));
    }
    reconstruct_from(&[a.clone(), b.clone()])
}

/// reconstruct from any number of shares of one polynomial
///
/// extra shares beyond the threshold are accepted; the first `threshold`
/// are used.
pub fn reconstruct_from(shares: &[Share]) -> Result<Secret> {
    let first = shares.first().ok_or(Error::InsufficientShares {
        have: 0,
        need: THRESHOLD,
    })?;
    let polynomial_id = &first.polynomial_id;

    let points: Vec<(Scalar, Scalar)> = select_points(shares, polynomial_id)?
        .into_iter()
        .map(|s| (scalar_from_index(s.index), s.value))
        .collect();

    secret_from_points(&points, polynomial_id)
}

/// evaluate the polynomial behind `known` at `target_index`
///
/// produces a share that was never handed out (or re-derives one that
/// was) without learning anything beyond what `known` already implies.
pub fn derive_missing_share(
    known: &[Share],
    target_index: u32,
    polynomial_id: &PolynomialId,
) -> Result<Share> {
    if target_index == 0 || target_index as usize > MAX_SHARES {
        return Err(Error::MalformedShare(format!(
            "share index {} out of range",
            target_index
        )));
    }

    let selected = select_points(known, polynomial_id)?;
    if let Some(existing) = known.iter().find(|s| s.index == target_index) {
        return Ok(existing.clone());
    }

    let points: Vec<(Scalar, Scalar)> = selected
        .iter()
        .map(|s| (scalar_from_index(s.index), s.value))
        .collect();

    let value = interpolate(&points, &scalar_from_index(target_index))
        .ok_or(Error::ShareVerificationFailed)?;

    if !polynomial_id.verifies(target_index, &value) {
        return Err(Error::ShareVerificationFailed);
    }

    Ok(Share::new(target_index, value, polynomial_id.clone()))
}

/// rebuild an existing share set from the secret and the provider share
///
/// the secret is the polynomial's value at zero, so together with one
/// share it pins down any degree-1 polynomial.
pub fn rebuild_share_set(secret: &Secret, provider: &Share, indexes: &[u32]) -> Result<ShareSet> {
    let polynomial_id = &provider.polynomial_id;
    if polynomial_id.threshold() > 2 {
        return Err(Error::InsufficientShares {
            have: 2,
            need: polynomial_id.threshold(),
        });
    }
    if polynomial_id.public_key() != secret.public_key() {
        return Err(Error::ShareVerificationFailed);
    }
    provider.verify()?;

    let points = [
        (Scalar::ZERO, *secret.scalar()),
        (scalar_from_index(provider.index), provider.value),
    ];

    let mut shares = Vec::with_capacity(indexes.len());
    for (i, &index) in indexes.iter().enumerate() {
        if index == 0 {
            return Err(Error::MalformedShare("share index 0".into()));
        }
        if indexes[..i].contains(&index) {
            return Err(Error::DegenerateShares(index));
        }
        let value = interpolate(&points, &scalar_from_index(index))
            .ok_or(Error::DegenerateShares(provider.index))?;
        shares.push(Share::new(index, value, polynomial_id.clone()));
    }

    Ok(ShareSet::new(polynomial_id.clone(), shares))
}

/// true when `indexes` names a full share set: the provider index plus
/// enough other indexes, each in range and none repeated
pub fn is_complete_index_set(indexes: &[u32]) -> bool {
    let mut seen = BTreeSet::new();
    indexes
        .iter()
        .all(|&i| (1..=MAX_SHARES as u32).contains(&i) && seen.insert(i))
        && seen.contains(&PROVIDER_INDEX)
        && seen.len() >= SHARE_COUNT
}

/// sorted, deduplicated, in-range copy of an issued index list
pub fn normalize_indexes(mut indexes: Vec<u32>) -> Vec<u32> {
    indexes.retain(|&i| (1..=MAX_SHARES as u32).contains(&i));
    indexes.sort_unstable();
    indexes.dedup();
    indexes
}
