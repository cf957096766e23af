//! Provably fair crash points.
//!
//! Each round's crash point is a pure function of a server seed and a nonce:
//!
//! ```text
//! digest      = HMAC-SHA256(key = seed, message = decimal(nonce))
//! h           = u32::from_be_bytes(digest[0..4])
//! crash_point = 1.00                                   if h < MAX * HOUSE_EDGE
//!             = floor(MAX / (MAX - h) * 100) / 100     otherwise, clamped to [1, 1000]
//! ```
//!
//! ## Commit-Reveal
//!
//! 1. **Commit** - `sha256(seed)` is published with every round played on the seed
//! 2. **Play** - the nonce advances by one per round, the seed stays secret
//! 3. **Reveal** - when the seed is rotated out it is disclosed together with the last nonce
//! 4. **Verify** - anyone can check `sha256(seed) == commit` and recompute every crash point
//!
//! Revealing a seed while it is still in use would let players compute the
//! next round, so the seed is only ever disclosed on rotation.

use commonware_cryptography::sha256::Sha256;
use commonware_cryptography::Hasher;
use hmac::{Hmac, Mac};
use rand::{CryptoRng, RngCore};
use thiserror::Error;

type HmacSha256 = Hmac<sha2::Sha256>;

/// Length of a server seed in bytes (before hex encoding).
pub const SEED_LEN: usize = 32;

/// Fraction of rounds that crash immediately at 1.00x.
pub const HOUSE_EDGE: f64 = 0.03;

/// Upper bound of the digest prefix interpreted as an integer.
pub const MAX_HASH_VALUE: u32 = u32::MAX;

pub const MIN_CRASH_POINT: f64 = 1.00;
pub const MAX_CRASH_POINT: f64 = 1_000.00;

/// Claimed and recomputed crash points must be closer than this to verify.
pub const VERIFY_TOLERANCE: f64 = 0.01;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FairnessError {
    #[error("failed to key round digest: {0}")]
    InvalidKey(String),
}

/// Generate a fresh hex encoded server seed.
pub fn new_seed<R: RngCore + CryptoRng>(rng: &mut R) -> String {
    let mut bytes = [0u8; SEED_LEN];
    rng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hex encoded SHA-256 commitment of a seed.
pub fn seed_commitment(seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hex::encode(hasher.finalize().0)
}

/// Integer read from the first four bytes of the round digest.
pub fn digest_prefix(seed: &str, nonce: u64) -> Result<u32, FairnessError> {
    let mut mac = HmacSha256::new_from_slice(seed.as_bytes())
        .map_err(|err| FairnessError::InvalidKey(err.to_string()))?;
    mac.update(nonce.to_string().as_bytes());
    let digest = mac.finalize().into_bytes();
    Ok(u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]))
}

/// Map a digest prefix onto the house-edged inverse distribution.
pub fn crash_point_from_prefix(prefix: u32) -> f64 {
    let max = MAX_HASH_VALUE as f64;
    let h = prefix as f64;
    if h < max * HOUSE_EDGE {
        return MIN_CRASH_POINT;
    }
    if prefix == MAX_HASH_VALUE {
        return MAX_CRASH_POINT;
    }
    let raw = ((max / (max - h)) * 100.0).floor() / 100.0;
    raw.clamp(MIN_CRASH_POINT, MAX_CRASH_POINT)
}

/// Crash point for the round played with `seed` at `nonce`.
pub fn crash_point(seed: &str, nonce: u64) -> Result<f64, FairnessError> {
    digest_prefix(seed, nonce).map(crash_point_from_prefix)
}

/// Recompute a published crash point.
///
/// This is the check any third party can run once the seed is revealed.
pub fn verify(seed: &str, nonce: u64, claimed: f64) -> bool {
    match crash_point(seed, nonce) {
        Ok(expected) => (expected - claimed).abs() < VERIFY_TOLERANCE,
        Err(_) => false,
    }
}

/// Crash point drawn for one round together with everything needed to audit it.
#[derive(Clone, Debug, PartialEq)]
pub struct FairDraw {
    pub seed: String,
    pub seed_hash: String,
    pub nonce: u64,
    pub crash_point: f64,
}

impl FairDraw {
    pub fn verify(&self) -> bool {
        seed_commitment(&self.seed) == self.seed_hash
            && verify(&self.seed, self.nonce, self.crash_point)
    }
}

/// A seed that has been rotated out and may now be published.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RevealedSeed {
    pub seed: String,
    pub seed_hash: String,
    /// Nonce of the last round played on this seed.
    pub last_nonce: u64,
}

impl RevealedSeed {
    pub fn verify_commitment(&self) -> bool {
        seed_commitment(&self.seed) == self.seed_hash
    }
}

/// Seed and nonce state for consecutive rounds.
#[derive(Clone)]
pub struct FairnessGenerator {
    seed: String,
    seed_hash: String,
    nonce: u64,
}

impl FairnessGenerator {
    /// Start a generator on a freshly generated seed.
    pub fn new<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self::from_seed(new_seed(rng))
    }

    /// Start a generator on an explicit seed (nonce 0).
    pub fn from_seed(seed: String) -> Self {
        let seed_hash = seed_commitment(&seed);
        Self {
            seed,
            seed_hash,
            nonce: 0,
        }
    }

    pub fn seed_hash(&self) -> &str {
        &self.seed_hash
    }

    /// Nonce of the most recent draw (0 before the first draw on a seed).
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Advance the nonce by one and draw the next crash point.
    pub fn next_round(&mut self) -> Result<FairDraw, FairnessError> {
        let nonce = self.nonce.saturating_add(1);
        let crash_point = crash_point(&self.seed, nonce)?;
        self.nonce = nonce;
        Ok(FairDraw {
            seed: self.seed.clone(),
            seed_hash: self.seed_hash.clone(),
            nonce,
            crash_point,
        })
    }

    /// Replace the seed, reset the nonce and hand back the retired seed for publication.
    pub fn rotate<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> RevealedSeed {
        let next = Self::new(rng);
        let retired = std::mem::replace(self, next);
        RevealedSeed {
            seed: retired.seed,
            seed_hash: retired.seed_hash,
            last_nonce: retired.nonce,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{seeded_rng, test_seed};
    use proptest::prelude::*;

    #[test]
    fn test_crash_point_deterministic() {
        let seed = test_seed();
        for nonce in 0..50 {
            assert_eq!(
                crash_point(&seed, nonce).unwrap(),
                crash_point(&seed, nonce).unwrap()
            );
        }
    }

    #[test]
    fn test_house_edge_scenario() {
        let seed = "deadbeef".repeat(8);
        let prefix = digest_prefix(&seed, 1).unwrap();
        let point = crash_point(&seed, 1).unwrap();
        if (prefix as f64) < MAX_HASH_VALUE as f64 * HOUSE_EDGE {
            assert_eq!(point, 1.00);
        } else {
            assert!(point >= 1.03);
            assert_eq!(point, crash_point_from_prefix(prefix));
        }
        assert!(verify(&seed, 1, point));
    }

    #[test]
    fn test_prefix_boundaries() {
        assert_eq!(crash_point_from_prefix(0), MIN_CRASH_POINT);
        assert_eq!(crash_point_from_prefix(MAX_HASH_VALUE), MAX_CRASH_POINT);

        let threshold = (MAX_HASH_VALUE as f64 * HOUSE_EDGE).ceil() as u32;
        assert_eq!(crash_point_from_prefix(threshold - 1), MIN_CRASH_POINT);
        // Just above the house edge the curve starts at 1.03x.
        assert_eq!(crash_point_from_prefix(threshold), 1.03);

        // Half the range maps to 2x.
        assert_eq!(crash_point_from_prefix(MAX_HASH_VALUE / 2 + 1), 2.00);

        // Close to the top the cap applies.
        assert_eq!(crash_point_from_prefix(MAX_HASH_VALUE - 1), MAX_CRASH_POINT);
    }

    #[test]
    fn test_crash_points_are_floored_to_cents() {
        let seed = test_seed();
        for nonce in 1..200 {
            let point = crash_point(&seed, nonce).unwrap();
            let cents = point * 100.0;
            assert!((cents - cents.round()).abs() < 1e-6, "{point} not in cents");
        }
    }

    #[test]
    fn test_immediate_crash_rate_tracks_house_edge() {
        let seed = test_seed();
        let rounds = 20_000u64;
        let instant = (1..=rounds)
            .filter(|nonce| crash_point(&seed, *nonce).unwrap() == MIN_CRASH_POINT)
            .count();
        let rate = instant as f64 / rounds as f64;
        assert!(rate > 0.02 && rate < 0.045, "immediate crash rate {rate}");
    }

    #[test]
    fn test_verify_rejects_tampered_claims() {
        let seed = test_seed();
        let point = crash_point(&seed, 7).unwrap();
        assert!(verify(&seed, 7, point));
        assert!(verify(&seed, 7, point + 0.005));
        assert!(!verify(&seed, 7, point + 0.02));
        assert!(!verify(&seed, 7, f64::NAN));
    }

    #[test]
    fn test_generator_advances_nonce_by_one() {
        let mut generator = FairnessGenerator::from_seed(test_seed());
        assert_eq!(generator.nonce(), 0);

        let first = generator.next_round().unwrap();
        let second = generator.next_round().unwrap();
        assert_eq!(first.nonce, 1);
        assert_eq!(second.nonce, 2);
        assert_eq!(generator.nonce(), 2);
        assert!(first.verify());
        assert!(second.verify());
    }

    #[test]
    fn test_rotation_reveals_previous_seed() {
        let mut rng = seeded_rng(1);
        let mut generator = FairnessGenerator::new(&mut rng);
        let commitment = generator.seed_hash().to_string();
        let draws: Vec<FairDraw> = (0..3).map(|_| generator.next_round().unwrap()).collect();

        let revealed = generator.rotate(&mut rng);
        assert_eq!(revealed.seed_hash, commitment);
        assert_eq!(revealed.last_nonce, 3);
        assert!(revealed.verify_commitment());
        for draw in &draws {
            assert!(verify(&revealed.seed, draw.nonce, draw.crash_point));
        }

        // Fresh seed, nonce reset.
        assert_eq!(generator.nonce(), 0);
        assert_ne!(generator.seed_hash(), commitment);
    }

    #[test]
    fn test_new_seed_is_256_bits() {
        let mut rng = seeded_rng(9);
        let seed = new_seed(&mut rng);
        assert_eq!(seed.len(), SEED_LEN * 2);
        assert!(hex::decode(&seed).is_ok());
        assert_ne!(seed, new_seed(&mut rng));
    }

    #[test]
    fn test_commitment_is_sha256_hex() {
        let commitment = seed_commitment("abc");
        assert_eq!(
            commitment,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    proptest! {
        #[test]
        fn prop_verify_accepts_own_crash_points(seed in "[0-9a-f]{64}", nonce in any::<u64>()) {
            let point = crash_point(&seed, nonce).unwrap();
            prop_assert!(verify(&seed, nonce, point));
            prop_assert!((MIN_CRASH_POINT..=MAX_CRASH_POINT).contains(&point));
        }

        #[test]
        fn prop_prefix_mapping_is_monotonic(a in any::<u32>(), b in any::<u32>()) {
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(crash_point_from_prefix(low) <= crash_point_from_prefix(high));
        }
    }
}
