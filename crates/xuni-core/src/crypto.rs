//! Ring signatures, key images and Schnorr signatures over Ristretto.
//!
//! The ledger consumes cryptography only through [`CryptoOracle`]; the
//! production implementation is [`RistrettoOracle`].
//!
//! # Ring signature scheme
//!
//! For a ring `P_0..P_n` and key image `I`, each member carries `(c_i, r_i)`:
//!
//! ```text
//! L_i = r_i*G + c_i*P_i
//! R_i = r_i*Hp(P_i) + c_i*I
//! sum(c_i) == Hs(prefix_hash || L_0 || R_0 || ... || L_n || R_n)
//! ```
//!
//! The key image of a one-time key `P = x*G` is `I = x*Hp(P)`, so every
//! output has exactly one valid key image.

use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::IsIdentity;
use sha2::Sha512;
use std::fmt;
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::types::{Hash256, KeyImage, PublicKey, Signature};

/// Domain tag for hashing a public key to a curve point.
const HASH_TO_POINT_TAG: &[u8] = b"xuni-hash-to-point";

/// Domain tag for ring signature challenges.
const RING_CHALLENGE_TAG: &[u8] = b"xuni-ring";

/// Domain tag for Schnorr signature challenges.
const SCHNORR_CHALLENGE_TAG: &[u8] = b"xuni-schnorr";

/// Verification primitives the ledger depends on. Pure functions, no shared state.
pub trait CryptoOracle: Send + Sync {
    /// Whether `key` encodes a valid, non-identity curve point.
    fn verify_public_key(&self, key: &PublicKey) -> bool;

    /// Whether `image` encodes a valid, non-identity curve point.
    fn is_valid_key_image(&self, image: &KeyImage) -> bool;

    /// Verify a ring signature over `prefix_hash` with one signature per ring member.
    fn verify_ring_signature(
        &self,
        prefix_hash: &Hash256,
        key_image: &KeyImage,
        public_keys: &[PublicKey],
        signatures: &[Signature],
    ) -> bool;

    /// Verify a single-key signature, used by multisignature inputs.
    fn verify_signature(&self, prefix_hash: &Hash256, public_key: &PublicKey, signature: &Signature) -> bool;
}

/// [`CryptoOracle`] over the Ristretto group.
#[derive(Debug, Clone, Copy, Default)]
pub struct RistrettoOracle;

impl CryptoOracle for RistrettoOracle {
    fn verify_public_key(&self, key: &PublicKey) -> bool {
        decompress(&key.0).is_some()
    }

    fn is_valid_key_image(&self, image: &KeyImage) -> bool {
        decompress(&image.0).is_some()
    }

    fn verify_ring_signature(
        &self,
        prefix_hash: &Hash256,
        key_image: &KeyImage,
        public_keys: &[PublicKey],
        signatures: &[Signature],
    ) -> bool {
        if public_keys.is_empty() || public_keys.len() != signatures.len() {
            return false;
        }
        let Some(image) = decompress(&key_image.0) else {
            return false;
        };

        let mut transcript = ring_transcript(prefix_hash);
        let mut sum = Scalar::ZERO;
        for (key, signature) in public_keys.iter().zip(signatures) {
            let Some(point) = decompress(&key.0) else {
                return false;
            };
            let (c_bytes, r_bytes) = signature.parts();
            let (Some(c), Some(r)) = (canonical_scalar(c_bytes), canonical_scalar(r_bytes)) else {
                return false;
            };
            let l = RistrettoPoint::mul_base(&r) + c * point;
            let r_point = r * hash_to_point(key) + c * image;
            transcript.extend_from_slice(l.compress().as_bytes());
            transcript.extend_from_slice(r_point.compress().as_bytes());
            sum += c;
        }

        Scalar::hash_from_bytes::<Sha512>(&transcript) == sum
    }

    fn verify_signature(&self, prefix_hash: &Hash256, public_key: &PublicKey, signature: &Signature) -> bool {
        let Some(point) = decompress(&public_key.0) else {
            return false;
        };
        let (c_bytes, r_bytes) = signature.parts();
        let (Some(c), Some(r)) = (canonical_scalar(c_bytes), canonical_scalar(r_bytes)) else {
            return false;
        };
        let commitment = RistrettoPoint::mul_base(&r) + c * point;
        schnorr_challenge(prefix_hash, public_key, &commitment) == c
    }
}

/// A one-time secret key and its public key.
///
/// The secret scalar is zeroized on drop.
pub struct KeyPair {
    secret: Scalar,
    public: RistrettoPoint,
}

impl KeyPair {
    /// Generate a random keypair using the OS cryptographic RNG.
    pub fn generate() -> Self {
        Self::from_scalar(Scalar::random(&mut rand::rngs::OsRng))
    }

    /// Create a keypair from 32 bytes of secret material (reduced mod the group order).
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self::from_scalar(Scalar::from_bytes_mod_order(bytes))
    }

    fn from_scalar(secret: Scalar) -> Self {
        Self { secret, public: RistrettoPoint::mul_base(&secret) }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.public.compress().to_bytes())
    }

    /// `x * Hp(P)`: the spend tag of outputs paying to this key.
    pub fn key_image(&self) -> KeyImage {
        KeyImage((self.secret * hash_to_point(&self.public_key())).compress().to_bytes())
    }

    /// Sign `prefix_hash` as member `signer_index` of `ring`.
    pub fn generate_ring_signature(
        &self,
        prefix_hash: &Hash256,
        ring: &[PublicKey],
        signer_index: usize,
    ) -> Result<Vec<Signature>, CryptoError> {
        if signer_index >= ring.len() {
            return Err(CryptoError::SignerOutOfRing { index: signer_index, len: ring.len() });
        }
        if ring[signer_index] != self.public_key() {
            return Err(CryptoError::SignerKeyMismatch(signer_index));
        }

        let mut rng = rand::rngs::OsRng;
        let image = self.secret * hash_to_point(&self.public_key());
        let mut transcript = ring_transcript(prefix_hash);
        let mut scalars = vec![(Scalar::ZERO, Scalar::ZERO); ring.len()];
        let mut sum = Scalar::ZERO;
        let mut nonce = Scalar::random(&mut rng);

        for (i, key) in ring.iter().enumerate() {
            let (l, r_point) = if i == signer_index {
                (RistrettoPoint::mul_base(&nonce), nonce * hash_to_point(key))
            } else {
                let point = decompress(&key.0).ok_or(CryptoError::InvalidPublicKey)?;
                let c = Scalar::random(&mut rng);
                let r = Scalar::random(&mut rng);
                scalars[i] = (c, r);
                sum += c;
                (RistrettoPoint::mul_base(&r) + c * point, r * hash_to_point(key) + c * image)
            };
            transcript.extend_from_slice(l.compress().as_bytes());
            transcript.extend_from_slice(r_point.compress().as_bytes());
        }

        let c_signer = Scalar::hash_from_bytes::<Sha512>(&transcript) - sum;
        scalars[signer_index] = (c_signer, nonce - c_signer * self.secret);
        nonce.zeroize();

        Ok(scalars
            .into_iter()
            .map(|(c, r)| Signature::from_parts(c.to_bytes(), r.to_bytes()))
            .collect())
    }

    /// Schnorr signature over `prefix_hash`.
    pub fn generate_signature(&self, prefix_hash: &Hash256) -> Signature {
        let mut nonce = Scalar::random(&mut rand::rngs::OsRng);
        let commitment = RistrettoPoint::mul_base(&nonce);
        let c = schnorr_challenge(prefix_hash, &self.public_key(), &commitment);
        let r = nonce - c * self.secret;
        nonce.zeroize();
        Signature::from_parts(c.to_bytes(), r.to_bytes())
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self::from_scalar(self.secret)
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// A public key with no known secret, derived from `seed`.
///
/// Outputs paying to it are provably unspendable.
pub fn hash_to_public_key(seed: &[u8]) -> PublicKey {
    PublicKey(RistrettoPoint::hash_from_bytes::<Sha512>(seed).compress().to_bytes())
}

/// Decompress a point, rejecting invalid encodings and the identity.
fn decompress(bytes: &[u8; 32]) -> Option<RistrettoPoint> {
    CompressedRistretto(*bytes)
        .decompress()
        .filter(|point| !point.is_identity())
}

fn canonical_scalar(bytes: [u8; 32]) -> Option<Scalar> {
    Option::from(Scalar::from_canonical_bytes(bytes))
}

fn hash_to_point(key: &PublicKey) -> RistrettoPoint {
    let mut data = Vec::with_capacity(HASH_TO_POINT_TAG.len() + 32);
    data.extend_from_slice(HASH_TO_POINT_TAG);
    data.extend_from_slice(&key.0);
    RistrettoPoint::hash_from_bytes::<Sha512>(&data)
}

fn ring_transcript(prefix_hash: &Hash256) -> Vec<u8> {
    let mut transcript = Vec::with_capacity(RING_CHALLENGE_TAG.len() + 32);
    transcript.extend_from_slice(RING_CHALLENGE_TAG);
    transcript.extend_from_slice(prefix_hash.as_bytes());
    transcript
}

fn schnorr_challenge(prefix_hash: &Hash256, key: &PublicKey, commitment: &RistrettoPoint) -> Scalar {
    let mut data = Vec::with_capacity(SCHNORR_CHALLENGE_TAG.len() + 96);
    data.extend_from_slice(SCHNORR_CHALLENGE_TAG);
    data.extend_from_slice(prefix_hash.as_bytes());
    data.extend_from_slice(&key.0);
    data.extend_from_slice(commitment.compress().as_bytes());
    Scalar::hash_from_bytes::<Sha512>(&data)
}
