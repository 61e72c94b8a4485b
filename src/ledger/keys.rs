//! Family seeds, key pairs and classic addresses.
//!
//! Both seed families are understood: `sEd…` seeds derive an Ed25519 key,
//! plain `s…` seeds derive the secp256k1 key of account index 0. Private
//! material only lives in zeroizing buffers and in signing keys that wipe
//! themselves on drop.

use ed25519_dalek::Signer as _;
use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use zeroize::Zeroizing;

const ED25519_SEED_PREFIX: [u8; 3] = [0x01, 0xE1, 0x4B];
const SECP256K1_SEED_PREFIX: [u8; 1] = [0x21];
const SEED_ENTROPY_LEN: usize = 16;
const ACCOUNT_ID_PREFIX: u8 = 0x00;
/// Marks an Ed25519 public key in its 33-byte ledger form.
const ED25519_KEY_PREFIX: u8 = 0xED;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("not a valid family seed")]
    InvalidSeed,

    #[error("key derivation failed")]
    Derivation,

    #[error("signing failed")]
    Signing,
}

/// First half of SHA-512 over the concatenated `parts`.
pub fn sha512_half(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut half = [0u8; 32];
    half.copy_from_slice(&digest[..32]);
    half
}

fn checksum(payload: &[u8]) -> [u8; 4] {
    let twice = Sha256::digest(Sha256::digest(payload));
    [twice[0], twice[1], twice[2], twice[3]]
}

/// Base58Check with the ledger's alphabet.
pub fn encode_base58check(payload: &[u8]) -> String {
    let mut bytes = payload.to_vec();
    bytes.extend_from_slice(&checksum(payload));
    bs58::encode(bytes)
        .with_alphabet(bs58::Alphabet::RIPPLE)
        .into_string()
}

/// Inverse of [`encode_base58check`]; `None` on bad characters or checksum.
pub fn decode_base58check(encoded: &str) -> Option<Vec<u8>> {
    let bytes = bs58::decode(encoded)
        .with_alphabet(bs58::Alphabet::RIPPLE)
        .into_vec()
        .ok()?;
    if bytes.len() < 5 {
        return None;
    }
    let (payload, check) = bytes.split_at(bytes.len() - 4);
    (checksum(payload).as_slice() == check).then(|| payload.to_vec())
}

/// RIPEMD-160 of SHA-256 of a 33-byte public key.
pub fn account_id(public_key: &[u8]) -> [u8; 20] {
    let digest = Ripemd160::digest(Sha256::digest(public_key));
    let mut id = [0u8; 20];
    id.copy_from_slice(&digest);
    id
}

pub fn encode_address(account_id: &[u8; 20]) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(ACCOUNT_ID_PREFIX);
    payload.extend_from_slice(account_id);
    encode_base58check(&payload)
}

pub fn decode_address(address: &str) -> Option<[u8; 20]> {
    let payload = decode_base58check(address)?;
    if payload.len() != 21 || payload[0] != ACCOUNT_ID_PREFIX {
        return None;
    }
    let mut id = [0u8; 20];
    id.copy_from_slice(&payload[1..]);
    Some(id)
}

// ---------------------------------------------------------------------------
// Key pairs
// ---------------------------------------------------------------------------

pub enum KeyPair {
    Ed25519(ed25519_dalek::SigningKey),
    Secp256k1(k256::ecdsa::SigningKey),
}

impl KeyPair {
    /// Derive the master key pair of a family seed.
    pub fn from_seed(seed: &str) -> Result<Self, KeyError> {
        let payload =
            Zeroizing::new(decode_base58check(seed.trim()).ok_or(KeyError::InvalidSeed)?);

        if let Some(entropy) = entropy_after(&payload, &ED25519_SEED_PREFIX) {
            let private = Zeroizing::new(sha512_half(&[entropy]));
            return Ok(KeyPair::Ed25519(ed25519_dalek::SigningKey::from_bytes(&private)));
        }
        if let Some(entropy) = entropy_after(&payload, &SECP256K1_SEED_PREFIX) {
            return secp256k1_from_entropy(entropy).map(KeyPair::Secp256k1);
        }
        Err(KeyError::InvalidSeed)
    }

    /// The 33-byte public key as the ledger expects it in `SigningPubKey`.
    pub fn public_key(&self) -> Vec<u8> {
        match self {
            KeyPair::Ed25519(key) => {
                let mut out = Vec::with_capacity(33);
                out.push(ED25519_KEY_PREFIX);
                out.extend_from_slice(key.verifying_key().as_bytes());
                out
            }
            KeyPair::Secp256k1(key) => key
                .verifying_key()
                .to_encoded_point(true)
                .as_bytes()
                .to_vec(),
        }
    }

    /// Classic `r…` address of this key pair.
    pub fn address(&self) -> String {
        encode_address(&account_id(&self.public_key()))
    }

    /// Sign a prefixed signing payload.
    ///
    /// Ed25519 signs the payload itself; secp256k1 signs its SHA-512 half
    /// and returns a low-S DER signature.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, KeyError> {
        match self {
            KeyPair::Ed25519(key) => Ok(key.sign(message).to_bytes().to_vec()),
            KeyPair::Secp256k1(key) => {
                let digest = sha512_half(&[message]);
                let signature: k256::ecdsa::Signature =
                    key.sign_prehash(&digest).map_err(|_| KeyError::Signing)?;
                let signature = signature.normalize_s().unwrap_or(signature);
                Ok(signature.to_der().as_bytes().to_vec())
            }
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let algorithm = match self {
            KeyPair::Ed25519(_) => "ed25519",
            KeyPair::Secp256k1(_) => "secp256k1",
        };
        write!(f, "KeyPair({algorithm}, {})", self.address())
    }
}

fn entropy_after<'a>(payload: &'a [u8], prefix: &[u8]) -> Option<&'a [u8]> {
    (payload.len() == prefix.len() + SEED_ENTROPY_LEN && payload.starts_with(prefix))
        .then(|| &payload[prefix.len()..])
}

/// Root key from the seed, then the account-0 key on top of it.
fn secp256k1_from_entropy(entropy: &[u8]) -> Result<k256::ecdsa::SigningKey, KeyError> {
    let root = derive_scalar(entropy, None)?;
    let root_public = root.public_key().to_encoded_point(true);
    let intermediate = derive_scalar(root_public.as_bytes(), Some(0))?;

    let combined: Option<k256::NonZeroScalar> = k256::NonZeroScalar::new(
        *root.to_nonzero_scalar() + *intermediate.to_nonzero_scalar(),
    )
    .into();
    combined
        .map(k256::ecdsa::SigningKey::from)
        .ok_or(KeyError::Derivation)
}

/// First `sha512_half(input ‖ index? ‖ counter)` that is a valid scalar.
fn derive_scalar(input: &[u8], account_index: Option<u32>) -> Result<k256::SecretKey, KeyError> {
    let index = account_index.map(u32::to_be_bytes);
    for counter in 0..=u32::MAX {
        let counter_bytes = counter.to_be_bytes();
        let mut parts: Vec<&[u8]> = vec![input];
        if let Some(index) = &index {
            parts.push(index);
        }
        parts.push(&counter_bytes);

        let candidate = Zeroizing::new(sha512_half(&parts));
        if let Ok(key) = k256::SecretKey::from_slice(candidate.as_slice()) {
            return Ok(key);
        }
    }
    Err(KeyError::Derivation)
}
