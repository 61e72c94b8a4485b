//! Signing seam.
//!
//! A `SignerFactory` turns the follower's `Credential` into a
//! `TransactionSigner` once, at bot start; the pipeline then only sees the
//! signer's address and `sign`.
//!
//! `LocalSignerFactory` derives the key pair from the family seed in
//! process and drops the credential straight after. Nothing secret ever
//! crosses the wire: nodes only receive the signed blob.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use super::codec::{self, CodecError, SIGNING_PREFIX, TX_ID_PREFIX};
use super::keys::{sha512_half, KeyPair};
use super::LedgerError;
use crate::types::Credential;

/// A signed transaction ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub tx_blob: String,
    pub hash: String,
    pub last_ledger_sequence: Option<u32>,
}

/// Signs follower transactions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// The follower account this signer signs for.
    fn address(&self) -> &str;

    async fn sign(&self, tx_json: &Value) -> Result<SignedTransaction, LedgerError>;
}

/// Builds a signer for one bot, consuming its credential.
pub trait SignerFactory: Send + Sync {
    fn derive(&self, credential: Credential) -> Result<Box<dyn TransactionSigner>, LedgerError>;
}

// ---------------------------------------------------------------------------
// Local signing
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalSignerFactory;

impl SignerFactory for LocalSignerFactory {
    fn derive(&self, credential: Credential) -> Result<Box<dyn TransactionSigner>, LedgerError> {
        let signer = LocalSigner::from_seed(credential.expose())?;
        drop(credential);

        info!(follower = %signer.address, "Derived follower signer");
        Ok(Box::new(signer))
    }
}

/// Holds the derived key pair; the seed itself is not kept.
#[derive(Debug)]
pub struct LocalSigner {
    keys: KeyPair,
    public_key_hex: String,
    address: String,
}

impl LocalSigner {
    pub fn from_seed(seed: &str) -> Result<Self, LedgerError> {
        let keys = KeyPair::from_seed(seed)?;
        Ok(Self {
            public_key_hex: hex::encode_upper(keys.public_key()),
            address: keys.address(),
            keys,
        })
    }
}

#[async_trait]
impl TransactionSigner for LocalSigner {
    fn address(&self) -> &str {
        &self.address
    }

    async fn sign(&self, tx_json: &Value) -> Result<SignedTransaction, LedgerError> {
        let mut tx = tx_json.clone();
        let fields = tx.as_object_mut().ok_or(CodecError::NotAnObject)?;

        if fields.get("Account").and_then(Value::as_str) != Some(self.address.as_str()) {
            return Err(CodecError::InvalidField {
                field: "Account".into(),
                detail: format!("signer is {}", self.address),
            }
            .into());
        }
        fields.insert("SigningPubKey".into(), Value::String(self.public_key_hex.clone()));

        let mut message = SIGNING_PREFIX.to_vec();
        message.extend_from_slice(&codec::encode(&tx, true)?);
        let signature = self.keys.sign(&message)?;

        tx["TxnSignature"] = Value::String(hex::encode_upper(signature));
        let blob = codec::encode(&tx, false)?;
        let hash = sha512_half(&[&TX_ID_PREFIX[..], &blob[..]]);

        Ok(SignedTransaction {
            tx_blob: hex::encode_upper(&blob),
            hash: hex::encode_upper(hash),
            last_ledger_sequence: tx["LastLedgerSequence"].as_u64().map(|v| v as u32),
        })
    }
}
