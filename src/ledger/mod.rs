//! Ledger protocol integration.
//!
//! Defines the `LedgerClient` trait (one live session against one
//! endpoint) and provides:
//! - `websocket`: JSON-RPC over WebSocket, the production transport
//! - `connection`: ordered endpoint fallback at bot start
//! - `signer`: the signing seam used by the submission pipeline
//! - `keys`, `codec`: seed derivation and the binary transaction format
//!   behind local signing
//!
//! `account_lines`, `autofill` and `submit_and_wait` have default
//! implementations on top of `request`, so a transport only has to
//! provide request/response plumbing and the subscription stream.

pub mod codec;
pub mod connection;
pub mod keys;
pub mod signer;
pub mod websocket;

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::types::{LeaderEvent, TrustLine};

pub use connection::{ConnectionManager, Connector};
pub use codec::CodecError;
pub use keys::KeyError;
pub use signer::{
    LocalSigner, LocalSignerFactory, SignedTransaction, SignerFactory, TransactionSigner,
};
pub use websocket::{WsConnector, WsLedgerClient};

/// A live session against one endpoint.
pub type Session = Arc<dyn LedgerClient>;

/// Ledgers added to the current index when autofilling `LastLedgerSequence`.
pub const LEDGER_OFFSET: u32 = 20;

/// Upper bound on the autofilled fee, in drops (2 XRP).
pub const MAX_FEE_DROPS: u64 = 2_000_000;

/// Page size for `account_lines`.
const ACCOUNT_LINES_LIMIT: u32 = 400;

/// Delay between `tx` polls while waiting for validation.
const VALIDATION_POLL_INTERVAL: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RPC error {code}: {message}")]
    Rpc { code: String, message: String },

    #[error("Malformed response to {command}: {detail}")]
    MalformedResponse { command: String, detail: String },

    #[error("Transaction rejected: {engine_result} ({message})")]
    Rejected { engine_result: String, message: String },

    #[error("Transaction {hash} expired: not validated by ledger {last_ledger_sequence}")]
    Expired { hash: String, last_ledger_sequence: u32 },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Session closed")]
    Disconnected,

    #[error("Session already has an active subscription")]
    AlreadySubscribed,

    #[error("All {attempted} endpoint(s) unreachable; last error: {last_error}")]
    AllEndpointsUnreachable { attempted: usize, last_error: String },

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Encoding error: {0}")]
    Encoding(#[from] CodecError),
}

impl LedgerError {
    fn malformed(command: &str, detail: impl Into<String>) -> Self {
        LedgerError::MalformedResponse {
            command: command.to_string(),
            detail: detail.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Session types
// ---------------------------------------------------------------------------

/// Receiving end of an account subscription.
///
/// Yields events in transport arrival order. Ends (`None`) when the
/// session drops or the subscription is torn down.
///
/// The transport never blocks on a slow consumer: an event that arrives
/// while the queue is full is discarded and counted in `dropped`.
pub struct LeaderFeed {
    rx: mpsc::Receiver<LeaderEvent>,
    dropped: Arc<AtomicU64>,
}

impl LeaderFeed {
    pub fn new(rx: mpsc::Receiver<LeaderEvent>) -> Self {
        Self::with_drop_counter(rx, Arc::default())
    }

    /// A feed whose sender side shares `dropped`.
    pub fn with_drop_counter(rx: mpsc::Receiver<LeaderEvent>, dropped: Arc<AtomicU64>) -> Self {
        Self { rx, dropped }
    }

    /// Events discarded so far because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub async fn recv(&mut self) -> Option<LeaderEvent> {
        self.rx.recv().await
    }

    /// Stop accepting events; anything already queued is discarded.
    pub fn close(&mut self) {
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }
}

/// Final outcome of a submitted transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitOutcome {
    pub hash: String,
    /// `meta.TransactionResult` once validated, e.g. `tesSUCCESS`.
    pub engine_result: String,
    pub validated: bool,
    pub ledger_index: Option<u32>,
    pub raw: Value,
}

impl SubmitOutcome {
    pub fn is_success(&self) -> bool {
        self.validated && self.engine_result == "tesSUCCESS"
    }
}

// ---------------------------------------------------------------------------
// Client trait
// ---------------------------------------------------------------------------

/// One live session against a ledger endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// The endpoint this session is connected to.
    fn endpoint(&self) -> &str;

    /// Send one command and return its `result` object.
    async fn request(&self, command: &str, params: Value) -> Result<Value, LedgerError>;

    /// Subscribe to validated transactions touching `account`.
    async fn subscribe_account(&self, account: &str) -> Result<LeaderFeed, LedgerError>;

    /// Tear down the subscription. No event is delivered to the feed
    /// after this returns.
    async fn unsubscribe_account(&self, account: &str) -> Result<(), LedgerError>;

    /// Close the session.
    async fn disconnect(&self);

    /// All trust lines held by `account`.
    async fn account_lines(&self, account: &str) -> Result<Vec<TrustLine>, LedgerError> {
        let mut lines = Vec::new();
        let mut marker: Option<Value> = None;

        loop {
            let mut params = json!({
                "account": account,
                "ledger_index": "validated",
                "limit": ACCOUNT_LINES_LIMIT,
            });
            if let Some(m) = marker.take() {
                params["marker"] = m;
            }

            let result = self.request("account_lines", params).await?;
            let page: Vec<TrustLine> = match result.get("lines") {
                Some(v) => serde_json::from_value(v.clone())?,
                None => Vec::new(),
            };
            lines.extend(page);

            match result.get("marker") {
                Some(m) if !m.is_null() => marker = Some(m.clone()),
                _ => break,
            }
        }

        debug!(account, count = lines.len(), "Fetched trust lines");
        Ok(lines)
    }

    /// Complete `Sequence`, `Fee` and `LastLedgerSequence` where missing.
    async fn autofill(&self, mut tx: Value) -> Result<Value, LedgerError> {
        let account = tx
            .get("Account")
            .and_then(Value::as_str)
            .ok_or_else(|| LedgerError::malformed("autofill", "transaction has no Account"))?
            .to_string();

        if tx.get("Sequence").is_none() {
            let info = self
                .request(
                    "account_info",
                    json!({ "account": account, "ledger_index": "current" }),
                )
                .await?;
            let sequence = info["account_data"]["Sequence"]
                .as_u64()
                .ok_or_else(|| LedgerError::malformed("account_info", "missing Sequence"))?;
            tx["Sequence"] = json!(sequence);
        }

        if tx.get("Fee").is_none() {
            let fee = self.request("fee", json!({})).await?;
            let drops = fee["drops"]["open_ledger_fee"]
                .as_str()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| LedgerError::malformed("fee", "missing drops.open_ledger_fee"))?;
            tx["Fee"] = Value::String(drops.min(MAX_FEE_DROPS).to_string());
        }

        if tx.get("LastLedgerSequence").is_none() {
            let current = self.request("ledger_current", json!({})).await?;
            let index = current["ledger_current_index"]
                .as_u64()
                .ok_or_else(|| {
                    LedgerError::malformed("ledger_current", "missing ledger_current_index")
                })?;
            tx["LastLedgerSequence"] = json!(index + LEDGER_OFFSET as u64);
        }

        Ok(tx)
    }

    /// Submit a signed blob and wait for a validated outcome.
    async fn submit_and_wait(
        &self,
        signed: &SignedTransaction,
    ) -> Result<SubmitOutcome, LedgerError> {
        let submitted = self
            .request("submit", json!({ "tx_blob": signed.tx_blob }))
            .await?;
        let preliminary = submitted["engine_result"].as_str().unwrap_or_default();
        if ["tem", "tef", "tel"].iter().any(|p| preliminary.starts_with(p)) {
            return Err(LedgerError::Rejected {
                engine_result: preliminary.to_string(),
                message: submitted["engine_result_message"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
            });
        }
        debug!(hash = %signed.hash, preliminary, "Submitted, awaiting validation");

        loop {
            match self.request("tx", json!({ "transaction": signed.hash })).await {
                Ok(tx) if tx["validated"].as_bool() == Some(true) => {
                    return Ok(SubmitOutcome {
                        hash: signed.hash.clone(),
                        engine_result: tx["meta"]["TransactionResult"]
                            .as_str()
                            .unwrap_or_default()
                            .to_string(),
                        validated: true,
                        ledger_index: tx["ledger_index"].as_u64().map(|i| i as u32),
                        raw: tx,
                    });
                }
                Ok(_) => {}
                Err(LedgerError::Rpc { code, .. }) if code == "txnNotFound" => {}
                Err(e) => return Err(e),
            }

            if let Some(last) = signed.last_ledger_sequence {
                let validated = self
                    .request("ledger", json!({ "ledger_index": "validated" }))
                    .await?;
                let index = validated["ledger_index"]
                    .as_u64()
                    .or_else(|| validated["ledger"]["ledger_index"].as_str()?.parse().ok())
                    .unwrap_or_default();
                if index > last as u64 {
                    return Err(LedgerError::Expired {
                        hash: signed.hash.clone(),
                        last_ledger_sequence: last,
                    });
                }
            }

            tokio::time::sleep(VALIDATION_POLL_INTERVAL).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
