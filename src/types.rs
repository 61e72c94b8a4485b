//! Shared types for the MIRROR engine.
//!
//! These types form the data model used across all modules: the
//! follower's configuration, leader notifications, replica transaction
//! bodies and audit records. Ledger wire shapes (PascalCase JSON) are
//! confined to the serde attributes here and in `ledger`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// Ledger flag forbidding rippling through a trust line (`tfSetNoRipple`).
pub const TF_SET_NO_RIPPLE: u32 = 0x0002_0000;

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

/// The follower's signing secret.
///
/// Opaque on purpose: no `Display`, no `Serialize`, and a redacted
/// `Debug`. The inner string is zeroized when dropped.
#[derive(Deserialize)]
#[serde(transparent)]
pub struct Credential(SecretString);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(SecretString::new(secret.into()))
    }

    /// Borrow the raw secret. Only the signing layer should call this.
    pub(crate) fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

// ---------------------------------------------------------------------------
// Amounts
// ---------------------------------------------------------------------------

/// An issued-currency amount object: `{currency, issuer, value}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedAmount {
    pub currency: String,
    pub issuer: String,
    pub value: String,
}

/// A ledger amount: either native drops as a numeric string, or an
/// issued-currency object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Amount {
    Native(String),
    Issued(IssuedAmount),
}

impl Amount {
    pub fn is_native(&self) -> bool {
        matches!(self, Amount::Native(_))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Amount::Native(drops) => write!(f, "{drops} drops"),
            Amount::Issued(a) => write!(f, "{} {}.{}", a.value, a.currency, a.issuer),
        }
    }
}

/// Decode a hex currency code into its ASCII form (`"46555A5A59..."` → `"FUZZY"`).
///
/// Any 2 to 40 hex digits are decoded pairwise up to the first zero byte.
/// `"XRP"`, non-hex codes and anything that isn't printable after decoding
/// are returned unchanged.
pub fn decode_currency(code: &str) -> String {
    if code == "XRP"
        || !(2..=40).contains(&code.len())
        || !code.chars().all(|c| c.is_ascii_hexdigit())
    {
        return code.to_string();
    }

    let mut bytes = Vec::with_capacity(20);
    for i in (0..code.len()).step_by(2) {
        let end = (i + 2).min(code.len());
        match u8::from_str_radix(&code[i..end], 16) {
            Ok(0) => break,
            Ok(b) => bytes.push(b),
            Err(_) => return code.to_string(),
        }
    }

    match String::from_utf8(bytes) {
        Ok(s) if !s.is_empty() && s.chars().all(|c| c.is_ascii_graphic()) => s,
        _ => code.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Transaction kinds
// ---------------------------------------------------------------------------

/// The four leader transaction kinds the engine replicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxKind {
    TrustSet,
    OfferCreate,
    OfferCancel,
    Payment,
}

impl TxKind {
    pub fn from_type(transaction_type: &str) -> Option<Self> {
        match transaction_type {
            "TrustSet" => Some(TxKind::TrustSet),
            "OfferCreate" => Some(TxKind::OfferCreate),
            "OfferCancel" => Some(TxKind::OfferCancel),
            "Payment" => Some(TxKind::Payment),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::TrustSet => "TrustSet",
            TxKind::OfferCreate => "OfferCreate",
            TxKind::OfferCancel => "OfferCancel",
            TxKind::Payment => "Payment",
        }
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Leader events
// ---------------------------------------------------------------------------

/// A raw transaction notification observed on the leader's feed.
/// Consumed once by the bot loop, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaderEvent {
    pub account: String,
    pub transaction_type: String,
    /// The full transaction body, PascalCase keys as sent by the ledger.
    pub fields: Map<String, Value>,
    /// Whether the notification reports a consensus-validated outcome.
    pub validated: bool,
    pub hash: Option<String>,
}

impl LeaderEvent {
    /// Build a validated event from a transaction body.
    pub fn new(account: &str, transaction_type: &str, fields: Value) -> Self {
        let mut fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        fields.insert("Account".into(), Value::String(account.to_string()));
        fields.insert(
            "TransactionType".into(),
            Value::String(transaction_type.to_string()),
        );
        Self {
            account: account.to_string(),
            transaction_type: transaction_type.to_string(),
            fields,
            validated: true,
            hash: None,
        }
    }

    /// Parse a `"type": "transaction"` stream message.
    ///
    /// Accepts both the API v1 (`transaction`) and v2 (`tx_json`) shapes.
    /// Returns `None` for anything that isn't a transaction notification.
    pub fn from_stream(msg: &Value) -> Option<Self> {
        if msg.get("type").and_then(Value::as_str) != Some("transaction") {
            return None;
        }
        let tx = msg.get("transaction").or_else(|| msg.get("tx_json"))?;
        let fields = tx.as_object()?.clone();
        let account = fields.get("Account")?.as_str()?.to_string();
        let transaction_type = fields.get("TransactionType")?.as_str()?.to_string();
        let hash = msg
            .get("hash")
            .or_else(|| tx.get("hash"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Some(Self {
            account,
            transaction_type,
            fields,
            validated: msg.get("validated").and_then(Value::as_bool).unwrap_or(false),
            hash,
        })
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

// ---------------------------------------------------------------------------
// Replica transactions
// ---------------------------------------------------------------------------

/// A follower-side transaction body derived from one leader event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaTransaction {
    TrustSet { limit_amount: IssuedAmount, flags: u32 },
    OfferCreate { taker_gets: Amount, taker_pays: Amount },
    OfferCancel { offer_sequence: u32 },
    Payment { amount: Amount, destination: String },
}

impl ReplicaTransaction {
    pub fn kind(&self) -> TxKind {
        match self {
            ReplicaTransaction::TrustSet { .. } => TxKind::TrustSet,
            ReplicaTransaction::OfferCreate { .. } => TxKind::OfferCreate,
            ReplicaTransaction::OfferCancel { .. } => TxKind::OfferCancel,
            ReplicaTransaction::Payment { .. } => TxKind::Payment,
        }
    }

    /// Render the unsigned ledger JSON for `account`, before autofill.
    pub fn to_tx_json(&self, account: &str) -> Value {
        let mut tx = match self {
            ReplicaTransaction::TrustSet { limit_amount, flags } => json!({
                "LimitAmount": limit_amount,
                "Flags": flags,
            }),
            ReplicaTransaction::OfferCreate { taker_gets, taker_pays } => json!({
                "TakerGets": taker_gets,
                "TakerPays": taker_pays,
            }),
            ReplicaTransaction::OfferCancel { offer_sequence } => json!({
                "OfferSequence": offer_sequence,
            }),
            ReplicaTransaction::Payment { amount, destination } => json!({
                "Amount": amount,
                "Destination": destination,
            }),
        };
        tx["TransactionType"] = Value::String(self.kind().as_str().to_string());
        tx["Account"] = Value::String(account.to_string());
        tx
    }
}

// ---------------------------------------------------------------------------
// Bot configuration and control messages
// ---------------------------------------------------------------------------

/// Start request as received from the control surface.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub user_id: String,
    pub leader_address: String,
    pub copy_percentage: Decimal,
    pub secret: Credential,
    #[serde(default)]
    pub endpoints: Option<Vec<String>>,
}

/// Immutable configuration of one follower bot.
#[derive(Debug)]
pub struct BotConfig {
    pub user_id: String,
    pub leader_address: String,
    /// Share of the leader's amounts to replicate, in `(0, 100]`.
    pub copy_percentage: Decimal,
    pub credential: Credential,
    /// Ordered candidate endpoints; tried once each at start.
    pub endpoints: Vec<String>,
}

impl BotConfig {
    /// Validate a start request, falling back to `default_endpoints` when
    /// the request carries none.
    pub fn from_request(
        req: StartRequest,
        default_endpoints: &[String],
    ) -> Result<Self, MirrorError> {
        let user_id = req.user_id.trim().to_string();
        if user_id.is_empty() {
            return Err(MirrorError::InvalidConfig("userId is required".into()));
        }
        let leader_address = req.leader_address.trim().to_string();
        if !looks_like_address(&leader_address) {
            return Err(MirrorError::InvalidConfig(format!(
                "leaderAddress is not a valid account address: {leader_address}"
            )));
        }
        if req.copy_percentage <= Decimal::ZERO || req.copy_percentage > Decimal::ONE_HUNDRED {
            return Err(MirrorError::InvalidConfig(format!(
                "copyPercentage must be in (0, 100], got {}",
                req.copy_percentage
            )));
        }
        if req.secret.is_empty() {
            return Err(MirrorError::InvalidConfig("secret is required".into()));
        }

        let endpoints: Vec<String> = match req.endpoints {
            Some(list) if !list.is_empty() => list,
            _ => default_endpoints.to_vec(),
        };
        if endpoints.is_empty() {
            return Err(MirrorError::InvalidConfig("no ledger endpoints configured".into()));
        }

        Ok(Self {
            user_id,
            leader_address,
            copy_percentage: req.copy_percentage,
            credential: req.secret,
            endpoints,
        })
    }

    /// The persisted audit form of this configuration (no secret).
    pub fn audit_record(&self) -> BotConfigRecord {
        BotConfigRecord {
            user_id: self.user_id.clone(),
            leader_address: self.leader_address.clone(),
            copy_percentage: self.copy_percentage,
            endpoints: self.endpoints.clone(),
        }
    }
}

/// Classic account addresses: base58, leading `r`, 25–35 characters.
fn looks_like_address(address: &str) -> bool {
    (25..=35).contains(&address.len())
        && address.starts_with('r')
        && address.chars().all(|c| c.is_ascii_alphanumeric() && !"0OIl".contains(c))
}

/// Audit/history row written once per successful start request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfigRecord {
    pub user_id: String,
    pub leader_address: String,
    pub copy_percentage: Decimal,
    pub endpoints: Vec<String>,
}

/// Structured reply of `start` and `stop`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlResponse {
    pub message: String,
    pub user_id: String,
}

impl ControlResponse {
    pub fn started(user_id: &str) -> Self {
        Self { message: "Copy trading started".into(), user_id: user_id.to_string() }
    }

    pub fn stopped(user_id: &str) -> Self {
        Self { message: "Copy trading stopped".into(), user_id: user_id.to_string() }
    }

    pub fn not_found(user_id: &str) -> Self {
        Self {
            message: "No active copy trading bot found for user".into(),
            user_id: user_id.to_string(),
        }
    }
}

/// Lifecycle state of an active bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BotState {
    Idle,
    Connecting,
    Subscribed,
    Processing,
    Stopped,
}

impl fmt::Display for BotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotState::Idle => write!(f, "IDLE"),
            BotState::Connecting => write!(f, "CONNECTING"),
            BotState::Subscribed => write!(f, "SUBSCRIBED"),
            BotState::Processing => write!(f, "PROCESSING"),
            BotState::Stopped => write!(f, "STOPPED"),
        }
    }
}

// ---------------------------------------------------------------------------
// Audit and notification records
// ---------------------------------------------------------------------------

/// One row per submission attempt, success or failure. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeLogRecord {
    pub user_id: String,
    pub trade_type: String,
    pub result: Value,
    pub tx_hash: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Broadcast to observers after a successful replica submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeNotification {
    pub follower_id: String,
    #[serde(rename = "type")]
    pub trade_type: String,
    pub result: Value,
}

/// A trust line held by an account, as reported by `account_lines`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustLine {
    /// The counterparty (issuer) of the line.
    pub account: String,
    pub currency: String,
    #[serde(default)]
    pub balance: String,
    #[serde(default)]
    pub limit: String,
}

impl TrustLine {
    /// Whether this line covers `currency` issued by `issuer`. Hex and
    /// ASCII spellings of the same code compare equal.
    pub fn matches(&self, currency: &str, issuer: &str) -> bool {
        self.account == issuer && decode_currency(&self.currency) == decode_currency(currency)
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors surfaced to callers of the control surface.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("Copy trading already running for user {0}")]
    AlreadyRunning(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Connection error: {0}")]
    Connection(#[source] crate::ledger::LedgerError),

    #[error("Startup failed ({stage}): {source}")]
    Startup {
        stage: &'static str,
        #[source]
        source: crate::ledger::LedgerError,
    },

    #[error("Bot for user {0} was stopped while starting")]
    Cancelled(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
