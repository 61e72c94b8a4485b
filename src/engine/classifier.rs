//! Leader event classification.
//!
//! Pure mapping from a raw notification to one of the four replicable
//! kinds, or `Ignore`. No I/O, no logging: callers decide what to do
//! with an ignored event.

use serde::Deserialize;
use serde_json::Value;

use crate::types::{Amount, IssuedAmount, LeaderEvent, TxKind};

/// Why an event produced no replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Sent by an account other than the leader (e.g. an incoming payment).
    ForeignAccount,
    /// Provisional notification, not yet validated by consensus.
    Unvalidated,
    UnsupportedType(String),
    /// Recognized kind but a required field is missing or malformed.
    Malformed(TxKind),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrustSetBody {
    #[serde(rename = "LimitAmount")]
    pub limit_amount: IssuedAmount,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OfferCreateBody {
    #[serde(rename = "TakerGets")]
    pub taker_gets: Amount,
    #[serde(rename = "TakerPays")]
    pub taker_pays: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferCancelBody {
    /// The leader transaction's `Sequence`, passed through unchanged.
    pub offer_sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentBody {
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Ignore(IgnoreReason),
    TrustSet(TrustSetBody),
    OfferCreate(OfferCreateBody),
    OfferCancel(OfferCancelBody),
    Payment(PaymentBody),
}

impl Classification {
    pub fn kind(&self) -> Option<TxKind> {
        match self {
            Classification::Ignore(_) => None,
            Classification::TrustSet(_) => Some(TxKind::TrustSet),
            Classification::OfferCreate(_) => Some(TxKind::OfferCreate),
            Classification::OfferCancel(_) => Some(TxKind::OfferCancel),
            Classification::Payment(_) => Some(TxKind::Payment),
        }
    }
}

/// Classify `event` against the configured leader.
pub fn classify(event: &LeaderEvent, leader_address: &str) -> Classification {
    if event.account != leader_address {
        return Classification::Ignore(IgnoreReason::ForeignAccount);
    }
    if !event.validated {
        return Classification::Ignore(IgnoreReason::Unvalidated);
    }
    let Some(kind) = TxKind::from_type(&event.transaction_type) else {
        return Classification::Ignore(IgnoreReason::UnsupportedType(
            event.transaction_type.clone(),
        ));
    };

    let parsed = match kind {
        TxKind::TrustSet => body(event).map(Classification::TrustSet),
        TxKind::OfferCreate => body(event).map(Classification::OfferCreate),
        // API v2 renamed `Amount` to `DeliverMax`; v1 may carry both.
        TxKind::Payment => event
            .field("Amount")
            .or_else(|| event.field("DeliverMax"))
            .and_then(|v| serde_json::from_value::<Amount>(v.clone()).ok())
            .map(|amount| Classification::Payment(PaymentBody { amount })),
        // The leader's own `Sequence` becomes the follower's `OfferSequence`.
        TxKind::OfferCancel => event
            .field("Sequence")
            .and_then(Value::as_u64)
            .and_then(|seq| u32::try_from(seq).ok())
            .map(|offer_sequence| Classification::OfferCancel(OfferCancelBody { offer_sequence })),
    };

    parsed.unwrap_or(Classification::Ignore(IgnoreReason::Malformed(kind)))
}

fn body<T: for<'de> Deserialize<'de>>(event: &LeaderEvent) -> Option<T> {
    serde_json::from_value(Value::Object(event.fields.clone())).ok()
}
