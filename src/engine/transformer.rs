//! Replica construction.
//!
//! Turns a classified leader action into the follower's transaction
//! body. Amount fields are a pure function of the leader's amounts and
//! the copy percentage:
//!
//! | Kind        | Issued amount          | Native amount (drops)           |
//! |-------------|------------------------|---------------------------------|
//! | TrustSet    | fixed limit, no-ripple | n/a                             |
//! | OfferCreate | `value * p / 100`      | unchanged (unless configured)   |
//! | OfferCancel | leader sequence as-is  | n/a                             |
//! | Payment     | `value * p / 100`      | `floor(drops * p / 100)`        |
//!
//! OfferCreate scaling only applies when `p < 100`. Replica payments are
//! sent to the follower's own address.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;

use super::classifier::Classification;
use crate::config::EngineConfig;
use crate::types::{Amount, IssuedAmount, ReplicaTransaction, TF_SET_NO_RIPPLE};

/// Issued-currency amounts carry at most 15 significant digits.
const ISSUED_PRECISION: u32 = 15;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error("Unparseable or out-of-range amount: {0}")]
    InvalidAmount(String),

    #[error("Scaled amount rounds to zero (leader amount {0})")]
    ZeroAmount(String),
}

/// Builds follower transactions for one bot.
#[derive(Debug, Clone)]
pub struct PayloadTransformer {
    percentage: Decimal,
    follower_address: String,
    trust_line_limit: String,
    scale_native_offers: bool,
}

impl PayloadTransformer {
    pub fn new(percentage: Decimal, follower_address: &str, settings: &EngineConfig) -> Self {
        Self {
            percentage,
            follower_address: follower_address.to_string(),
            trust_line_limit: settings.trust_line_limit.clone(),
            scale_native_offers: settings.scale_native_offer_amounts,
        }
    }

    /// Build the replica for `classification`; `Ok(None)` for `Ignore`.
    pub fn transform(
        &self,
        classification: Classification,
    ) -> Result<Option<ReplicaTransaction>, TransformError> {
        let replica = match classification {
            Classification::Ignore(_) => return Ok(None),

            Classification::TrustSet(body) => ReplicaTransaction::TrustSet {
                limit_amount: IssuedAmount {
                    currency: body.limit_amount.currency,
                    issuer: body.limit_amount.issuer,
                    value: self.trust_line_limit.clone(),
                },
                flags: TF_SET_NO_RIPPLE,
            },

            Classification::OfferCreate(body) => {
                if self.percentage < Decimal::ONE_HUNDRED {
                    ReplicaTransaction::OfferCreate {
                        taker_gets: self.scale_offer_amount(body.taker_gets)?,
                        taker_pays: self.scale_offer_amount(body.taker_pays)?,
                    }
                } else {
                    ReplicaTransaction::OfferCreate {
                        taker_gets: body.taker_gets,
                        taker_pays: body.taker_pays,
                    }
                }
            }

            Classification::OfferCancel(body) => ReplicaTransaction::OfferCancel {
                offer_sequence: body.offer_sequence,
            },

            Classification::Payment(body) => {
                let amount = match body.amount {
                    Amount::Native(drops) => {
                        Amount::Native(scale_drops(&drops, self.percentage)?)
                    }
                    Amount::Issued(issued) => Amount::Issued(self.scale_issued(issued)?),
                };
                ReplicaTransaction::Payment {
                    amount,
                    destination: self.follower_address.clone(),
                }
            }
        };

        Ok(Some(replica))
    }

    fn scale_offer_amount(&self, amount: Amount) -> Result<Amount, TransformError> {
        match amount {
            Amount::Issued(issued) => Ok(Amount::Issued(self.scale_issued(issued)?)),
            Amount::Native(drops) if self.scale_native_offers => {
                Ok(Amount::Native(scale_drops(&drops, self.percentage)?))
            }
            native => Ok(native),
        }
    }

    fn scale_issued(&self, issued: IssuedAmount) -> Result<IssuedAmount, TransformError> {
        Ok(IssuedAmount {
            value: scale_value(&issued.value, self.percentage)?,
            ..issued
        })
    }
}

/// `value * percentage / 100`, exact, rounded to ledger precision.
pub fn scale_value(value: &str, percentage: Decimal) -> Result<String, TransformError> {
    let leader = Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .map_err(|_| TransformError::InvalidAmount(value.to_string()))?;
    if percentage == Decimal::ONE_HUNDRED {
        return Ok(value.to_string());
    }

    let scaled = leader
        .checked_mul(percentage)
        .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED))
        .ok_or_else(|| TransformError::InvalidAmount(value.to_string()))?;
    let rounded = scaled.round_sf(ISSUED_PRECISION).unwrap_or(scaled);
    if rounded.is_zero() {
        return Err(TransformError::ZeroAmount(value.to_string()));
    }
    Ok(rounded.normalize().to_string())
}

/// `floor(drops * percentage / 100)` for native amounts.
pub fn scale_drops(drops: &str, percentage: Decimal) -> Result<String, TransformError> {
    let leader: u64 = drops
        .parse()
        .map_err(|_| TransformError::InvalidAmount(drops.to_string()))?;

    let scaled = Decimal::from(leader)
        .checked_mul(percentage)
        .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED))
        .and_then(|v| v.floor().to_u64())
        .ok_or_else(|| TransformError::InvalidAmount(drops.to_string()))?;
    if scaled == 0 {
        return Err(TransformError::ZeroAmount(drops.to_string()));
    }
    Ok(scaled.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::classifier::{
        IgnoreReason, OfferCancelBody, OfferCreateBody, PaymentBody, TrustSetBody,
    };
    use rust_decimal_macros::dec;

    const FOLLOWER: &str = "rFollowerAccountxxxxxxxxxxxxxxx";

    fn transformer(pct: Decimal) -> PayloadTransformer {
        PayloadTransformer::new(pct, FOLLOWER, &EngineConfig::default())
    }

    fn usd(value: &str) -> Amount {
        Amount::Issued(IssuedAmount {
            currency: "USD".into(),
            issuer: "rIssuer".into(),
            value: value.into(),
        })
    }

    #[test]
    fn test_ignore_yields_nothing() {
        let out = transformer(dec!(50))
            .transform(Classification::Ignore(IgnoreReason::ForeignAccount))
            .unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn test_payment_native_scenario() {
        // 1,000,000 drops at 25% → 250,000 drops to the follower itself
        let out = transformer(dec!(25))
            .transform(Classification::Payment(PaymentBody {
                amount: Amount::Native("1000000".into()),
            }))
            .unwrap()
            .unwrap();
        assert_eq!(
            out,
            ReplicaTransaction::Payment {
                amount: Amount::Native("250000".into()),
                destination: FOLLOWER.into(),
            }
        );
    }

    #[test]
    fn test_payment_native_floors() {
        assert_eq!(scale_drops("999", dec!(10)).unwrap(), "99");
        assert_eq!(scale_drops("1000001", dec!(33.3)).unwrap(), "333000");
        assert_eq!(scale_drops("123", dec!(100)).unwrap(), "123");
    }

    #[test]
    fn test_payment_scaled_to_zero_is_rejected() {
        let err = transformer(dec!(10))
            .transform(Classification::Payment(PaymentBody {
                amount: Amount::Native("5".into()),
            }))
            .unwrap_err();
        assert_eq!(err, TransformError::ZeroAmount("5".into()));
    }

    #[test]
    fn test_payment_issued_scaled() {
        let out = transformer(dec!(40))
            .transform(Classification::Payment(PaymentBody { amount: usd("12.5") }))
            .unwrap()
            .unwrap();
        match out {
            ReplicaTransaction::Payment { amount, destination } => {
                assert_eq!(amount, usd("5"));
                assert_eq!(destination, FOLLOWER);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_offer_create_issued_scaled_native_unchanged() {
        let out = transformer(dec!(50))
            .transform(Classification::OfferCreate(OfferCreateBody {
                taker_gets: Amount::Native("5000000".into()),
                taker_pays: usd("10"),
            }))
            .unwrap()
            .unwrap();
        assert_eq!(
            out,
            ReplicaTransaction::OfferCreate {
                taker_gets: Amount::Native("5000000".into()),
                taker_pays: usd("5"),
            }
        );
    }

    #[test]
    fn test_offer_create_native_scaled_when_enabled() {
        let settings = EngineConfig {
            scale_native_offer_amounts: true,
            ..EngineConfig::default()
        };
        let out = PayloadTransformer::new(dec!(50), FOLLOWER, &settings)
            .transform(Classification::OfferCreate(OfferCreateBody {
                taker_gets: Amount::Native("5000001".into()),
                taker_pays: usd("10"),
            }))
            .unwrap()
            .unwrap();
        assert_eq!(
            out,
            ReplicaTransaction::OfferCreate {
                taker_gets: Amount::Native("2500000".into()),
                taker_pays: usd("5"),
            }
        );
    }

    #[test]
    fn test_offer_create_full_percentage_unchanged() {
        let body = OfferCreateBody {
            taker_gets: usd("10.50"),
            taker_pays: Amount::Native("42".into()),
        };
        let out = transformer(dec!(100))
            .transform(Classification::OfferCreate(body.clone()))
            .unwrap()
            .unwrap();
        assert_eq!(
            out,
            ReplicaTransaction::OfferCreate {
                taker_gets: body.taker_gets,
                taker_pays: body.taker_pays,
            }
        );
    }

    #[test]
    fn test_trust_set_ignores_percentage() {
        let out = transformer(dec!(1))
            .transform(Classification::TrustSet(TrustSetBody {
                limit_amount: IssuedAmount {
                    currency: "USD".into(),
                    issuer: "rIssuer".into(),
                    value: "250".into(),
                },
            }))
            .unwrap()
            .unwrap();
        assert_eq!(
            out,
            ReplicaTransaction::TrustSet {
                limit_amount: IssuedAmount {
                    currency: "USD".into(),
                    issuer: "rIssuer".into(),
                    value: "1000000000".into(),
                },
                flags: TF_SET_NO_RIPPLE,
            }
        );
    }

    #[test]
    fn test_offer_cancel_passes_sequence_through() {
        let out = transformer(dec!(25))
            .transform(Classification::OfferCancel(OfferCancelBody { offer_sequence: 555 }))
            .unwrap()
            .unwrap();
        assert_eq!(out, ReplicaTransaction::OfferCancel { offer_sequence: 555 });
    }

    #[test]
    fn test_scale_value() {
        assert_eq!(scale_value("100", dec!(25)).unwrap(), "25");
        assert_eq!(scale_value("0.3", dec!(50)).unwrap(), "0.15");
        assert_eq!(scale_value("1e3", dec!(10)).unwrap(), "100");
        assert_eq!(scale_value("7", dec!(100)).unwrap(), "7");
        // 15 significant digits at most
        assert_eq!(scale_value("1", dec!(33.3333333333333333)).unwrap(), "0.333333333333333");
        assert!(matches!(scale_value("abc", dec!(10)), Err(TransformError::InvalidAmount(_))));
    }

    #[test]
    fn test_scale_value_overflow_is_an_error() {
        // 1e27 fits a Decimal, 1e27 * 99 does not
        let huge = "1000000000000000000000000000";
        assert_eq!(
            scale_value(huge, dec!(99)),
            Err(TransformError::InvalidAmount(huge.into()))
        );
        assert_eq!(scale_value(huge, dec!(5)).unwrap(), "50000000000000000000000000");

        let out = transformer(dec!(99)).transform(Classification::Payment(PaymentBody {
            amount: usd(huge),
        }));
        assert!(matches!(out, Err(TransformError::InvalidAmount(_))));
    }
}
