//! Duplicate trust-line guard.
//!
//! Before replicating a TrustSet the follower's existing lines are
//! checked; if one already covers the same currency and issuer the
//! replica is skipped. A failed lookup also skips: submitting blind could
//! overwrite an existing limit.

use tracing::{debug, warn};

use crate::ledger::Session;
use crate::types::IssuedAmount;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Proceed,
    AlreadyExists,
    LookupFailed,
}

impl GuardDecision {
    pub fn should_submit(self) -> bool {
        self == GuardDecision::Proceed
    }
}

pub struct DuplicateGuard;

impl DuplicateGuard {
    pub async fn check(session: &Session, follower: &str, limit: &IssuedAmount) -> GuardDecision {
        let lines = match session.account_lines(follower).await {
            Ok(lines) => lines,
            Err(e) => {
                warn!(
                    follower,
                    currency = %limit.currency,
                    error = %e,
                    "Trust line lookup failed, skipping TrustSet"
                );
                return GuardDecision::LookupFailed;
            }
        };

        if lines.iter().any(|l| l.matches(&limit.currency, &limit.issuer)) {
            debug!(
                follower,
                currency = %limit.currency,
                issuer = %limit.issuer,
                "Trust line already exists"
            );
            GuardDecision::AlreadyExists
        } else {
            GuardDecision::Proceed
        }
    }
}
