//! Submission pipeline.
//!
//! autofill → extend expiry → sign → submit → wait for validation.
//!
//! Every attempt that gets as far as autofill leaves exactly one
//! `TradeLogRecord`, whatever the outcome, unless it is abandoned because
//! the bot is stopping. Only a validated `tesSUCCESS`
//! is broadcast to observers. Failures are logged here and never returned
//! as errors: the bot loop carries on with the next leader event.

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::ledger::{LedgerError, Session, SubmitOutcome, TransactionSigner};
use crate::notify::Notifier;
use crate::storage::AuditLog;
use crate::types::{ReplicaTransaction, TradeLogRecord, TradeNotification};

/// What happened to one replica.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionResult {
    Succeeded(SubmitOutcome),
    Failed { stage: &'static str, error: String },
    /// The bot was asked to stop before anything was submitted.
    Abandoned,
}

pub struct SubmissionPipeline {
    session: Session,
    signer: Box<dyn TransactionSigner>,
    audit: Arc<dyn AuditLog>,
    notifier: Notifier,
    expiry_buffer_ledgers: u32,
    submit_timeout: Duration,
}

impl SubmissionPipeline {
    pub fn new(
        session: Session,
        signer: Box<dyn TransactionSigner>,
        audit: Arc<dyn AuditLog>,
        notifier: Notifier,
        settings: &EngineConfig,
    ) -> Self {
        Self {
            session,
            signer,
            audit,
            notifier,
            expiry_buffer_ledgers: settings.expiry_buffer_ledgers,
            submit_timeout: settings.submit_timeout(),
        }
    }

    /// The follower account replicas are submitted from.
    pub fn follower_address(&self) -> &str {
        self.signer.address()
    }

    /// Run one replica through to a validated outcome.
    ///
    /// `shutdown` is checked right before submission; once it reads
    /// `true` nothing more reaches the ledger.
    pub async fn submit(
        &self,
        user_id: &str,
        replica: &ReplicaTransaction,
        shutdown: &watch::Receiver<bool>,
    ) -> SubmissionResult {
        let kind = replica.kind();
        let unsigned = replica.to_tx_json(self.signer.address());

        let mut prepared = match self.session.autofill(unsigned).await {
            Ok(tx) => tx,
            Err(e) => return self.fail(user_id, replica, "autofill", None, e).await,
        };
        extend_expiry(&mut prepared, self.expiry_buffer_ledgers);

        if *shutdown.borrow() {
            info!(user_id, kind = %kind, "Bot stopping, replica abandoned before submit");
            return SubmissionResult::Abandoned;
        }

        let signed = match self.signer.sign(&prepared).await {
            Ok(signed) => signed,
            Err(e) => return self.fail(user_id, replica, "sign", None, e).await,
        };
        let hash = Some(signed.hash.clone());

        let outcome = match tokio::time::timeout(
            self.submit_timeout,
            self.session.submit_and_wait(&signed),
        )
        .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => return self.fail(user_id, replica, "submit", hash, e).await,
            Err(_) => {
                let e = LedgerError::Timeout(self.submit_timeout);
                return self.fail(user_id, replica, "submit", hash, e).await;
            }
        };

        let result = json!({
            "engine_result": outcome.engine_result,
            "validated": outcome.validated,
            "ledger_index": outcome.ledger_index,
            "hash": outcome.hash,
        });
        self.record(user_id, replica, result.clone(), hash).await;

        if outcome.is_success() {
            info!(
                user_id,
                kind = %kind,
                hash = %outcome.hash,
                ledger_index = ?outcome.ledger_index,
                "Replica validated"
            );
            self.notifier.publish(TradeNotification {
                follower_id: user_id.to_string(),
                trade_type: kind.to_string(),
                result,
            });
            SubmissionResult::Succeeded(outcome)
        } else {
            warn!(
                user_id,
                kind = %kind,
                hash = %outcome.hash,
                engine_result = %outcome.engine_result,
                "Replica validated with failure result"
            );
            SubmissionResult::Failed {
                stage: "validation",
                error: outcome.engine_result,
            }
        }
    }

    async fn fail(
        &self,
        user_id: &str,
        replica: &ReplicaTransaction,
        stage: &'static str,
        tx_hash: Option<String>,
        error: LedgerError,
    ) -> SubmissionResult {
        warn!(user_id, kind = %replica.kind(), stage, error = %error, "Replica submission failed");
        let result = json!({ "stage": stage, "error": error.to_string() });
        self.record(user_id, replica, result, tx_hash).await;
        SubmissionResult::Failed {
            stage,
            error: error.to_string(),
        }
    }

    async fn record(
        &self,
        user_id: &str,
        replica: &ReplicaTransaction,
        result: Value,
        tx_hash: Option<String>,
    ) {
        let record = TradeLogRecord {
            user_id: user_id.to_string(),
            trade_type: replica.kind().to_string(),
            result,
            tx_hash,
            timestamp: Utc::now(),
        };
        // The ledger transaction stands regardless of whether this lands.
        if let Err(e) = self.audit.record_trade(&record).await {
            warn!(user_id, error = %e, "Failed to write trade log");
        }
    }
}

fn extend_expiry(tx: &mut Value, buffer: u32) {
    if let Some(last) = tx.get("LastLedgerSequence").and_then(Value::as_u64) {
        tx["LastLedgerSequence"] = json!(last + buffer as u64);
    }
}
