//! In-memory fake ledger shared by the integration tests.
//!
//! Sessions answer the JSON-RPC commands the engine uses, so the
//! `LedgerClient` default methods (autofill, account_lines,
//! submit_and_wait) run unmodified against it.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use ledger_mirror::config::EngineConfig;
use ledger_mirror::engine::{BotRegistry, EngineContext};
use ledger_mirror::ledger::{
    Connector, LeaderFeed, LedgerClient, LedgerError, Session, SignedTransaction, SignerFactory,
    TransactionSigner,
};
use ledger_mirror::notify::Notifier;
use ledger_mirror::storage::SqliteAuditLog;
use ledger_mirror::types::{Credential, LeaderEvent, StartRequest, TrustLine};

pub const LEADER: &str = "rLeaderAccountxxxxxxxxxxxxxxxxx";
pub const FOLLOWER: &str = "rFollowerAccountxxxxxxxxxxxxxxx";
pub const ENDPOINT: &str = "wss://fake.ledger";

#[derive(Default)]
struct LedgerState {
    feed: Option<mpsc::Sender<LeaderEvent>>,
    submitted: Vec<Value>,
    trust_lines: Vec<TrustLine>,
    down: HashSet<String>,
    connect_delay: Option<Duration>,
    tx_delay: Option<Duration>,
    unsubscribed: usize,
    disconnected: usize,
}

/// Shared handle onto the fake network.
#[derive(Clone, Default)]
pub struct FakeLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trust_line(self, currency: &str, issuer: &str) -> Self {
        self.state.lock().unwrap().trust_lines.push(TrustLine {
            account: issuer.into(),
            currency: currency.into(),
            balance: "0".into(),
            limit: "1000".into(),
        });
        self
    }

    pub fn with_connect_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().connect_delay = Some(delay);
        self
    }

    /// Hold every `tx` lookup for `delay`, keeping submissions in flight.
    pub fn with_tx_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().tx_delay = Some(delay);
        self
    }

    /// Close the subscription from the network side, as a dropped socket would.
    pub fn drop_feed(&self) {
        self.state.lock().unwrap().feed = None;
    }

    pub fn take_down(&self, endpoint: &str) {
        self.state.lock().unwrap().down.insert(endpoint.to_string());
    }

    /// Deliver a leader notification; `false` if nobody is subscribed.
    pub async fn push(&self, event: LeaderEvent) -> bool {
        let sender = self.state.lock().unwrap().feed.clone();
        match sender {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Transactions that reached `submit`, decoded back to JSON.
    pub fn submitted(&self) -> Vec<Value> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn is_subscribed(&self) -> bool {
        self.state.lock().unwrap().feed.is_some()
    }

    pub fn disconnects(&self) -> usize {
        self.state.lock().unwrap().disconnected
    }

    pub fn unsubscribes(&self) -> usize {
        self.state.lock().unwrap().unsubscribed
    }
}

#[async_trait]
impl Connector for FakeLedger {
    async fn connect(&self, endpoint: &str) -> Result<Session, LedgerError> {
        let (delay, down) = {
            let state = self.state.lock().unwrap();
            (state.connect_delay, state.down.contains(endpoint))
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if down {
            return Err(LedgerError::Disconnected);
        }
        Ok(Arc::new(FakeSession {
            endpoint: endpoint.to_string(),
            ledger: self.clone(),
        }))
    }
}

struct FakeSession {
    endpoint: String,
    ledger: FakeLedger,
}

#[async_trait]
impl LedgerClient for FakeSession {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn request(&self, command: &str, params: Value) -> Result<Value, LedgerError> {
        if command == "tx" {
            let delay = self.ledger.state.lock().unwrap().tx_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }

        let mut state = self.ledger.state.lock().unwrap();
        match command {
            "account_info" => Ok(json!({"account_data": {"Sequence": 10}})),
            "fee" => Ok(json!({"drops": {"open_ledger_fee": "12"}})),
            "ledger_current" => Ok(json!({"ledger_current_index": 100})),
            "ledger" => Ok(json!({"ledger_index": 101})),
            "account_lines" => Ok(json!({ "lines": state.trust_lines })),
            "submit" => {
                let blob = params["tx_blob"].as_str().unwrap_or_default();
                state.submitted.push(serde_json::from_str(blob)?);
                Ok(json!({"engine_result": "tesSUCCESS"}))
            }
            "tx" => Ok(json!({
                "validated": true,
                "ledger_index": 102,
                "meta": {"TransactionResult": "tesSUCCESS"}
            })),
            other => Err(LedgerError::Rpc {
                code: "unknownCmd".into(),
                message: format!("fake ledger does not answer {other}"),
            }),
        }
    }

    async fn subscribe_account(&self, _account: &str) -> Result<LeaderFeed, LedgerError> {
        let (tx, rx) = mpsc::channel(16);
        self.ledger.state.lock().unwrap().feed = Some(tx);
        Ok(LeaderFeed::new(rx))
    }

    async fn unsubscribe_account(&self, _account: &str) -> Result<(), LedgerError> {
        let mut state = self.ledger.state.lock().unwrap();
        state.feed = None;
        state.unsubscribed += 1;
        Ok(())
    }

    async fn disconnect(&self) {
        self.ledger.state.lock().unwrap().disconnected += 1;
    }
}

/// Signs by serializing the transaction; the hash counts signatures.
pub struct FakeSigner {
    count: Mutex<u32>,
}

#[async_trait]
impl TransactionSigner for FakeSigner {
    fn address(&self) -> &str {
        FOLLOWER
    }

    async fn sign(&self, tx_json: &Value) -> Result<SignedTransaction, LedgerError> {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        Ok(SignedTransaction {
            tx_blob: tx_json.to_string(),
            hash: format!("HASH{count}"),
            last_ledger_sequence: tx_json["LastLedgerSequence"].as_u64().map(|v| v as u32),
        })
    }
}

pub struct FakeSignerFactory;

impl SignerFactory for FakeSignerFactory {
    fn derive(&self, _credential: Credential) -> Result<Box<dyn TransactionSigner>, LedgerError> {
        Ok(Box::new(FakeSigner { count: Mutex::new(0) }))
    }
}

/// A registry wired to `ledger`, an in-memory audit log and a notifier.
pub struct Harness {
    pub ledger: FakeLedger,
    pub registry: Arc<BotRegistry>,
    pub audit: Arc<SqliteAuditLog>,
    pub notifier: Notifier,
}

impl Harness {
    pub async fn new(ledger: FakeLedger) -> Self {
        let audit = Arc::new(SqliteAuditLog::connect("sqlite::memory:").await.unwrap());
        let notifier = Notifier::new();
        let ctx = EngineContext {
            connector: Arc::new(ledger.clone()),
            signer_factory: Arc::new(FakeSignerFactory),
            audit: audit.clone(),
            notifier: notifier.clone(),
            settings: EngineConfig::default(),
            default_endpoints: vec![ENDPOINT.to_string()],
        };
        Self {
            ledger,
            registry: Arc::new(BotRegistry::new(Arc::new(ctx))),
            audit,
            notifier,
        }
    }
}

pub fn start_request(user_id: &str, percentage: u32) -> StartRequest {
    serde_json::from_value(json!({
        "userId": user_id,
        "leaderAddress": LEADER,
        "copyPercentage": percentage,
        "secret": "sEdFakeSecretSeed",
    }))
    .unwrap()
}

/// Poll `cond` until it holds, failing the test after two seconds.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}
