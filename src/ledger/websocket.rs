//! JSON-RPC over WebSocket.
//!
//! One socket per session. A writer task drains an outgoing queue into
//! the sink; a reader task routes replies to their waiting request by
//! `id` and forwards `transaction` stream messages to the subscription
//! feed. When the socket closes, pending requests fail with
//! `Disconnected` and the feed ends.
//!
//! The reader never waits on the feed. A notification arriving while the
//! feed is full is dropped, logged and counted on the feed.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::{Connector, LeaderFeed, LedgerClient, LedgerError, Session};
use crate::types::LeaderEvent;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, LedgerError>>>>>;
type FeedSlot = Arc<Mutex<Option<FeedSender>>>;

/// Sending half of the active subscription.
struct FeedSender {
    tx: mpsc::Sender<LeaderEvent>,
    dropped: Arc<AtomicU64>,
}

/// Tunables shared by every session a connector opens.
#[derive(Debug, Clone, Copy)]
pub struct WsOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub feed_capacity: usize,
}

impl Default for WsOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            feed_capacity: 256,
        }
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct WsConnector {
    options: WsOptions,
}

impl WsConnector {
    pub fn new(options: WsOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &str) -> Result<Session, LedgerError> {
        let client = WsLedgerClient::connect(endpoint, self.options).await?;
        Ok(Arc::new(client))
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct WsLedgerClient {
    endpoint: String,
    options: WsOptions,
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Pending,
    feed: FeedSlot,
    next_id: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WsLedgerClient {
    pub async fn connect(endpoint: &str, options: WsOptions) -> Result<Self, LedgerError> {
        let (ws, _) = tokio::time::timeout(options.connect_timeout, connect_async(endpoint))
            .await
            .map_err(|_| LedgerError::Timeout(options.connect_timeout))??;
        let (mut sink, mut stream) = ws.split();

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let feed: FeedSlot = Arc::new(Mutex::new(None));

        let writer_endpoint = endpoint.to_string();
        let writer = tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = sink.send(msg).await {
                    warn!(endpoint = %writer_endpoint, error = %e, "WebSocket write failed");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let reader_endpoint = endpoint.to_string();
        let reader_pending = pending.clone();
        let reader_feed = feed.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => route(&text, &reader_pending, &reader_feed),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(endpoint = %reader_endpoint, error = %e, "WebSocket read failed");
                        break;
                    }
                }
            }

            info!(endpoint = %reader_endpoint, "Ledger session closed");
            fail_pending(&reader_pending);
            if let Ok(mut slot) = reader_feed.lock() {
                slot.take();
            }
        });

        debug!(endpoint, "WebSocket session established");

        Ok(Self {
            endpoint: endpoint.to_string(),
            options,
            outgoing,
            pending,
            feed,
            next_id: AtomicU64::new(1),
            tasks: Mutex::new(vec![writer, reader]),
        })
    }

    fn forget(&self, id: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&id);
        }
    }
}

/// Dispatch one inbound text frame.
fn route(text: &str, pending: &Pending, feed: &FeedSlot) {
    let msg: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Discarding non-JSON frame");
            return;
        }
    };

    if let Some(id) = msg.get("id").and_then(Value::as_u64) {
        let waiter = pending.lock().ok().and_then(|mut p| p.remove(&id));
        if let Some(waiter) = waiter {
            let _ = waiter.send(into_result(msg));
        }
        return;
    }

    if msg.get("type").and_then(Value::as_str) != Some("transaction") {
        return;
    }
    let Some(event) = LeaderEvent::from_stream(&msg) else {
        warn!("Discarding malformed transaction notification");
        return;
    };

    let guard = match feed.lock() {
        Ok(g) => g,
        Err(_) => return,
    };
    let Some(feed) = guard.as_ref() else {
        return;
    };
    // The consumer may itself be waiting on a reply this reader has to route.
    match feed.tx.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => {
            let dropped = feed.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            error!(
                account = %event.account,
                hash = event.hash.as_deref().unwrap_or("-"),
                dropped,
                "Leader feed full, dropping notification"
            );
        }
        Err(TrySendError::Closed(_)) => debug!("Leader feed closed, dropping notification"),
    }
}

fn into_result(msg: Value) -> Result<Value, LedgerError> {
    if msg.get("status").and_then(Value::as_str) == Some("error") {
        return Err(LedgerError::Rpc {
            code: msg["error"].as_str().unwrap_or("unknown").to_string(),
            message: msg["error_message"]
                .as_str()
                .or_else(|| msg["error_exception"].as_str())
                .unwrap_or_default()
                .to_string(),
        });
    }
    Ok(msg.get("result").cloned().unwrap_or(Value::Null))
}

fn fail_pending(pending: &Pending) {
    if let Ok(mut p) = pending.lock() {
        for (_, waiter) in p.drain() {
            let _ = waiter.send(Err(LedgerError::Disconnected));
        }
    }
}

#[async_trait]
impl LedgerClient for WsLedgerClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn request(&self, command: &str, params: Value) -> Result<Value, LedgerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut body = match params {
            Value::Object(map) => Value::Object(map),
            _ => json!({}),
        };
        body["id"] = json!(id);
        body["command"] = Value::String(command.to_string());

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| LedgerError::Disconnected)?
            .insert(id, tx);

        if self.outgoing.send(Message::Text(body.to_string())).is_err() {
            self.forget(id);
            return Err(LedgerError::Disconnected);
        }

        match tokio::time::timeout(self.options.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(LedgerError::Disconnected),
            Err(_) => {
                self.forget(id);
                Err(LedgerError::Timeout(self.options.request_timeout))
            }
        }
    }

    async fn subscribe_account(&self, account: &str) -> Result<LeaderFeed, LedgerError> {
        let (tx, rx) = mpsc::channel(self.options.feed_capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        {
            let mut slot = self.feed.lock().map_err(|_| LedgerError::Disconnected)?;
            if slot.is_some() {
                return Err(LedgerError::AlreadySubscribed);
            }
            *slot = Some(FeedSender {
                tx,
                dropped: dropped.clone(),
            });
        }

        if let Err(e) = self.request("subscribe", json!({ "accounts": [account] })).await {
            if let Ok(mut slot) = self.feed.lock() {
                slot.take();
            }
            return Err(e);
        }

        info!(endpoint = %self.endpoint, account, "Subscribed to account stream");
        Ok(LeaderFeed::with_drop_counter(rx, dropped))
    }

    async fn unsubscribe_account(&self, account: &str) -> Result<(), LedgerError> {
        // Detach the feed first so nothing more is delivered, whatever the
        // node answers.
        if let Ok(mut slot) = self.feed.lock() {
            slot.take();
        }
        self.request("unsubscribe", json!({ "accounts": [account] }))
            .await
            .map(|_| ())
    }

    async fn disconnect(&self) {
        if let Ok(mut slot) = self.feed.lock() {
            slot.take();
        }
        let _ = self.outgoing.send(Message::Close(None));
        // Give the writer a moment to flush the close frame.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let tasks: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut t) => t.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for task in tasks {
            task.abort();
        }
        fail_pending(&self.pending);
        debug!(endpoint = %self.endpoint, "Session disconnected");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
