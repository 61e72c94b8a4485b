//! Notification sink.
//!
//! Best-effort fan-out of trade outcomes to connected observers over a
//! broadcast channel. Publishing with nobody listening is fine; slow
//! observers lag and skip, they never hold up a bot.

use tokio::sync::broadcast;
use tracing::debug;

use crate::types::TradeNotification;

const CHANNEL_CAPACITY: usize = 1000;

#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<TradeNotification>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, notification: TradeNotification) {
        match self.tx.send(notification) {
            Ok(observers) => debug!(observers, "Notification published"),
            Err(_) => debug!("No observers connected, notification dropped"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TradeNotification> {
        self.tx.subscribe()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
