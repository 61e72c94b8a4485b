//! Bot registry.
//!
//! At most one active bot per user. The map lock is only held to reserve,
//! claim or remove an entry; connecting happens outside it, so a slow
//! endpoint for one user never blocks start/stop for another.
//!
//! Each reservation carries a generation id. A start whose reservation
//! was stopped or replaced while it was connecting tears its session down
//! and reports `Cancelled` instead of spawning.
//!
//! A stopping bot keeps its entry until its task has joined, so a new
//! start for the same user is refused with `AlreadyRunning` until the old
//! bot's in-flight submission has finished and its session is closed.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use super::bot::ActiveBot;
use super::EngineContext;
use crate::types::{BotConfig, BotState, ControlResponse, MirrorError, StartRequest};

struct BotEntry {
    generation: Uuid,
    leader_address: String,
    copy_percentage: Decimal,
    started_at: DateTime<Utc>,
    status: watch::Receiver<BotState>,
    shutdown: watch::Sender<bool>,
    /// `None` while the bot is still connecting.
    task: Option<JoinHandle<()>>,
}

/// Snapshot of one registered bot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BotSummary {
    pub user_id: String,
    pub leader_address: String,
    pub copy_percentage: Decimal,
    pub state: BotState,
    pub started_at: DateTime<Utc>,
}

pub struct BotRegistry {
    ctx: Arc<EngineContext>,
    bots: Mutex<HashMap<String, BotEntry>>,
}

impl BotRegistry {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            bots: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Validate, connect and launch a bot for the requesting user.
    pub async fn start(&self, request: StartRequest) -> Result<ControlResponse, MirrorError> {
        let config = BotConfig::from_request(request, &self.ctx.default_endpoints)?;
        let user_id = config.user_id.clone();
        let audit_record = config.audit_record();
        let generation = Uuid::new_v4();

        let (status_tx, status_rx) = watch::channel(BotState::Idle);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        {
            let mut bots = self.bots.lock().await;
            if bots.contains_key(&user_id) {
                return Err(MirrorError::AlreadyRunning(user_id));
            }
            bots.insert(
                user_id.clone(),
                BotEntry {
                    generation,
                    leader_address: config.leader_address.clone(),
                    copy_percentage: config.copy_percentage,
                    started_at: Utc::now(),
                    status: status_rx,
                    shutdown: shutdown_tx,
                    task: None,
                },
            );
        }

        let bot = match ActiveBot::connect(config, &self.ctx, status_tx, shutdown_rx).await {
            Ok(bot) => bot,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Bot failed to start");
                self.release(&user_id, generation).await;
                return Err(e);
            }
        };

        let orphaned = {
            let mut bots = self.bots.lock().await;
            match bots.get_mut(&user_id) {
                Some(entry) if entry.generation == generation && !*entry.shutdown.borrow() => {
                    entry.task = Some(tokio::spawn(bot.run()));
                    None
                }
                _ => Some(bot),
            }
        };
        if let Some(bot) = orphaned {
            info!(user_id = %user_id, "Stop requested while connecting");
            bot.close().await;
            self.release(&user_id, generation).await;
            return Err(MirrorError::Cancelled(user_id));
        }

        if let Err(e) = self.ctx.audit.record_bot_config(&audit_record).await {
            warn!(user_id = %user_id, error = %e, "Failed to record bot configuration");
        }
        info!(
            user_id = %user_id,
            leader = %audit_record.leader_address,
            copy_percentage = %audit_record.copy_percentage,
            "Copy trading started"
        );
        Ok(ControlResponse::started(&user_id))
    }

    /// Stop the user's bot and wait until it has fully shut down.
    ///
    /// Returns the not-found response (not an error) when nothing is
    /// registered for `user_id`.
    pub async fn stop(&self, user_id: &str) -> ControlResponse {
        let (generation, task, mut status) = {
            let mut bots = self.bots.lock().await;
            let Some(entry) = bots.get_mut(user_id) else {
                return ControlResponse::not_found(user_id);
            };
            entry.shutdown.send_replace(true);
            (entry.generation, entry.task.take(), entry.status.clone())
        };

        match task {
            Some(task) => {
                if let Err(e) = task.await {
                    warn!(user_id, error = %e, "Bot task ended abnormally");
                }
            }
            // Still connecting, or another stop owns the task. Either way
            // the bot publishes `Stopped` or drops its status sender.
            None => {
                let _ = status.wait_for(|s| *s == BotState::Stopped).await;
            }
        }
        self.release(user_id, generation).await;

        info!(user_id, "Copy trading stopped");
        ControlResponse::stopped(user_id)
    }

    /// Stop every registered bot.
    pub async fn stop_all(&self) {
        let users: Vec<String> = self.bots.lock().await.keys().cloned().collect();
        if users.is_empty() {
            return;
        }
        info!(count = users.len(), "Stopping all bots");
        for user_id in users {
            self.stop(&user_id).await;
        }
    }

    pub async fn list(&self) -> Vec<BotSummary> {
        let bots = self.bots.lock().await;
        let mut out: Vec<BotSummary> = bots
            .iter()
            .map(|(user_id, entry)| BotSummary {
                user_id: user_id.clone(),
                leader_address: entry.leader_address.clone(),
                copy_percentage: entry.copy_percentage,
                state: *entry.status.borrow(),
                started_at: entry.started_at,
            })
            .collect();
        out.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        out
    }

    pub async fn state(&self, user_id: &str) -> Option<BotState> {
        self.bots
            .lock()
            .await
            .get(user_id)
            .map(|entry| *entry.status.borrow())
    }

    /// Drop a reservation, but only if it is still ours.
    async fn release(&self, user_id: &str, generation: Uuid) {
        let mut bots = self.bots.lock().await;
        if bots.get(user_id).is_some_and(|e| e.generation == generation) {
            bots.remove(user_id);
        }
    }
}
