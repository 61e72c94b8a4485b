//! One follower bot: a session, a subscription to the leader, and a
//! single-consumer loop over the leader's events.
//!
//! Events are handled one at a time in arrival order. The trust-line
//! check and the submission that follows it never interleave with
//! another event for the same bot.

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::classifier::{classify, Classification};
use super::guard::DuplicateGuard;
use super::pipeline::SubmissionPipeline;
use super::transformer::PayloadTransformer;
use super::EngineContext;
use crate::ledger::{ConnectionManager, LeaderFeed, Session};
use crate::types::{BotConfig, BotState, LeaderEvent, MirrorError, ReplicaTransaction};

pub struct ActiveBot {
    user_id: String,
    leader_address: String,
    session: Session,
    feed: LeaderFeed,
    transformer: PayloadTransformer,
    pipeline: SubmissionPipeline,
    status: watch::Sender<BotState>,
    shutdown: watch::Receiver<bool>,
}

impl ActiveBot {
    /// Derive the signer, connect and subscribe to the leader.
    ///
    /// The credential is consumed by the derivation; only the key pair
    /// survives. A bad secret fails before any endpoint is contacted.
    pub async fn connect(
        config: BotConfig,
        ctx: &EngineContext,
        status: watch::Sender<BotState>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, MirrorError> {
        let BotConfig {
            user_id,
            leader_address,
            copy_percentage,
            credential,
            endpoints,
        } = config;
        status.send_replace(BotState::Connecting);

        let signer = ctx
            .signer_factory
            .derive(credential)
            .map_err(|e| MirrorError::InvalidConfig(format!("secret: {e}")))?;

        let session = ConnectionManager::new(ctx.connector.clone())
            .connect(&endpoints)
            .await
            .map_err(MirrorError::Connection)?;

        let feed = match session.subscribe_account(&leader_address).await {
            Ok(feed) => feed,
            Err(source) => {
                session.disconnect().await;
                return Err(MirrorError::Startup { stage: "subscribe", source });
            }
        };

        let transformer = PayloadTransformer::new(copy_percentage, signer.address(), &ctx.settings);
        let pipeline = SubmissionPipeline::new(
            session.clone(),
            signer,
            ctx.audit.clone(),
            ctx.notifier.clone(),
            &ctx.settings,
        );

        info!(
            user_id = %user_id,
            leader = %leader_address,
            follower = %pipeline.follower_address(),
            copy_percentage = %copy_percentage,
            endpoint = session.endpoint(),
            "Subscribed to leader"
        );
        status.send_replace(BotState::Subscribed);

        Ok(Self {
            user_id,
            leader_address,
            session,
            feed,
            transformer,
            pipeline,
            status,
            shutdown,
        })
    }

    /// Process leader events until shutdown is signalled, then tear down.
    pub async fn run(mut self) {
        let mut dropped_seen = 0;
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;

                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }

                event = self.feed.recv() => match event {
                    Some(event) => {
                        let dropped = self.feed.dropped();
                        if dropped > dropped_seen {
                            warn!(
                                user_id = %self.user_id,
                                leader = %self.leader_address,
                                missed = dropped - dropped_seen,
                                dropped_total = dropped,
                                "Leader events were dropped while the feed was full"
                            );
                            dropped_seen = dropped;
                        }
                        self.handle(event).await;
                    }
                    None => {
                        // No reconnect: the bot stays registered but inert.
                        warn!(
                            user_id = %self.user_id,
                            leader = %self.leader_address,
                            "Leader feed ended, bot idle until stopped"
                        );
                        self.wait_for_shutdown().await;
                        break;
                    }
                },
            }
        }

        self.close().await;
    }

    async fn wait_for_shutdown(&mut self) {
        while !*self.shutdown.borrow() {
            if self.shutdown.changed().await.is_err() {
                return;
            }
        }
    }

    async fn handle(&self, event: LeaderEvent) {
        let classification = classify(&event, &self.leader_address);
        if let Classification::Ignore(reason) = &classification {
            debug!(
                user_id = %self.user_id,
                account = %event.account,
                transaction_type = %event.transaction_type,
                reason = ?reason,
                "Event ignored"
            );
            return;
        }

        self.status.send_replace(BotState::Processing);
        self.replicate(classification, &event).await;
        self.status.send_replace(BotState::Subscribed);
    }

    async fn replicate(&self, classification: Classification, event: &LeaderEvent) {
        let replica = match self.transformer.transform(classification) {
            Ok(Some(replica)) => replica,
            Ok(None) => return,
            Err(e) => {
                warn!(
                    user_id = %self.user_id,
                    leader_hash = ?event.hash,
                    error = %e,
                    "No replica built for leader transaction"
                );
                return;
            }
        };

        if let ReplicaTransaction::TrustSet { limit_amount, .. } = &replica {
            let decision =
                DuplicateGuard::check(&self.session, self.pipeline.follower_address(), limit_amount)
                    .await;
            if !decision.should_submit() {
                debug!(user_id = %self.user_id, decision = ?decision, "TrustSet replica skipped");
                return;
            }
        }

        debug!(
            user_id = %self.user_id,
            kind = %replica.kind(),
            leader_hash = ?event.hash,
            "Replicating leader transaction"
        );
        self.pipeline.submit(&self.user_id, &replica, &self.shutdown).await;
    }

    /// Unsubscribe, drop queued events and close the session. `Stopped`
    /// is published last.
    pub async fn close(mut self) {
        self.feed.close();
        if let Err(e) = self.session.unsubscribe_account(&self.leader_address).await {
            warn!(user_id = %self.user_id, error = %e, "Unsubscribe failed, closing anyway");
        }
        self.session.disconnect().await;
        self.status.send_replace(BotState::Stopped);
        info!(user_id = %self.user_id, leader = %self.leader_address, "Bot stopped");
    }
}
