//! Replication engine: leader event → replica → validated submission.

pub mod bot;
pub mod classifier;
pub mod guard;
pub mod pipeline;
pub mod registry;
pub mod transformer;

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::ledger::{ConnectionManager, Connector, SignerFactory};
use crate::notify::Notifier;
use crate::storage::AuditLog;

pub use bot::ActiveBot;
pub use classifier::{classify, Classification, IgnoreReason};
pub use guard::{DuplicateGuard, GuardDecision};
pub use pipeline::{SubmissionPipeline, SubmissionResult};
pub use registry::{BotRegistry, BotSummary};
pub use transformer::{PayloadTransformer, TransformError};

/// Collaborators shared by every bot.
pub struct EngineContext {
    pub connector: Arc<dyn Connector>,
    pub signer_factory: Arc<dyn SignerFactory>,
    pub audit: Arc<dyn AuditLog>,
    pub notifier: Notifier,
    pub settings: EngineConfig,
    /// Used when a start request names no endpoints.
    pub default_endpoints: Vec<String>,
}

impl EngineContext {
    pub fn connection_manager(&self) -> ConnectionManager {
        ConnectionManager::new(self.connector.clone())
    }
}
