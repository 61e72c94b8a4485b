//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every field has a default, so a missing file or a partial one still
//! yields a runnable configuration. Secrets never live here: the
//! follower's credential arrives with each start request.

use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::ledger::websocket::WsOptions;

/// Well-known public endpoints, tried in this order.
pub const DEFAULT_ENDPOINTS: [&str; 3] = [
    "wss://s1.ripple.com",
    "wss://s2.ripple.com",
    "wss://xrplcluster.com",
];

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub ledger: LedgerConfig,
    pub engine: EngineConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LedgerConfig {
    /// Candidate endpoints used when a start request names none.
    pub endpoints: Vec<String>,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            endpoints: DEFAULT_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

/// Per-bot engine tunables.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// Ledgers added on top of the autofilled `LastLedgerSequence`.
    pub expiry_buffer_ledgers: u32,
    /// Hard cap on one submit-and-wait call.
    pub submit_timeout_secs: u64,
    /// Capacity of each bot's leader-event queue.
    pub feed_capacity: usize,
    /// Limit used for every replicated trust line.
    pub trust_line_limit: String,
    /// Also scale native (drops) amounts on replicated offers.
    pub scale_native_offer_amounts: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            expiry_buffer_ledgers: 20,
            submit_timeout_secs: 90,
            feed_capacity: 256,
            trust_line_limit: "1000000000".into(),
            scale_native_offer_amounts: false,
        }
    }
}

impl EngineConfig {
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub database_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://ledger_mirror.db?mode=rwc".into(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            warn!(path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.engine.feed_capacity >= 1, "engine.feed_capacity must be at least 1");
        ensure!(
            self.engine.submit_timeout_secs >= 1,
            "engine.submit_timeout_secs must be at least 1"
        );
        ensure!(
            self.ledger.request_timeout_secs >= 1 && self.ledger.connect_timeout_secs >= 1,
            "ledger timeouts must be at least 1 second"
        );
        Ok(())
    }

    /// Transport options for the websocket connector.
    pub fn ws_options(&self) -> WsOptions {
        WsOptions {
            connect_timeout: Duration::from_secs(self.ledger.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.ledger.request_timeout_secs),
            feed_capacity: self.engine.feed_capacity,
        }
    }
}
