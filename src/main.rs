//! MIRROR: leader/follower copy trading on the XRP Ledger.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the audit log, wires the engine and serves the HTTP control
//! surface until Ctrl+C, then stops every bot before exiting.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use ledger_mirror::api::{self, routes::ApiState};
use ledger_mirror::config::AppConfig;
use ledger_mirror::engine::{BotRegistry, EngineContext};
use ledger_mirror::ledger::{LocalSignerFactory, WsConnector};
use ledger_mirror::notify::Notifier;
use ledger_mirror::storage::SqliteAuditLog;

const BANNER: &str = r#"
 __  __ ___ ____  ____   ___  ____
|  \/  |_ _|  _ \|  _ \ / _ \|  _ \
| |\/| || || |_) | |_) | | | | |_) |
| |  | || ||  _ <|  _ <| |_| |  _ <
|_|  |_|___|_| \_\_| \_\\___/|_| \_\

  Leader-follower replication engine
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    init_logging();
    println!("{BANNER}");

    let config_path = std::env::var("MIRROR_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let cfg = AppConfig::load_or_default(&config_path)?;
    info!(
        endpoints = ?cfg.ledger.endpoints,
        expiry_buffer_ledgers = cfg.engine.expiry_buffer_ledgers,
        submit_timeout_secs = cfg.engine.submit_timeout_secs,
        "MIRROR starting up"
    );

    let audit = SqliteAuditLog::connect(&cfg.storage.database_url).await?;

    let ctx = EngineContext {
        connector: Arc::new(WsConnector::new(cfg.ws_options())),
        signer_factory: Arc::new(LocalSignerFactory),
        audit: Arc::new(audit),
        notifier: Notifier::new(),
        settings: cfg.engine.clone(),
        default_endpoints: cfg.ledger.endpoints.clone(),
    };
    let registry = Arc::new(BotRegistry::new(Arc::new(ctx)));

    let app = api::build_router(Arc::new(ApiState {
        registry: registry.clone(),
    }));
    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", cfg.server.host, cfg.server.port))?;

    api::serve(app, addr, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received.");
    })
    .await?;

    registry.stop_all().await;
    info!("MIRROR shut down cleanly.");
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ledger_mirror=info"));

    if std::env::var("MIRROR_LOG_JSON").is_ok() {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
