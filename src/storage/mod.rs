//! Persistence layer.
//!
//! Append-only audit history in SQLite: one `trade_logs` row per
//! submission attempt and one `copy_trading_strategies` row per start.
//! Nothing here is read back to resume bots after a restart, and the
//! follower's secret is never written.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};

use crate::types::{BotConfigRecord, TradeLogRecord};

/// Audit sink used by the engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Append one submission attempt.
    async fn record_trade(&self, record: &TradeLogRecord) -> Result<()>;

    /// Append the configuration of a started bot.
    async fn record_bot_config(&self, record: &BotConfigRecord) -> Result<()>;

    /// Most recent attempts first, optionally for one user.
    async fn recent_trades(&self, user_id: Option<String>, limit: u32) -> Result<Vec<TradeLogRecord>>;
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS trade_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        trade_type TEXT NOT NULL,
        result TEXT NOT NULL,
        tx_hash TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_trade_logs_user ON trade_logs (user_id, id)",
    "CREATE TABLE IF NOT EXISTS copy_trading_strategies (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        leader_address TEXT NOT NULL,
        copy_percentage TEXT NOT NULL,
        endpoints TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
];

/// SQLite-backed audit log.
#[derive(Debug, Clone)]
pub struct SqliteAuditLog {
    pool: SqlitePool,
}

impl SqliteAuditLog {
    /// Open (or create) the database and ensure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self> {
        // In-memory databases are per-connection; keep a single one.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .with_context(|| format!("Failed to open database {database_url}"))?;

        for stmt in SCHEMA {
            sqlx::query(*stmt)
                .execute(&pool)
                .await
                .context("Failed to apply schema")?;
        }

        info!(database_url, "Audit log ready");
        Ok(Self { pool })
    }

    /// The underlying pool, for ad-hoc queries.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl AuditLog for SqliteAuditLog {
    async fn record_trade(&self, record: &TradeLogRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO trade_logs (user_id, trade_type, result, tx_hash, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.user_id)
        .bind(&record.trade_type)
        .bind(record.result.to_string())
        .bind(&record.tx_hash)
        .bind(record.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to insert trade log")?;

        debug!(user_id = %record.user_id, trade_type = %record.trade_type, "Trade logged");
        Ok(())
    }

    async fn record_bot_config(&self, record: &BotConfigRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO copy_trading_strategies
                (user_id, leader_address, copy_percentage, endpoints, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.user_id)
        .bind(&record.leader_address)
        .bind(record.copy_percentage.to_string())
        .bind(serde_json::to_string(&record.endpoints)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to insert bot config")?;
        Ok(())
    }

    async fn recent_trades(&self, user_id: Option<String>, limit: u32) -> Result<Vec<TradeLogRecord>> {
        let rows = sqlx::query(
            "SELECT user_id, trade_type, result, tx_hash, created_at FROM trade_logs
             WHERE (?1 IS NULL OR user_id = ?1)
             ORDER BY id DESC LIMIT ?2",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query trade logs")?;

        rows.into_iter()
            .map(|row| -> Result<TradeLogRecord> {
                let result: String = row.try_get("result")?;
                let created_at: String = row.try_get("created_at")?;
                Ok(TradeLogRecord {
                    user_id: row.try_get("user_id")?,
                    trade_type: row.try_get("trade_type")?,
                    result: serde_json::from_str(&result)?,
                    tx_hash: row.try_get("tx_hash")?,
                    timestamp: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
