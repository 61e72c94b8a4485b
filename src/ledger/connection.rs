//! Endpoint selection.
//!
//! A single ordered sweep over the configured endpoints: each is tried
//! once, failures are logged and skipped, the first live session wins.
//! No second pass and no backoff. Only used at bot start; a session that
//! drops later is not reconnected.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use super::{LedgerError, Session};

/// Opens a session against one endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Session, LedgerError>;
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    /// Return a session on the first reachable endpoint, in order.
    pub async fn connect(&self, endpoints: &[String]) -> Result<Session, LedgerError> {
        let mut last_error = String::from("no endpoints configured");

        for endpoint in endpoints {
            match self.connector.connect(endpoint).await {
                Ok(session) => {
                    info!(endpoint = %endpoint, "Connected to ledger");
                    return Ok(session);
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "Endpoint unreachable, trying next");
                    last_error = e.to_string();
                }
            }
        }

        Err(LedgerError::AllEndpointsUnreachable {
            attempted: endpoints.len(),
            last_error,
        })
    }
}
