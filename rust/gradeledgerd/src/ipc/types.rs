use std::path::PathBuf;
use std::time::Instant;

use rusqlite::Connection;
use serde::Deserialize;
use tracing::warn;

use crate::connectivity::SubscriptionId;
use crate::ledger::GradeLedger;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub remote_root: Option<PathBuf>,
    pub db: Option<Connection>,
    pub ledger: Option<GradeLedger>,
    /// Logging listener registered on the open ledger.
    pub connectivity_log: Option<SubscriptionId>,
}

impl AppState {
    /// Nearest timer deadline of the open ledger, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.ledger.as_ref().and_then(|l| l.next_deadline())
    }

    /// Detaches the open ledger. Unsynced records stay in its cache.
    pub fn close_ledger(&mut self) {
        let Some(mut ledger) = self.ledger.take() else {
            return;
        };
        if let Some(id) = self.connectivity_log.take() {
            ledger.unsubscribe_connectivity(id);
        }
        let pending = ledger.status_report().pending;
        if pending > 0 {
            warn!(pending, "closing ledger with unsynced records; they stay cached");
        }
    }

    pub fn poll(&mut self) {
        if let Some(ledger) = self.ledger.as_mut() {
            ledger.poll();
        }
    }
}
