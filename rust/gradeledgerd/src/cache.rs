//! Local cache: the durable on-device mirror of the ledger.
//!
//! The snapshot is stored under a single key as a versioned envelope carrying
//! the JSON payload and its SHA-256 digest. Anything that does not decode and
//! verify loads as an empty snapshot.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, warn};

use crate::db;
use crate::error::CacheError;
use crate::keys::RecordKey;
use crate::model::StudentGradeRecord;

const ENVELOPE_VERSION: u32 = 1;

pub trait KeyValueStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, CacheError>;
    fn set_item(&mut self, key: &str, value: &str) -> Result<(), CacheError>;
}

/// `kv_items` table of the workspace database.
pub struct SqliteKv {
    conn: Connection,
}

impl SqliteKv {
    pub fn open(workspace: &Path) -> anyhow::Result<Self> {
        Ok(Self {
            conn: db::open_db(workspace)?,
        })
    }
}

impl KeyValueStore for SqliteKv {
    fn get_item(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(db::kv_get(&self.conn, key)?)
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<(), CacheError> {
        Ok(db::kv_set(&self.conn, key, value)?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSnapshot {
    #[serde(default)]
    pub records: Vec<StudentGradeRecord>,
    /// Records whose latest value has not been acknowledged remotely.
    #[serde(default)]
    pub pending: Vec<RecordKey>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    sha256: String,
    payload: String,
}

pub struct LocalCache {
    store: Box<dyn KeyValueStore>,
    key: String,
}

impl LocalCache {
    pub fn new(store: Box<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn set_key(&mut self, key: impl Into<String>) {
        self.key = key.into();
    }

    pub fn load(&self) -> LedgerSnapshot {
        match self.try_load() {
            Ok(Some(snapshot)) => {
                debug!(
                    records = snapshot.records.len(),
                    pending = snapshot.pending.len(),
                    "loaded ledger cache"
                );
                snapshot
            }
            Ok(None) => LedgerSnapshot::default(),
            Err(e) => {
                warn!(error = %e, key = %self.key, "discarding unreadable ledger cache");
                LedgerSnapshot::default()
            }
        }
    }

    pub fn save(&mut self, snapshot: &LedgerSnapshot) {
        if let Err(e) = self.try_save(snapshot) {
            warn!(error = %e, key = %self.key, "ledger cache write failed");
        }
    }

    fn try_load(&self) -> Result<Option<LedgerSnapshot>, CacheError> {
        let Some(raw) = self.store.get_item(&self.key)? else {
            return Ok(None);
        };
        let envelope: Envelope = serde_json::from_str(&raw)?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(CacheError::Corrupt(format!(
                "unsupported envelope version {}",
                envelope.version
            )));
        }
        if digest(&envelope.payload) != envelope.sha256 {
            return Err(CacheError::Corrupt("checksum mismatch".to_string()));
        }
        Ok(Some(serde_json::from_str(&envelope.payload)?))
    }

    fn try_save(&mut self, snapshot: &LedgerSnapshot) -> Result<(), CacheError> {
        let payload = serde_json::to_string(snapshot)?;
        let envelope = Envelope {
            version: ENVELOPE_VERSION,
            sha256: digest(&payload),
            payload,
        };
        let raw = serde_json::to_string(&envelope)?;
        self.store.set_item(&self.key, &raw)
    }
}

fn digest(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}
