use serde_json::json;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::error::{LockError, RemoteError};
use crate::keys::LockKey;
use crate::model::{Actor, LockState};
use crate::remote::{Document, RemoteStore};

/// Client-side copy of the per (class, subject, period) lock flags.
///
/// The copy can lag the remote store by one refresh; writes go remote first
/// and only then update the copy.
#[derive(Debug, Default)]
pub struct LockRegistry {
    collection: String,
    locks: BTreeMap<LockKey, bool>,
}

impl LockRegistry {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            locks: BTreeMap::new(),
        }
    }

    pub fn set_collection(&mut self, collection: impl Into<String>) {
        self.collection = collection.into();
    }

    pub fn is_locked(&self, key: &LockKey) -> bool {
        self.locks.get(key).copied().unwrap_or(false)
    }

    /// Unlocking deletes the lock document; absence reads as unlocked.
    pub fn set_locked(
        &mut self,
        remote: &mut dyn RemoteStore,
        actor: &Actor,
        key: &LockKey,
        locked: bool,
    ) -> Result<bool, LockError> {
        if !actor.is_admin {
            return Err(LockError::PermissionDenied);
        }
        let id = key.document_id();
        if locked {
            let doc = json!({
                "id": id,
                "classId": key.class_id,
                "subjectName": key.subject_name,
                "period": key.period,
                "isLocked": true,
                "updatedAt": chrono::Utc::now().to_rfc3339(),
                "updatedBy": actor.user_id,
            });
            remote.upsert(&self.collection, &id, &doc)?;
            self.locks.insert(key.clone(), true);
        } else {
            remote.remove(&self.collection, &id)?;
            self.locks.remove(key);
        }
        info!(lock = %key, locked, by = %actor.user_id, "lock changed");
        Ok(locked)
    }

    pub fn toggle(
        &mut self,
        remote: &mut dyn RemoteStore,
        actor: &Actor,
        key: &LockKey,
    ) -> Result<bool, LockError> {
        let next = !self.is_locked(key);
        self.set_locked(remote, actor, key, next)
    }

    /// Replaces the cached copy with the remote collection. Returns the number
    /// of locked keys.
    pub fn refresh(&mut self, remote: &mut dyn RemoteStore) -> Result<usize, RemoteError> {
        let docs = remote.fetch_all(&self.collection)?;
        let mut next = BTreeMap::new();
        for doc in docs {
            match parse_lock_document(&doc) {
                Some((key, locked)) => {
                    if locked {
                        next.insert(key, true);
                    }
                }
                None => warn!(?doc, "ignoring malformed lock document"),
            }
        }
        self.locks = next;
        Ok(self.locks.len())
    }

    pub fn list(&self) -> Vec<LockState> {
        self.locks
            .iter()
            .map(|(key, locked)| LockState {
                id: key.document_id(),
                key: key.clone(),
                is_locked: *locked,
                updated_at: None,
            })
            .collect()
    }
}

/// Accepts documents carrying the key fields, and bare `{id, isLocked}`
/// documents whose id is a composed lock id.
fn parse_lock_document(doc: &Document) -> Option<(LockKey, bool)> {
    let locked = doc.get("isLocked").and_then(|v| v.as_bool()).unwrap_or(false);
    let field = |name: &str| doc.get(name).and_then(|v| v.as_str()).map(str::to_string);
    let key = match (field("classId"), field("subjectName"), field("period")) {
        (Some(c), Some(s), Some(p)) => LockKey::new(c, s, p),
        _ => LockKey::from_document_id(doc.get("id")?.as_str()?)?,
    };
    Some((key, locked))
}
