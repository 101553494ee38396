use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::calc::GradeEntry;
use crate::keys::{EntryRef, LockKey, RecordKey};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentGradeRecord {
    pub student_id: String,
    #[serde(default)]
    pub class_id: String,
    pub subject_name: String,
    /// Period label (e.g. a month name) to that period's entry.
    #[serde(default)]
    pub months: BTreeMap<String, GradeEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl StudentGradeRecord {
    pub fn new(at: &EntryRef) -> Self {
        Self {
            student_id: at.student_id.clone(),
            class_id: at.class_id.clone(),
            subject_name: at.subject_name.clone(),
            months: BTreeMap::new(),
            updated_at: None,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.student_id.clone(), self.subject_name.clone())
    }

    pub fn to_document(&self) -> serde_json::Result<serde_json::Value> {
        let mut doc = serde_json::to_value(self)?;
        if let Some(obj) = doc.as_object_mut() {
            obj.insert(
                "id".to_string(),
                serde_json::Value::String(self.key().document_id()),
            );
        }
        Ok(doc)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockState {
    pub id: String,
    #[serde(flatten)]
    pub key: LockKey,
    pub is_locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// The acting user, as resolved by the host's auth layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub may_override_total: bool,
}

impl Actor {
    /// Administrators may always write totals directly.
    pub fn can_override_total(&self) -> bool {
        self.is_admin || self.may_override_total
    }
}
