//! Error taxonomy for the grade ledger.
//!
//! Edit rejections are reported to the caller. Remote failures only move the
//! sync status, except for lock writes which are reported directly. Cache
//! failures never leave the cache module.

use serde_json::json;
use thiserror::Error;

use crate::calc::GradeField;
use crate::keys::LockKey;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field} must be between 0 and {max}, got {value}")]
pub struct ValidationError {
    pub field: GradeField,
    pub value: i64,
    pub max: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("period is locked: {0}")]
    LockedPeriod(LockKey),

    #[error("permission denied: {0}")]
    PermissionDenied(&'static str),
}

impl EditError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::LockedPeriod(_) => "locked_period",
            Self::PermissionDenied(_) => "permission_denied",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Validation(v) => Some(json!({
                "field": v.field,
                "value": v.value,
                "max": v.max,
            })),
            Self::LockedPeriod(k) => Some(json!({
                "classId": k.class_id,
                "subjectName": k.subject_name,
                "period": k.period,
            })),
            Self::PermissionDenied(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote store is unreachable while offline")]
    Offline,

    #[error("remote write to {collection}/{id} failed: {message}")]
    Write {
        collection: String,
        id: String,
        message: String,
    },

    #[error("remote fetch of {collection} failed: {message}")]
    Fetch { collection: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("permission denied: only administrators may change locks")]
    PermissionDenied,

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl LockError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission_denied",
            Self::Remote(_) => "remote_failed",
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache storage failed: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("cache payload is not valid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cache payload is corrupt: {0}")]
    Corrupt(String),
}
