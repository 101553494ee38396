use serde_json::{json, Value};

use crate::calc::{self, GradeField, StudentFilter};
use crate::error::{EditError, LockError, RemoteError};
use crate::ipc::error::err;
use crate::ipc::types::AppState;
use crate::keys::{EntryRef, LockKey, RecordKey};
use crate::ledger::GradeLedger;
use crate::model::Actor;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<EditError> for HandlerErr {
    fn from(e: EditError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
            details: e.details(),
        }
    }
}

impl From<LockError> for HandlerErr {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Remote(r) => r.into(),
            other => Self::new(other.code(), other.to_string()),
        }
    }
}

impl From<RemoteError> for HandlerErr {
    fn from(e: RemoteError) -> Self {
        let code = match &e {
            RemoteError::Offline => "offline",
            _ => "remote_failed",
        };
        Self::new(code, e.to_string())
    }
}

pub fn ledger_mut(state: &mut AppState) -> Result<&mut GradeLedger, HandlerErr> {
    state
        .ledger
        .as_mut()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing params.{key}")))
}

pub fn required_bool(params: &Value, key: &str) -> Result<bool, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::bad_params(format!("params.{key} must be a boolean")))
}

/// Missing actor means an anonymous user without any capability.
pub fn actor(params: &Value) -> Result<Actor, HandlerErr> {
    match params.get("actor") {
        None | Some(Value::Null) => Ok(Actor::default()),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| HandlerErr::bad_params(format!("invalid params.actor: {e}"))),
    }
}

pub fn entry_ref(params: &Value) -> Result<EntryRef, HandlerErr> {
    Ok(EntryRef {
        class_id: required_str(params, "classId")?.to_string(),
        student_id: required_str(params, "studentId")?.to_string(),
        subject_name: required_str(params, "subjectName")?.to_string(),
        period: required_str(params, "period")?.to_string(),
    })
}

pub fn record_key(params: &Value) -> Result<RecordKey, HandlerErr> {
    Ok(RecordKey::new(
        required_str(params, "studentId")?,
        required_str(params, "subjectName")?,
    ))
}

pub fn lock_key(params: &Value) -> Result<LockKey, HandlerErr> {
    Ok(LockKey::new(
        required_str(params, "classId")?,
        required_str(params, "subjectName")?,
        required_str(params, "period")?,
    ))
}

pub fn grade_field(params: &Value) -> Result<GradeField, HandlerErr> {
    let raw = required_str(params, "field")?;
    GradeField::parse(raw).ok_or_else(|| HandlerErr {
        code: "bad_params",
        message: "field must be one of: homework, attendance, oral, written, total".to_string(),
        details: Some(json!({ "field": raw })),
    })
}

/// Accepts an integer, the text typed into a cell, or null to clear.
pub fn grade_value(params: &Value) -> Result<Option<i64>, HandlerErr> {
    match params.get("value") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(v) => Ok(Some(v)),
            None => Err(HandlerErr {
                code: "bad_params",
                message: "value must be a whole number".to_string(),
                details: Some(json!({ "value": n })),
            }),
        },
        Some(Value::String(s)) => calc::parse_input(s).map_err(|_| HandlerErr {
            code: "bad_params",
            message: "value must be a whole number".to_string(),
            details: Some(json!({ "value": s })),
        }),
        Some(other) => Err(HandlerErr {
            code: "bad_params",
            message: "value must be a number, a string or null".to_string(),
            details: Some(json!({ "value": other })),
        }),
    }
}

pub fn student_ids(params: &Value) -> Result<Vec<String>, HandlerErr> {
    let Some(arr) = params.get("studentIds").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("params.studentIds must be an array"));
    };
    arr.iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| HandlerErr::bad_params("studentIds must contain strings"))
        })
        .collect()
}

pub fn student_filter(params: &Value) -> Result<StudentFilter, HandlerErr> {
    match params.get("filter").and_then(|v| v.as_str()) {
        None => Ok(StudentFilter::All),
        Some(s) => StudentFilter::parse(s).ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "filter must be one of: ALL, COMPLETED, INCOMPLETE, NOT_RECORDED".to_string(),
            details: Some(json!({ "filter": s })),
        }),
    }
}

pub fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, HandlerErr> {
    serde_json::to_value(value).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_value_accepts_numbers_text_and_null() {
        assert_eq!(grade_value(&json!({ "value": 18 })).ok(), Some(Some(18)));
        assert_eq!(grade_value(&json!({ "value": " 7 " })).ok(), Some(Some(7)));
        assert_eq!(grade_value(&json!({ "value": "" })).ok(), Some(None));
        assert_eq!(grade_value(&json!({})).ok(), Some(None));
        assert!(grade_value(&json!({ "value": 1.5 })).is_err());
        assert!(grade_value(&json!({ "value": "abc" })).is_err());
        assert!(grade_value(&json!({ "value": [1] })).is_err());
    }

    #[test]
    fn actor_defaults_to_no_capabilities() {
        assert_eq!(actor(&json!({})).ok(), Some(Actor::default()));
        assert!(actor(&json!({ "actor": "admin" })).is_err());
        let a = actor(&json!({ "actor": { "userId": "t", "mayOverrideTotal": true } }))
            .ok()
            .expect("actor");
        assert!(a.can_override_total());
        assert!(!a.is_admin);
    }
}
