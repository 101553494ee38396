use serde::{Deserialize, Serialize};
use std::fmt;

const RECORD_ID_SEPARATOR: char = '-';
const LOCK_ID_SEPARATOR: char = '_';

/// Identity of a StudentGradeRecord.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordKey {
    pub student_id: String,
    pub subject_name: String,
}

impl RecordKey {
    pub fn new(student_id: impl Into<String>, subject_name: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            subject_name: subject_name.into(),
        }
    }

    pub fn document_id(&self) -> String {
        compose_id(&[&self.student_id, &self.subject_name], RECORD_ID_SEPARATOR)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.student_id, self.subject_name)
    }
}

/// Identity of a LockState.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockKey {
    pub class_id: String,
    pub subject_name: String,
    pub period: String,
}

impl LockKey {
    pub fn new(
        class_id: impl Into<String>,
        subject_name: impl Into<String>,
        period: impl Into<String>,
    ) -> Self {
        Self {
            class_id: class_id.into(),
            subject_name: subject_name.into(),
            period: period.into(),
        }
    }

    pub fn document_id(&self) -> String {
        compose_id(
            &[&self.class_id, &self.subject_name, &self.period],
            LOCK_ID_SEPARATOR,
        )
    }

    pub fn from_document_id(id: &str) -> Option<Self> {
        let parts: Vec<&str> = id.split(LOCK_ID_SEPARATOR).collect();
        let [class_id, subject_name, period] = parts.as_slice() else {
            return None;
        };
        Some(Self {
            class_id: unescape_component(class_id)?,
            subject_name: unescape_component(subject_name)?,
            period: unescape_component(period)?,
        })
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.class_id, self.subject_name, self.period)
    }
}

/// Addresses one GradeEntry: the record, the period inside it, and the class
/// whose lock governs it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryRef {
    pub class_id: String,
    pub student_id: String,
    pub subject_name: String,
    pub period: String,
}

impl EntryRef {
    pub fn record_key(&self) -> RecordKey {
        RecordKey::new(self.student_id.clone(), self.subject_name.clone())
    }

    pub fn lock_key(&self) -> LockKey {
        LockKey::new(
            self.class_id.clone(),
            self.subject_name.clone(),
            self.period.clone(),
        )
    }
}

fn compose_id(parts: &[&str], sep: char) -> String {
    parts
        .iter()
        .map(|p| escape_component(p, sep))
        .collect::<Vec<_>>()
        .join(&sep.to_string())
}

/// Escapes `%` and every id separator so joined parts cannot collide.
fn escape_component(part: &str, sep: char) -> String {
    let mut out = String::with_capacity(part.len());
    for c in part.chars() {
        match c {
            '%' => out.push_str("%25"),
            '-' if sep == RECORD_ID_SEPARATOR => out.push_str("%2D"),
            '_' if sep == LOCK_ID_SEPARATOR => out.push_str("%5F"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape_component(part: &str) -> Option<String> {
    let mut out = String::with_capacity(part.len());
    let mut rest = part;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3)?;
        match code {
            "25" => out.push('%'),
            "2D" => out.push('-'),
            "5F" => out.push('_'),
            _ => return None,
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Some(out)
}
