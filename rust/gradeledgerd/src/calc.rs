use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;

use crate::error::ValidationError;

pub const HOMEWORK_MAX: i64 = 20;
pub const ATTENDANCE_MAX: i64 = 20;
pub const ORAL_MAX: i64 = 30;
pub const WRITTEN_MAX: i64 = 30;
pub const TOTAL_MAX: i64 = 100;

/// Divisor turning a 0-100 total into the scaled final mark.
pub const FINAL_SCORE_DIVISOR: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GradeField {
    Homework,
    Attendance,
    Oral,
    Written,
    Total,
}

impl GradeField {
    pub const RAW: [GradeField; 4] = [
        GradeField::Homework,
        GradeField::Attendance,
        GradeField::Oral,
        GradeField::Written,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "homework" => Some(Self::Homework),
            "attendance" => Some(Self::Attendance),
            "oral" => Some(Self::Oral),
            "written" => Some(Self::Written),
            "total" => Some(Self::Total),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Homework => "homework",
            Self::Attendance => "attendance",
            Self::Oral => "oral",
            Self::Written => "written",
            Self::Total => "total",
        }
    }

    pub fn max(self) -> i64 {
        match self {
            Self::Homework => HOMEWORK_MAX,
            Self::Attendance => ATTENDANCE_MAX,
            Self::Oral => ORAL_MAX,
            Self::Written => WRITTEN_MAX,
            Self::Total => TOTAL_MAX,
        }
    }

    pub fn is_raw(self) -> bool {
        !matches!(self, Self::Total)
    }
}

impl fmt::Display for GradeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One period's scores for one student in one subject.
///
/// Absent values serialize as `null` so a merge-style remote upsert clears
/// them instead of keeping a stale value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeEntry {
    #[serde(default)]
    pub homework: Option<i64>,
    #[serde(default)]
    pub attendance: Option<i64>,
    #[serde(default)]
    pub oral: Option<i64>,
    #[serde(default)]
    pub written: Option<i64>,
    #[serde(default)]
    pub total: Option<i64>,
    #[serde(default)]
    pub final_score: Option<i64>,
    #[serde(default)]
    pub manual_override: bool,
}

impl GradeEntry {
    pub fn value(&self, field: GradeField) -> Option<i64> {
        match field {
            GradeField::Homework => self.homework,
            GradeField::Attendance => self.attendance,
            GradeField::Oral => self.oral,
            GradeField::Written => self.written,
            GradeField::Total => self.total,
        }
    }

    fn slot_mut(&mut self, field: GradeField) -> &mut Option<i64> {
        match field {
            GradeField::Homework => &mut self.homework,
            GradeField::Attendance => &mut self.attendance,
            GradeField::Oral => &mut self.oral,
            GradeField::Written => &mut self.written,
            GradeField::Total => &mut self.total,
        }
    }

    pub fn raw_complete(&self) -> bool {
        GradeField::RAW.iter().all(|f| self.value(*f).is_some())
    }

    pub fn completion(&self) -> EntryCompletion {
        if self.total.is_none() {
            EntryCompletion::NotRecorded
        } else if self.manual_override || self.raw_complete() {
            EntryCompletion::Completed
        } else {
            EntryCompletion::Incomplete
        }
    }
}

pub fn final_score_for(total: i64) -> i64 {
    (total as f64 / FINAL_SCORE_DIVISOR).round() as i64
}

pub fn validate(field: GradeField, value: Option<i64>) -> Result<(), ValidationError> {
    match value {
        Some(v) if v < 0 || v > field.max() => Err(ValidationError {
            field,
            value: v,
            max: field.max(),
        }),
        _ => Ok(()),
    }
}

/// Recomputes the derived fields after `changed` was written into `entry`.
pub fn compute_derived(mut entry: GradeEntry, changed: GradeField) -> GradeEntry {
    if changed.is_raw() {
        if entry.manual_override {
            return entry;
        }
        entry.total = if entry.raw_complete() {
            Some(
                GradeField::RAW
                    .iter()
                    .filter_map(|f| entry.value(*f))
                    .sum(),
            )
        } else {
            None
        };
    }
    entry.final_score = entry.total.map(final_score_for);
    entry
}

/// Validates and writes one field, returning the recomputed entry. A direct
/// total write puts the entry under manual override.
pub fn apply_field(
    entry: &GradeEntry,
    field: GradeField,
    value: Option<i64>,
) -> Result<GradeEntry, ValidationError> {
    validate(field, value)?;
    let mut next = entry.clone();
    *next.slot_mut(field) = value;
    if field == GradeField::Total {
        next.manual_override = true;
    }
    Ok(compute_derived(next, field))
}

/// Leaves manual override: the total is rebuilt from the raw fields with
/// missing ones counted as zero.
pub fn recompute_from_raw(entry: &GradeEntry) -> GradeEntry {
    let mut next = entry.clone();
    let total: i64 = GradeField::RAW
        .iter()
        .map(|f| entry.value(*f).unwrap_or(0))
        .sum();
    next.total = Some(total);
    next.final_score = Some(final_score_for(total));
    next.manual_override = false;
    next
}

/// Blank input clears the field.
pub fn parse_input(text: &str) -> Result<Option<i64>, ParseIntError> {
    let t = text.trim();
    if t.is_empty() {
        return Ok(None);
    }
    t.parse::<i64>().map(Some)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryCompletion {
    NotRecorded,
    Incomplete,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeriodStatus {
    NotStarted,
    Partial,
    AllCompleted,
}

/// Completion of one (subject, period) across a roster. Each item is the
/// entry of one rostered student, if any.
pub fn period_status<'a, I>(entries: I) -> PeriodStatus
where
    I: IntoIterator<Item = Option<&'a GradeEntry>>,
{
    let mut roster: usize = 0;
    let mut with_total: usize = 0;
    let mut fully_completed: usize = 0;

    for e in entries {
        roster += 1;
        let Some(e) = e else {
            continue;
        };
        if e.total.is_some() {
            with_total += 1;
            if e.raw_complete() {
                fully_completed += 1;
            }
        }
    }

    if roster == 0 || with_total == 0 {
        PeriodStatus::NotStarted
    } else if fully_completed == roster {
        PeriodStatus::AllCompleted
    } else {
        PeriodStatus::Partial
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StudentFilter {
    All,
    Completed,
    Incomplete,
    NotRecorded,
}

impl StudentFilter {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ALL" => Some(Self::All),
            "COMPLETED" => Some(Self::Completed),
            "INCOMPLETE" => Some(Self::Incomplete),
            "NOT_RECORDED" => Some(Self::NotRecorded),
            _ => None,
        }
    }

    pub fn matches(self, entry: Option<&GradeEntry>) -> bool {
        let completion = entry
            .map(GradeEntry::completion)
            .unwrap_or(EntryCompletion::NotRecorded);
        match self {
            Self::All => true,
            Self::Completed => completion == EntryCompletion::Completed,
            Self::Incomplete => completion == EntryCompletion::Incomplete,
            Self::NotRecorded => completion == EntryCompletion::NotRecorded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(h: i64, a: i64, o: i64, w: i64) -> GradeEntry {
        let mut e = GradeEntry::default();
        for (f, v) in GradeField::RAW.iter().zip([h, a, o, w]) {
            e = apply_field(&e, *f, Some(v)).expect("in range");
        }
        e
    }

    #[test]
    fn complete_raw_fields_produce_total_and_final() {
        let e = filled(18, 20, 25, 25);
        assert_eq!(e.total, Some(88));
        assert_eq!(e.final_score, Some(18));
        assert!(!e.manual_override);
    }

    #[test]
    fn partial_raw_fields_leave_total_undefined() {
        let mut e = GradeEntry::default();
        e = apply_field(&e, GradeField::Homework, Some(10)).unwrap();
        e = apply_field(&e, GradeField::Oral, Some(20)).unwrap();
        assert_eq!(e.total, None);
        assert_eq!(e.final_score, None);

        let full = filled(10, 10, 10, 10);
        let cleared = apply_field(&full, GradeField::Written, None).unwrap();
        assert_eq!(cleared.total, None);
        assert_eq!(cleared.final_score, None);
        assert_eq!(cleared.homework, Some(10));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let e = filled(1, 2, 3, 4);
        let rejected = apply_field(&e, GradeField::Written, Some(31)).unwrap_err();
        assert_eq!(
            rejected,
            ValidationError {
                field: GradeField::Written,
                value: 31,
                max: 30
            }
        );
        assert!(apply_field(&e, GradeField::Homework, Some(21)).is_err());
        assert!(apply_field(&e, GradeField::Total, Some(101)).is_err());
        assert!(apply_field(&e, GradeField::Oral, Some(-1)).is_err());
        assert!(apply_field(&e, GradeField::Oral, Some(30)).is_ok());
    }

    #[test]
    fn direct_total_enters_override_and_keeps_raw_fields() {
        let e = filled(18, 20, 25, 25);
        let o = apply_field(&e, GradeField::Total, Some(95)).unwrap();
        assert!(o.manual_override);
        assert_eq!(o.total, Some(95));
        assert_eq!(o.final_score, Some(19));
        assert_eq!(o.homework, Some(18));

        // Raw edits under override do not touch the derived fields.
        let o2 = apply_field(&o, GradeField::Homework, Some(2)).unwrap();
        assert_eq!(o2.total, Some(95));
        assert_eq!(o2.final_score, Some(19));
        let o3 = apply_field(&o2, GradeField::Written, None).unwrap();
        assert_eq!(o3.total, Some(95));

        let cleared = apply_field(&o, GradeField::Total, None).unwrap();
        assert_eq!(cleared.total, None);
        assert_eq!(cleared.final_score, None);
    }

    #[test]
    fn restore_counts_missing_raw_fields_as_zero() {
        let mut e = GradeEntry::default();
        e = apply_field(&e, GradeField::Homework, Some(12)).unwrap();
        e = apply_field(&e, GradeField::Oral, Some(21)).unwrap();
        e = apply_field(&e, GradeField::Total, Some(70)).unwrap();

        let r = recompute_from_raw(&e);
        assert!(!r.manual_override);
        assert_eq!(r.total, Some(33));
        assert_eq!(r.final_score, Some(7));
        assert_eq!(r.completion(), EntryCompletion::Incomplete);
    }

    #[test]
    fn final_score_rounds_to_nearest() {
        assert_eq!(final_score_for(0), 0);
        assert_eq!(final_score_for(87), 17);
        assert_eq!(final_score_for(88), 18);
        assert_eq!(final_score_for(100), 20);
    }

    #[test]
    fn parse_input_treats_blank_as_clear() {
        assert_eq!(parse_input("").unwrap(), None);
        assert_eq!(parse_input("  ").unwrap(), None);
        assert_eq!(parse_input(" 17 ").unwrap(), Some(17));
        assert!(parse_input("abc").is_err());
    }

    #[test]
    fn period_status_over_roster() {
        let full = filled(10, 10, 10, 10);
        let overridden = apply_field(&GradeEntry::default(), GradeField::Total, Some(50)).unwrap();

        assert_eq!(period_status(Vec::<Option<&GradeEntry>>::new()), PeriodStatus::NotStarted);
        assert_eq!(period_status([None, None]), PeriodStatus::NotStarted);
        assert_eq!(period_status([Some(&full), None]), PeriodStatus::Partial);
        assert_eq!(
            period_status([Some(&full), Some(&overridden)]),
            PeriodStatus::Partial
        );
        assert_eq!(
            period_status([Some(&full), Some(&full)]),
            PeriodStatus::AllCompleted
        );
    }

    #[test]
    fn filters_classify_entries() {
        let full = filled(10, 10, 10, 10);
        let overridden = apply_field(&GradeEntry::default(), GradeField::Total, Some(50)).unwrap();
        let restored = recompute_from_raw(&overridden);

        assert!(StudentFilter::Completed.matches(Some(&full)));
        assert!(StudentFilter::Completed.matches(Some(&overridden)));
        assert!(StudentFilter::Incomplete.matches(Some(&restored)));
        assert!(StudentFilter::NotRecorded.matches(None));
        assert!(StudentFilter::NotRecorded.matches(Some(&GradeEntry::default())));
        assert!(StudentFilter::All.matches(None));
        assert_eq!(StudentFilter::parse("NOT_RECORDED"), Some(StudentFilter::NotRecorded));
        assert_eq!(StudentFilter::parse("done"), None);
    }
}
