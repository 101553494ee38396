use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::keys::RecordKey;
use crate::model::StudentGradeRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Ready,
    Pending,
    LocalSaved,
    Syncing,
    Done,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub key: RecordKey,
    pub snapshot: StudentGradeRecord,
    pub revision: u64,
}

/// Latest full-record snapshot per record, awaiting remote acknowledgment.
///
/// Enqueueing a record that already has a slot replaces the snapshot and
/// bumps the revision; acknowledging an older revision leaves the slot alone.
#[derive(Debug, Default)]
pub struct SyncQueue {
    slots: BTreeMap<RecordKey, PendingWrite>,
    next_revision: u64,
}

impl SyncQueue {
    pub fn enqueue(&mut self, record: StudentGradeRecord) -> u64 {
        self.next_revision += 1;
        let key = record.key();
        self.slots.insert(
            key.clone(),
            PendingWrite {
                key,
                snapshot: record,
                revision: self.next_revision,
            },
        );
        self.next_revision
    }

    pub fn snapshot(&self) -> Vec<PendingWrite> {
        self.slots.values().cloned().collect()
    }

    /// Removes the slot if it still holds `revision`. Returns whether it did.
    pub fn acknowledge(&mut self, key: &RecordKey, revision: u64) -> bool {
        match self.slots.get(key) {
            Some(p) if p.revision == revision => {
                self.slots.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.slots.contains_key(key)
    }

    pub fn keys(&self) -> Vec<RecordKey> {
        self.slots.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

pub trait Clock {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A single cancellable deadline. Rescheduling replaces the previous one.
#[derive(Debug, Default, Clone, Copy)]
pub struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    pub fn schedule(&mut self, now: Instant, delay: Duration) {
        self.deadline = Some(now + delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True once when the deadline has passed; the timer is then disarmed.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(d) if now >= d => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::EntryRef;

    fn record(student: &str) -> StudentGradeRecord {
        StudentGradeRecord::new(&EntryRef {
            class_id: "p1".to_string(),
            student_id: student.to_string(),
            subject_name: "Math".to_string(),
            period: "Oct".to_string(),
        })
    }

    #[test]
    fn enqueue_replaces_slot_per_record() {
        let mut q = SyncQueue::default();
        q.enqueue(record("s1"));
        q.enqueue(record("s1"));
        q.enqueue(record("s2"));
        assert_eq!(q.len(), 2);
        assert!(q.contains(&RecordKey::new("s1", "Math")));
    }

    #[test]
    fn stale_acknowledgment_keeps_newer_value() {
        let mut q = SyncQueue::default();
        let r1 = q.enqueue(record("s1"));
        let in_flight = q.snapshot();
        let r2 = q.enqueue(record("s1"));
        assert!(r2 > r1);

        assert!(!q.acknowledge(&in_flight[0].key, in_flight[0].revision));
        assert_eq!(q.len(), 1);
        assert!(q.acknowledge(&RecordKey::new("s1", "Math"), r2));
        assert!(q.is_empty());
    }

    #[test]
    fn timer_fires_once_after_deadline() {
        let start = Instant::now();
        let mut t = Timer::default();
        assert!(!t.fire(start));
        t.schedule(start, Duration::from_millis(100));
        assert!(!t.fire(start + Duration::from_millis(99)));
        assert!(t.fire(start + Duration::from_millis(100)));
        assert!(!t.fire(start + Duration::from_millis(500)));

        t.schedule(start, Duration::from_millis(10));
        t.schedule(start, Duration::from_millis(50));
        assert!(!t.fire(start + Duration::from_millis(20)));
        t.cancel();
        assert_eq!(t.deadline(), None);
    }
}
