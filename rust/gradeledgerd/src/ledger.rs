//! Grade ledger controller.
//!
//! Owns the in-memory ledger and the pending-write queue. Every mutation goes
//! through `apply_edit` or the override methods, is mirrored into the local
//! cache immediately, and reaches the remote store through the sync queue.
//! Timers are plain deadlines evaluated by `poll`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{LedgerSnapshot, LocalCache};
use crate::calc::{self, GradeEntry, GradeField, PeriodStatus, StudentFilter};
use crate::config::EngineConfig;
use crate::connectivity::{ConnectivityMonitor, SubscriptionId, Transition};
use crate::error::{EditError, LockError, RemoteError};
use crate::keys::{EntryRef, LockKey, RecordKey};
use crate::locks::LockRegistry;
use crate::model::{Actor, LockState, StudentGradeRecord};
use crate::remote::RemoteStore;
use crate::sync::{Clock, SyncQueue, SyncStatus, Timer};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditOutcome {
    pub entry: GradeEntry,
    pub queued: bool,
    pub status: SyncStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FlushTrigger {
    Debounce,
    Connectivity,
    Forced,
    Retry,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    pub flush_id: Option<String>,
    pub trigger: FlushTrigger,
    pub offline: bool,
    pub written: usize,
    pub remaining: usize,
    pub status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: SyncStatus,
    pub online: bool,
    pub pending: usize,
    pub pending_keys: Vec<RecordKey>,
    pub retry_attempts: u32,
    pub last_error: Option<String>,
    pub last_synced_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub fetched: usize,
    pub added: usize,
    pub kept_local: usize,
    pub skipped: usize,
    pub locks: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityReport {
    pub online: bool,
    pub transition: Option<Transition>,
    pub flush: Option<FlushReport>,
}

pub struct GradeLedger {
    config: EngineConfig,
    records: BTreeMap<RecordKey, StudentGradeRecord>,
    cache: LocalCache,
    remote: Box<dyn RemoteStore>,
    clock: Box<dyn Clock>,
    locks: LockRegistry,
    connectivity: ConnectivityMonitor,
    queue: SyncQueue,
    status: SyncStatus,
    flush_timer: Timer,
    done_timer: Timer,
    retry_timer: Timer,
    retry_attempts: u32,
    last_error: Option<String>,
    last_synced_at: Option<DateTime<Utc>>,
}

impl GradeLedger {
    /// Seeds the ledger from the cache. Records that were still pending when
    /// the cache was written are queued again from their cached values.
    pub fn new(
        config: EngineConfig,
        cache: LocalCache,
        remote: Box<dyn RemoteStore>,
        clock: Box<dyn Clock>,
        online: bool,
    ) -> Self {
        let snapshot = cache.load();
        let mut ledger = Self {
            locks: LockRegistry::new(config.locks_collection.clone()),
            config,
            records: BTreeMap::new(),
            cache,
            remote,
            clock,
            connectivity: ConnectivityMonitor::new(online),
            queue: SyncQueue::default(),
            status: SyncStatus::Ready,
            flush_timer: Timer::default(),
            done_timer: Timer::default(),
            retry_timer: Timer::default(),
            retry_attempts: 0,
            last_error: None,
            last_synced_at: None,
        };

        for record in snapshot.records {
            ledger.records.insert(record.key(), record);
        }
        for key in snapshot.pending {
            if let Some(record) = ledger.records.get(&key) {
                ledger.queue.enqueue(record.clone());
            }
        }
        if !ledger.queue.is_empty() {
            info!(pending = ledger.queue.len(), "restored unsynced records from cache");
            if online {
                ledger.status = SyncStatus::Syncing;
                let now = ledger.clock.now();
                ledger.flush_timer.schedule(now, ledger.config.debounce());
            } else {
                ledger.status = SyncStatus::LocalSaved;
            }
        }
        ledger
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: EngineConfig) {
        self.locks.set_collection(config.locks_collection.clone());
        let key_changed = config.cache_key != self.config.cache_key;
        self.cache.set_key(config.cache_key.clone());
        self.config = config;
        if key_changed {
            self.save_cache();
        }
    }

    pub fn apply_edit(
        &mut self,
        actor: &Actor,
        at: &EntryRef,
        field: GradeField,
        value: Option<i64>,
    ) -> Result<EditOutcome, EditError> {
        self.ensure_unlocked(actor, at)?;
        calc::validate(field, value)?;
        if field == GradeField::Total && !actor.can_override_total() {
            return Err(EditError::PermissionDenied(
                "writing the total directly requires the manual override capability",
            ));
        }

        let current = self.entry(at).cloned().unwrap_or_default();
        let next = calc::apply_field(&current, field, value)?;
        let qualifies = field == GradeField::Total || next.raw_complete();
        debug!(
            record = %at.record_key(),
            period = %at.period,
            %field,
            ?value,
            qualifies,
            "edit applied"
        );
        Ok(self.commit(at, next, qualifies))
    }

    pub fn enter_override(&mut self, actor: &Actor, at: &EntryRef) -> Result<EditOutcome, EditError> {
        self.ensure_unlocked(actor, at)?;
        if !actor.can_override_total() {
            return Err(EditError::PermissionDenied(
                "manual override requires the override capability",
            ));
        }
        let mut entry = self.entry(at).cloned().unwrap_or_default();
        if entry.manual_override {
            return Ok(self.outcome(entry, false));
        }
        entry.manual_override = true;
        Ok(self.commit(at, entry, true))
    }

    /// Returns the entry to automatic computation. Entries not under override
    /// are left untouched.
    pub fn restore_from_override(
        &mut self,
        actor: &Actor,
        at: &EntryRef,
    ) -> Result<EditOutcome, EditError> {
        self.ensure_unlocked(actor, at)?;
        let entry = self.entry(at).cloned().unwrap_or_default();
        if !entry.manual_override {
            return Ok(self.outcome(entry, false));
        }
        let restored = calc::recompute_from_raw(&entry);
        Ok(self.commit(at, restored, true))
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            status: self.status,
            online: self.connectivity.is_online(),
            pending: self.queue.len(),
            pending_keys: self.queue.keys(),
            retry_attempts: self.retry_attempts,
            last_error: self.last_error.clone(),
            last_synced_at: self.last_synced_at.map(|t| t.to_rfc3339()),
        }
    }

    pub fn force_flush(&mut self) -> FlushReport {
        self.flush(FlushTrigger::Forced)
    }

    /// Fires whichever timers are due.
    pub fn poll(&mut self) -> Option<FlushReport> {
        let now = self.clock.now();
        let report = if self.flush_timer.fire(now) {
            Some(self.flush(FlushTrigger::Debounce))
        } else if self.retry_timer.fire(now) {
            Some(self.flush(FlushTrigger::Retry))
        } else {
            None
        };
        if self.done_timer.fire(now) && self.status == SyncStatus::Done {
            self.status = SyncStatus::Ready;
        }
        report
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.flush_timer.deadline(),
            self.retry_timer.deadline(),
            self.done_timer.deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub fn set_online(&mut self, online: bool) -> ConnectivityReport {
        let transition = self.connectivity.set_online(online);
        let flush = match transition {
            Some(Transition::Regained) => {
                if let Err(e) = self.refresh_locks() {
                    warn!(error = %e, "lock refresh after reconnect failed");
                }
                Some(self.flush(FlushTrigger::Connectivity))
            }
            Some(Transition::Lost) | None => None,
        };
        ConnectivityReport {
            online: self.connectivity.is_online(),
            transition,
            flush,
        }
    }

    pub fn subscribe_connectivity(
        &mut self,
        listener: impl FnMut(Transition) + 'static,
    ) -> SubscriptionId {
        self.connectivity.subscribe(listener)
    }

    pub fn unsubscribe_connectivity(&mut self, id: SubscriptionId) -> bool {
        self.connectivity.unsubscribe(id)
    }

    /// Pulls the grades and locks collections. Records already known locally
    /// win over their remote copies.
    pub fn sync_from_remote(&mut self) -> Result<MergeReport, RemoteError> {
        if !self.connectivity.is_online() {
            return Err(RemoteError::Offline);
        }
        let docs = self.remote.fetch_all(&self.config.grades_collection)?;
        let mut report = MergeReport {
            fetched: docs.len(),
            ..MergeReport::default()
        };
        for doc in docs {
            let record: StudentGradeRecord =
                match serde_json::from_value(serde_json::Value::Object(doc)) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(error = %e, "skipping malformed grade document");
                        report.skipped += 1;
                        continue;
                    }
                };
            let key = record.key();
            if self.records.contains_key(&key) {
                report.kept_local += 1;
            } else {
                self.records.insert(key, record);
                report.added += 1;
            }
        }
        if report.added > 0 {
            self.save_cache();
        }
        report.locks = self.locks.refresh(self.remote.as_mut())?;
        info!(
            fetched = report.fetched,
            added = report.added,
            kept_local = report.kept_local,
            locks = report.locks,
            "merged remote ledger"
        );
        Ok(report)
    }

    pub fn refresh_locks(&mut self) -> Result<usize, RemoteError> {
        if !self.connectivity.is_online() {
            return Err(RemoteError::Offline);
        }
        self.locks.refresh(self.remote.as_mut())
    }

    pub fn is_locked(&self, key: &LockKey) -> bool {
        self.locks.is_locked(key)
    }

    pub fn locks(&self) -> Vec<LockState> {
        self.locks.list()
    }

    pub fn set_lock(&mut self, actor: &Actor, key: &LockKey, locked: bool) -> Result<bool, LockError> {
        if !self.connectivity.is_online() {
            return Err(RemoteError::Offline.into());
        }
        self.locks.set_locked(self.remote.as_mut(), actor, key, locked)
    }

    pub fn toggle_lock(&mut self, actor: &Actor, key: &LockKey) -> Result<bool, LockError> {
        if !self.connectivity.is_online() {
            return Err(RemoteError::Offline.into());
        }
        self.locks.toggle(self.remote.as_mut(), actor, key)
    }

    pub fn record(&self, key: &RecordKey) -> Option<&StudentGradeRecord> {
        self.records.get(key)
    }

    /// True while the record has a write the remote store has not acknowledged.
    pub fn is_pending(&self, key: &RecordKey) -> bool {
        self.queue.contains(key)
    }

    pub fn entry(&self, at: &EntryRef) -> Option<&GradeEntry> {
        self.entry_for(&at.student_id, &at.subject_name, &at.period)
    }

    pub fn period_status(&self, subject_name: &str, period: &str, students: &[String]) -> PeriodStatus {
        calc::period_status(
            students
                .iter()
                .map(|s| self.entry_for(s, subject_name, period)),
        )
    }

    pub fn filter_students(
        &self,
        subject_name: &str,
        period: &str,
        students: &[String],
        filter: StudentFilter,
    ) -> Vec<String> {
        students
            .iter()
            .filter(|s| filter.matches(self.entry_for(s, subject_name, period)))
            .cloned()
            .collect()
    }

    fn entry_for(&self, student_id: &str, subject_name: &str, period: &str) -> Option<&GradeEntry> {
        self.records
            .get(&RecordKey::new(student_id, subject_name))?
            .months
            .get(period)
    }

    /// Checks the lock of the requested class and, when the record already
    /// belongs to another class, the lock of that class as well.
    fn ensure_unlocked(&self, actor: &Actor, at: &EntryRef) -> Result<(), EditError> {
        if actor.is_admin {
            return Ok(());
        }
        let stored = self
            .records
            .get(&at.record_key())
            .map(|r| r.class_id.as_str())
            .filter(|c| !c.is_empty() && *c != at.class_id);
        for class_id in std::iter::once(at.class_id.as_str()).chain(stored) {
            let key = LockKey::new(class_id, at.subject_name.as_str(), at.period.as_str());
            if self.locks.is_locked(&key) {
                return Err(EditError::LockedPeriod(key));
            }
        }
        Ok(())
    }

    fn outcome(&self, entry: GradeEntry, queued: bool) -> EditOutcome {
        EditOutcome {
            entry,
            queued,
            status: self.status,
        }
    }

    /// Stores the entry, mirrors the ledger to the cache and updates the queue.
    fn commit(&mut self, at: &EntryRef, entry: GradeEntry, qualifies: bool) -> EditOutcome {
        let key = at.record_key();
        let record = self
            .records
            .entry(key.clone())
            .or_insert_with(|| StudentGradeRecord::new(at));
        if record.class_id.is_empty() {
            record.class_id = at.class_id.clone();
        }
        record.months.insert(at.period.clone(), entry.clone());
        record.updated_at = Some(Utc::now().to_rfc3339());

        let queued = if qualifies {
            self.enqueue_record(&key);
            true
        } else if self.queue.contains(&key) {
            // The slot must carry the latest values; the armed timer stays as is.
            let record = record.clone();
            let revision = self.queue.enqueue(record);
            debug!(record = %key, revision, "pending snapshot refreshed");
            true
        } else {
            self.done_timer.cancel();
            self.status = if self.connectivity.is_online() {
                SyncStatus::Pending
            } else {
                SyncStatus::LocalSaved
            };
            false
        };
        self.save_cache();
        self.outcome(entry, queued)
    }

    fn enqueue_record(&mut self, key: &RecordKey) {
        let Some(record) = self.records.get(key).cloned() else {
            return;
        };
        let revision = self.queue.enqueue(record);
        self.done_timer.cancel();
        if self.connectivity.is_online() {
            self.flush_timer
                .schedule(self.clock.now(), self.config.debounce());
            self.status = SyncStatus::Syncing;
            debug!(record = %key, revision, "queued, flush scheduled");
        } else {
            self.flush_timer.cancel();
            self.status = SyncStatus::LocalSaved;
            debug!(record = %key, revision, "queued while offline");
        }
    }

    fn flush(&mut self, trigger: FlushTrigger) -> FlushReport {
        self.flush_timer.cancel();
        self.retry_timer.cancel();
        let mut report = FlushReport {
            flush_id: None,
            trigger,
            offline: false,
            written: 0,
            remaining: self.queue.len(),
            status: self.status,
            error: None,
        };

        if !self.connectivity.is_online() {
            if !self.queue.is_empty() {
                self.status = SyncStatus::LocalSaved;
            }
            report.offline = true;
            report.status = self.status;
            return report;
        }
        if self.queue.is_empty() {
            if matches!(self.status, SyncStatus::LocalSaved | SyncStatus::Syncing) {
                self.status = SyncStatus::Ready;
            }
            report.status = self.status;
            return report;
        }

        let flush_id = Uuid::new_v4().to_string();
        self.status = SyncStatus::Syncing;
        let collection = self.config.grades_collection.clone();
        let mut failure: Option<RemoteError> = None;

        for pending in self.queue.snapshot() {
            let id = pending.key.document_id();
            let result = pending
                .snapshot
                .to_document()
                .map_err(RemoteError::from)
                .and_then(|doc| self.remote.upsert(&collection, &id, &doc));
            match result {
                // Edits are handled on the same thread, so the slot still
                // holds this revision.
                Ok(()) => {
                    self.queue.acknowledge(&pending.key, pending.revision);
                    report.written += 1;
                }
                Err(e) => {
                    warn!(%flush_id, record = %pending.key, error = %e, "remote write failed");
                    failure = Some(e);
                    break;
                }
            }
        }

        let now = self.clock.now();
        if let Some(e) = failure {
            self.status = SyncStatus::Error;
            self.last_error = Some(e.to_string());
            self.retry_attempts = self.retry_attempts.saturating_add(1);
            let delay = self.config.retry_delay(self.retry_attempts);
            self.retry_timer.schedule(now, delay);
            report.error = Some(e.to_string());
            info!(
                %flush_id,
                attempt = self.retry_attempts,
                retry_in_ms = delay.as_millis() as u64,
                "flush failed, retry scheduled"
            );
        } else {
            self.status = SyncStatus::Done;
            self.done_timer.schedule(now, self.config.done_display());
            self.retry_attempts = 0;
            self.last_error = None;
            self.last_synced_at = Some(Utc::now());
            info!(%flush_id, ?trigger, written = report.written, "flush complete");
        }

        self.save_cache();
        report.flush_id = Some(flush_id);
        report.remaining = self.queue.len();
        report.status = self.status;
        report
    }

    fn save_cache(&mut self) {
        let snapshot = LedgerSnapshot {
            records: self.records.values().cloned().collect(),
            pending: self.queue.keys(),
        };
        self.cache.save(&snapshot);
    }
}
