//! Client-side notification state.
//!
//! Records are kept newest-first in a copy-on-write vector capped at the
//! configured capacity. Every mutation (ingest, read flags, removal,
//! eviction, expiry) happens under one lock so unread totals never drift.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::channel::{ChannelRegistry, Subscriber, SubscriptionHandle, NOTIFICATION_CHANNEL};
use crate::envelope::Envelope;
use crate::metrics::NotificationMetrics;

use super::query::{NotificationFilter, NotificationQuery};
use super::types::NotificationRecord;

/// Outcome of [`NotificationStore::ingest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Inserted,
    /// Id already present; nothing changed
    DuplicateIgnored,
    /// Dismissed earlier, or older than everything a full store retains
    Discarded,
}

/// Totals published after every mutation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    pub total: usize,
    pub unread: usize,
}

/// Counts from a bulk merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub inserted: usize,
    pub duplicates: usize,
    pub discarded: usize,
    /// Existing records the server reported as read
    pub marked_read: usize,
    /// Records dropped because the authoritative snapshot no longer has them
    pub evicted: usize,
}

#[derive(Default)]
struct StoreInner {
    /// Descending `created_at`
    records: Arc<Vec<NotificationRecord>>,
    ids: HashSet<String>,
    tombstones: VecDeque<String>,
    tombstone_ids: HashSet<String>,
    timers: HashMap<String, JoinHandle<()>>,
    unread: usize,
}

impl StoreInner {
    fn position(&self, id: &str) -> Option<usize> {
        if !self.ids.contains(id) {
            return None;
        }
        self.records.iter().position(|r| r.id == id)
    }

    fn cancel_timer(&mut self, id: &str) {
        if let Some(timer) = self.timers.remove(id) {
            timer.abort();
        }
    }

    fn set_read(&mut self, index: usize) -> bool {
        let records = Arc::make_mut(&mut self.records);
        let record = &mut records[index];
        if record.read {
            return false;
        }
        record.read = true;
        let id = record.id.clone();
        self.unread = self.unread.saturating_sub(1);
        self.cancel_timer(&id);
        true
    }

    fn take(&mut self, index: usize) -> NotificationRecord {
        let record = Arc::make_mut(&mut self.records).remove(index);
        self.ids.remove(&record.id);
        if !record.read {
            self.unread = self.unread.saturating_sub(1);
        }
        self.cancel_timer(&record.id);
        record
    }

    fn tombstone(&mut self, id: String, limit: usize) {
        if self.tombstone_ids.insert(id.clone()) {
            self.tombstones.push_back(id);
        }
        while self.tombstones.len() > limit {
            if let Some(old) = self.tombstones.pop_front() {
                self.tombstone_ids.remove(&old);
            }
        }
    }
}

pub struct NotificationStore {
    capacity: usize,
    inner: Mutex<StoreInner>,
    summary_tx: watch::Sender<StoreSummary>,
    me: Weak<NotificationStore>,
}

impl NotificationStore {
    pub fn new(capacity: usize) -> Arc<Self> {
        let (summary_tx, _) = watch::channel(StoreSummary::default());
        Arc::new_cyclic(|me| Self {
            capacity: capacity.max(1),
            inner: Mutex::new(StoreInner::default()),
            summary_tx,
            me: me.clone(),
        })
    }

    /// Feed the store from the reserved notification channel
    pub fn attach(self: &Arc<Self>, registry: &ChannelRegistry) -> SubscriptionHandle {
        registry.subscribe(NOTIFICATION_CHANNEL, self.clone() as Arc<dyn Subscriber>)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert a record unless its id has been seen.
    ///
    /// A full store evicts its oldest record; a record older than all of a
    /// full store's records is discarded instead.
    pub fn ingest(&self, record: NotificationRecord) -> IngestOutcome {
        let mut inner = self.inner.lock();
        let outcome = self.ingest_locked(&mut inner, record);
        if outcome == IngestOutcome::Inserted {
            self.publish(&inner);
        }
        outcome
    }

    /// Mark one record read; false if unknown or already read
    pub fn mark_read(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        let changed = match inner.position(id) {
            Some(index) => inner.set_read(index),
            None => false,
        };
        if changed {
            tracing::debug!(notification_id = %id, "Notification marked read");
            self.publish(&inner);
        }
        changed
    }

    /// Mark everything read; returns how many records changed
    pub fn mark_all_read(&self) -> usize {
        let mut inner = self.inner.lock();
        let unread: Vec<usize> = inner
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.read)
            .map(|(index, _)| index)
            .collect();
        let changed = unread
            .into_iter()
            .filter(|index| inner.set_read(*index))
            .count();
        if changed > 0 {
            self.publish(&inner);
        }
        changed
    }

    /// Dismiss a record. Its id stays blocked so a re-delivery does not bring it back.
    pub fn remove(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(index) = inner.position(id) else {
            return false;
        };
        inner.take(index);
        inner.tombstone(id.to_string(), self.capacity);
        tracing::debug!(notification_id = %id, "Notification removed");
        self.publish(&inner);
        true
    }

    /// Lazy view over the records matching `filter`, newest first.
    ///
    /// The view works on a snapshot: later mutations do not affect it and it
    /// can be iterated any number of times.
    pub fn query(&self, filter: NotificationFilter) -> NotificationQuery {
        let records = self.inner.lock().records.clone();
        NotificationQuery::new(records, filter)
    }

    /// All records, newest first
    pub fn all(&self) -> NotificationQuery {
        self.query(NotificationFilter::default())
    }

    pub fn get(&self, id: &str) -> Option<NotificationRecord> {
        let inner = self.inner.lock();
        inner.position(id).map(|index| inner.records[index].clone())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn unread_count(&self) -> usize {
        self.inner.lock().unread
    }

    pub fn newest_created_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().records.first().map(|r| r.created_at)
    }

    pub fn summary(&self) -> StoreSummary {
        *self.summary_tx.borrow()
    }

    pub fn watch_summary(&self) -> watch::Receiver<StoreSummary> {
        self.summary_tx.subscribe()
    }

    /// Merge records from the server of record: new ids are ingested, read
    /// flags are OR-merged into existing records.
    pub fn merge(&self, records: Vec<NotificationRecord>) -> SyncReport {
        let mut inner = self.inner.lock();
        let report = self.merge_locked(&mut inner, records, SyncReport::default());
        self.publish(&inner);
        report
    }

    /// Replace the store's view with an authoritative snapshot: records the
    /// snapshot lacks are dropped, the rest merged.
    pub fn apply_snapshot(&self, records: Vec<NotificationRecord>) -> SyncReport {
        let mut inner = self.inner.lock();
        let keep: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();

        let stale: Vec<usize> = inner
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| !keep.contains(r.id.as_str()))
            .map(|(index, _)| index)
            .collect();
        let mut report = SyncReport {
            evicted: stale.len(),
            ..Default::default()
        };
        // Back to front so earlier indices stay valid
        for index in stale.into_iter().rev() {
            inner.take(index);
        }
        drop(keep);

        report = self.merge_locked(&mut inner, records, report);
        if report.evicted > 0 {
            NotificationMetrics::record_evicted(report.evicted as u64);
        }
        self.publish(&inner);
        report
    }

    fn merge_locked(
        &self,
        inner: &mut StoreInner,
        records: Vec<NotificationRecord>,
        mut report: SyncReport,
    ) -> SyncReport {
        for record in records {
            if let Some(index) = inner.position(&record.id) {
                report.duplicates += 1;
                if record.read && inner.set_read(index) {
                    report.marked_read += 1;
                }
                continue;
            }
            match self.ingest_locked(inner, record) {
                IngestOutcome::Inserted => report.inserted += 1,
                IngestOutcome::DuplicateIgnored => report.duplicates += 1,
                IngestOutcome::Discarded => report.discarded += 1,
            }
        }
        report
    }

    fn ingest_locked(&self, inner: &mut StoreInner, record: NotificationRecord) -> IngestOutcome {
        if inner.ids.contains(&record.id) {
            NotificationMetrics::record_duplicate();
            tracing::trace!(notification_id = %record.id, "Duplicate notification ignored");
            return IngestOutcome::DuplicateIgnored;
        }
        if inner.tombstone_ids.contains(&record.id) {
            tracing::trace!(notification_id = %record.id, "Dismissed notification re-delivered");
            return IngestOutcome::Discarded;
        }
        if inner.records.len() >= self.capacity {
            if let Some(oldest) = inner.records.last() {
                if record.created_at < oldest.created_at {
                    tracing::debug!(notification_id = %record.id, "Notification older than retention window");
                    return IngestOutcome::Discarded;
                }
            }
        }

        // Ahead of equal timestamps so eviction takes an older arrival
        let index = inner
            .records
            .partition_point(|existing| existing.created_at > record.created_at);
        let id = record.id.clone();
        let ttl = (!record.read).then_some(record.ttl_ms).flatten();
        if !record.read {
            inner.unread += 1;
        }
        inner.ids.insert(id.clone());
        Arc::make_mut(&mut inner.records).insert(index, record);

        if let Some(ttl_ms) = ttl {
            self.arm_expiry(inner, id.clone(), Duration::from_millis(ttl_ms));
        }

        let mut evicted = 0u64;
        while inner.records.len() > self.capacity {
            let last = inner.records.len() - 1;
            let dropped = inner.take(last);
            tracing::debug!(notification_id = %dropped.id, "Evicted oldest notification");
            evicted += 1;
        }
        if evicted > 0 {
            NotificationMetrics::record_evicted(evicted);
        }

        if !inner.ids.contains(&id) {
            tracing::debug!(notification_id = %id, "Notification evicted on arrival");
            return IngestOutcome::Discarded;
        }
        NotificationMetrics::record_ingested();
        tracing::debug!(notification_id = %id, "Notification stored");
        IngestOutcome::Inserted
    }

    /// Auto-read timer for one unread record; needs a Tokio runtime
    fn arm_expiry(&self, inner: &mut StoreInner, id: String, ttl: Duration) {
        let Ok(runtime) = Handle::try_current() else {
            tracing::debug!(notification_id = %id, "No runtime, TTL not armed");
            return;
        };
        let store = self.me.clone();
        let key = id.clone();
        let timer = runtime.spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some(store) = store.upgrade() {
                store.expire(&key);
            }
        });
        inner.timers.insert(id, timer);
    }

    fn expire(&self, id: &str) {
        let mut inner = self.inner.lock();
        // Drop our own handle first so set_read does not abort this task
        inner.timers.remove(id);
        if let Some(index) = inner.position(id) {
            if inner.set_read(index) {
                tracing::debug!(notification_id = %id, "Notification auto-read after TTL");
                self.publish(&inner);
            }
        }
    }

    fn publish(&self, inner: &StoreInner) {
        let summary = StoreSummary {
            total: inner.records.len(),
            unread: inner.unread,
        };
        NotificationMetrics::set_unread(summary.unread);
        self.summary_tx.send_replace(summary);
    }
}

impl Subscriber for NotificationStore {
    fn on_envelope(&self, envelope: &Envelope) -> anyhow::Result<()> {
        if let Some(record) = envelope.notification() {
            self.ingest(record.clone());
        }
        Ok(())
    }
}

impl Drop for NotificationStore {
    fn drop(&mut self) {
        for (_, timer) in self.inner.get_mut().timers.drain() {
            timer.abort();
        }
    }
}
