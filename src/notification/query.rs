use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::types::{NotificationKind, NotificationRecord};

/// Optional predicates over records; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationFilter {
    pub kind: Option<NotificationKind>,
    pub read: Option<bool>,
    /// Inclusive lower bound on `created_at`
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`
    pub until: Option<DateTime<Utc>>,
}

impl NotificationFilter {
    pub fn of_kind(mut self, kind: NotificationKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn unread(mut self) -> Self {
        self.read = Some(false);
        self
    }

    pub fn read(mut self) -> Self {
        self.read = Some(true);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn matches(&self, record: &NotificationRecord) -> bool {
        self.kind.map_or(true, |kind| record.kind == kind)
            && self.read.map_or(true, |read| record.read == read)
            && self.since.map_or(true, |since| record.created_at >= since)
            && self.until.map_or(true, |until| record.created_at < until)
    }
}

/// Filtered view over a store snapshot, newest first
#[derive(Debug, Clone)]
pub struct NotificationQuery {
    records: Arc<Vec<NotificationRecord>>,
    filter: NotificationFilter,
}

impl NotificationQuery {
    pub(crate) fn new(records: Arc<Vec<NotificationRecord>>, filter: NotificationFilter) -> Self {
        Self { records, filter }
    }

    /// Fresh iterator over the matching records; each call starts over
    pub fn iter(&self) -> impl Iterator<Item = &NotificationRecord> + '_ {
        self.records.iter().filter(move |r| self.filter.matches(r))
    }

    pub fn count(&self) -> usize {
        self.iter().count()
    }

    pub fn to_vec(&self) -> Vec<NotificationRecord> {
        self.iter().cloned().collect()
    }

    pub fn filter(&self) -> &NotificationFilter {
        &self.filter
    }
}

impl<'a> IntoIterator for &'a NotificationQuery {
    type Item = &'a NotificationRecord;
    type IntoIter = Box<dyn Iterator<Item = &'a NotificationRecord> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}
