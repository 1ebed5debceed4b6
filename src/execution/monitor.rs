use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::channel::{ChannelRegistry, Subscriber, SubscriptionHandle};
use crate::envelope::{Envelope, TYPE_EXECUTION_UPDATE};

use super::types::ExecutionUpdate;

/// Default channel carrying execution updates
pub const EXECUTION_CHANNEL: &str = TYPE_EXECUTION_UPDATE;

/// Latest known status of every execution seen on the wire
pub struct ExecutionMonitor {
    /// execution_id -> latest update
    executions: DashMap<String, ExecutionUpdate>,
    updates_tx: watch::Sender<Option<ExecutionUpdate>>,
}

impl ExecutionMonitor {
    pub fn new() -> Arc<Self> {
        let (updates_tx, _) = watch::channel(None);
        Arc::new(Self {
            executions: DashMap::new(),
            updates_tx,
        })
    }

    /// Listen on `channel` (usually [`EXECUTION_CHANNEL`])
    pub fn attach(self: &Arc<Self>, registry: &ChannelRegistry, channel: &str) -> SubscriptionHandle {
        registry.subscribe(channel, self.clone() as Arc<dyn Subscriber>)
    }

    /// Record an update; returns false when it was stale.
    ///
    /// Updates older than the stored one are ignored, and so is anything
    /// non-terminal arriving after a terminal status.
    pub fn apply(&self, update: ExecutionUpdate) -> bool {
        let accepted = match self.executions.entry(update.execution_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                let current = entry.get();
                let stale = update.timestamp < current.timestamp
                    || (current.status.is_terminal() && !update.status.is_terminal());
                if stale {
                    false
                } else {
                    entry.insert(update.clone());
                    true
                }
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(update.clone());
                true
            }
        };

        if accepted {
            tracing::debug!(
                execution_id = %update.execution_id,
                status = ?update.status,
                progress = ?update.progress,
                "Execution updated"
            );
            self.updates_tx.send_replace(Some(update));
        } else {
            tracing::trace!(execution_id = %update.execution_id, "Stale execution update ignored");
        }
        accepted
    }

    pub fn get(&self, execution_id: &str) -> Option<ExecutionUpdate> {
        self.executions.get(execution_id).map(|e| e.value().clone())
    }

    /// Executions without a terminal status
    pub fn active(&self) -> Vec<ExecutionUpdate> {
        self.executions
            .iter()
            .filter(|e| !e.status.is_terminal())
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    /// Latest accepted update
    pub fn watch_updates(&self) -> watch::Receiver<Option<ExecutionUpdate>> {
        self.updates_tx.subscribe()
    }

    /// Drop finished executions; returns how many were removed
    pub fn prune_terminal(&self) -> usize {
        let before = self.executions.len();
        self.executions.retain(|_, update| !update.status.is_terminal());
        before - self.executions.len()
    }

    pub fn forget(&self, execution_id: &str) -> bool {
        self.executions.remove(execution_id).is_some()
    }
}

impl Subscriber for ExecutionMonitor {
    fn on_envelope(&self, envelope: &Envelope) -> anyhow::Result<()> {
        if let Some(update) = envelope.execution_update() {
            self.apply(update.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionStatus;

    fn update(id: &str, status: ExecutionStatus, timestamp: i64) -> ExecutionUpdate {
        ExecutionUpdate {
            execution_id: id.to_string(),
            status,
            progress: None,
            message: None,
            timestamp,
            detail: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_latest_update_wins() {
        let monitor = ExecutionMonitor::new();
        assert!(monitor.apply(update("run-1", ExecutionStatus::Pending, 1)));
        assert!(monitor.apply(update("run-1", ExecutionStatus::Running, 2)));
        assert!(!monitor.apply(update("run-1", ExecutionStatus::Pending, 1)));

        assert_eq!(monitor.get("run-1").unwrap().status, ExecutionStatus::Running);
        assert_eq!(monitor.active().len(), 1);
    }

    #[test]
    fn test_terminal_status_is_sticky() {
        let monitor = ExecutionMonitor::new();
        monitor.apply(update("run-1", ExecutionStatus::Succeeded, 5));
        assert!(!monitor.apply(update("run-1", ExecutionStatus::Running, 9)));
        assert_eq!(monitor.get("run-1").unwrap().status, ExecutionStatus::Succeeded);

        monitor.apply(update("run-2", ExecutionStatus::Running, 1));
        assert_eq!(monitor.prune_terminal(), 1);
        assert_eq!(monitor.len(), 1);
        assert!(monitor.forget("run-2"));
        assert!(monitor.is_empty());
    }

    #[test]
    fn test_watch_sees_accepted_updates() {
        let monitor = ExecutionMonitor::new();
        let rx = monitor.watch_updates();
        assert!(rx.borrow().is_none());

        monitor.apply(update("run-1", ExecutionStatus::Failed, 3));
        assert_eq!(
            rx.borrow().as_ref().map(|u| u.status),
            Some(ExecutionStatus::Failed)
        );
    }
}
