//! Topic registry multiplexed over the single connection.
//!
//! Tracks which listeners want which channels, keeps the server-side
//! subscription set in step with it, and replays every live channel in one
//! batch after each successful (re)connect.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::connection::{
    ConnectionManager, ConnectionState, EnvelopeHandler, ObserverHandle, StateChange,
};
use crate::envelope::{Command, Envelope, TYPE_NOTIFICATION};
use crate::error::ClientError;
use crate::metrics::EnvelopeMetrics;

use super::subscriber::{Delivery, Subscriber, Subscription, SubscriptionHandle};

/// Reserved channel that also receives every notification-typed envelope
pub const NOTIFICATION_CHANNEL: &str = TYPE_NOTIFICATION;

struct ChannelEntry {
    /// Registration order of the channel, used for batch ordering
    seq: u64,
    /// Copy-on-write so dispatch works on a stable snapshot
    listeners: Arc<Vec<Arc<Subscription>>>,
    /// A subscribe command for this channel went out on the current link
    wire_subscribed: bool,
}

#[derive(Default)]
struct RegistryInner {
    channels: HashMap<String, ChannelEntry>,
    by_id: HashMap<u64, Arc<Subscription>>,
    next_id: u64,
    next_seq: u64,
}

/// Result of dispatching one envelope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchResult {
    pub delivered: usize,
    pub failed: usize,
    /// Listeners unsubscribed while the dispatch was running
    pub skipped: usize,
}

impl DispatchResult {
    fn record(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Delivered => self.delivered += 1,
            Delivery::Failed => self.failed += 1,
            Delivery::Inactive => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelInfo {
    pub name: String,
    pub listeners: usize,
    pub first_subscribed_at: Option<DateTime<Utc>>,
    pub wire_subscribed: bool,
}

pub struct ChannelRegistry {
    manager: Arc<ConnectionManager>,
    inner: Mutex<RegistryInner>,
    observer: Mutex<Option<ObserverHandle>>,
}

impl ChannelRegistry {
    /// Create a registry and attach it to `manager` as envelope handler and
    /// state observer
    pub fn new(manager: Arc<ConnectionManager>) -> Arc<Self> {
        let registry = Arc::new(Self {
            manager: manager.clone(),
            inner: Mutex::new(RegistryInner::default()),
            observer: Mutex::new(None),
        });

        let handler: Weak<dyn EnvelopeHandler> = Arc::downgrade(&registry) as Weak<dyn EnvelopeHandler>;
        manager.set_envelope_handler(handler);

        let weak = Arc::downgrade(&registry);
        let observer = manager.on_state_change(move |change| {
            if let Some(registry) = weak.upgrade() {
                registry.on_state_change(change);
            }
        });
        *registry.observer.lock() = Some(observer);

        registry
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Register `listener` on `channel`.
    ///
    /// Sends a subscribe command right away when Connected; otherwise the
    /// channel is flushed with the next Connected transition. Subscribing the
    /// same listener twice returns the existing handle.
    pub fn subscribe(&self, channel: &str, listener: Arc<dyn Subscriber>) -> SubscriptionHandle {
        let mut inner = self.inner.lock();

        if let Some(entry) = inner.channels.get(channel) {
            if let Some(existing) = entry.listeners.iter().find(|s| s.same_listener(&listener)) {
                tracing::debug!(channel = %channel, subscription_id = existing.id, "Listener already subscribed");
                return SubscriptionHandle {
                    id: existing.id,
                    channel: channel.to_string(),
                };
            }
        }

        inner.next_id += 1;
        let id = inner.next_id;
        let subscription = Arc::new(Subscription::new(id, channel.to_string(), listener));
        inner.by_id.insert(id, subscription.clone());

        let RegistryInner {
            channels, next_seq, ..
        } = &mut *inner;
        let entry = channels.entry(channel.to_string()).or_insert_with(|| {
            *next_seq += 1;
            ChannelEntry {
                seq: *next_seq,
                listeners: Arc::new(Vec::new()),
                wire_subscribed: false,
            }
        });
        let mut listeners = entry.listeners.as_ref().clone();
        listeners.push(subscription);
        entry.listeners = Arc::new(listeners);

        if !entry.wire_subscribed && self.manager.state() == ConnectionState::Connected {
            match self
                .manager
                .send_command(Command::subscribe(vec![channel.to_string()]))
            {
                Ok(()) => entry.wire_subscribed = true,
                Err(error) => {
                    tracing::debug!(channel = %channel, error = %error, "Subscribe deferred to next connect");
                    if matches!(error, ClientError::Transport(_)) {
                        // A link that cannot take the command gets replaced
                        self.manager.report_link_fault();
                    }
                }
            }
        }

        tracing::debug!(channel = %channel, subscription_id = id, "Subscribed to channel");
        SubscriptionHandle {
            id,
            channel: channel.to_string(),
        }
    }

    /// Convenience for closure listeners
    pub fn subscribe_fn<F>(&self, channel: &str, listener: F) -> SubscriptionHandle
    where
        F: Fn(&Envelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(channel, Arc::new(listener))
    }

    /// Remove a listener. Unknown or already released handles are ignored.
    ///
    /// When this returns the listener is not running and will not be called
    /// again (unless it is the caller, unsubscribing itself mid-delivery).
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let subscription = {
            let mut inner = self.inner.lock();
            let Some(subscription) = inner.by_id.remove(&handle.id) else {
                return;
            };

            let mut last_listener = false;
            let mut was_wire_subscribed = false;
            if let Some(entry) = inner.channels.get_mut(&subscription.channel) {
                let listeners: Vec<_> = entry
                    .listeners
                    .iter()
                    .filter(|s| s.id != subscription.id)
                    .cloned()
                    .collect();
                last_listener = listeners.is_empty();
                was_wire_subscribed = entry.wire_subscribed;
                entry.listeners = Arc::new(listeners);
            }

            if last_listener {
                inner.channels.remove(&subscription.channel);
                if was_wire_subscribed {
                    // Best-effort: the server drops subscriptions of dead links itself
                    if let Err(error) = self
                        .manager
                        .send_command(Command::unsubscribe(vec![subscription.channel.clone()]))
                    {
                        tracing::debug!(channel = %subscription.channel, error = %error, "Unsubscribe not sent");
                    }
                }
            }

            subscription
        };

        subscription.deactivate();
        tracing::debug!(channel = %subscription.channel, subscription_id = subscription.id, "Unsubscribed from channel");
    }

    /// Deliver `envelope` to every current listener of its channel.
    ///
    /// Envelopes without a channel go to the channel named after their type;
    /// notifications are additionally delivered on the reserved notification
    /// channel.
    pub fn dispatch(&self, envelope: &Envelope) -> DispatchResult {
        let channel = envelope.channel.as_deref().unwrap_or_else(|| envelope.kind());
        let mut targets = vec![self.snapshot(channel)];
        if envelope.notification().is_some() && channel != NOTIFICATION_CHANNEL {
            targets.push(self.snapshot(NOTIFICATION_CHANNEL));
        }

        let mut result = DispatchResult::default();
        for listeners in targets.into_iter().flatten() {
            for subscription in listeners.iter() {
                result.record(subscription.deliver(envelope));
            }
        }

        for _ in 0..result.failed {
            EnvelopeMetrics::record_listener_failure();
        }
        tracing::trace!(
            channel = %channel,
            envelope_id = %envelope.id,
            delivered = result.delivered,
            failed = result.failed,
            "Envelope dispatched"
        );
        result
    }

    pub fn channels(&self) -> Vec<ChannelInfo> {
        let inner = self.inner.lock();
        let mut entries: Vec<_> = inner.channels.iter().collect();
        entries.sort_by_key(|(_, entry)| entry.seq);
        entries
            .into_iter()
            .map(|(name, entry)| ChannelInfo {
                name: name.clone(),
                listeners: entry.listeners.len(),
                first_subscribed_at: entry.listeners.iter().map(|s| s.subscribed_at).min(),
                wire_subscribed: entry.wire_subscribed,
            })
            .collect()
    }

    pub fn listener_count(&self, channel: &str) -> usize {
        self.inner
            .lock()
            .channels
            .get(channel)
            .map(|entry| entry.listeners.len())
            .unwrap_or(0)
    }

    fn snapshot(&self, channel: &str) -> Option<Arc<Vec<Arc<Subscription>>>> {
        self.inner
            .lock()
            .channels
            .get(channel)
            .map(|entry| entry.listeners.clone())
    }

    fn on_state_change(&self, change: &StateChange) {
        if change.state == ConnectionState::Connected {
            self.resubscribe_all();
        } else {
            // Anything but Connected means the server-side set is gone
            for entry in self.inner.lock().channels.values_mut() {
                entry.wire_subscribed = false;
            }
        }
    }

    /// Re-issue subscribe commands for every live channel in one batch
    fn resubscribe_all(&self) {
        let mut inner = self.inner.lock();
        let mut pending: Vec<(&String, &mut ChannelEntry)> = inner
            .channels
            .iter_mut()
            .filter(|(_, entry)| !entry.wire_subscribed && !entry.listeners.is_empty())
            .collect();
        if pending.is_empty() {
            return;
        }
        pending.sort_by_key(|(_, entry)| entry.seq);

        let names: Vec<String> = pending.iter().map(|(name, _)| (*name).clone()).collect();
        match self.manager.send_command(Command::subscribe(names.clone())) {
            Ok(()) => {
                for (_, entry) in pending {
                    entry.wire_subscribed = true;
                }
                tracing::info!(channels = ?names, "Channels resubscribed");
            }
            Err(error) => {
                tracing::warn!(channels = ?names, error = %error, "Resubscribe failed");
                if matches!(error, ClientError::Transport(_)) {
                    self.manager.report_link_fault();
                }
            }
        }
    }
}

impl EnvelopeHandler for ChannelRegistry {
    fn handle(&self, envelope: Envelope) {
        self.dispatch(&envelope);
    }
}

impl Drop for ChannelRegistry {
    fn drop(&mut self) {
        if let Some(observer) = self.observer.lock().take() {
            observer.remove();
        }
    }
}
