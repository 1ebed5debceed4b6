use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::envelope::Envelope;

/// Capability to receive envelopes of a channel.
///
/// Listener identity is the `Arc` allocation: subscribing the same `Arc`
/// twice to a channel yields the same handle.
pub trait Subscriber: Send + Sync {
    fn on_envelope(&self, envelope: &Envelope) -> anyhow::Result<()>;
}

impl<F> Subscriber for F
where
    F: Fn(&Envelope) -> anyhow::Result<()> + Send + Sync,
{
    fn on_envelope(&self, envelope: &Envelope) -> anyhow::Result<()> {
        self(envelope)
    }
}

/// Returned by `subscribe`; pass it back to `unsubscribe`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub(crate) id: u64,
    pub(crate) channel: String,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

/// Outcome of delivering to one listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered,
    Failed,
    /// Unsubscribed after the dispatch snapshot was taken
    Inactive,
}

thread_local! {
    /// Subscriptions whose listener is running on this thread
    static DISPATCHING: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

pub(crate) struct Subscription {
    pub(crate) id: u64,
    pub(crate) channel: String,
    pub(crate) listener: Arc<dyn Subscriber>,
    pub(crate) subscribed_at: DateTime<Utc>,
    active: AtomicBool,
    /// Held shared while the listener runs; unsubscribe takes it exclusively
    gate: RwLock<()>,
}

impl Subscription {
    pub(crate) fn new(id: u64, channel: String, listener: Arc<dyn Subscriber>) -> Self {
        Self {
            id,
            channel,
            listener,
            subscribed_at: Utc::now(),
            active: AtomicBool::new(true),
            gate: RwLock::new(()),
        }
    }

    pub(crate) fn same_listener(&self, other: &Arc<dyn Subscriber>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.listener), Arc::as_ptr(other))
    }

    pub(crate) fn deliver(&self, envelope: &Envelope) -> Delivery {
        let _running = self.gate.read_recursive();
        if !self.active.load(Ordering::Acquire) {
            return Delivery::Inactive;
        }

        DISPATCHING.with(|stack| stack.borrow_mut().push(self.id));
        let outcome = catch_unwind(AssertUnwindSafe(|| self.listener.on_envelope(envelope)));
        DISPATCHING.with(|stack| {
            stack.borrow_mut().pop();
        });

        match outcome {
            Ok(Ok(())) => Delivery::Delivered,
            Ok(Err(error)) => {
                tracing::warn!(
                    channel = %self.channel,
                    subscription_id = self.id,
                    error = %error,
                    "Listener failed"
                );
                Delivery::Failed
            }
            Err(_) => {
                tracing::warn!(
                    channel = %self.channel,
                    subscription_id = self.id,
                    "Listener panicked"
                );
                Delivery::Failed
            }
        }
    }

    /// Stop deliveries. When this returns no call into the listener is in
    /// progress on another thread.
    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);

        let reentrant = DISPATCHING.with(|stack| stack.borrow().contains(&self.id));
        if !reentrant {
            drop(self.gate.write());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Payload;
    use std::sync::atomic::AtomicUsize;

    fn envelope() -> Envelope {
        Envelope {
            channel: Some("demo".to_string()),
            id: "e1".to_string(),
            timestamp: 1,
            payload: Payload::Pong,
        }
    }

    #[test]
    fn test_closure_is_a_subscriber() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let listener: Arc<dyn Subscriber> = Arc::new(move |_: &Envelope| -> anyhow::Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let subscription = Subscription::new(1, "demo".to_string(), listener.clone());
        assert!(subscription.same_listener(&listener));
        assert_eq!(subscription.deliver(&envelope()), Delivery::Delivered);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_inactive_subscription_is_skipped() {
        let listener: Arc<dyn Subscriber> = Arc::new(|_: &Envelope| -> anyhow::Result<()> {
            panic!("must not be called")
        });
        let subscription = Subscription::new(1, "demo".to_string(), listener);

        subscription.deactivate();
        assert_eq!(subscription.deliver(&envelope()), Delivery::Inactive);
    }

    #[test]
    fn test_failures_are_contained() {
        let failing: Arc<dyn Subscriber> =
            Arc::new(|_: &Envelope| -> anyhow::Result<()> { anyhow::bail!("bad payload") });
        let panicking: Arc<dyn Subscriber> =
            Arc::new(|_: &Envelope| -> anyhow::Result<()> { panic!("listener bug") });

        let a = Subscription::new(1, "demo".to_string(), failing);
        let b = Subscription::new(2, "demo".to_string(), panicking);
        assert_eq!(a.deliver(&envelope()), Delivery::Failed);
        assert_eq!(b.deliver(&envelope()), Delivery::Failed);
    }
}
