//! Notification records and the client-side store.
//!
//! Notification-typed envelopes reach the store through the reserved
//! `notification` channel of the [`ChannelRegistry`](crate::channel::ChannelRegistry).
//! The store de-duplicates by id, so a server replaying recent events after
//! a reconnect never produces visible duplicates.

mod query;
mod store;
mod sync;
mod types;

pub use query::{NotificationFilter, NotificationQuery};
pub use store::{IngestOutcome, NotificationStore, StoreSummary, SyncReport};
pub use sync::{HttpNotificationSource, NotificationSource, NotificationSync};
pub use types::{NotificationAction, NotificationBuilder, NotificationKind, NotificationRecord};

pub(crate) use types::NotificationPayload;
