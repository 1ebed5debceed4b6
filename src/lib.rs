// Infrastructure layer (shared components)
pub mod infrastructure;

pub use infrastructure::config;
pub use infrastructure::error;
pub use infrastructure::metrics;

// Protocol
pub mod envelope;
pub mod reconnect;

// Connection and auth
pub mod auth;
pub mod connection;

// Domain layer
pub mod channel;
pub mod execution;
pub mod notification;

// Application layer
pub mod session;

// Supporting modules
pub mod telemetry;

pub use channel::{ChannelRegistry, Subscriber, SubscriptionHandle};
pub use connection::{ConnectionManager, ConnectionState, SessionMode, StateChange};
pub use error::{ClientError, Result};
pub use notification::{NotificationRecord, NotificationStore};
pub use session::ClientSession;
