mod registry;
mod subscriber;

pub use registry::{ChannelInfo, ChannelRegistry, DispatchResult, NOTIFICATION_CHANNEL};
pub use subscriber::{Subscriber, SubscriptionHandle};
