//! Reconnection backoff.
//!
//! The scheduler is a pure function of the attempt number and the policy;
//! the connection manager owns the only timer.

mod scheduler;

pub use scheduler::{BackoffPolicy, BackoffState, ReconnectionScheduler};
