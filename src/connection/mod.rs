//! Connection lifecycle.
//!
//! # Architecture
//!
//! - `ConnectionManager`: single writer of the state machine; owns the one
//!   physical link and the one reconnect timer
//! - `Connector`: transport seam used to open links (`WebSocketConnector` in
//!   production, in-memory links in tests)
//! - `StateChange`: what observers see on every transition, including the
//!   guest-mode annotation

mod manager;
mod state;
mod transport;
mod websocket;

pub use manager::{ConnectionManager, EnvelopeHandler, ObserverHandle, StateObserver};
pub use state::{ConnectionState, SessionMode, StateChange};
pub use transport::{Connector, Credential, LinkPeer, TransportLink};
pub use websocket::{WebSocketConnector, GUEST_HEADER};
