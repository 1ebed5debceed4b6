use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ClientError;

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnect attempts exhausted
    Disconnected,
    /// Terminal handshake rejection; no automatic retry
    Errored,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Errored => "errored",
        }
    }

    /// Numeric value exported by the state gauge
    pub fn as_gauge(&self) -> i64 {
        match self {
            ConnectionState::Idle => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Reconnecting => 3,
            ConnectionState::Disconnected => 4,
            ConnectionState::Errored => 5,
        }
    }

    /// A session is in progress (connect() is a no-op)
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Reconnecting
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability level of an established session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Authenticated,
    /// Anonymous, read-only subscriptions
    Guest,
}

/// A single state transition as delivered to observers
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub previous: ConnectionState,
    pub state: ConnectionState,
    /// Reconnect attempt counter (0 outside reconnection)
    pub attempt: u32,
    /// Set while Connected
    pub mode: Option<SessionMode>,
    pub last_error: Option<ClientError>,
    pub at: DateTime<Utc>,
}

impl StateChange {
    pub(crate) fn initial() -> Self {
        Self {
            previous: ConnectionState::Idle,
            state: ConnectionState::Idle,
            attempt: 0,
            mode: None,
            last_error: None,
            at: Utc::now(),
        }
    }

    /// Connected, but downgraded to a guest session
    pub fn is_guest(&self) -> bool {
        self.state == ConnectionState::Connected && self.mode == Some(SessionMode::Guest)
    }
}
