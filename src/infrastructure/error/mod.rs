use thiserror::Error;

/// Errors surfaced by the notification client.
///
/// Transport and handshake failures are absorbed by the connection manager
/// and surfaced as state transitions; only caller-misuse errors such as
/// [`ClientError::NotConnected`] reach collaborators directly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Physical connection failed or dropped
    #[error("Transport error: {0}")]
    Transport(String),

    /// Handshake rejected because the access token expired or is invalid
    #[error("Access token expired: {0}")]
    AuthExpired(String),

    /// Handshake rejected explicitly (revoked, forbidden)
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    /// Handshake did not complete in time
    #[error("Handshake timed out after {timeout_ms}ms")]
    HandshakeTimeout { timeout_ms: u64 },

    /// `send` called while the connection is not established
    #[error("Not connected")]
    NotConnected,

    /// Application command attempted on a read-only guest session
    #[error("Session is read-only (guest mode)")]
    ReadOnlySession,

    /// Inbound frame could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Silent token refresh failed
    #[error("Token refresh failed: {0}")]
    Refresh(String),

    /// REST notification sync failed
    #[error("Notification sync failed: {0}")]
    Sync(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Whether the failure should feed the reconnection path.
    ///
    /// `AuthExpired` is not retryable here: the resolver gets exactly one
    /// refresh for it and reports the final outcome itself.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Transport(_) | ClientError::HandshakeTimeout { .. }
        )
    }

    /// Whether the failure is an authentication verdict from the server.
    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::AuthExpired(_) | ClientError::AuthRejected(_))
    }

    /// Short label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::Transport(_) => "transport",
            ClientError::AuthExpired(_) => "auth_expired",
            ClientError::AuthRejected(_) => "auth_rejected",
            ClientError::HandshakeTimeout { .. } => "handshake_timeout",
            ClientError::NotConnected => "not_connected",
            ClientError::ReadOnlySession => "read_only",
            ClientError::Decode(_) => "decode",
            ClientError::Refresh(_) => "refresh",
            ClientError::Sync(_) => "sync",
            ClientError::Config(_) => "config",
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Decode(e.to_string())
    }
}

impl From<config::ConfigError> for ClientError {
    fn from(e: config::ConfigError) -> Self {
        ClientError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
