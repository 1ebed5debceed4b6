use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{ClientError, Result};

/// Credential presented during the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Bearer(String),
    /// Anonymous read-only session
    Guest,
}

impl Credential {
    pub fn is_guest(&self) -> bool {
        matches!(self, Credential::Guest)
    }
}

/// An open physical connection, expressed as a pair of frame queues.
///
/// The inbound queue yields text frames until the transport fails or closes;
/// a final `Err` (or the queue ending) means the link is gone. Dropping the
/// link closes the transport.
pub struct TransportLink {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<Result<String>>,
    reader: Option<JoinHandle<()>>,
}

impl TransportLink {
    pub fn new(outbound: mpsc::Sender<String>, inbound: mpsc::Receiver<Result<String>>) -> Self {
        Self {
            outbound,
            inbound,
            reader: None,
        }
    }

    /// Attach the task feeding `inbound`; it is aborted with the link
    pub fn with_reader(mut self, reader: JoinHandle<()>) -> Self {
        self.reader = Some(reader);
        self
    }

    /// Create an in-process link and the peer end that plays the server
    pub fn in_memory(capacity: usize) -> (TransportLink, LinkPeer) {
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity.max(1));
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity.max(1));
        (
            TransportLink::new(outbound_tx, inbound_rx),
            LinkPeer {
                to_client: inbound_tx,
                from_client: outbound_rx,
            },
        )
    }
}

impl Drop for TransportLink {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Server side of an in-memory link
pub struct LinkPeer {
    pub to_client: mpsc::Sender<Result<String>>,
    pub from_client: mpsc::Receiver<String>,
}

impl LinkPeer {
    /// Deliver a text frame to the client
    pub async fn push(&self, frame: impl Into<String>) -> bool {
        self.to_client.send(Ok(frame.into())).await.is_ok()
    }

    /// Simulate a transport failure
    pub async fn fail(&self, reason: impl Into<String>) -> bool {
        self.to_client
            .send(Err(ClientError::Transport(reason.into())))
            .await
            .is_ok()
    }
}

/// Opens physical connections.
///
/// A handshake failure must be classified: `Transport`/`HandshakeTimeout`
/// for network trouble, `AuthExpired` for an expired or invalid token, and
/// `AuthRejected` for an explicit refusal.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, credential: &Credential) -> Result<TransportLink>;
}
