use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::error::{ClientError, Result};

use super::transport::{Connector, Credential, TransportLink};

/// Header asking the server for an anonymous read-only session
pub const GUEST_HEADER: &str = "x-ara-guest";

/// Opens WebSocket links with the credential in the upgrade request
pub struct WebSocketConnector {
    url: String,
    buffer: usize,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>, buffer: usize) -> Self {
        Self {
            url: url.into(),
            buffer: buffer.max(1),
        }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, credential: &Credential) -> Result<TransportLink> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::Transport(format!("Invalid WebSocket request: {}", e)))?;

        match credential {
            Credential::Bearer(token) => {
                let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
                    ClientError::AuthRejected("token is not a valid header value".to_string())
                })?;
                request.headers_mut().insert(AUTHORIZATION, value);
            }
            Credential::Guest => {
                request
                    .headers_mut()
                    .insert(GUEST_HEADER, HeaderValue::from_static("1"));
            }
        }

        let (stream, _response) = connect_async(request)
            .await
            .map_err(classify_handshake_error)?;
        let (mut sink, mut source) = stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(self.buffer);
        let (inbound_tx, inbound_rx) = mpsc::channel::<Result<String>>(self.buffer);

        // Writer ends when every outbound sender is dropped, then closes the socket
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(frame)).await {
                    tracing::debug!(error = %e, "WebSocket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(message) = source.next().await {
                let forwarded = match message {
                    Ok(Message::Text(text)) => Ok(text),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => Ok(text),
                        Err(_) => {
                            tracing::debug!("Ignoring non UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => Err(ClientError::Transport(format!(
                        "closed by server: {:?}",
                        frame
                    ))),
                    Ok(_) => continue,
                    Err(e) => Err(ClientError::Transport(e.to_string())),
                };

                let link_ended = forwarded.is_err();
                if inbound_tx.send(forwarded).await.is_err() || link_ended {
                    break;
                }
            }
        });

        Ok(TransportLink::new(outbound_tx, inbound_rx).with_reader(reader))
    }
}

/// Map upgrade failures onto the handshake taxonomy
fn classify_handshake_error(error: WsError) -> ClientError {
    match error {
        WsError::Http(response) => match response.status().as_u16() {
            401 => ClientError::AuthExpired("server returned 401 Unauthorized".to_string()),
            403 => ClientError::AuthRejected("server returned 403 Forbidden".to_string()),
            code => ClientError::Transport(format!("HTTP {} during WebSocket upgrade", code)),
        },
        other => ClientError::Transport(other.to_string()),
    }
}
