//! WebSocket transport
//!
//! Carries one packet per binary WebSocket message. Text messages are
//! accepted too, since some brokers relay JSON as text. Ping/pong control
//! frames are answered by tungstenite and never surface as frames.
//!
//! Development only: this transport dials plain `ws://` and does not
//! authenticate the device. Credentials are checked for presence but the
//! client certificate is never presented. Deployments against a real broker
//! need a TLS transport (e.g. `tokio-tungstenite` with `rustls`) that
//! presents `Credentials` during the handshake.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use super::{Credentials, Endpoint, Transport};
use crate::utils::error::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Default)]
pub struct WebSocketTransport {
    stream: Option<WsStream>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self { stream: None }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn stream(&mut self) -> Result<&mut WsStream, TransportError> {
        self.stream.as_mut().ok_or(TransportError::NotConnected)
    }
}

/// Plain-text URL for `endpoint`; no TLS is negotiated.
pub(crate) fn dial_url(endpoint: &Endpoint) -> String {
    format!("ws://{}:{}{}", endpoint.host, endpoint.port, endpoint.path)
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(
        &mut self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<(), TransportError> {
        if credentials.has_client_identity() {
            warn!("Plain websocket transport does not present the client certificate");
        } else {
            debug!("Connecting to {endpoint} without a client certificate");
        }

        let url = dial_url(endpoint);
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        info!("WebSocket connected to {url}");
        self.stream = Some(stream);
        Ok(())
    }

    async fn send(&mut self, frame: &[u8]) -> Result<usize, TransportError> {
        let stream = self.stream()?;
        stream.send(WsMessage::binary(frame.to_vec())).await?;
        Ok(frame.len())
    }

    async fn recv(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let stream = self.stream()?;
        loop {
            let next = match tokio::time::timeout(timeout, stream.next()).await {
                Ok(next) => next,
                Err(_) => return Ok(None),
            };

            match next {
                Some(Ok(WsMessage::Binary(data))) => return Ok(Some(data.to_vec())),
                Some(Ok(WsMessage::Text(text))) => return Ok(Some(text.as_bytes().to_vec())),
                Some(Ok(WsMessage::Close(frame))) => {
                    debug!("Peer sent close frame: {frame:?}");
                    return Err(TransportError::Closed);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(TransportError::Closed),
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close(None).await {
                warn!("WebSocket close failed: {e}");
            }
        }
    }
}
