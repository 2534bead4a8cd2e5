//! The `transport` module is responsible for the byte stream beneath the
//! broker session.
//!
//! It defines the `Transport` seam the session agent and the resilience
//! manager drive, the packet format carried in each frame, the credential
//! store consulted on every connect, and a WebSocket implementation.

use std::time::Duration;

use async_trait::async_trait;

use crate::utils::error::TransportError;

pub mod credentials;
pub mod message;
pub mod websocket;

#[cfg(test)]
pub(crate) mod mock;

pub use credentials::{
    CredentialStore, Credentials, FileCredentialStore, PrivateKey, StaticCredentialStore,
};
pub use message::{Packet, QoS, SubscribeFilter};
pub use websocket::WebSocketTransport;

/// Broker address handed to [`Transport::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            path: path.into(),
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}{}", self.host, self.port, self.path)
    }
}

/// A reusable, frame-oriented byte stream.
///
/// The same value is connected, used and disconnected once per session.
#[async_trait]
pub trait Transport: Send {
    async fn connect(
        &mut self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<(), TransportError>;

    /// Write one frame. Returns the number of bytes written.
    async fn send(&mut self, frame: &[u8]) -> Result<usize, TransportError>;

    /// Wait up to `timeout` for one frame. `Ok(None)` means the wait timed out.
    async fn recv(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError>;

    async fn disconnect(&mut self);
}
