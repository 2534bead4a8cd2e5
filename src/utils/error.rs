//! The `error` module defines the error types used within the `ota_agent` crate.
//!
//! Errors are grouped by the layer that detects them. Transport and queue
//! errors are recovered where they occur; integrity and signature errors are
//! reported upward to the update state machine, the only layer allowed to
//! abandon a job.

use thiserror::Error;

/// Errors raised by a [`crate::transport::Transport`] implementation.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Establishing the byte stream failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The peer closed the stream.
    #[error("connection closed by peer")]
    Closed,

    /// An operation was attempted without a connected stream.
    #[error("transport not connected")]
    NotConnected,

    /// Read or write failure on the underlying stream.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket protocol failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Result of a command submitted to the session agent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The command channel had no free capacity within the block-time budget.
    #[error("command channel busy")]
    Busy,

    /// The command channel was torn down before the command completed.
    #[error("command channel closed")]
    ChannelClosed,

    /// The session was lost while the command was in flight.
    #[error("session disconnected")]
    Disconnected,

    /// The broker negatively acknowledged the operation.
    #[error("rejected by broker")]
    Rejected,

    /// No completion arrived within the caller's timeout.
    #[error("timed out waiting for completion")]
    Timeout,

    /// A connect was requested on a session that is already up.
    #[error("session already connected")]
    AlreadyConnected,

    /// The broker refused the handshake.
    #[error("connection refused by broker")]
    Refused,

    /// The operation could not be written to the wire.
    #[error("send failed: {0}")]
    Send(String),
}

impl CommandError {
    /// Whether a caller may reasonably resubmit the same command.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CommandError::Busy | CommandError::Timeout | CommandError::Disconnected
        )
    }
}

/// Errors returned by the topic registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Every registry slot is taken.
    #[error("topic registry full ({0} entries)")]
    Full(usize),

    /// The filter violates wildcard placement rules.
    #[error("invalid topic filter: {0}")]
    InvalidFilter(String),
}

/// Errors returned by pooled buffers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// The payload does not fit the buffer's fixed capacity.
    #[error("payload of {len} bytes exceeds buffer capacity {capacity}")]
    TooLarge { len: usize, capacity: usize },
}

/// Errors raised while parsing a job document.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("malformed job document: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("job document has no file entry")]
    NoFiles,

    #[error("job document field invalid: {0}")]
    InvalidField(&'static str),
}

/// Errors raised while decoding a block envelope.
#[derive(Error, Debug)]
pub enum BlockError {
    #[error("malformed block envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("block payload is not valid base64: {0}")]
    Payload(#[from] base64::DecodeError),

    #[error("block declares {declared} bytes but carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },
}

/// Errors raised by an [`crate::ota::ImageWriter`].
#[derive(Error, Debug)]
pub enum ImageError {
    /// The written image does not verify against the job's signature.
    #[error("image signature verification failed")]
    SignatureFailed,

    /// An operation needed an open destination and none exists.
    #[error("no image file is open")]
    NotCreated,

    /// The signature or key material is unusable.
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("image i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image state store error: {0}")]
    Store(#[from] sled::Error),

    #[error("image state record unreadable: {0}")]
    Record(#[from] serde_json::Error),
}

impl ImageError {
    pub fn is_signature_failure(&self) -> bool {
        matches!(self, ImageError::SignatureFailed)
    }
}

/// Errors raised by a [`crate::transport::CredentialStore`].
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors surfaced by the update state machine.
#[derive(Error, Debug)]
pub enum OtaError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Block(#[from] BlockError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("status report could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}
