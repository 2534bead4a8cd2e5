//! The `connection` module keeps the single broker session alive.
//!
//! [`ResilienceManager`] dials the transport, performs the handshake,
//! restores subscriptions when the broker lost them and hands the session to
//! a [`crate::session::SessionAgent`] task. Failed attempts back off with
//! full jitter and are retried forever; lifecycle changes are broadcast as
//! [`ConnectionEvent`]s and mirrored in a `watch` of [`ConnectionState`].

pub mod backoff;
pub mod events;
pub mod manager;

pub use backoff::Backoff;
pub use events::{ConnectionEvent, ConnectionState};
pub use manager::ResilienceManager;
