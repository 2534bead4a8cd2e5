//! The `session` module serializes every wire operation onto the single
//! broker session.
//!
//! Producers hold a [`CommandClient`] and enqueue [`Command`]s into a bounded
//! channel; the [`SessionAgent`] drains that channel, writes each operation to
//! the transport, matches acknowledgements by packet id and dispatches inbound
//! publishes through the topic registry.

pub mod agent;
pub mod channel;
pub mod client;
pub mod command;
pub mod state;

pub use agent::SessionAgent;
pub use channel::{CommandReceiver, CommandSender, EnqueueError, command_channel};
pub use client::CommandClient;
pub use command::{Ack, Command, CommandOutcome, Completion, Operation, Reply, Subscription};
pub use state::{AgentState, Session, SessionEnd};
