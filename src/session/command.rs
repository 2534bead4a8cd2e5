//! Commands submitted to the session agent.
//!
//! A `Command` pairs one wire operation with the closure that receives its
//! outcome. Every command reports exactly once: on completion, on failure,
//! or, if it is dropped unfinished, with `ChannelClosed`.

use std::time::Duration;

use tokio::sync::OwnedSemaphorePermit;

use crate::registry::IncomingCallback;
use crate::transport::QoS;
use crate::utils::error::CommandError;

/// Successful outcome of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    /// QoS 0 publishes complete once written, QoS 1 once acknowledged.
    Published,
    /// One flag per requested filter.
    Subscribed { granted: Vec<bool> },
    Unsubscribed,
}

pub type CommandOutcome = Result<Ack, CommandError>;

/// Receives the outcome of a command. Called exactly once.
pub type Completion = Box<dyn FnOnce(CommandOutcome) + Send>;

/// A filter to subscribe to and the callback that consumes it.
#[derive(Clone)]
pub struct Subscription {
    pub filter: String,
    pub qos: QoS,
    pub callback: IncomingCallback,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("filter", &self.filter)
            .field("qos", &self.qos)
            .finish_non_exhaustive()
    }
}

/// The wire operation a command performs.
#[derive(Debug)]
pub enum Operation {
    Connect { clean_session: bool },
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
    },
    Subscribe(Vec<Subscription>),
    Unsubscribe(Vec<String>),
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Connect { .. } => "connect",
            Operation::Publish { .. } => "publish",
            Operation::Subscribe(_) => "subscribe",
            Operation::Unsubscribe(_) => "unsubscribe",
        }
    }
}

/// The completion side of a command, detached from its operation once the
/// agent starts executing it. Dropping an unsent reply reports
/// `ChannelClosed`.
pub struct Reply {
    completion: Option<Completion>,
    permit: Option<OwnedSemaphorePermit>,
}

impl Reply {
    fn new(completion: Completion) -> Self {
        Self {
            completion: Some(completion),
            permit: None,
        }
    }

    /// Report the outcome and give the pool slot back.
    pub fn send(mut self, outcome: CommandOutcome) {
        if let Some(completion) = self.completion.take() {
            completion(outcome);
        }
        self.permit.take();
    }
}

impl Drop for Reply {
    fn drop(&mut self) {
        if let Some(completion) = self.completion.take() {
            completion(Err(CommandError::ChannelClosed));
        }
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reply")
            .field("pending", &self.completion.is_some())
            .finish()
    }
}

#[derive(Debug)]
pub struct Command {
    pub operation: Operation,
    /// How long `enqueue` may wait for channel capacity.
    pub block_time: Duration,
    pub reply: Reply,
}

impl Command {
    pub fn new(operation: Operation, block_time: Duration, completion: Completion) -> Self {
        Self {
            operation,
            block_time,
            reply: Reply::new(completion),
        }
    }

    /// A command whose outcome nobody waits for.
    pub fn detached(operation: Operation, block_time: Duration) -> Self {
        Self::new(operation, block_time, Box::new(|_| {}))
    }

    pub(crate) fn attach_permit(&mut self, permit: OwnedSemaphorePermit) {
        self.reply.permit = Some(permit);
    }

    /// Give the pool slot back without completing; used when the command
    /// is handed back to its producer.
    pub(crate) fn release_permit(&mut self) {
        self.reply.permit.take();
    }

    pub fn complete(self, outcome: CommandOutcome) {
        self.reply.send(outcome);
    }
}
