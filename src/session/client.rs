use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::channel::{CommandSender, EnqueueError};
use super::command::{Ack, Command, CommandOutcome, Completion, Operation, Subscription};
use crate::config::SessionSettings;
use crate::registry::IncomingCallback;
use crate::transport::QoS;
use crate::utils::error::CommandError;

/// Producer-facing handle onto the session's command channel.
///
/// Any number of tasks may hold a clone. Every method builds an
/// [`Operation`], enqueues it and either waits for the outcome or hands it
/// to a completion closure.
#[derive(Clone, Debug)]
pub struct CommandClient {
    sender: CommandSender,
    enqueue_budget: Duration,
    busy_retry_delay: Duration,
    busy_retry_limit: u32,
    completion_timeout: Duration,
}

impl CommandClient {
    pub fn new(sender: CommandSender, settings: &SessionSettings) -> Self {
        Self {
            sender,
            enqueue_budget: settings.enqueue_budget(),
            busy_retry_delay: settings.busy_retry_delay(),
            busy_retry_limit: settings.busy_retry_limit,
            completion_timeout: settings.completion_timeout(),
        }
    }

    /// Enqueue `operation`, retrying `Busy` after a short delay.
    ///
    /// When the retry limit is reached the completion is invoked with
    /// `Busy` and the same error is returned. The completion is never
    /// invoked twice.
    pub async fn submit(&self, operation: Operation, completion: Completion) -> Result<(), CommandError> {
        let mut command = Command::new(operation, self.enqueue_budget, completion);
        let mut retries = 0u32;

        loop {
            match self.sender.enqueue(command).await {
                Ok(()) => return Ok(()),
                Err(EnqueueError::Busy(returned)) if retries < self.busy_retry_limit => {
                    retries += 1;
                    debug!(
                        "Command channel busy, retrying {} ({retries}/{})",
                        returned.operation.kind(),
                        self.busy_retry_limit
                    );
                    command = returned;
                    tokio::time::sleep(self.busy_retry_delay).await;
                }
                Err(e) => {
                    let error = e.error();
                    warn!("Dropping {} command: {error}", e.kind());
                    e.into_command().complete(Err(error.clone()));
                    return Err(error);
                }
            }
        }
    }

    /// Submit and wait for the outcome, bounded by the completion timeout.
    pub async fn execute(&self, operation: Operation) -> CommandOutcome {
        let (tx, rx) = oneshot::channel();
        let completion: Completion = Box::new(move |outcome| {
            // The waiter may have timed out already.
            let _ = tx.send(outcome);
        });
        self.submit(operation, completion).await?;

        match tokio::time::timeout(self.completion_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(CommandError::ChannelClosed),
            Err(_) => Err(CommandError::Timeout),
        }
    }

    pub async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), CommandError> {
        self.execute(Operation::Publish {
            topic: topic.to_string(),
            payload,
            qos,
        })
        .await
        .map(|_| ())
    }

    /// Subscribe to `filter`. The callback is registered once the broker
    /// grants the filter.
    pub async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        callback: IncomingCallback,
    ) -> Result<(), CommandError> {
        let subscription = Subscription {
            filter: filter.to_string(),
            qos,
            callback,
        };
        match self.execute(Operation::Subscribe(vec![subscription])).await? {
            Ack::Subscribed { granted } if granted.iter().all(|g| *g) => Ok(()),
            _ => Err(CommandError::Rejected),
        }
    }

    pub async fn unsubscribe(&self, filter: &str) -> Result<(), CommandError> {
        self.execute(Operation::Unsubscribe(vec![filter.to_string()]))
            .await
            .map(|_| ())
    }

    /// Publish without waiting; `completion` receives the outcome.
    pub async fn publish_detached(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        completion: Completion,
    ) -> Result<(), CommandError> {
        let operation = Operation::Publish {
            topic: topic.to_string(),
            payload,
            qos,
        };
        self.submit(operation, completion).await
    }

    /// Subscribe to several filters in one request without waiting.
    pub async fn subscribe_detached(
        &self,
        subscriptions: Vec<Subscription>,
        completion: Completion,
    ) -> Result<(), CommandError> {
        self.submit(Operation::Subscribe(subscriptions), completion)
            .await
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
