//! Command channel
//!
//! A bounded FIFO between producers and the session agent, plus a fixed pool
//! of command permits that bounds how many commands may be queued or in
//! flight at once. A permit is held from `enqueue` until the command's
//! completion runs.
//!
//! `enqueue` never blocks longer than the command's block-time budget. When
//! no capacity frees up in time the command is handed back as
//! [`EnqueueError::Busy`] so the caller can retry it unchanged.

use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::command::Command;
use crate::utils::error::CommandError;

/// Why a command was not accepted. The command is returned to the caller.
#[derive(Debug)]
pub enum EnqueueError {
    Busy(Command),
    Closed(Command),
}

impl EnqueueError {
    pub fn into_command(self) -> Command {
        match self {
            EnqueueError::Busy(cmd) | EnqueueError::Closed(cmd) => cmd,
        }
    }

    /// Kind of the rejected operation, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            EnqueueError::Busy(cmd) | EnqueueError::Closed(cmd) => cmd.operation.kind(),
        }
    }

    pub fn error(&self) -> CommandError {
        match self {
            EnqueueError::Busy(_) => CommandError::Busy,
            EnqueueError::Closed(_) => CommandError::ChannelClosed,
        }
    }
}

/// Producer side; cheap to clone.
#[derive(Clone, Debug)]
pub struct CommandSender {
    tx: mpsc::Sender<Command>,
    pool: Arc<Semaphore>,
}

/// Consumer side, owned by whoever runs the session agent.
///
/// Dropping it fails every command still queued with `ChannelClosed`.
#[derive(Debug)]
pub struct CommandReceiver {
    rx: mpsc::Receiver<Command>,
}

/// Create a channel with `queue_len` slots and `pool_size` command permits.
pub fn command_channel(queue_len: usize, pool_size: usize) -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::channel(queue_len.max(1));
    (
        CommandSender {
            tx,
            pool: Arc::new(Semaphore::new(pool_size.max(1))),
        },
        CommandReceiver { rx },
    )
}

impl CommandSender {
    /// Queue `command`, waiting at most `command.block_time` for capacity.
    pub async fn enqueue(&self, mut command: Command) -> Result<(), EnqueueError> {
        let deadline = Instant::now() + command.block_time;

        let permit = match tokio::time::timeout_at(deadline, self.pool.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(EnqueueError::Closed(command)),
            Err(_) => {
                debug!("Command pool exhausted, {} busy", command.operation.kind());
                return Err(EnqueueError::Busy(command));
            }
        };
        command.attach_permit(permit);

        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.tx.send_timeout(command, remaining).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(mut cmd)) => {
                cmd.release_permit();
                Err(EnqueueError::Busy(cmd))
            }
            Err(mpsc::error::SendTimeoutError::Closed(mut cmd)) => {
                cmd.release_permit();
                Err(EnqueueError::Closed(cmd))
            }
        }
    }

    /// Commands that may still be accepted before the pool is exhausted.
    pub fn available_permits(&self) -> usize {
        self.pool.available_permits()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl CommandReceiver {
    /// Wait for the next command. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Command> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Command> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Every sender is gone; queued commands may remain.
    pub fn is_closed(&self) -> bool {
        self.rx.is_closed()
    }
}

impl Drop for CommandReceiver {
    fn drop(&mut self) {
        self.rx.close();
        let mut failed = 0usize;
        while let Ok(command) = self.rx.try_recv() {
            command.complete(Err(CommandError::ChannelClosed));
            failed += 1;
        }
        if failed > 0 {
            warn!("Command channel closed with {failed} pending commands");
        }
    }
}
