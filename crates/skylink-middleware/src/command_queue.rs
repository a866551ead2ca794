//! Unbounded two-lane command queue.
//!
//! Normal commands drain in FIFO order.  Emergency commands sit in their own
//! lane which is always drained first, so an emergency command never waits
//! behind a backlog of normal ones.  Pushing never blocks.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use skylink_types::Command;
use tokio::sync::{Notify, oneshot};

#[derive(Default)]
struct Lanes {
    emergency: VecDeque<QueuedCommand>,
    normal: VecDeque<QueuedCommand>,
    closed: bool,
}

/// A command waiting for the distributor, with the channel its delivery
/// outcome goes back on.
pub struct QueuedCommand {
    pub command: Command,
    reply: oneshot::Sender<bool>,
}

impl QueuedCommand {
    /// Report the delivery outcome to whoever holds the receipt.
    pub fn complete(self, delivered: bool) {
        let _ = self.reply.send(delivered);
    }
}

/// Resolves to the delivery outcome of one submitted command.
#[derive(Debug)]
pub struct DeliveryReceipt {
    command_id: String,
    outcome: oneshot::Receiver<bool>,
}

impl DeliveryReceipt {
    pub fn command_id(&self) -> &str {
        &self.command_id
    }

    /// `false` if the command was not delivered or was dropped unprocessed.
    pub async fn outcome(self) -> bool {
        self.outcome.await.unwrap_or(false)
    }
}

#[derive(Default)]
pub struct CommandQueue {
    lanes: Mutex<Lanes>,
    notify: Notify,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lanes(&self) -> MutexGuard<'_, Lanes> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue `command`.  On a closed queue the receipt resolves to `false`
    /// immediately.
    pub fn push(&self, command: Command) -> DeliveryReceipt {
        let (tx, rx) = oneshot::channel();
        let receipt = DeliveryReceipt {
            command_id: command.id().to_string(),
            outcome: rx,
        };
        {
            let mut lanes = self.lanes();
            if lanes.closed {
                return receipt;
            }
            let queued = QueuedCommand { command, reply: tx };
            if queued.command.is_emergency() {
                lanes.emergency.push_back(queued);
            } else {
                lanes.normal.push_back(queued);
            }
        }
        self.notify.notify_one();
        receipt
    }

    /// Next command, emergency lane first.  Waits while both lanes are empty;
    /// returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<QueuedCommand> {
        loop {
            let notified = self.notify.notified();
            {
                let mut lanes = self.lanes();
                if let Some(next) = lanes.emergency.pop_front() {
                    return Some(next);
                }
                if let Some(next) = lanes.normal.pop_front() {
                    return Some(next);
                }
                if lanes.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Stop accepting commands.  Anything still queued resolves to `false`.
    pub fn close(&self) {
        let pending: Vec<QueuedCommand> = {
            let mut guard = self.lanes();
            let lanes = &mut *guard;
            lanes.closed = true;
            lanes.emergency.drain(..).chain(lanes.normal.drain(..)).collect()
        };
        for queued in pending {
            queued.complete(false);
        }
        self.notify.notify_one();
    }

    /// Re-open after [`close`](Self::close).
    pub fn reopen(&self) {
        self.lanes().closed = false;
    }

    pub fn len(&self) -> usize {
        let lanes = self.lanes();
        lanes.emergency.len() + lanes.normal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
