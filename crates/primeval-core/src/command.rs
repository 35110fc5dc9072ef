//! Commands sent to the simulation loop from other tasks.
//!
//! Subscriber lifecycle changes and operator overrides are all funnelled
//! through one channel and applied by the loop between ticks, so the world
//! is never mutated from outside the loop.

use primeval_types::{OverrideCommand, OverrideOutcome, SubscriberId};
use tokio::sync::{mpsc, oneshot};

use crate::delta::SubscriberSender;

/// Errors returned by [`EngineHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// The simulation loop is no longer running.
    #[error("simulation engine stopped")]
    EngineStopped,
}

/// A request for the simulation loop.
#[derive(Debug)]
pub enum EngineCommand {
    /// Attach a subscriber; it receives a full snapshot on `tx`.
    Attach {
        /// The new subscriber.
        id: SubscriberId,
        /// Its outbound queue.
        tx: SubscriberSender,
    },
    /// The subscriber applied its snapshot and wants deltas.
    Ready {
        /// The subscriber.
        id: SubscriberId,
    },
    /// The subscriber went away.
    Detach {
        /// The subscriber.
        id: SubscriberId,
    },
    /// Send the subscriber a fresh full snapshot.
    Resync {
        /// The subscriber.
        id: SubscriberId,
    },
    /// Apply an operator override and report the outcome.
    Override {
        /// The override.
        command: OverrideCommand,
        /// Where to send the outcome.
        reply: oneshot::Sender<OverrideOutcome>,
    },
}

/// Cloneable sender side of the engine command channel.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    /// Create a handle and the receiver the loop reads from.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<EngineCommand>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Attach a subscriber.
    pub async fn attach(&self, id: SubscriberId, tx: SubscriberSender) -> Result<(), CommandError> {
        self.send(EngineCommand::Attach { id, tx }).await
    }

    /// Mark a subscriber ready.
    pub async fn ready(&self, id: SubscriberId) -> Result<(), CommandError> {
        self.send(EngineCommand::Ready { id }).await
    }

    /// Detach a subscriber.
    pub async fn detach(&self, id: SubscriberId) -> Result<(), CommandError> {
        self.send(EngineCommand::Detach { id }).await
    }

    /// Ask for a fresh snapshot.
    pub async fn resync(&self, id: SubscriberId) -> Result<(), CommandError> {
        self.send(EngineCommand::Resync { id }).await
    }

    /// Apply an override and wait for its outcome.
    pub async fn apply_override(
        &self,
        command: OverrideCommand,
    ) -> Result<OverrideOutcome, CommandError> {
        let (reply, outcome) = oneshot::channel();
        self.send(EngineCommand::Override { command, reply }).await?;
        outcome.await.map_err(|_| CommandError::EngineStopped)
    }

    async fn send(&self, command: EngineCommand) -> Result<(), CommandError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| CommandError::EngineStopped)
    }
}
