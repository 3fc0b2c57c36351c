//! Event buses the orchestrator publishes result events to.
//!
//! Publishing is best effort: the orchestrator logs a failed publish and
//! carries on.

use async_trait::async_trait;
use blobflow_provider::Event;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
  #[error("event bus closed")]
  Closed,

  #[error("event transport failed: {0}")]
  Transport(String),
}

/// Destination for `delta.applied` and `workflow.completed` events.
#[async_trait]
pub trait EventBus: Send + Sync {
  async fn publish(&self, event: Event) -> Result<(), PublishError>;
}

/// Discards every event.
#[derive(Debug, Clone, Default)]
pub struct NoopEventBus;

#[async_trait]
impl EventBus for NoopEventBus {
  async fn publish(&self, _event: Event) -> Result<(), PublishError> {
    Ok(())
  }
}

/// Sends events to an unbounded channel. Dispatch never waits on a slow
/// consumer.
#[derive(Debug, Clone)]
pub struct ChannelEventBus {
  sender: mpsc::UnboundedSender<Event>,
}

impl ChannelEventBus {
  pub fn new(sender: mpsc::UnboundedSender<Event>) -> Self {
    Self { sender }
  }

  /// A bus and the receiver its events arrive on.
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Self::new(sender), receiver)
  }
}

#[async_trait]
impl EventBus for ChannelEventBus {
  async fn publish(&self, event: Event) -> Result<(), PublishError> {
    self.sender.send(event).map_err(|_| PublishError::Closed)
  }
}
