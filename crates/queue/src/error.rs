use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
  #[error("queue-overflow: queue is closed")]
  Closed,

  #[error("embedding failed: {0}")]
  EmbedFailed(String),
}
