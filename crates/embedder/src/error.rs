use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbedderError {
  #[error("queue is full")]
  QueueFull,

  #[error("request timeout")]
  Timeout,

  #[error("child init failed: {0}")]
  InitFailed(String),

  #[error("embed failed: {0}")]
  EmbedFailed(String),

  #[error("malformed response: {0}")]
  MalformedResponse(String),

  #[error("process error: {0}")]
  Process(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}
