use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
  #[error("disposed")]
  Disposed,
}
