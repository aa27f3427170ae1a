use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlannerError {
  #[error("invalid reindex plan: {0:?}")]
  Invalid(Vec<String>),
}
