//! Isolated embedder supervisor (spec §4.8). Owns a child messenger,
//! matches responses to requests by monotonic id, restarts the child
//! under resource pressure, and retries transient embed failures with
//! linear backoff — the retry/backoff shape is grounded on the teacher's
//! `RateLimitedProvider::acquire_slot` loop, applied to a child process
//! instead of a rate limit window.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, oneshot};
use tracing::{debug, warn};

use crate::error::EmbedderError;
use crate::messenger::ProcessMessenger;
use crate::protocol::{ChildMessage, ParentMessage};

pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RSS_MB_LIMIT: u64 = 1500;
pub const DEFAULT_EXTERNAL_MB_LIMIT: u64 = 300;
pub const DEFAULT_FILES_SINCE_SPAWN_LIMIT: u64 = 500;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
  pub model: Option<String>,
  pub max_queue_size: usize,
  pub request_timeout: Duration,
  pub rss_mb_limit: u64,
  pub external_mb_limit: u64,
  pub files_since_spawn_limit: u64,
}

impl Default for SupervisorConfig {
  fn default() -> Self {
    Self {
      model: None,
      max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
      request_timeout: DEFAULT_REQUEST_TIMEOUT,
      rss_mb_limit: DEFAULT_RSS_MB_LIMIT,
      external_mb_limit: DEFAULT_EXTERNAL_MB_LIMIT,
      files_since_spawn_limit: DEFAULT_FILES_SINCE_SPAWN_LIMIT,
    }
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceUsage {
  pub rss_mb: u64,
  pub external_mb: u64,
}

/// `true` iff any restart threshold is exceeded (spec §4.8).
pub fn restart_required(usage: ResourceUsage, files_since_spawn: u64, config: &SupervisorConfig) -> bool {
  usage.rss_mb > config.rss_mb_limit || usage.external_mb > config.external_mb_limit || files_since_spawn > config.files_since_spawn_limit
}

struct Shared {
  in_flight: Mutex<HashMap<u64, (usize, oneshot::Sender<Result<Vec<Vec<f32>>, EmbedderError>>)>>,
  pending_init: Mutex<Option<oneshot::Sender<Result<(), String>>>>,
  pending_check_model: Mutex<Option<oneshot::Sender<ChildMessage>>>,
}

impl Shared {
  fn new() -> Self {
    Self {
      in_flight: Mutex::new(HashMap::new()),
      pending_init: Mutex::new(None),
      pending_check_model: Mutex::new(None),
    }
  }
}

pub struct EmbedderSupervisor<M: ProcessMessenger + 'static> {
  factory: Box<dyn Fn() -> Result<M, EmbedderError> + Send + Sync>,
  config: SupervisorConfig,
  shared: Arc<Shared>,
  messenger: Mutex<Option<Arc<M>>>,
  next_id: AtomicU64,
  files_since_spawn: AtomicU64,
}

impl<M: ProcessMessenger + 'static> EmbedderSupervisor<M> {
  pub fn new(config: SupervisorConfig, factory: impl Fn() -> Result<M, EmbedderError> + Send + Sync + 'static) -> Self {
    Self {
      factory: Box::new(factory),
      config,
      shared: Arc::new(Shared::new()),
      messenger: Mutex::new(None),
      next_id: AtomicU64::new(1),
      files_since_spawn: AtomicU64::new(0),
    }
  }

  /// Spawns the child (if not already running) and completes the
  /// init handshake. Idempotent: a second call is a no-op.
  pub async fn initialize(&self) -> Result<(), EmbedderError> {
    if self.messenger.lock().await.is_some() {
      return Ok(());
    }
    self.spawn_and_init().await
  }

  async fn spawn_and_init(&self) -> Result<(), EmbedderError> {
    let messenger = Arc::new((self.factory)()?);
    spawn_reader(messenger.clone(), self.shared.clone());

    let (tx, rx) = oneshot::channel();
    *self.shared.pending_init.lock().await = Some(tx);

    messenger.send(ParentMessage::Init { model: self.config.model.clone() }).await?;

    let result = tokio::time::timeout(self.config.request_timeout, rx).await;
    match result {
      Ok(Ok(Ok(()))) => {
        *self.messenger.lock().await = Some(messenger);
        self.files_since_spawn.store(0, Ordering::SeqCst);
        Ok(())
      }
      Ok(Ok(Err(error))) => Err(EmbedderError::InitFailed(error)),
      Ok(Err(_)) => Err(EmbedderError::InitFailed("init channel dropped".to_string())),
      Err(_) => Err(EmbedderError::Timeout),
    }
  }

  /// Embeds `texts` in a single request. `is_query` controls the child's
  /// `"query: "` vs `"passage: "` prefixing.
  pub async fn embed(&self, texts: Vec<String>, is_query: bool) -> Result<Vec<Vec<f32>>, EmbedderError> {
    self.initialize().await?;

    {
      let in_flight = self.shared.in_flight.lock().await;
      if in_flight.len() >= self.config.max_queue_size {
        return Err(EmbedderError::QueueFull);
      }
    }

    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
    let expected = texts.len();
    let (tx, rx) = oneshot::channel();
    self.shared.in_flight.lock().await.insert(id, (expected, tx));

    let messenger = {
      let guard = self.messenger.lock().await;
      guard.as_ref().cloned().ok_or_else(|| EmbedderError::Process("not initialized".to_string()))?
    };

    if let Err(e) = messenger.send(ParentMessage::Embed { id, texts, is_query }).await {
      self.shared.in_flight.lock().await.remove(&id);
      return Err(e);
    }

    let result = tokio::time::timeout(self.config.request_timeout, rx).await;
    match result {
      Ok(Ok(Ok(vectors))) => {
        self.files_since_spawn.fetch_add(1, Ordering::SeqCst);
        Ok(vectors)
      }
      Ok(Ok(Err(error))) => Err(error),
      Ok(Err(_)) => Err(EmbedderError::Process("response channel dropped".to_string())),
      Err(_) => {
        self.shared.in_flight.lock().await.remove(&id);
        Err(EmbedderError::Timeout)
      }
    }
  }

  /// Retries transient embed failures with linear backoff
  /// (`attempt * base_delay`); surfaces the last error after exhaustion.
  pub async fn embed_with_retry(&self, texts: Vec<String>, is_query: bool, max_retries: u32) -> Result<Vec<Vec<f32>>, EmbedderError> {
    let base_delay = Duration::from_millis(100);
    let mut last_err = EmbedderError::Process("no attempts made".to_string());

    for attempt in 0..=max_retries {
      match self.embed(texts.clone(), is_query).await {
        Ok(vectors) => return Ok(vectors),
        Err(EmbedderError::InitFailed(e)) => return Err(EmbedderError::InitFailed(e)),
        Err(e) => {
          warn!(attempt, error = %e, "embed attempt failed, retrying");
          last_err = e;
          if attempt < max_retries {
            tokio::time::sleep(base_delay * (attempt + 1)).await;
          }
        }
      }
    }
    Err(last_err)
  }

  /// Queries the child's model cache state.
  pub async fn check_model(&self) -> Result<ChildMessage, EmbedderError> {
    self.initialize().await?;
    let messenger = {
      let guard = self.messenger.lock().await;
      guard.as_ref().cloned().ok_or_else(|| EmbedderError::Process("not initialized".to_string()))?
    };

    let (tx, rx) = oneshot::channel();
    *self.shared.pending_check_model.lock().await = Some(tx);
    messenger.send(ParentMessage::CheckModel).await?;

    match tokio::time::timeout(self.config.request_timeout, rx).await {
      Ok(Ok(msg)) => Ok(msg),
      Ok(Err(_)) => Err(EmbedderError::Process("check-model channel dropped".to_string())),
      Err(_) => Err(EmbedderError::Timeout),
    }
  }

  /// Restarts the child if required and `in_flight` is currently empty;
  /// otherwise defers (returns `false`) until the caller retries post-drain.
  pub async fn restart_if_needed(&self, usage: ResourceUsage) -> Result<bool, EmbedderError> {
    let files_since_spawn = self.files_since_spawn.load(Ordering::SeqCst);
    if !restart_required(usage, files_since_spawn, &self.config) {
      return Ok(false);
    }

    if !self.shared.in_flight.lock().await.is_empty() {
      debug!("restart deferred: requests still in flight");
      return Ok(false);
    }

    if let Some(messenger) = self.messenger.lock().await.take() {
      messenger.exit().await;
    }
    self.spawn_and_init().await?;
    Ok(true)
  }

  pub async fn shutdown(&self) {
    if let Some(messenger) = self.messenger.lock().await.take() {
      messenger.exit().await;
    }
  }
}

/// Adapts the supervisor to the embedding queue's `BatchEmbedder` seam:
/// one batch, one `embed` request, non-query mode.
#[async_trait::async_trait]
impl<M: ProcessMessenger + 'static> queue::BatchEmbedder for EmbedderSupervisor<M> {
  async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, String> {
    self.embed(texts, false).await.map_err(|e| e.to_string())
  }
}

/// Rejects a response whose vector count doesn't match the request's text
/// count, or whose vectors don't all share one dimension.
fn validate_vectors(vectors: Vec<Vec<f32>>, expected: usize) -> Result<Vec<Vec<f32>>, EmbedderError> {
  if vectors.len() != expected {
    return Err(EmbedderError::MalformedResponse(format!(
      "expected {expected} vectors, got {}",
      vectors.len()
    )));
  }
  if let Some(dim) = vectors.first().map(|v| v.len())
    && vectors.iter().any(|v| v.len() != dim)
  {
    return Err(EmbedderError::MalformedResponse("vectors have inconsistent dimensions".to_string()));
  }
  Ok(vectors)
}

fn spawn_reader<M: ProcessMessenger + 'static>(messenger: Arc<M>, shared: Arc<Shared>) {
  tokio::spawn(async move {
    while let Some(msg) = messenger.recv().await {
      match msg {
        ChildMessage::IpcReady => {}
        ChildMessage::Ready => {
          if let Some(tx) = shared.pending_init.lock().await.take() {
            let _ = tx.send(Ok(()));
          }
        }
        ChildMessage::InitErr { error } => {
          if let Some(tx) = shared.pending_init.lock().await.take() {
            let _ = tx.send(Err(error));
          }
        }
        ChildMessage::EmbedOk { id, vectors } => {
          if let Some((expected, tx)) = shared.in_flight.lock().await.remove(&id) {
            match vectors {
              Some(v) => {
                let _ = tx.send(validate_vectors(v, expected));
              }
              None => {
                let _ = tx.send(Err(EmbedderError::EmbedFailed("embed:ok carried null vectors".to_string())));
              }
            }
          }
        }
        ChildMessage::EmbedErr { id, error } => {
          if let Some((_, tx)) = shared.in_flight.lock().await.remove(&id) {
            let _ = tx.send(Err(EmbedderError::EmbedFailed(error)));
          }
        }
        ChildMessage::ModelStatus { exists, path, size, error } => {
          if let Some(tx) = shared.pending_check_model.lock().await.take() {
            let _ = tx.send(ChildMessage::ModelStatus { exists, path, size, error });
          }
        }
      }
    }
  });
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::messenger::ChannelMessenger;

  fn spawn_happy_child(mut handle: crate::messenger::ChannelChildHandle) {
    tokio::spawn(async move {
      while let Some(msg) = handle.from_parent.recv().await {
        match msg {
          ParentMessage::Init { .. } => {
            let _ = handle.to_parent.send(ChildMessage::Ready).await;
          }
          ParentMessage::Embed { id, texts, .. } => {
            let vectors = texts.iter().map(|t| vec![t.len() as f32]).collect();
            let _ = handle.to_parent.send(ChildMessage::EmbedOk { id, vectors: Some(vectors) }).await;
          }
          ParentMessage::CheckModel => {
            let _ = handle
              .to_parent
              .send(ChildMessage::ModelStatus {
                exists: true,
                path: Some("/models/m".to_string()),
                size: Some(123),
                error: None,
              })
              .await;
          }
          ParentMessage::Shutdown => break,
        }
      }
    });
  }

  fn supervisor_with_happy_child() -> EmbedderSupervisor<ChannelMessenger> {
    EmbedderSupervisor::new(SupervisorConfig::default(), || {
      let (messenger, handle) = ChannelMessenger::pair();
      spawn_happy_child(handle);
      Ok(messenger)
    })
  }

  #[tokio::test]
  async fn initialize_completes_the_handshake() {
    let supervisor = supervisor_with_happy_child();
    supervisor.initialize().await.unwrap();
  }

  #[tokio::test]
  async fn embed_returns_vectors_matched_by_id() {
    let supervisor = supervisor_with_happy_child();
    let vectors = supervisor.embed(vec!["hello".to_string(), "hi".to_string()], false).await.unwrap();
    assert_eq!(vectors, vec![vec![5.0], vec![2.0]]);
  }

  #[tokio::test]
  async fn init_failure_propagates_to_the_caller() {
    let supervisor = EmbedderSupervisor::new(SupervisorConfig::default(), || {
      let (messenger, mut handle) = ChannelMessenger::pair();
      tokio::spawn(async move {
        if let Some(ParentMessage::Init { .. }) = handle.from_parent.recv().await {
          let _ = handle.to_parent.send(ChildMessage::InitErr { error: "model missing".to_string() }).await;
        }
      });
      Ok(messenger)
    });

    let err = supervisor.initialize().await.unwrap_err();
    match err {
      EmbedderError::InitFailed(msg) => assert_eq!(msg, "model missing"),
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[tokio::test]
  async fn embed_ok_with_null_vectors_is_rejected() {
    let supervisor = EmbedderSupervisor::new(SupervisorConfig::default(), || {
      let (messenger, mut handle) = ChannelMessenger::pair();
      tokio::spawn(async move {
        while let Some(msg) = handle.from_parent.recv().await {
          match msg {
            ParentMessage::Init { .. } => {
              let _ = handle.to_parent.send(ChildMessage::Ready).await;
            }
            ParentMessage::Embed { id, .. } => {
              let _ = handle.to_parent.send(ChildMessage::EmbedOk { id, vectors: None }).await;
            }
            _ => {}
          }
        }
      });
      Ok(messenger)
    });

    let err = supervisor.embed(vec!["x".to_string()], false).await.unwrap_err();
    assert!(matches!(err, EmbedderError::EmbedFailed(_)));
  }

  #[tokio::test]
  async fn embed_ok_with_wrong_vector_count_is_rejected() {
    let supervisor = EmbedderSupervisor::new(SupervisorConfig::default(), || {
      let (messenger, mut handle) = ChannelMessenger::pair();
      tokio::spawn(async move {
        while let Some(msg) = handle.from_parent.recv().await {
          match msg {
            ParentMessage::Init { .. } => {
              let _ = handle.to_parent.send(ChildMessage::Ready).await;
            }
            ParentMessage::Embed { id, texts, .. } => {
              // Only one vector back for however many texts were sent.
              let _ = texts;
              let _ = handle
                .to_parent
                .send(ChildMessage::EmbedOk { id, vectors: Some(vec![vec![1.0, 2.0]]) })
                .await;
            }
            _ => {}
          }
        }
      });
      Ok(messenger)
    });

    let err = supervisor.embed(vec!["a".to_string(), "b".to_string()], false).await.unwrap_err();
    assert!(matches!(err, EmbedderError::MalformedResponse(_)));
  }

  #[tokio::test]
  async fn embed_ok_with_inconsistent_dimensions_is_rejected() {
    let supervisor = EmbedderSupervisor::new(SupervisorConfig::default(), || {
      let (messenger, mut handle) = ChannelMessenger::pair();
      tokio::spawn(async move {
        while let Some(msg) = handle.from_parent.recv().await {
          match msg {
            ParentMessage::Init { .. } => {
              let _ = handle.to_parent.send(ChildMessage::Ready).await;
            }
            ParentMessage::Embed { id, .. } => {
              let vectors = vec![vec![1.0, 2.0], vec![1.0, 2.0, 3.0]];
              let _ = handle.to_parent.send(ChildMessage::EmbedOk { id, vectors: Some(vectors) }).await;
            }
            _ => {}
          }
        }
      });
      Ok(messenger)
    });

    let err = supervisor.embed(vec!["a".to_string(), "b".to_string()], false).await.unwrap_err();
    assert!(matches!(err, EmbedderError::MalformedResponse(_)));
  }

  #[tokio::test]
  async fn embed_times_out_when_child_never_responds() {
    let supervisor = EmbedderSupervisor::new(
      SupervisorConfig {
        request_timeout: Duration::from_millis(50),
        ..SupervisorConfig::default()
      },
      || {
        let (messenger, mut handle) = ChannelMessenger::pair();
        tokio::spawn(async move {
          while let Some(msg) = handle.from_parent.recv().await {
            if let ParentMessage::Init { .. } = msg {
              let _ = handle.to_parent.send(ChildMessage::Ready).await;
            }
            // Embed requests are never answered.
          }
        });
        Ok(messenger)
      },
    );

    let err = supervisor.embed(vec!["x".to_string()], false).await.unwrap_err();
    assert!(matches!(err, EmbedderError::Timeout));
  }

  #[tokio::test]
  async fn embed_with_retry_surfaces_the_last_error_after_exhaustion() {
    let supervisor = EmbedderSupervisor::new(
      SupervisorConfig {
        request_timeout: Duration::from_millis(30),
        ..SupervisorConfig::default()
      },
      || {
        let (messenger, mut handle) = ChannelMessenger::pair();
        tokio::spawn(async move {
          while let Some(msg) = handle.from_parent.recv().await {
            if let ParentMessage::Init { .. } = msg {
              let _ = handle.to_parent.send(ChildMessage::Ready).await;
            }
          }
        });
        Ok(messenger)
      },
    );

    let err = supervisor.embed_with_retry(vec!["x".to_string()], false, 2).await.unwrap_err();
    assert!(matches!(err, EmbedderError::Timeout));
  }

  #[tokio::test]
  async fn restart_is_deferred_while_requests_are_in_flight() {
    let supervisor = EmbedderSupervisor::new(
      SupervisorConfig {
        request_timeout: Duration::from_secs(5),
        ..SupervisorConfig::default()
      },
      || {
        let (messenger, mut handle) = ChannelMessenger::pair();
        tokio::spawn(async move {
          while let Some(msg) = handle.from_parent.recv().await {
            if let ParentMessage::Init { .. } = msg {
              let _ = handle.to_parent.send(ChildMessage::Ready).await;
            }
            // Embed requests never answered: stays in flight.
          }
        });
        Ok(messenger)
      },
    );

    supervisor.initialize().await.unwrap();
    let sup = Arc::new(supervisor);
    let sup2 = sup.clone();
    let embed_task = tokio::spawn(async move { sup2.embed(vec!["x".to_string()], false).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let restarted = sup
      .restart_if_needed(ResourceUsage {
        rss_mb: 2000,
        external_mb: 0,
      })
      .await
      .unwrap();
    assert!(!restarted);

    embed_task.abort();
  }

  #[tokio::test]
  async fn restart_proceeds_when_idle_and_over_threshold() {
    let supervisor = supervisor_with_happy_child();
    supervisor.initialize().await.unwrap();

    let restarted = supervisor
      .restart_if_needed(ResourceUsage {
        rss_mb: 2000,
        external_mb: 0,
      })
      .await
      .unwrap();
    assert!(restarted);
  }

  #[test]
  fn restart_required_checks_all_three_thresholds() {
    let config = SupervisorConfig::default();
    assert!(restart_required(ResourceUsage { rss_mb: 1600, external_mb: 0 }, 0, &config));
    assert!(restart_required(ResourceUsage { rss_mb: 0, external_mb: 400 }, 0, &config));
    assert!(restart_required(ResourceUsage { rss_mb: 0, external_mb: 0 }, 600, &config));
    assert!(!restart_required(ResourceUsage { rss_mb: 100, external_mb: 10 }, 10, &config));
  }
}
