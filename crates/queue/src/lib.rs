//! Dynamic token-budget batching queue in front of the embedder (spec
//! §4.7). Grounded on the teacher's `RateLimitedProvider`: a thin wrapper
//! around an inner provider, an async admission gate, plain `tokio::sync`
//! primitives instead of a channel-based actor.

pub mod error;

use async_trait::async_trait;
use indexcore::{PathKey, TextChunk, estimate_tokens};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, Notify, OnceCell};
use tracing::warn;

pub use error::QueueError;

pub const DEFAULT_MAX_TOKENS_PER_BATCH: u32 = 7000;

#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
  pub max_queue_size: usize,
  pub batch_size: usize,
  pub max_tokens_per_batch: u32,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      max_queue_size: 1000,
      batch_size: 32,
      max_tokens_per_batch: DEFAULT_MAX_TOKENS_PER_BATCH,
    }
  }
}

/// One chunk waiting to be embedded, tagged with the file it came from.
#[derive(Debug, Clone)]
pub struct BatchEntry {
  pub path: PathKey,
  pub page: u32,
  pub chunk: TextChunk,
}

/// Result of embedding one batch, handed to the `on_batch_processed` callback.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
  pub entries: Vec<BatchEntry>,
  pub vectors: Result<Vec<Vec<f32>>, String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
  pub queue_depth: usize,
  pub processing_batches: usize,
}

/// The embedding backend the queue drives. Implemented by the embedder
/// supervisor crate; a channel-free in-memory stand-in is used in tests.
#[async_trait]
pub trait BatchEmbedder: Send + Sync {
  async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, String>;
}

struct State {
  pending: VecDeque<BatchEntry>,
  per_path_pending: HashMap<PathKey, usize>,
}

struct Inner<E> {
  config: QueueConfig,
  embedder: OnceCell<E>,
  callback: OnceCell<Box<dyn Fn(BatchOutcome) + Send + Sync>>,
  state: Mutex<State>,
  admitted: Notify,
  path_notify: Mutex<HashMap<PathKey, Arc<Notify>>>,
  closed: AtomicBool,
  processing_batches: AtomicUsize,
}

/// Producer/consumer queue: `add_chunks` is the producer side,
/// the worker task spawned by `initialize` is the sole consumer.
pub struct EmbeddingQueue<E: BatchEmbedder + 'static> {
  inner: Arc<Inner<E>>,
}

impl<E: BatchEmbedder + 'static> Clone for EmbeddingQueue<E> {
  fn clone(&self) -> Self {
    Self { inner: self.inner.clone() }
  }
}

impl<E: BatchEmbedder + 'static> EmbeddingQueue<E> {
  pub fn new(config: QueueConfig) -> Self {
    Self {
      inner: Arc::new(Inner {
        config,
        embedder: OnceCell::new(),
        callback: OnceCell::new(),
        state: Mutex::new(State {
          pending: VecDeque::new(),
          per_path_pending: HashMap::new(),
        }),
        admitted: Notify::new(),
        path_notify: Mutex::new(HashMap::new()),
        closed: AtomicBool::new(false),
        processing_batches: AtomicUsize::new(0),
      }),
    }
  }

  /// Wires the embedder and completion callback, and spawns the worker
  /// task that drains `pending` for the lifetime of the queue.
  pub fn initialize(&self, embedder: E, on_batch_processed: impl Fn(BatchOutcome) + Send + Sync + 'static) {
    let _ = self.inner.embedder.set(embedder);
    let _ = self.inner.callback.set(Box::new(on_batch_processed));

    let inner = self.inner.clone();
    tokio::spawn(async move { worker_loop(inner).await });
  }

  pub async fn add_chunks(&self, chunks: Vec<TextChunk>, path: PathKey, page: u32) -> Result<(), QueueError> {
    loop {
      if self.inner.closed.load(Ordering::SeqCst) {
        return Err(QueueError::Closed);
      }
      let depth = self.inner.state.lock().await.pending.len();
      if depth <= self.inner.config.max_queue_size {
        break;
      }
      self.inner.admitted.notified().await;
    }

    if chunks.is_empty() {
      return Ok(());
    }

    let mut state = self.inner.state.lock().await;
    *state.per_path_pending.entry(path.clone()).or_insert(0) += chunks.len();
    for chunk in chunks {
      state.pending.push_back(BatchEntry {
        path: path.clone(),
        page,
        chunk,
      });
    }
    drop(state);
    self.inner.admitted.notify_waiters();
    Ok(())
  }

  /// Resolves once every chunk queued for `path` has been processed.
  pub async fn wait_for_completion(&self, path: &str) {
    loop {
      let remaining = {
        let state = self.inner.state.lock().await;
        state.per_path_pending.get(path).copied().unwrap_or(0)
      };
      if remaining == 0 {
        return;
      }
      let notify = {
        let mut map = self.inner.path_notify.lock().await;
        map.entry(path.to_string()).or_insert_with(|| Arc::new(Notify::new())).clone()
      };
      notify.notified().await;
    }
  }

  /// Drops every chunk still waiting to be batched. In-flight batches
  /// already handed to the embedder still run to completion.
  pub async fn clear(&self) {
    let mut state = self.inner.state.lock().await;
    state.pending.clear();
    state.per_path_pending.clear();
    drop(state);
    self.inner.admitted.notify_waiters();
  }

  pub async fn get_stats(&self) -> QueueStats {
    let depth = self.inner.state.lock().await.pending.len();
    QueueStats {
      queue_depth: depth,
      processing_batches: self.inner.processing_batches.load(Ordering::SeqCst),
    }
  }

  pub fn close(&self) {
    self.inner.closed.store(true, Ordering::SeqCst);
    self.inner.admitted.notify_waiters();
  }
}

async fn worker_loop<E: BatchEmbedder + 'static>(inner: Arc<Inner<E>>) {
  loop {
    let batch = loop {
      let mut state = inner.state.lock().await;
      if !state.pending.is_empty() {
        break form_batch(&mut state.pending, inner.config.batch_size, inner.config.max_tokens_per_batch);
      }
      drop(state);
      if inner.closed.load(Ordering::SeqCst) {
        return;
      }
      inner.admitted.notified().await;
    };

    inner.admitted.notify_waiters();
    inner.processing_batches.fetch_add(1, Ordering::SeqCst);

    let texts: Vec<String> = batch.iter().map(|entry| entry.chunk.text.clone()).collect();
    let vectors = match inner.embedder.get() {
      Some(embedder) => embedder.embed_batch(texts).await,
      None => Err("embedder not initialized".to_string()),
    };

    if let Some(callback) = inner.callback.get() {
      callback(BatchOutcome {
        entries: batch.clone(),
        vectors,
      });
    }

    let mut state = inner.state.lock().await;
    let mut touched_paths = Vec::new();
    for entry in &batch {
      if let Some(count) = state.per_path_pending.get_mut(&entry.path) {
        *count = count.saturating_sub(1);
        if *count == 0 {
          state.per_path_pending.remove(&entry.path);
          touched_paths.push(entry.path.clone());
        }
      }
    }
    drop(state);

    if !touched_paths.is_empty() {
      let map = inner.path_notify.lock().await;
      for path in touched_paths {
        if let Some(notify) = map.get(&path) {
          notify.notify_waiters();
        }
      }
    }

    inner.processing_batches.fetch_sub(1, Ordering::SeqCst);
  }
}

/// Greedy batch formation (spec §4.7): admits chunks while `len+1 <=
/// batch_size` and the running token total stays within budget. A single
/// chunk already over budget becomes its own singleton batch.
fn form_batch(pending: &mut VecDeque<BatchEntry>, batch_size: usize, max_tokens_per_batch: u32) -> Vec<BatchEntry> {
  let mut batch = Vec::new();
  let Some(head) = pending.pop_front() else {
    return batch;
  };

  let head_tokens = estimate_tokens(&head.chunk.text);
  if head_tokens > max_tokens_per_batch {
    warn!(tokens = head_tokens, max = max_tokens_per_batch, "chunk exceeds max_tokens_per_batch, emitting singleton batch");
    batch.push(head);
    return batch;
  }

  let mut acc_tokens = head_tokens;
  batch.push(head);

  while batch.len() < batch_size {
    let Some(next) = pending.front() else { break };
    let next_tokens = estimate_tokens(&next.chunk.text);
    if acc_tokens + next_tokens > max_tokens_per_batch {
      break;
    }
    acc_tokens += next_tokens;
    batch.push(pending.pop_front().expect("front checked above"));
  }

  batch
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex as StdMutex;
  use tokio::sync::mpsc;

  struct EchoEmbedder;

  #[async_trait]
  impl BatchEmbedder for EchoEmbedder {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, String> {
      Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
    }
  }

  struct FailingEmbedder;

  #[async_trait]
  impl BatchEmbedder for FailingEmbedder {
    async fn embed_batch(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>, String> {
      Err("boom".to_string())
    }
  }

  fn chunk(text: &str, offset: u32) -> TextChunk {
    TextChunk {
      text: text.to_string(),
      offset,
    }
  }

  #[tokio::test]
  async fn processes_a_single_small_batch() {
    let queue = EmbeddingQueue::new(QueueConfig::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    queue.initialize(EchoEmbedder, move |outcome| {
      let _ = tx.send(outcome);
    });

    queue.add_chunks(vec![chunk("hello", 0), chunk("world", 5)], "a.txt".to_string(), 0).await.unwrap();
    queue.wait_for_completion("a.txt").await;

    let outcome = rx.recv().await.expect("one batch processed");
    assert_eq!(outcome.entries.len(), 2);
    assert!(outcome.vectors.is_ok());
  }

  #[tokio::test]
  async fn oversized_chunk_becomes_a_singleton_batch() {
    let queue = EmbeddingQueue::new(QueueConfig {
      max_tokens_per_batch: 2,
      ..QueueConfig::default()
    });
    let seen_batches: Arc<StdMutex<Vec<usize>>> = Arc::new(StdMutex::new(Vec::new()));
    let seen = seen_batches.clone();
    queue.initialize(EchoEmbedder, move |outcome| {
      seen.lock().unwrap().push(outcome.entries.len());
    });

    // "a very large chunk of text" estimates well over 2 tokens.
    queue.add_chunks(vec![chunk("a very large chunk of text indeed", 0)], "big.txt".to_string(), 0).await.unwrap();
    queue.wait_for_completion("big.txt").await;

    assert_eq!(*seen_batches.lock().unwrap(), vec![1]);
  }

  #[tokio::test]
  async fn empty_text_chunks_flow_through_as_zero_tokens() {
    let queue = EmbeddingQueue::new(QueueConfig::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    queue.initialize(EchoEmbedder, move |outcome| {
      let _ = tx.send(outcome);
    });

    queue.add_chunks(vec![chunk("", 0)], "empty.txt".to_string(), 0).await.unwrap();
    queue.wait_for_completion("empty.txt").await;
    let outcome = rx.recv().await.unwrap();
    assert_eq!(outcome.entries.len(), 1);
  }

  #[tokio::test]
  async fn failed_batch_still_resolves_wait_for_completion() {
    let queue = EmbeddingQueue::new(QueueConfig::default());
    queue.initialize(FailingEmbedder, |_outcome| {});

    queue.add_chunks(vec![chunk("x", 0)], "fails.txt".to_string(), 0).await.unwrap();
    queue.wait_for_completion("fails.txt").await;
  }

  #[tokio::test]
  async fn clear_drops_unprocessed_pending_chunks() {
    let queue: EmbeddingQueue<EchoEmbedder> = EmbeddingQueue::new(QueueConfig::default());
    // Never initialized: nothing drains, so pending stays put until cleared.
    queue.add_chunks(vec![chunk("a", 0), chunk("b", 1)], "x.txt".to_string(), 0).await.unwrap();
    assert_eq!(queue.get_stats().await.queue_depth, 2);

    queue.clear().await;
    assert_eq!(queue.get_stats().await.queue_depth, 0);
  }

  #[test]
  fn batch_formation_respects_batch_size_and_token_budget() {
    let mut pending: VecDeque<BatchEntry> = VecDeque::new();
    for i in 0..5 {
      pending.push_back(BatchEntry {
        path: "p".to_string(),
        page: 0,
        chunk: chunk("word word word word", i),
      });
    }
    let batch = form_batch(&mut pending, 2, 1000);
    assert_eq!(batch.len(), 2);
    assert_eq!(pending.len(), 3);
  }
}
