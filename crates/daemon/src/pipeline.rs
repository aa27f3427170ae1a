//! Glues the parser, chunker, embedding queue and ledger into one
//! per-file operation. Grounded on the teacher's `lifecycle.rs`: a thin
//! struct wiring independently-testable pieces together, errors folded
//! into ledger state rather than propagated.

use std::sync::Arc;

use indexcore::{FileState, get_file_extension};
use ledger::{FileStatusLedger, get_parser_version};
use queue::{BatchEmbedder, EmbeddingQueue};
use tracing::{debug, warn};

use crate::interfaces::{Parser, VectorTable};

pub struct Pipeline<E: BatchEmbedder + 'static> {
  parser: Arc<dyn Parser>,
  ledger: Arc<FileStatusLedger>,
  queue: EmbeddingQueue<E>,
  table: Arc<dyn VectorTable>,
  target_tokens: u32,
  overlap_tokens: u32,
}

impl<E: BatchEmbedder + 'static> Pipeline<E> {
  pub fn new(
    parser: Arc<dyn Parser>,
    ledger: Arc<FileStatusLedger>,
    queue: EmbeddingQueue<E>,
    table: Arc<dyn VectorTable>,
    target_tokens: u32,
    overlap_tokens: u32,
  ) -> Self {
    Self {
      parser,
      ledger,
      queue,
      table,
      target_tokens,
      overlap_tokens,
    }
  }

  /// Parses, chunks and submits one file for embedding, updating the
  /// ledger with the outcome. Parser failures (empty extraction) are
  /// swallowed into a `failed` ledger row, never propagated. Any chunk
  /// rows already in the vector table for `path` are deleted before the
  /// new ones are queued, so a reindex never leaves stale rows behind
  /// alongside the fresh ones.
  pub async fn process_file(&self, path: &str) -> Result<(), ledger::LedgerError> {
    let text = self.parser.parse(std::path::Path::new(path));
    let ext = get_file_extension(path);
    let parser_version = get_parser_version(&ext);

    if text.is_empty() {
      warn!(path, "parser returned empty text, marking failed");
      return self.ledger.update(path, FileState::Failed, "parser returned empty text", 0, parser_version).await;
    }

    let chunks = chunker::chunk_text(&text, self.target_tokens, self.overlap_tokens);
    let chunk_count = chunks.len() as u32;

    self.table.delete(&|r| r.path == path);

    if let Err(e) = self.queue.add_chunks(chunks, path.to_string(), 0).await {
      warn!(path, error = %e, "failed to enqueue chunks");
      return self.ledger.update(path, FileState::Error, &e.to_string(), 0, parser_version).await;
    }

    debug!(path, chunk_count, "chunks enqueued");
    self.ledger.update(path, FileState::Indexed, "", chunk_count, parser_version).await
  }
}
