use std::sync::Arc;
use std::time::Duration;

use clap::Parser as ClapParser;
use coordinator::{StartupCoordinator, StartupError, StartupHooks, wait_for_queue_to_drain};
use daemon::{InMemoryVectorStore, Pipeline, PlaintextParser, VectorStore};
use embedder::{ChildMessenger, EmbedderSupervisor, SupervisorConfig};
use indexcore::{AppConfig, StageProgress, StartupStage};
use ledger::FileStatusLedger;
use planner::PlanOptions;
use queue::{EmbeddingQueue, QueueConfig, QueueStats};
use tracing::{info, warn};

struct TracingHooks;

impl StartupHooks for TracingHooks {
  fn show_window(&self) {
    info!("indexd starting");
  }
  fn notify_stage_progress(&self, progress: &StageProgress) {
    info!(stage = ?progress.stage, message = %progress.message, "startup progress");
  }
  fn notify_error(&self, error: &StartupError) {
    warn!(stage = ?error.stage, message = %error.message, "startup stage error");
  }
  fn notify_files_loaded(&self) {
    info!("files loaded");
  }
  fn notify_ready(&self) {
    info!("ready");
  }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let args = daemon::cli::Args::parse();
  daemon::cli::init_tracing(&args.log_level);

  let config = AppConfig::load(&args.db_dir).await;
  let watched_roots: Vec<String> = if args.watch.is_empty() {
    config.watched_folders.clone()
  } else {
    args.watch.iter().map(|p| p.display().to_string()).collect()
  };

  let (coordinator, handle) = StartupCoordinator::new(TracingHooks);
  let coordinate_task = tokio::spawn(coordinator.coordinate());

  handle
    .notify_progress(StageProgress {
      stage: StartupStage::WorkerSpawn,
      message: "spawning embedder".to_string(),
      progress: None,
    })
    .await;

  let embedder_cmd = args.embedder_cmd.clone();
  let embedder_supervisor = EmbedderSupervisor::new(SupervisorConfig::default(), move || ChildMessenger::spawn(&embedder_cmd, &[]));
  if let Err(e) = embedder_supervisor.initialize().await {
    warn!(error = %e, "embedder subprocess failed to start, embedding will fail until it recovers");
  }

  let ledger = Arc::new(FileStatusLedger::new(&args.db_dir));
  handle
    .notify_progress(StageProgress {
      stage: StartupStage::DbInit,
      message: "initializing ledger".to_string(),
      progress: None,
    })
    .await;
  ledger.initialize().await?;

  handle
    .notify_progress(StageProgress {
      stage: StartupStage::DbLoad,
      message: "loading ledger cache".to_string(),
      progress: None,
    })
    .await;
  let cache = ledger.load_cache().await;

  handle
    .notify_progress(StageProgress {
      stage: StartupStage::Ready,
      message: "ready".to_string(),
      progress: None,
    })
    .await;
  coordinate_task.await??;

  let all_files = walk_watched_roots(&watched_roots);
  let plan = planner::plan(&watched_roots, &all_files, &cache, &PlanOptions::default());
  info!(total = plan.stats.total, new = plan.stats.new, modified = plan.stats.modified, "reindex plan computed");

  let vector_store = InMemoryVectorStore::default();
  let table = vector_store.create_table("chunks", Vec::new());

  let embed_queue: EmbeddingQueue<EmbedderSupervisor<ChildMessenger>> = EmbeddingQueue::new(QueueConfig::default());
  let completion_table = table.clone();
  embed_queue.initialize(embedder_supervisor, move |outcome| {
    if let Ok(vectors) = outcome.vectors {
      let rows = outcome
        .entries
        .into_iter()
        .zip(vectors)
        .map(|(entry, vector)| indexcore::ChunkRecord {
          id: indexcore::ChunkRecord::derive_id(&entry.path, entry.chunk.offset),
          text: entry.chunk.text,
          vector,
          path: entry.path,
          page: entry.page,
          offset: entry.chunk.offset,
          hash: String::new(),
        })
        .collect();
      completion_table.add(rows);
    }
  });

  let pipeline = Pipeline::new(
    Arc::new(PlaintextParser),
    ledger.clone(),
    embed_queue.clone(),
    table.clone(),
    chunker::DEFAULT_TARGET_TOKENS,
    chunker::DEFAULT_OVERLAP_TOKENS,
  );
  for path in &plan.files_to_index {
    if let Err(e) = pipeline.process_file(path).await {
      warn!(path, error = %e, "failed to process file");
    }
  }

  tokio::select! {
    _ = tokio::signal::ctrl_c() => {
      info!("shutdown signal received, draining queue");
    }
  }

  let drained = wait_for_queue_to_drain(
    "embed",
    || {
      let embed_queue = embed_queue.clone();
      Box::pin(async move { embed_queue.get_stats().await })
    },
    |stats: &QueueStats| stats.queue_depth == 0 && stats.processing_batches == 0,
    Some(Duration::from_secs(30)),
    Duration::from_millis(100),
    Some(|stats: &QueueStats, elapsed: Duration| {
      info!(queue_depth = stats.queue_depth, elapsed_ms = elapsed.as_millis(), "draining");
    }),
  )
  .await;

  if !drained {
    warn!("queue did not drain before timeout");
  }

  Ok(())
}

fn walk_watched_roots(roots: &[String]) -> Vec<String> {
  let mut files = Vec::new();
  for root in roots {
    for entry in ignore::WalkBuilder::new(root).hidden(false).build().flatten() {
      if entry.file_type().is_some_and(|ft| ft.is_file()) {
        files.push(entry.path().display().to_string());
      }
    }
  }
  files
}
