//! Persistent file-status ledger (spec §4.3).
//!
//! Backed by a single JSON document, an ordered map keyed by path, written
//! atomically (temp file + rename) — the same discipline the teacher's
//! watermark persistence uses, applied here at the row-table level since
//! the vector-store engine this would otherwise live in is out of scope.

use chrono::Utc;
use indexcore::{FileState, FileStatus, PVer, PathKey, get_file_hash};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::LedgerError;

const LEDGER_FILE_NAME: &str = "ledger.json";

pub struct FileStatusLedger {
  dir: PathBuf,
  rows: Mutex<BTreeMap<PathKey, FileStatus>>,
}

impl FileStatusLedger {
  pub fn new(db_dir: impl Into<PathBuf>) -> Self {
    Self {
      dir: db_dir.into().join("file_status"),
      rows: Mutex::new(BTreeMap::new()),
    }
  }

  fn table_path(&self) -> PathBuf {
    self.dir.join(LEDGER_FILE_NAME)
  }

  /// Ensures the table exists with the correct schema. If it exists but
  /// reads fail (schema drift), drops and recreates it. Writes then
  /// immediately deletes the seed row, matching the reference store's
  /// "row deletion is supported" behaviour.
  pub async fn initialize(&self) -> Result<(), LedgerError> {
    tokio::fs::create_dir_all(&self.dir).await?;
    let path = self.table_path();

    let loaded = match tokio::fs::read_to_string(&path).await {
      Ok(contents) => serde_json::from_str::<BTreeMap<PathKey, FileStatus>>(&contents).ok(),
      Err(_) => None,
    };

    let mut rows = match loaded {
      Some(rows) => rows,
      None => {
        warn!(path = %path.display(), "ledger missing or unreadable, recreating");
        BTreeMap::new()
      }
    };

    let seed = FileStatus::init_seed();
    rows.insert(seed.path.clone(), seed.clone());
    self.persist(&rows).await?;
    rows.remove(&seed.path);
    self.persist(&rows).await?;

    *self.rows.lock().await = rows;
    Ok(())
  }

  /// Reads all rows into an in-memory cache. Never throws: any read error
  /// yields an empty map.
  pub async fn load_cache(&self) -> std::collections::HashMap<PathKey, FileStatus> {
    let path = self.table_path();
    let loaded = async {
      let contents = tokio::fs::read_to_string(&path).await.ok()?;
      serde_json::from_str::<BTreeMap<PathKey, FileStatus>>(&contents).ok()
    }
    .await
    .unwrap_or_default();

    *self.rows.lock().await = loaded.clone();
    loaded.into_iter().collect()
  }

  /// Delete-then-insert by exact path equality. Refreshes `last_modified`
  /// and `file_hash` from `stat(path)`; sets `indexed_at` for successful
  /// indexing and `last_retry` for failed/error statuses.
  pub async fn update(
    &self,
    path: &str,
    status: FileState,
    error_message: &str,
    chunk_count: u32,
    parser_version: PVer,
  ) -> Result<(), LedgerError> {
    let (last_modified, file_hash) = stat_fields(path);
    let now = Utc::now().to_rfc3339();

    let row = FileStatus {
      path: path.to_string(),
      status,
      parser_version,
      chunk_count,
      error_message: error_message.to_string(),
      last_modified,
      indexed_at: if status == FileState::Indexed { now.clone() } else { String::new() },
      file_hash,
      last_retry: if status.is_failing() { now } else { String::new() },
    };

    let mut rows = self.rows.lock().await;
    rows.remove(path);
    rows.insert(path.to_string(), row);
    self.persist(&rows).await?;
    debug!(path, status = status.as_str(), "ledger row updated");
    Ok(())
  }

  /// Removes a row (used when a file disappears from the watched roots).
  pub async fn remove(&self, path: &str) -> Result<(), LedgerError> {
    let mut rows = self.rows.lock().await;
    rows.remove(path);
    self.persist(&rows).await
  }

  async fn persist(&self, rows: &BTreeMap<PathKey, FileStatus>) -> Result<(), LedgerError> {
    tokio::fs::create_dir_all(&self.dir).await?;
    let path = self.table_path();
    let tmp_path = self.dir.join(format!("{LEDGER_FILE_NAME}.tmp"));

    let body = serde_json::to_string_pretty(rows)?;
    tokio::fs::write(&tmp_path, body).await?;
    tokio::fs::rename(&tmp_path, &path).await?;
    Ok(())
  }
}

/// A null/absent table is a no-op at the call site (spec §4.3); modeled as
/// `Option<&FileStatusLedger>` so callers that have no ledger configured
/// simply skip the write.
pub async fn update_or_noop(
  ledger: Option<&FileStatusLedger>,
  path: &str,
  status: FileState,
  error_message: &str,
  chunk_count: u32,
  parser_version: PVer,
) -> Result<(), LedgerError> {
  match ledger {
    Some(ledger) => ledger.update(path, status, error_message, chunk_count, parser_version).await,
    None => Ok(()),
  }
}

fn stat_fields(path: &str) -> (String, String) {
  let last_modified = std::fs::metadata(path)
    .and_then(|m| m.modified())
    .ok()
    .map(chrono::DateTime::<Utc>::from)
    .map(|dt| dt.to_rfc3339())
    .unwrap_or_default();
  let hash = get_file_hash(path);
  (last_modified, hash)
}
