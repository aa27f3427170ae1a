//! Shared data model: file paths, parser versions, ledger rows, chunks and plans.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Absolute, canonical file path. Compared by byte-exact equality.
pub type PathKey = String;

/// Parser version; `0` means unknown / pre-tracking.
pub type PVer = u32;

/// Short stable fingerprint derived only from file metadata (size, mtime_ms).
pub type FHash = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
  Init,
  Indexed,
  Failed,
  Error,
  Outdated,
}

impl FileState {
  pub fn as_str(&self) -> &'static str {
    match self {
      FileState::Init => "init",
      FileState::Indexed => "indexed",
      FileState::Failed => "failed",
      FileState::Error => "error",
      FileState::Outdated => "outdated",
    }
  }

  pub fn is_failing(&self) -> bool {
    matches!(self, FileState::Failed | FileState::Error)
  }
}

/// Ledger row. Every field is always present; unknown values are empty
/// strings or zero, never absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStatus {
  pub path: PathKey,
  pub status: FileState,
  pub parser_version: PVer,
  pub chunk_count: u32,
  #[serde(default)]
  pub error_message: String,
  #[serde(default)]
  pub last_modified: String,
  #[serde(default)]
  pub indexed_at: String,
  #[serde(default)]
  pub file_hash: FHash,
  #[serde(default)]
  pub last_retry: String,
}

impl FileStatus {
  /// The seed row written by `Ledger::initialize`.
  pub fn init_seed() -> Self {
    Self {
      path: "__init__".to_string(),
      status: FileState::Init,
      parser_version: 0,
      chunk_count: 0,
      error_message: String::new(),
      last_modified: String::new(),
      indexed_at: String::new(),
      file_hash: String::new(),
      last_retry: String::new(),
    }
  }
}

/// Vector store row (chunk + its embedding).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
  pub id: String,
  pub text: String,
  pub vector: Vec<f32>,
  pub path: PathKey,
  pub page: u32,
  pub offset: u32,
  pub hash: FHash,
}

impl ChunkRecord {
  /// Stable id derived from `path` and `offset`, matching the ledger's
  /// delete-then-insert discipline when a path is reindexed.
  pub fn derive_id(path: &str, offset: u32) -> String {
    format!("{path}#{offset}")
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Reason {
  NewFile,
  Modified,
  RetryFailed,
  Outdated,
  ForceReindex,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanStats {
  pub total: usize,
  pub new: usize,
  pub modified: usize,
  pub failed: usize,
  pub outdated: usize,
  pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
  pub files_to_index: Vec<PathKey>,
  pub files_to_remove: Vec<PathKey>,
  pub reasons: HashMap<PathKey, Reason>,
  pub stats: PlanStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanValidation {
  pub valid: bool,
  pub errors: Vec<String>,
}

impl Plan {
  /// Checks the invariants from the data model: no duplicates in
  /// `files_to_index`, and no overlap with `files_to_remove`.
  pub fn validate(&self) -> PlanValidation {
    let mut errors = Vec::new();

    let mut seen = std::collections::HashSet::with_capacity(self.files_to_index.len());
    let mut has_duplicates = false;
    for path in &self.files_to_index {
      if !seen.insert(path) {
        has_duplicates = true;
      }
    }
    if has_duplicates {
      errors.push("Duplicate files detected in reindex plan".to_string());
    }

    let remove_set: std::collections::HashSet<_> = self.files_to_remove.iter().collect();
    if self.files_to_index.iter().any(|p| remove_set.contains(p)) {
      errors.push("Overlap between index and remove sets".to_string());
    }

    PlanValidation {
      valid: errors.is_empty(),
      errors,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StartupStage {
  WorkerSpawn,
  ModelDownload,
  DbInit,
  DbLoad,
  Ready,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageProgress {
  pub stage: StartupStage,
  pub message: String,
  pub progress: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct TextChunk {
  pub text: String,
  pub offset: u32,
}

/// `ceil(chars / 4)`, the contract token estimator shared by the chunker
/// and the embedding queue.
pub fn estimate_tokens(text: &str) -> u32 {
  let chars = text.chars().count();
  (chars as u32).div_ceil(4)
}
