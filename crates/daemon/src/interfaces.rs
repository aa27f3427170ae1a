//! External interface contracts (spec §6) the production host supplies:
//! a vector store and a per-extension parser. Neither internals is in
//! scope here; these traits plus a minimal in-memory/plaintext stand-in
//! exist so the rest of the crate has something concrete to test against.

use indexcore::{ChunkRecord, PVer};
use std::path::Path;
use std::sync::Mutex;

/// One hit from `vector_search`, carrying its distance (ascending order,
/// smaller is closer).
#[derive(Debug, Clone)]
pub struct SearchHit {
  pub record: ChunkRecord,
  pub distance: f32,
}

/// Append-only-ish row store keyed by an opaque predicate closure
/// standing in for the contract's SQL-like predicate strings.
pub trait VectorTable: Send + Sync {
  fn add(&self, rows: Vec<ChunkRecord>);
  fn delete(&self, predicate: &dyn Fn(&ChunkRecord) -> bool);
  fn count_rows(&self) -> usize;
  fn query(&self, predicate: Option<&dyn Fn(&ChunkRecord) -> bool>, limit: Option<usize>) -> Vec<ChunkRecord>;
  fn vector_search(&self, query_vector: &[f32], predicate: Option<&dyn Fn(&ChunkRecord) -> bool>, limit: usize) -> Vec<SearchHit>;
}

pub trait VectorStore: Send + Sync {
  fn create_table(&self, name: &str, sample_rows: Vec<ChunkRecord>) -> std::sync::Arc<dyn VectorTable>;
}

pub struct InMemoryTable {
  rows: Mutex<Vec<ChunkRecord>>,
}

impl VectorTable for InMemoryTable {
  fn add(&self, mut rows: Vec<ChunkRecord>) {
    self.rows.lock().expect("vector table mutex poisoned").append(&mut rows);
  }

  fn delete(&self, predicate: &dyn Fn(&ChunkRecord) -> bool) {
    self.rows.lock().expect("vector table mutex poisoned").retain(|r| !predicate(r));
  }

  fn count_rows(&self) -> usize {
    self.rows.lock().expect("vector table mutex poisoned").len()
  }

  fn query(&self, predicate: Option<&dyn Fn(&ChunkRecord) -> bool>, limit: Option<usize>) -> Vec<ChunkRecord> {
    let rows = self.rows.lock().expect("vector table mutex poisoned");
    let mut out: Vec<ChunkRecord> = match predicate {
      Some(pred) => rows.iter().filter(|r| pred(r)).cloned().collect(),
      None => rows.clone(),
    };
    if let Some(limit) = limit {
      out.truncate(limit);
    }
    out
  }

  fn vector_search(&self, query_vector: &[f32], predicate: Option<&dyn Fn(&ChunkRecord) -> bool>, limit: usize) -> Vec<SearchHit> {
    let rows = self.rows.lock().expect("vector table mutex poisoned");
    let mut hits: Vec<SearchHit> = rows
      .iter()
      .filter(|r| match predicate {
        Some(pred) => pred(r),
        None => true,
      })
      .map(|r| SearchHit {
        record: r.clone(),
        distance: l2_distance(query_vector, &r.vector),
      })
      .collect();
    hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(limit);
    hits
  }
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
  a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt()
}

pub struct InMemoryVectorStore {
  tables: Mutex<std::collections::HashMap<String, std::sync::Arc<dyn VectorTable>>>,
}

impl Default for InMemoryVectorStore {
  fn default() -> Self {
    Self {
      tables: Mutex::new(std::collections::HashMap::new()),
    }
  }
}

impl VectorStore for InMemoryVectorStore {
  fn create_table(&self, name: &str, sample_rows: Vec<ChunkRecord>) -> std::sync::Arc<dyn VectorTable> {
    let table: std::sync::Arc<dyn VectorTable> = std::sync::Arc::new(InMemoryTable { rows: Mutex::new(sample_rows) });
    self.tables.lock().expect("vector store mutex poisoned").insert(name.to_string(), table.clone());
    table
  }
}

/// Best-effort text extraction for one file extension. Never throws:
/// unreadable or corrupt input yields an empty string.
pub trait Parser: Send + Sync {
  fn parse(&self, path: &Path) -> String;
  fn version(&self) -> PVer;
}

/// The one concrete parser this crate owns: plain UTF-8 text, used for
/// `txt`/`md`/`csv`/`tsv`. Richer formats are a host-supplied `Parser`.
pub struct PlaintextParser;

impl Parser for PlaintextParser {
  fn parse(&self, path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_default()
  }

  fn version(&self) -> PVer {
    1
  }
}
