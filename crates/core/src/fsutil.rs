//! File hash and extension helpers (spec §4.4).

use md5::{Digest, Md5};
use std::path::Path;

use crate::types::FHash;

/// Compound extensions that are recognised as a single unit rather than
/// just their final segment.
const COMPOUND_EXTENSIONS: &[&str] = &["tar.gz", "tar.bz2", "json.gz"];

/// `md5(path + ":" + size + ":" + mtime_ms)` as 32 lowercase hex chars.
/// Empty string on stat failure. Derived only from metadata, never content.
pub fn get_file_hash(path: &str) -> FHash {
  let Ok(meta) = std::fs::metadata(path) else {
    return String::new();
  };
  let mtime_ms = meta
    .modified()
    .ok()
    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
    .map(|d| d.as_millis())
    .unwrap_or(0);

  let input = format!("{path}:{}:{mtime_ms}", meta.len());
  let mut hasher = Md5::new();
  hasher.update(input.as_bytes());
  hex::encode(hasher.finalize())
}

/// Lowercase extension, with compound-extension and dotfile handling.
/// Returns empty string for extensionless files (`Makefile`, `README`).
pub fn get_file_extension(path: &str) -> String {
  let name = Path::new(path)
    .file_name()
    .and_then(|n| n.to_str())
    .unwrap_or("")
    .to_lowercase();

  for compound in COMPOUND_EXTENSIONS {
    if name.ends_with(&format!(".{compound}")) {
      return compound.to_string();
    }
  }

  // A leading-dot file with no further dots (`.gitignore`) has its whole
  // name, minus the leading dot, as the extension.
  if let Some(rest) = name.strip_prefix('.')
    && !rest.contains('.')
  {
    return rest.to_string();
  }

  match name.rsplit_once('.') {
    Some((_, ext)) if !ext.is_empty() => ext.to_string(),
    _ => String::new(),
  }
}

/// `true` iff `supported` is empty (meaning "all") or contains the path's
/// extension.
pub fn is_file_supported(path: &str, supported: &[String]) -> bool {
  if supported.is_empty() {
    return true;
  }
  let ext = get_file_extension(path);
  supported.iter().any(|s| s.eq_ignore_ascii_case(&ext))
}
