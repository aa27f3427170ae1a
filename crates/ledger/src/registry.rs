//! Parser version registry (spec §4.1): a static table mapping file
//! extension to its current parser version, plus a per-version changelog.

use indexcore::PVer;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Current parser version per supported extension. Bumping an entry here
/// marks every file of that extension `outdated` on the next plan.
static PARSER_VERSIONS: LazyLock<HashMap<&'static str, PVer>> = LazyLock::new(|| {
  HashMap::from([
    ("pdf", 2),
    ("doc", 1),
    ("docx", 2),
    ("txt", 1),
    ("md", 1),
    ("rtf", 2),
    ("xlsx", 1),
    ("xls", 1),
    ("csv", 1),
    ("tsv", 1),
  ])
});

/// Per-extension history of what changed at each parser version bump.
static VERSION_HISTORY: LazyLock<HashMap<&'static str, HashMap<PVer, &'static str>>> = LazyLock::new(|| {
  HashMap::from([
    (
      "pdf",
      HashMap::from([
        (1, "initial text extraction"),
        (2, "layout-aware extraction, preserves table structure"),
      ]),
    ),
    ("docx", HashMap::from([(1, "initial extraction"), (2, "extracts headers and footers")])),
    ("rtf", HashMap::from([(1, "initial extraction"), (2, "strips control words more reliably")])),
  ])
});

/// Current parser version for `ext` (case-insensitive). Unknown extensions
/// return `0` ("unknown / pre-tracking").
pub fn get_parser_version(ext: &str) -> PVer {
  PARSER_VERSIONS.get(ext.to_lowercase().as_str()).copied().unwrap_or(0)
}

/// Changelog for `ext`, if any is recorded.
pub fn get_version_history(ext: &str) -> Option<&'static HashMap<PVer, &'static str>> {
  VERSION_HISTORY.get(ext.to_lowercase().as_str())
}
