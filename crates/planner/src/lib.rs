//! Reindex planner (spec §4.5/§4.6): decides, from the ledger cache and a
//! fresh filesystem listing, which files need (re)indexing and which
//! ledger rows have gone stale. Grounded on the teacher's
//! `classify_changes`/`is_file_modified` pair: two maps compared by path,
//! a small ordered list of reasons, no surprises.

pub mod error;

use indexcore::{FileState, FileStatus, PathKey, Plan, PlanStats, PlanValidation, Reason, get_file_extension, get_file_hash, is_file_supported};
use ledger::get_parser_version;
use std::collections::{HashMap, HashSet};
use tracing::warn;

pub use error::PlannerError;

const DEFAULT_RETRY_INTERVAL_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct PlanOptions {
  pub supported_extensions: Vec<String>,
  pub bundle_patterns: Vec<String>,
  pub skip_bundles: bool,
  pub retry_interval_hours: i64,
  pub force: bool,
  pub in_flight: HashSet<PathKey>,
}

impl Default for PlanOptions {
  fn default() -> Self {
    Self {
      supported_extensions: Vec::new(),
      bundle_patterns: Vec::new(),
      skip_bundles: false,
      retry_interval_hours: DEFAULT_RETRY_INTERVAL_HOURS,
      force: false,
      in_flight: HashSet::new(),
    }
  }
}

/// True iff `path` contains any of `patterns` as a plain substring. The
/// planner's patterns are simple path fragments (`node_modules`,
/// `.bundle.js`), not full globs — matching the scope of `bundle_patterns`.
fn matches_any_pattern(path: &str, patterns: &[String]) -> bool {
  patterns.iter().any(|p| path.contains(p.as_str()))
}

/// `true` when `age_hours(last_retry) >= retry_interval_hours`, treating an
/// empty or unparsable `last_retry` as "eligible now".
fn retry_is_due(last_retry: &str, retry_interval_hours: i64) -> bool {
  if last_retry.is_empty() {
    return true;
  }
  let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(last_retry) else {
    return true;
  };
  let age = chrono::Utc::now().signed_duration_since(parsed.with_timezone(&chrono::Utc));
  age >= chrono::Duration::hours(retry_interval_hours)
}

/// Cause behind a positive `should_reindex` verdict for an indexed file,
/// used to choose between `Reason::Modified` and `Reason::Outdated`.
enum ReindexCause {
  New,
  ParserOutdated,
  Unsupported,
  RetryDue,
  ContentChanged,
  None,
}

fn classify_reindex(path: &str, record: Option<&FileStatus>, supported_extensions: &[String], retry_interval_hours: i64) -> ReindexCause {
  let Some(record) = record else {
    return ReindexCause::New;
  };

  if !is_file_supported(path, supported_extensions) {
    return ReindexCause::Unsupported;
  }

  let ext = get_file_extension(path);
  if record.parser_version < get_parser_version(&ext) {
    return ReindexCause::ParserOutdated;
  }

  if record.status.is_failing() && retry_is_due(&record.last_retry, retry_interval_hours) {
    return ReindexCause::RetryDue;
  }

  if record.file_hash != get_file_hash(path) {
    return ReindexCause::ContentChanged;
  }

  ReindexCause::None
}

/// `shouldReindex(path, record)` (spec §4.6): `true` iff the file should be
/// re-submitted for indexing given its current ledger row, if any.
pub fn should_reindex(path: &str, record: Option<&FileStatus>, supported_extensions: &[String], retry_interval_hours: i64) -> bool {
  !matches!(
    classify_reindex(path, record, supported_extensions, retry_interval_hours),
    ReindexCause::Unsupported | ReindexCause::None
  )
}

/// The lower-level decision function (spec §4.5, steps 1-8). Returns the
/// ordered set of paths to (re)index and the reason recorded for each.
pub fn determine_files_to_reindex(all_files: &[String], cache: &HashMap<PathKey, FileStatus>, options: &PlanOptions) -> (Vec<PathKey>, HashMap<PathKey, Reason>) {
  let mut to_index = Vec::new();
  let mut reasons = HashMap::new();

  for path in all_files {
    if options.force {
      to_index.push(path.clone());
      reasons.insert(path.clone(), Reason::ForceReindex);
      continue;
    }

    if options.in_flight.contains(path) {
      continue;
    }

    if !is_file_supported(path, &options.supported_extensions) {
      continue;
    }

    if options.skip_bundles && matches_any_pattern(path, &options.bundle_patterns) {
      continue;
    }

    let record = cache.get(path);
    let Some(record) = record else {
      to_index.push(path.clone());
      reasons.insert(path.clone(), Reason::NewFile);
      continue;
    };

    if record.status.is_failing() {
      if retry_is_due(&record.last_retry, options.retry_interval_hours) {
        to_index.push(path.clone());
        reasons.insert(path.clone(), Reason::RetryFailed);
      }
      continue;
    }

    if record.status == FileState::Outdated {
      to_index.push(path.clone());
      reasons.insert(path.clone(), Reason::Outdated);
      continue;
    }

    match classify_reindex(path, Some(record), &options.supported_extensions, options.retry_interval_hours) {
      ReindexCause::ParserOutdated => {
        to_index.push(path.clone());
        reasons.insert(path.clone(), Reason::Outdated);
      }
      ReindexCause::ContentChanged => {
        to_index.push(path.clone());
        reasons.insert(path.clone(), Reason::Modified);
      }
      _ => {}
    }
  }

  (to_index, reasons)
}

/// Files present in `cache` under a watched root but no longer present on
/// disk.
fn determine_files_to_remove(watched_roots: &[String], all_files: &[String], cache: &HashMap<PathKey, FileStatus>) -> Vec<PathKey> {
  let present: HashSet<&str> = all_files.iter().map(|s| s.as_str()).collect();
  cache
    .keys()
    .filter(|path| !present.contains(path.as_str()))
    .filter(|path| watched_roots.iter().any(|root| path.starts_with(root.as_str())))
    .cloned()
    .collect()
}

/// Builds a full reindex plan: files to (re)index, files whose ledger rows
/// are now orphaned, and summary stats.
pub fn plan(watched_roots: &[String], all_files: &[String], cache: &HashMap<PathKey, FileStatus>, options: &PlanOptions) -> Plan {
  let (files_to_index, reasons) = determine_files_to_reindex(all_files, cache, options);
  let files_to_remove = determine_files_to_remove(watched_roots, all_files, cache);

  let mut stats = PlanStats {
    total: all_files.len(),
    ..Default::default()
  };
  for reason in reasons.values() {
    match reason {
      Reason::NewFile | Reason::ForceReindex => stats.new += 1,
      Reason::Modified => stats.modified += 1,
      Reason::RetryFailed => stats.failed += 1,
      Reason::Outdated => stats.outdated += 1,
    }
  }
  stats.skipped = all_files.len().saturating_sub(files_to_index.len());

  let plan = Plan {
    files_to_index,
    files_to_remove,
    reasons,
    stats,
  };

  let validation = plan.validate();
  if !validation.valid {
    warn!(errors = ?validation.errors, "reindex plan failed validation");
  }
  plan
}

/// `plan()` followed by `Plan::validate()`, returning an error if the
/// built plan violates either invariant.
pub fn plan_checked(watched_roots: &[String], all_files: &[String], cache: &HashMap<PathKey, FileStatus>, options: &PlanOptions) -> Result<Plan, PlannerError> {
  let built = plan(watched_roots, all_files, cache, options);
  let validation: PlanValidation = built.validate();
  if validation.valid { Ok(built) } else { Err(PlannerError::Invalid(validation.errors)) }
}
