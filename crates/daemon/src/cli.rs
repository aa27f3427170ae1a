//! Command-line surface for the indexing daemon (spec §6, ambient).
//! Flag shape follows the teacher's `cli` binary: a small `clap` struct,
//! `tracing-subscriber` wired from a `--log-level` flag.

use clap::Parser as ClapParser;
use std::path::PathBuf;

#[derive(Debug, ClapParser)]
#[command(name = "indexd", about = "Local semantic-search indexing daemon")]
pub struct Args {
  /// Directory holding the ledger, config and chunk tables.
  #[arg(long, value_name = "PATH")]
  pub db_dir: PathBuf,

  /// Root directory to watch; may be passed more than once.
  #[arg(long = "watch", value_name = "PATH")]
  pub watch: Vec<PathBuf>,

  /// `error`, `warn`, `info`, `debug` or `trace`.
  #[arg(long, default_value = "info")]
  pub log_level: String,

  /// Path to the isolated embedder subprocess binary.
  #[arg(long, default_value = "embedder")]
  pub embedder_cmd: String,
}

pub fn init_tracing(log_level: &str) {
  let filter = tracing_subscriber::EnvFilter::try_new(log_level).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
  tracing_subscriber::fmt().with_env_filter(filter).init();
}
