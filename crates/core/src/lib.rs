pub mod config;
pub mod error;
pub mod fsutil;
pub mod types;

pub use config::{AppConfig, AppSettings, CpuThrottle};
pub use error::ConfigError;
pub use fsutil::{get_file_extension, get_file_hash, is_file_supported};
pub use types::{
  ChunkRecord, FHash, FileState, FileStatus, PVer, PathKey, Plan, PlanStats, PlanValidation,
  Reason, StageProgress, StartupStage, TextChunk, estimate_tokens,
};
