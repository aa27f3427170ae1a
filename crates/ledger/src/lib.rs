pub mod error;
pub mod ledger;
pub mod registry;

pub use error::LedgerError;
pub use ledger::{FileStatusLedger, update_or_noop};
pub use registry::{get_parser_version, get_version_history};
