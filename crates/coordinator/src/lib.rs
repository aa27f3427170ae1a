pub mod drain;
pub mod error;
pub mod startup;

pub use drain::{StatsFuture, wait_for_queue_to_drain};
pub use error::CoordinatorError;
pub use startup::{StartupCoordinator, StartupError, StartupHandle, StartupHooks};
