pub mod error;
pub mod messenger;
pub mod protocol;
pub mod supervisor;

pub use error::EmbedderError;
pub use messenger::{ChannelChildHandle, ChannelMessenger, ChildMessenger, ProcessMessenger};
pub use protocol::{ChildMessage, ParentMessage};
pub use supervisor::{EmbedderSupervisor, ResourceUsage, SupervisorConfig, restart_required};
