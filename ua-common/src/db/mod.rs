//! Database initialization and shared access helpers

pub mod init;
pub mod retry;
pub mod settings;

pub use init::*;
pub use retry::retry_on_lock;
pub use settings::{delete_setting, get_setting, set_setting};
