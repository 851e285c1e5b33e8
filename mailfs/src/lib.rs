// Library crate for mailfs: re-export internal modules for reuse by the demo binary and embedders.

pub mod codec;
pub mod config;
pub mod error;
pub mod remote;
pub mod store;
pub mod vfs;
pub mod writeback;

pub use config::MailFsConfig;
pub use error::{MailFsError, Result};
pub use store::MailStore;
pub use vfs::fs::MailFs;
