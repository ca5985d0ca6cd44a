//! Common utilities and types shared across nfsshare

pub mod config;
pub mod error;
pub mod utils;

pub use config::{
    ClusterConfig, NodeSpec, ShareConfig, SshConfig, DEFAULT_EXPORT_SETTINGS,
    DEFAULT_MOUNT_SETTINGS,
};
pub use error::{Error, NodeFailure, Result};
pub use utils::{shell_quote, validate_share_path};
