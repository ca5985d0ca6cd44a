//! Remote node transports
//!
//! The orchestration code only talks to nodes through [`RemoteNode`]:
//! - `SshNode` runs everything through the system `ssh` client
//! - `MemoryNode` simulates a node's fstab, exports and mount table for tests

pub mod memory;
pub mod mount_table;
pub mod ssh;

pub use memory::{JournalEntry, MemoryCluster, MemoryNode, NodeOp};
pub use mount_table::{MountRecord, MountTable};
pub use ssh::SshNode;

use crate::common::Result;
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;

/// Shared handle to a node
pub type NodeRef = Arc<dyn RemoteNode>;

/// Output of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub output: String,
    pub exit_status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.output.lines()
    }
}

/// Operations the orchestrator needs on a cluster node.
///
/// `execute` fails with `Error::RemoteExecution` on a non-zero exit unless
/// `ignore_exit_status` is set. File operations fail with `Error::RemoteIo`.
#[async_trait]
pub trait RemoteNode: Send + Sync {
    /// Network alias other nodes use to reach this one
    fn alias(&self) -> &str;

    async fn execute(&self, command: &str, ignore_exit_status: bool) -> Result<CommandOutput>;

    async fn path_exists(&self, path: &str) -> Result<bool>;

    /// Create a directory and its parents
    async fn makedirs(&self, path: &str) -> Result<()>;

    async fn read_file(&self, path: &str) -> Result<String>;

    /// Append in a single open/append/close pass, creating the file if needed
    async fn append_file(&self, path: &str, contents: &str) -> Result<()>;

    /// Drop every line of `path` matched by `pattern`
    async fn remove_lines_matching(&self, path: &str, pattern: &Regex) -> Result<()>;

    async fn mount_table(&self) -> Result<MountTable>;
}
