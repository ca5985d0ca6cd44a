//! # nfsshare
//!
//! Shares a path on a cluster's master node with every worker over NFS:
//! - Idempotent `/etc/exports` editing on the master
//! - Idempotent `/etc/fstab` editing and mounting on each worker
//! - Bounded parallelism across workers with a join barrier
//! - Hooks for initial setup, node addition and node removal
//!
//! ## Architecture
//!
//! ```text
//!        ┌───────────────────────────┐
//!        │     ShareOrchestrator     │
//!        │  run / add / remove node  │
//!        └─────┬───────────────┬─────┘
//!   once, first│               │ one task per node
//!        ┌─────▼─────┐   ┌─────▼─────────┐
//!        │  exports  │   │ ExecutionPool │
//!        │ (master)  │   │  └─ fstab     │
//!        └─────┬─────┘   └─────┬─────────┘
//!              │  RemoteNode   │
//!        ┌─────▼───────────────▼─────┐
//!        │   SshNode / MemoryNode    │
//!        └───────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Initial setup: export /mnt and mount it at /share on every worker
//! nfsshare --config cluster.toml run
//!
//! # A node joined or is leaving
//! nfsshare --config cluster.toml add-node node004
//! nfsshare --config cluster.toml remove-node node004
//!
//! # Show the lines that would be written
//! nfsshare --config cluster.toml plan --json
//! ```

pub mod common;
pub mod node;
pub mod share;

// Re-export commonly used types
pub use common::{ClusterConfig, Error, Result, ShareConfig};
pub use node::{NodeRef, RemoteNode};
pub use share::{ClusterSetup, ShareOrchestrator};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
