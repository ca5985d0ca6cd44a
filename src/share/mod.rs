//! NFS share orchestration
//!
//! - `mapping`: server → client paths and NFS option strings
//! - `exports`: `/etc/exports` editing on the master
//! - `fstab`: `/etc/fstab` editing and mounting on each client
//! - `pool`: bounded per-node task execution with a join barrier
//! - `orchestrator`: lifecycle hooks tying the above together

pub mod exports;
pub mod fstab;
pub mod mapping;
pub mod orchestrator;
pub mod pool;

pub use exports::{export_line, export_paths, ExportReport};
pub use fstab::{fstab_line, mount_shares, network_device, MountReport};
pub use mapping::{ExportSettings, MountSettings, ShareMapping};
pub use orchestrator::{ClusterSetup, SetupOptions, SetupReport, ShareOrchestrator, SharePlan};
pub use pool::{ExecutionPool, JobHandle, JobOutcome, JoinReport};
