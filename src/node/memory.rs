//! In-memory nodes
//!
//! `MemoryCluster` hands out `MemoryNode`s that share one journal. Every
//! operation a node performs is recorded with a cluster-wide sequence number,
//! so tests can assert ordering across nodes (e.g. the master re-exports
//! before any client mounts).
//!
//! A node simulates just enough of a Linux host for share orchestration:
//! files (`/etc/fstab`, `/etc/exports`), existing paths, and the live mount
//! table. `mount <dir>` resolves `<dir>` through the simulated fstab and
//! `umount -fl <dir>` removes it from the mount table; other commands succeed
//! unless a failure was injected with [`MemoryNode::fail_command`].

use crate::common::{Error, Result};
use crate::node::{CommandOutput, MountRecord, MountTable, RemoteNode};
use async_trait::async_trait;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// One recorded operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub seq: u64,
    pub node: String,
    pub op: NodeOp,
}

/// What a node was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOp {
    Execute(String),
    PathExists(String),
    Makedirs(String),
    ReadFile(String),
    AppendFile { path: String, contents: String },
    RemoveLines { path: String, pattern: String },
    MountTable,
}

#[derive(Debug, Default)]
struct Journal {
    next_seq: AtomicU64,
    entries: Mutex<Vec<JournalEntry>>,
}

impl Journal {
    fn record(&self, node: &str, op: NodeOp) {
        let mut entries = lock(&self.entries);
        // seq is taken under the lock so entries stay sorted
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        entries.push(JournalEntry {
            seq,
            node: node.to_string(),
            op,
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A set of simulated nodes sharing one operation journal
#[derive(Debug, Clone, Default)]
pub struct MemoryCluster {
    journal: Arc<Journal>,
    nodes: Arc<Mutex<BTreeMap<String, Arc<MemoryNode>>>>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the node with this alias.
    pub fn node(&self, alias: &str) -> Arc<MemoryNode> {
        let mut nodes = lock(&self.nodes);
        nodes
            .entry(alias.to_string())
            .or_insert_with(|| {
                Arc::new(MemoryNode {
                    alias: alias.to_string(),
                    journal: self.journal.clone(),
                    state: Mutex::new(NodeState::default()),
                })
            })
            .clone()
    }

    /// Every recorded operation, in order.
    pub fn journal(&self) -> Vec<JournalEntry> {
        lock(&self.journal.entries).clone()
    }

    /// Commands executed on one node, in order.
    pub fn commands_on(&self, alias: &str) -> Vec<String> {
        self.journal()
            .into_iter()
            .filter(|e| e.node == alias)
            .filter_map(|e| match e.op {
                NodeOp::Execute(cmd) => Some(cmd),
                _ => None,
            })
            .collect()
    }

    /// Appends performed on one node, as `(path, contents)`.
    pub fn appends_on(&self, alias: &str) -> Vec<(String, String)> {
        self.journal()
            .into_iter()
            .filter(|e| e.node == alias)
            .filter_map(|e| match e.op {
                NodeOp::AppendFile { path, contents } => Some((path, contents)),
                _ => None,
            })
            .collect()
    }

    pub fn clear_journal(&self) {
        lock(&self.journal.entries).clear();
    }
}

#[derive(Debug, Default)]
struct NodeState {
    files: BTreeMap<String, String>,
    paths: BTreeSet<String>,
    mounts: MountTable,
    failing_commands: Vec<String>,
    failing_paths: BTreeSet<String>,
    latency: Option<Duration>,
}

/// A simulated cluster node
#[derive(Debug)]
pub struct MemoryNode {
    alias: String,
    journal: Arc<Journal>,
    state: Mutex<NodeState>,
}

impl MemoryNode {
    /// Seed a file.
    pub fn set_file(&self, path: &str, contents: &str) {
        let mut state = lock(&self.state);
        state.files.insert(path.to_string(), contents.to_string());
        state.paths.insert(path.to_string());
    }

    /// Current file contents, if the file exists.
    pub fn file(&self, path: &str) -> Option<String> {
        lock(&self.state).files.get(path).cloned()
    }

    /// Mark a path (file, directory or link) as existing.
    pub fn add_path(&self, path: &str) {
        lock(&self.state).paths.insert(path.to_string());
    }

    pub fn has_path(&self, path: &str) -> bool {
        lock(&self.state).paths.contains(path)
    }

    /// Seed the live mount table.
    pub fn add_mount(&self, device: &str, mount_point: &str, fs_type: &str) {
        lock(&self.state).mounts.insert(
            device,
            MountRecord {
                mount_point: mount_point.to_string(),
                fs_type: fs_type.to_string(),
                options: "rw".to_string(),
            },
        );
    }

    pub fn mounts(&self) -> MountTable {
        lock(&self.state).mounts.clone()
    }

    /// Make every command starting with `prefix` exit with status 1.
    pub fn fail_command(&self, prefix: &str) {
        lock(&self.state).failing_commands.push(prefix.to_string());
    }

    /// Delay every command by `latency` before it runs.
    pub fn set_latency(&self, latency: Duration) {
        lock(&self.state).latency = Some(latency);
    }

    /// Make every file operation on `path` fail.
    pub fn fail_path(&self, path: &str) {
        lock(&self.state).failing_paths.insert(path.to_string());
    }

    fn record(&self, op: NodeOp) {
        self.journal.record(&self.alias, op);
    }

    fn check_path(&self, state: &NodeState, path: &str) -> Result<()> {
        if state.failing_paths.contains(path) {
            return Err(Error::remote_io(&self.alias, path, "injected failure"));
        }
        Ok(())
    }

    /// Apply the side effects of the commands the orchestrator issues.
    fn simulate(state: &mut NodeState, command: &str) -> (i32, String) {
        let words: Vec<&str> = command.split_whitespace().collect();
        match words.as_slice() {
            ["mount", dir] => {
                let fstab = state.files.get("/etc/fstab").cloned().unwrap_or_default();
                let entry = fstab.lines().find_map(|line| {
                    let fields: Vec<&str> = line.split_whitespace().collect();
                    match fields.as_slice() {
                        [device, mount_point, fs_type, options, ..] if mount_point == dir => {
                            Some((device.to_string(), fs_type.to_string(), options.to_string()))
                        }
                        _ => None,
                    }
                });
                let Some((device, fs_type, options)) = entry else {
                    return (1, format!("mount: can't find {} in /etc/fstab", dir));
                };
                if !state.paths.contains(*dir) {
                    return (32, format!("mount: mount point {} does not exist", dir));
                }
                state.mounts.insert(
                    device,
                    MountRecord {
                        mount_point: dir.to_string(),
                        fs_type,
                        options,
                    },
                );
                (0, String::new())
            }
            ["umount", "-fl", dir] => {
                if state.mounts.remove_mount_point(dir) == 0 {
                    return (32, format!("umount: {}: not mounted", dir));
                }
                (0, String::new())
            }
            ["ln", "-s", _target, link] => {
                if state.paths.contains(*link) {
                    let message = format!("ln: failed to create symbolic link '{}'", link);
                    return (1, format!("{}: File exists", message));
                }
                state.paths.insert(link.to_string());
                (0, String::new())
            }
            _ => (0, String::new()),
        }
    }
}

#[async_trait]
impl RemoteNode for MemoryNode {
    fn alias(&self) -> &str {
        &self.alias
    }

    async fn execute(&self, command: &str, ignore_exit_status: bool) -> Result<CommandOutput> {
        let latency = lock(&self.state).latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.record(NodeOp::Execute(command.to_string()));
        let mut state = lock(&self.state);

        let (status, output) = if state
            .failing_commands
            .iter()
            .any(|prefix| command.starts_with(prefix.as_str()))
        {
            (1, "injected failure".to_string())
        } else {
            Self::simulate(&mut state, command)
        };

        if status != 0 && !ignore_exit_status {
            return Err(Error::remote_execution(&self.alias, command, status, output));
        }
        Ok(CommandOutput {
            output,
            exit_status: status,
        })
    }

    async fn path_exists(&self, path: &str) -> Result<bool> {
        self.record(NodeOp::PathExists(path.to_string()));
        Ok(lock(&self.state).paths.contains(path))
    }

    async fn makedirs(&self, path: &str) -> Result<()> {
        self.record(NodeOp::Makedirs(path.to_string()));
        let mut state = lock(&self.state);
        self.check_path(&state, path)?;
        let mut current = String::new();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current.push('/');
            current.push_str(component);
            state.paths.insert(current.clone());
        }
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        self.record(NodeOp::ReadFile(path.to_string()));
        let state = lock(&self.state);
        self.check_path(&state, path)?;
        state
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| Error::remote_io(&self.alias, path, "No such file or directory"))
    }

    async fn append_file(&self, path: &str, contents: &str) -> Result<()> {
        self.record(NodeOp::AppendFile {
            path: path.to_string(),
            contents: contents.to_string(),
        });
        let mut state = lock(&self.state);
        self.check_path(&state, path)?;
        state.files.entry(path.to_string()).or_default().push_str(contents);
        state.paths.insert(path.to_string());
        Ok(())
    }

    async fn remove_lines_matching(&self, path: &str, pattern: &Regex) -> Result<()> {
        self.record(NodeOp::RemoveLines {
            path: path.to_string(),
            pattern: pattern.as_str().to_string(),
        });
        let mut state = lock(&self.state);
        self.check_path(&state, path)?;
        if let Some(contents) = state.files.get_mut(path) {
            *contents = crate::node::ssh::filter_lines(contents, pattern);
        }
        Ok(())
    }

    async fn mount_table(&self) -> Result<MountTable> {
        self.record(NodeOp::MountTable);
        Ok(lock(&self.state).mounts.clone())
    }
}
