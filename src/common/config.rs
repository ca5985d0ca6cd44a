//! Configuration for nfsshare
//!
//! A cluster file names the master, the worker nodes, how to reach them over
//! SSH and the path to share. Values can be overridden from the environment
//! with the `NFSSHARE__` prefix, e.g. `NFSSHARE__SHARE__CLIENT_PATH=/share`.

use crate::common::{Error, Result};
use crate::share::pool::MAX_WORKERS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default options for `/etc/exports` lines
pub const DEFAULT_EXPORT_SETTINGS: &str = "async,no_root_squash,no_subtree_check,rw";

/// Default options for `/etc/fstab` lines
pub const DEFAULT_MOUNT_SETTINGS: &str = "vers=3,user,rw,exec,noauto";

/// Environment prefix for overrides
const ENV_PREFIX: &str = "NFSSHARE";

/// Whole-cluster configuration loaded by the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// The node exporting the share
    pub master: NodeSpec,

    /// Every node of the cluster (the master may be listed too)
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,

    /// SSH transport settings
    #[serde(default)]
    pub ssh: SshConfig,

    /// What to share and how
    pub share: ShareConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// A cluster node as listed in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Network alias, as other nodes resolve it
    pub alias: String,

    /// Address used to reach the node over SSH (defaults to the alias)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl NodeSpec {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            host: None,
        }
    }

    /// Address to connect to
    pub fn address(&self) -> &str {
        self.host.as_deref().unwrap_or(&self.alias)
    }
}

/// SSH client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    /// Remote user
    #[serde(default = "default_ssh_user")]
    pub user: String,

    /// Remote port
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Private key passed with `-i`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,

    /// Extra `-o` options
    #[serde(default = "default_ssh_options")]
    pub options: Vec<String>,
}

fn default_ssh_user() -> String {
    "root".to_string()
}
fn default_ssh_port() -> u16 {
    22
}
fn default_ssh_options() -> Vec<String> {
    vec![
        "BatchMode=yes".to_string(),
        "StrictHostKeyChecking=no".to_string(),
    ]
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: default_ssh_user(),
            port: default_ssh_port(),
            identity_file: None,
            options: default_ssh_options(),
        }
    }
}

/// Share settings exposed to the hosting system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareConfig {
    /// Path on the master to export
    pub server_path: String,

    /// Mount point on the clients (defaults to `server_path`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_path: Option<String>,

    /// Options for the export line, e.g. `sync,no_root_squash,no_subtree_check,rw`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_nfs_settings: Option<String>,

    /// Options for the fstab line, e.g. `vers=3,user,rw,exec,noauto`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_nfs_settings: Option<String>,

    /// Symlink `client_path` to `server_path` on the master when they differ
    #[serde(default = "default_true")]
    pub link_on_master: bool,

    /// Start portmap/nfs on the master before exporting
    #[serde(default)]
    pub start_nfs_server: bool,

    /// Maximum number of nodes configured concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_true() -> bool {
    true
}
fn default_workers() -> usize {
    20
}

impl ShareConfig {
    pub fn new(server_path: impl Into<String>) -> Self {
        Self {
            server_path: server_path.into(),
            client_path: None,
            export_nfs_settings: None,
            mount_nfs_settings: None,
            link_on_master: true,
            start_nfs_server: false,
            workers: default_workers(),
        }
    }

    pub fn with_client_path(mut self, client_path: impl Into<String>) -> Self {
        self.client_path = Some(client_path.into());
        self
    }

    /// Client path with the default applied
    pub fn client_path(&self) -> &str {
        self.client_path.as_deref().unwrap_or(&self.server_path)
    }
}

impl ClusterConfig {
    /// Load from a TOML file, then apply `NFSSHARE__*` environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let cfg: ClusterConfig = settings.try_deserialize()?;
        cfg.validate()?;
        tracing::debug!("Loaded cluster config from {}", path.display());
        Ok(cfg)
    }

    /// Parse from a TOML string (no environment overrides).
    pub fn from_toml(contents: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(contents, config::FileFormat::Toml))
            .build()?;
        let cfg: ClusterConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.master.alias.trim().is_empty() {
            return Err(Error::InvalidConfig("master alias cannot be empty".into()));
        }
        if let Some(node) = self.nodes.iter().find(|n| n.alias.trim().is_empty()) {
            return Err(Error::InvalidConfig(format!(
                "node alias cannot be empty (host {:?})",
                node.host
            )));
        }
        if self.share.workers == 0 || self.share.workers > MAX_WORKERS {
            return Err(Error::InvalidConfig(format!(
                "workers must be between 1 and {}, got {}",
                MAX_WORKERS,
                self.share.workers
            )));
        }
        Ok(())
    }

    /// Whether `alias` appears in `nodes`
    pub fn node_listed(&self, alias: &str) -> bool {
        self.nodes.iter().any(|n| n.alias == alias)
    }

    /// Look up a node by alias, including the master.
    pub fn node(&self, alias: &str) -> Option<&NodeSpec> {
        if self.master.alias == alias {
            return Some(&self.master);
        }
        self.nodes.iter().find(|n| n.alias == alias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [master]
        alias = "master"
        host = "10.0.0.1"

        [[nodes]]
        alias = "node001"

        [[nodes]]
        alias = "node002"
        host = "10.0.0.3"

        [share]
        server_path = "/mnt"
        client_path = "/share"
        export_nfs_settings = "sync,no_root_squash,no_subtree_check,rw"
    "#;

    #[test]
    fn test_parse_cluster_config() {
        let cfg = ClusterConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(cfg.master.address(), "10.0.0.1");
        assert_eq!(cfg.nodes.len(), 2);
        assert_eq!(cfg.nodes[0].address(), "node001");
        assert_eq!(cfg.share.client_path(), "/share");
        assert!(cfg.share.link_on_master);
        assert!(!cfg.share.start_nfs_server);
        assert_eq!(cfg.share.workers, 20);
        assert_eq!(cfg.share.mount_nfs_settings, None);
        assert_eq!(cfg.ssh.user, "root");
        assert_eq!(cfg.ssh.port, 22);
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn test_client_path_defaults_to_server_path() {
        let share = ShareConfig::new("/data");
        assert_eq!(share.client_path(), "/data");
        let share = share.with_client_path("/scratch");
        assert_eq!(share.client_path(), "/scratch");
    }

    #[test]
    fn test_missing_server_path_rejected() {
        let toml = r#"
            [master]
            alias = "master"
            [share]
            client_path = "/share"
        "#;
        assert!(ClusterConfig::from_toml(toml).is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let toml = r#"
            [master]
            alias = "master"
            [share]
            server_path = "/data"
            workers = 0
        "#;
        assert!(matches!(
            ClusterConfig::from_toml(toml),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_oversized_workers_rejected() {
        let mut cfg = ClusterConfig::from_toml(SAMPLE).unwrap();
        cfg.share.workers = usize::MAX;
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_node_lookup() {
        let cfg = ClusterConfig::from_toml(SAMPLE).unwrap();
        assert!(cfg.node("master").is_some());
        assert_eq!(cfg.node("node002").unwrap().address(), "10.0.0.3");
        assert!(cfg.node("node009").is_none());
        assert!(!cfg.node_listed("master"));
        assert!(cfg.node_listed("node001"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cluster.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let cfg = ClusterConfig::load(&path).unwrap();
        assert_eq!(cfg.share.server_path, "/mnt");
    }
}
