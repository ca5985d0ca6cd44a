//! Share orchestrator
//!
//! Drives the three cluster lifecycle events:
//! - `run`: link on master, optionally start nfsd, export to every worker, mount everywhere
//! - `on_add_node`: export to the new node and mount there
//! - `on_remove_node`: unmount on the leaving node (exports are left in place)
//!
//! The export step always completes on the master before the first mount
//! task is dispatched.

use crate::common::{shell_quote, Result, ShareConfig};
use crate::node::{NodeRef, RemoteNode};
use crate::share::exports::{export_line, export_paths, ExportReport};
use crate::share::fstab::{fstab_line, mount_shares, MountReport};
use crate::share::mapping::{ExportSettings, MountSettings, ShareMapping};
use crate::share::pool::{ExecutionPool, MAX_WORKERS};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Commands that bring up the NFS server on the master; the bool marks
/// commands whose exit status is ignored.
const NFS_SERVER_START: &[(&str, bool)] = &[
    ("/etc/init.d/portmap start", false),
    ("mount -t rpc_pipefs sunrpc /var/lib/nfs/rpc_pipefs/", true),
    ("/etc/init.d/nfs start", false),
];

/// Lifecycle hooks called by the cluster manager
#[async_trait]
pub trait ClusterSetup: Send + Sync {
    /// Initial setup of the whole cluster
    async fn run(&self, nodes: &[NodeRef], master: &NodeRef) -> Result<()>;

    /// `node` joined the cluster (it is already part of `nodes`)
    async fn on_add_node(
        &self,
        node: &NodeRef,
        nodes: &[NodeRef],
        master: &NodeRef,
    ) -> Result<()>;

    /// `node` is leaving the cluster
    async fn on_remove_node(
        &self,
        node: &NodeRef,
        nodes: &[NodeRef],
        master: &NodeRef,
    ) -> Result<()>;
}

/// Switches for one `setup` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupOptions {
    pub link_on_master: bool,
    pub start_server: bool,
}

/// What a `setup` call did
#[derive(Debug, Clone, Default, Serialize)]
pub struct SetupReport {
    /// Links created on the master, as `client_path`
    pub linked: Vec<String>,
    pub export: Option<ExportReport>,
    /// Per-node mount results, sorted by alias
    pub mounts: Vec<(String, MountReport)>,
}

/// Lines the orchestrator would write, without touching any node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SharePlan {
    pub master: String,
    pub links: Vec<String>,
    pub exports: Vec<String>,
    pub fstab: Vec<String>,
    pub clients: Vec<String>,
}

/// Shares one mapping from the master with the rest of the cluster
#[derive(Debug, Clone)]
pub struct ShareOrchestrator {
    mapping: Arc<ShareMapping>,
    export_settings: ExportSettings,
    mount_settings: Arc<MountSettings>,
    link_on_master: bool,
    start_nfs_server: bool,
    workers: usize,
}

impl ShareOrchestrator {
    /// Build from the hosting configuration; invalid paths or options fail here.
    pub fn new(config: &ShareConfig) -> Result<Self> {
        if config.workers == 0 || config.workers > MAX_WORKERS {
            return Err(crate::Error::InvalidConfig(format!(
                "workers must be between 1 and {}, got {}",
                MAX_WORKERS, config.workers
            )));
        }
        Ok(Self {
            mapping: Arc::new(ShareMapping::from_config(config)?),
            export_settings: ExportSettings::from_option(config.export_nfs_settings.as_deref())?,
            mount_settings: Arc::new(MountSettings::from_option(
                config.mount_nfs_settings.as_deref(),
            )?),
            link_on_master: config.link_on_master,
            start_nfs_server: config.start_nfs_server,
            workers: config.workers,
        })
    }

    pub fn mapping(&self) -> &ShareMapping {
        &self.mapping
    }

    pub fn export_settings(&self) -> &ExportSettings {
        &self.export_settings
    }

    pub fn mount_settings(&self) -> &MountSettings {
        &self.mount_settings
    }

    /// Nodes other than the master
    pub fn worker_nodes(nodes: &[NodeRef], master: &NodeRef) -> Vec<NodeRef> {
        nodes
            .iter()
            .filter(|n| n.alias() != master.alias())
            .cloned()
            .collect()
    }

    /// Export to and mount on `nodes`, bracketed by a fresh execution pool
    /// that is shut down whether or not the setup succeeded.
    pub async fn setup(
        &self,
        master: &NodeRef,
        nodes: &[NodeRef],
        options: SetupOptions,
    ) -> Result<SetupReport> {
        let start = Instant::now();
        let mut pool = ExecutionPool::new(self.workers);
        let result = self.setup_nfs(&mut pool, master, nodes, options).await;
        pool.shutdown().await;
        tracing::info!(
            "Setting up NFS took {:.3} secs",
            start.elapsed().as_secs_f64()
        );
        result
    }

    async fn setup_nfs(
        &self,
        pool: &mut ExecutionPool<MountReport>,
        master: &NodeRef,
        nodes: &[NodeRef],
        options: SetupOptions,
    ) -> Result<SetupReport> {
        let mut report = SetupReport::default();

        // keep the master's view of the share identical to the clients'
        if options.link_on_master {
            report.linked = self.link_paths_on_master(master.as_ref()).await?;
        }

        if options.start_server {
            start_nfs_server(master.as_ref()).await?;
        }

        if nodes.is_empty() {
            tracing::info!("No nodes to share with");
            return Ok(report);
        }

        let aliases: Vec<&str> = nodes.iter().map(|n| n.alias()).collect();
        let paths: Vec<&str> = self.mapping.server_paths().collect();
        report.export = Some(
            export_paths(master.as_ref(), &aliases, &paths, &self.export_settings).await?,
        );

        report.mounts = self.mount_nfs_shares(pool, master, nodes).await?;
        Ok(report)
    }

    async fn link_paths_on_master(&self, master: &dyn RemoteNode) -> Result<Vec<String>> {
        let mut linked = Vec::new();
        for (server_path, client_path) in self.mapping.remapped() {
            if master.path_exists(client_path).await? {
                tracing::debug!(
                    "{} already exists on {}, not linking",
                    client_path,
                    master.alias()
                );
                continue;
            }
            let command = format!(
                "ln -s {} {}",
                shell_quote(server_path),
                shell_quote(client_path)
            );
            master.execute(&command, false).await?;
            linked.push(client_path.to_string());
        }
        Ok(linked)
    }

    async fn mount_nfs_shares(
        &self,
        pool: &mut ExecutionPool<MountReport>,
        master: &NodeRef,
        nodes: &[NodeRef],
    ) -> Result<Vec<(String, MountReport)>> {
        tracing::info!(
            "Mounting all NFS export path(s) on {} worker node(s)",
            nodes.len()
        );

        let server_alias = master.alias().to_string();
        for node in nodes {
            let node = node.clone();
            let server_alias = server_alias.clone();
            let mapping = self.mapping.clone();
            let settings = self.mount_settings.clone();
            pool.dispatch(node.alias().to_string(), async move {
                mount_shares(node.as_ref(), &server_alias, &mapping, &settings).await
            })?;
        }

        pool.join(nodes.len()).await?.into_result()
    }

    /// Force a lazy unmount of every client path on `node`.
    pub async fn unmount_shares(&self, node: &dyn RemoteNode) -> Result<()> {
        for client_path in self.mapping.client_paths() {
            let command = format!("umount -fl {}", shell_quote(client_path));
            node.execute(&command, false).await?;
        }
        Ok(())
    }

    /// Compute the lines a setup against `clients` would write.
    pub fn plan(&self, master_alias: &str, clients: &[&str]) -> SharePlan {
        let links = if self.link_on_master {
            self.mapping
                .remapped()
                .map(|(server_path, client_path)| {
                    format!("ln -s {} {}", shell_quote(server_path), shell_quote(client_path))
                })
                .collect()
        } else {
            Vec::new()
        };

        let exports = clients
            .iter()
            .flat_map(|client| {
                self.mapping
                    .server_paths()
                    .map(move |path| export_line(path, client, &self.export_settings))
            })
            .collect();

        let fstab = self
            .mapping
            .iter()
            .map(|(server_path, client_path)| {
                fstab_line(master_alias, server_path, client_path, &self.mount_settings)
            })
            .collect();

        SharePlan {
            master: master_alias.to_string(),
            links,
            exports,
            fstab,
            clients: clients.iter().map(|c| c.to_string()).collect(),
        }
    }
}

async fn start_nfs_server(master: &dyn RemoteNode) -> Result<()> {
    tracing::info!("Starting NFS server on {}", master.alias());
    for (command, ignore_exit_status) in NFS_SERVER_START {
        master.execute(command, *ignore_exit_status).await?;
    }
    Ok(())
}

#[async_trait]
impl ClusterSetup for ShareOrchestrator {
    async fn run(&self, nodes: &[NodeRef], master: &NodeRef) -> Result<()> {
        tracing::info!("NFSShare...");
        let workers = Self::worker_nodes(nodes, master);
        let options = SetupOptions {
            link_on_master: self.link_on_master,
            start_server: self.start_nfs_server,
        };
        self.setup(master, &workers, options).await?;
        Ok(())
    }

    async fn on_add_node(
        &self,
        node: &NodeRef,
        _nodes: &[NodeRef],
        master: &NodeRef,
    ) -> Result<()> {
        tracing::info!("Adding {} to NFSShare", node.alias());
        let options = SetupOptions {
            link_on_master: false,
            start_server: false,
        };
        self.setup(master, std::slice::from_ref(node), options).await?;
        Ok(())
    }

    async fn on_remove_node(
        &self,
        node: &NodeRef,
        _nodes: &[NodeRef],
        _master: &NodeRef,
    ) -> Result<()> {
        tracing::info!("Removing {} from NFSShare", node.alias());
        self.unmount_shares(node.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::MemoryCluster;

    fn orchestrator(server: &str, client: Option<&str>) -> ShareOrchestrator {
        let mut config = ShareConfig::new(server);
        config.client_path = client.map(str::to_string);
        ShareOrchestrator::new(&config).unwrap()
    }

    #[test]
    fn test_construction_validates() {
        assert!(ShareOrchestrator::new(&ShareConfig::new("")).is_err());
        let mut config = ShareConfig::new("/data");
        config.mount_nfs_settings = Some("vers=3 rw".into());
        assert!(ShareOrchestrator::new(&config).is_err());
        config.mount_nfs_settings = None;
        config.workers = 0;
        assert!(ShareOrchestrator::new(&config).is_err());
        config.workers = usize::MAX;
        assert!(matches!(
            ShareOrchestrator::new(&config),
            Err(crate::Error::InvalidConfig(_))
        ));
        config.workers = MAX_WORKERS;
        assert!(ShareOrchestrator::new(&config).is_ok());
    }

    #[test]
    fn test_plan() {
        let plan = orchestrator("/mnt", Some("/share")).plan("master", &["node001", "node002"]);
        assert_eq!(plan.links, vec!["ln -s /mnt /share"]);
        assert_eq!(
            plan.exports,
            vec![
                "/mnt node001(async,no_root_squash,no_subtree_check,rw)\n",
                "/mnt node002(async,no_root_squash,no_subtree_check,rw)\n",
            ]
        );
        assert_eq!(
            plan.fstab,
            vec!["master:/mnt /share nfs vers=3,user,rw,exec,noauto 0 0\n"]
        );
    }

    #[test]
    fn test_worker_nodes_excludes_master() {
        let cluster = MemoryCluster::new();
        let master: NodeRef = cluster.node("master");
        let node: NodeRef = cluster.node("node001");
        let nodes = vec![master.clone(), node];
        let workers = ShareOrchestrator::worker_nodes(&nodes, &master);
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].alias(), "node001");
    }

    #[tokio::test]
    async fn test_start_nfs_server_tolerates_rpc_pipefs() {
        let cluster = MemoryCluster::new();
        let master = cluster.node("master");
        master.fail_command("mount -t rpc_pipefs");
        start_nfs_server(master.as_ref()).await.unwrap();
        assert_eq!(cluster.commands_on("master").len(), 3);
    }

    #[tokio::test]
    async fn test_setup_with_no_nodes_only_links() {
        let cluster = MemoryCluster::new();
        let master: NodeRef = cluster.node("master");
        let report = orchestrator("/mnt", Some("/share"))
            .setup(
                &master,
                &[],
                SetupOptions {
                    link_on_master: true,
                    start_server: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(report.linked, vec!["/share"]);
        assert!(report.export.is_none());
        assert_eq!(cluster.commands_on("master"), vec!["ln -s /mnt /share"]);
    }
}
