//! nfsshare binary

use anyhow::Context;
use clap::{Parser, Subcommand};
use nfsshare::common::{ClusterConfig, NodeSpec, SshConfig};
use nfsshare::node::{NodeRef, SshNode};
use nfsshare::{ClusterSetup, ShareOrchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "nfsshare")]
#[command(about = "Share a master node's path with every cluster node over NFS")]
#[command(version)]
struct Cli {
    /// Cluster configuration file
    #[arg(long, short, default_value = "cluster.toml")]
    config: PathBuf,

    /// Log level (overrides the config file)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export and mount the share on every node
    Run,

    /// Export to and mount on a node that joined the cluster
    AddNode {
        /// Node alias
        alias: String,
    },

    /// Unmount the share on a node leaving the cluster
    RemoveNode {
        /// Node alias
        alias: String,
    },

    /// Print the lines a run would write, without connecting to any node
    Plan {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn connect(spec: &NodeSpec, ssh: &SshConfig) -> NodeRef {
    Arc::new(SshNode::new(spec, ssh.clone()))
}

/// Every configured node, master first when it is not listed explicitly.
fn cluster_nodes(config: &ClusterConfig) -> Vec<NodeRef> {
    let mut nodes = Vec::with_capacity(config.nodes.len() + 1);
    if !config.node_listed(&config.master.alias) {
        nodes.push(connect(&config.master, &config.ssh));
    }
    nodes.extend(config.nodes.iter().map(|n| connect(n, &config.ssh)));
    nodes
}

fn find_node(nodes: &[NodeRef], alias: &str) -> anyhow::Result<NodeRef> {
    nodes
        .iter()
        .find(|n| n.alias() == alias)
        .cloned()
        .with_context(|| format!("node {} is not in the cluster config", alias))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ClusterConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    let level = cli.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let orchestrator = ShareOrchestrator::new(&config.share)?;

    match cli.command {
        Commands::Run => {
            let nodes = cluster_nodes(&config);
            let master = connect(&config.master, &config.ssh);
            orchestrator.run(&nodes, &master).await?;
        }

        Commands::AddNode { alias } => {
            let nodes = cluster_nodes(&config);
            let master = connect(&config.master, &config.ssh);
            let node = find_node(&nodes, &alias)?;
            orchestrator.on_add_node(&node, &nodes, &master).await?;
        }

        Commands::RemoveNode { alias } => {
            let nodes = cluster_nodes(&config);
            let master = connect(&config.master, &config.ssh);
            let node = find_node(&nodes, &alias)?;
            orchestrator.on_remove_node(&node, &nodes, &master).await?;
        }

        Commands::Plan { json } => {
            let clients: Vec<&str> = config
                .nodes
                .iter()
                .map(|n| n.alias.as_str())
                .filter(|alias| *alias != config.master.alias)
                .collect();
            let plan = orchestrator.plan(&config.master.alias, &clients);

            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                println!("Master: {}", plan.master);
                println!("Clients: {}", plan.clients.join(", "));
                println!("Links on master:");
                for link in &plan.links {
                    println!("  {}", link);
                }
                println!("/etc/exports:");
                for line in &plan.exports {
                    print!("  {}", line);
                }
                println!("/etc/fstab:");
                for line in &plan.fstab {
                    print!("  {}", line);
                }
            }
        }
    }

    Ok(())
}
