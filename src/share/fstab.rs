//! Client-side mounting: `/etc/fstab` entries and `mount` calls
//!
//! Per node, strictly in order:
//! 1. start portmap (the devpts mount that follows may fail and is ignored)
//! 2. read the live mount table and drop devices already mounted
//! 3. remove stale fstab lines for the remaining devices
//! 4. append one fstab line per remaining device
//! 5. create each mount point if needed and mount it

use crate::common::{shell_quote, Result};
use crate::node::RemoteNode;
use crate::share::mapping::{MountSettings, ShareMapping};
use regex::Regex;
use serde::Serialize;

pub const FSTAB_FILE: &str = "/etc/fstab";

pub const PORTMAP_START: &str = "/etc/init.d/portmap start";

/// Frequently fails on nodes where devpts is already mounted
pub const DEVPTS_MOUNT: &str = "mount -t devpts none /dev/pts";

/// `host:/path` device string of an NFS share
pub fn network_device(server_alias: &str, server_path: &str) -> String {
    format!("{}:{}", server_alias, server_path)
}

/// Format one fstab line, newline included.
pub fn fstab_line(
    server_alias: &str,
    server_path: &str,
    client_path: &str,
    settings: &MountSettings,
) -> String {
    format!(
        "{} {} nfs {} 0 0\n",
        network_device(server_alias, server_path),
        client_path,
        settings.as_str()
    )
}

/// Regex matching any of `devices` bounded by whitespace (or line start).
pub fn device_pattern<S: AsRef<str>>(devices: &[S]) -> Result<Regex> {
    let alternatives = devices
        .iter()
        .map(|d| regex::escape(d.as_ref()))
        .collect::<Vec<_>>()
        .join("|");
    Ok(Regex::new(&format!(r"(^|\s)({})(\s|$)", alternatives))?)
}

/// What a mount pass did on one node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MountReport {
    /// Devices mounted by this pass
    pub mounted: Vec<String>,
    /// Devices that were already mounted
    pub already_mounted: Vec<String>,
}

/// Mount every share of `mapping` from `server_alias` on `node`.
pub async fn mount_shares(
    node: &dyn RemoteNode,
    server_alias: &str,
    mapping: &ShareMapping,
    settings: &MountSettings,
) -> Result<MountReport> {
    node.execute(PORTMAP_START, false).await?;
    node.execute(DEVPTS_MOUNT, true).await?;

    let mount_table = node.mount_table().await?;
    let mut report = MountReport::default();
    let mut pending = Vec::new();
    for (server_path, client_path) in mapping.iter() {
        let device = network_device(server_alias, server_path);
        if let Some(record) = mount_table.get(&device) {
            tracing::debug!(
                "nfs share {} already mounted to {} on node {}, skipping...",
                device,
                record.mount_point,
                node.alias()
            );
            report.already_mounted.push(device);
        } else {
            pending.push((device, server_path, client_path));
        }
    }

    if pending.is_empty() {
        return Ok(report);
    }

    let devices: Vec<&str> = pending.iter().map(|(d, _, _)| d.as_str()).collect();
    let pattern = device_pattern(&devices)?;
    let mut lines = String::new();
    if node.path_exists(FSTAB_FILE).await? {
        node.remove_lines_matching(FSTAB_FILE, &pattern).await?;
        // never glue the first new entry onto an unterminated last line
        let contents = node.read_file(FSTAB_FILE).await?;
        if !contents.is_empty() && !contents.ends_with('\n') {
            lines.push('\n');
        }
    }

    lines.extend(pending.iter().map(|(_, server_path, client_path)| {
        fstab_line(server_alias, server_path, client_path, settings)
    }));
    node.append_file(FSTAB_FILE, &lines).await?;

    for (device, _, client_path) in pending {
        if !node.path_exists(client_path).await? {
            node.makedirs(client_path).await?;
        }
        node.execute(&format!("mount {}", shell_quote(client_path)), false)
            .await?;
        tracing::debug!("Mounted {} at {} on {}", device, client_path, node.alias());
        report.mounted.push(device);
    }

    Ok(report)
}
