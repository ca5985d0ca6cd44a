//! `/etc/exports` editing on the NFS server
//!
//! Lines are compared verbatim against a snapshot of the file read once at
//! the start of the call. Two lines that differ only in option order are
//! different lines.

use crate::common::Result;
use crate::node::RemoteNode;
use crate::share::mapping::ExportSettings;
use serde::Serialize;

pub const EXPORTS_FILE: &str = "/etc/exports";

/// Reloads the active export table from `/etc/exports`
pub const REEXPORT_COMMAND: &str = "exportfs -fra";

/// Format one export line, newline included.
pub fn export_line(path: &str, client_alias: &str, settings: &ExportSettings) -> String {
    format!("{} {}({})\n", path, client_alias, settings.as_str())
}

/// What an export pass did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    /// Lines appended to `/etc/exports`
    pub added: Vec<String>,
    /// Lines already present
    pub skipped: Vec<String>,
}

/// Export every path in `paths` to every client in `client_aliases`, then
/// reload the export table.
///
/// Missing lines are appended in one write. `exportfs -fra` runs even when
/// nothing was added. A failure part way leaves whatever was written.
pub async fn export_paths(
    server: &dyn RemoteNode,
    client_aliases: &[&str],
    paths: &[&str],
    settings: &ExportSettings,
) -> Result<ExportReport> {
    tracing::info!("Configuring NFS exports path(s): {}", paths.join(" "));

    let contents = if server.path_exists(EXPORTS_FILE).await? {
        server.read_file(EXPORTS_FILE).await?
    } else {
        String::new()
    };

    let mut report = ExportReport::default();
    for client in client_aliases {
        for path in paths {
            let line = export_line(path, client, settings);
            let existing = line.trim_end_matches('\n');
            if contents.lines().any(|l| l == existing) || report.added.contains(&line) {
                tracing::debug!("{} already exported to {}, skipping", path, client);
                report.skipped.push(line);
            } else {
                report.added.push(line);
            }
        }
    }

    if !report.added.is_empty() {
        // keep the new lines on their own even if the file lacks a final newline
        let mut pending = String::new();
        if !contents.is_empty() && !contents.ends_with('\n') {
            pending.push('\n');
        }
        pending.extend(report.added.iter().map(String::as_str));
        server.append_file(EXPORTS_FILE, &pending).await?;
    }

    server.execute(REEXPORT_COMMAND, false).await?;

    tracing::info!(
        "Exported to {} client(s): {} line(s) added, {} already present",
        client_aliases.len(),
        report.added.len(),
        report.skipped.len()
    );
    Ok(report)
}
