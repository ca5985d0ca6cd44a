//! Error types for nfsshare

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Remote Errors ===
    #[error("command `{command}` failed on {node} (exit status {status}): {output}")]
    RemoteExecution {
        node: String,
        command: String,
        status: i32,
        output: String,
    },

    #[error("remote file {path} on {node}: {reason}")]
    RemoteIo {
        node: String,
        path: String,
        reason: String,
    },

    // === Orchestration Errors ===
    #[error("{} of {total} node task(s) failed: {}", .failures.len(), summarize(.failures))]
    NodeTasks {
        total: usize,
        failures: Vec<NodeFailure>,
    },

    #[error("Execution pool error: {0}")]
    Pool(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

/// A single node task that did not complete successfully.
#[derive(Debug)]
pub struct NodeFailure {
    pub node: String,
    pub error: Error,
}

fn summarize(failures: &[NodeFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("[{}] {}", f.node, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Build the error reported when a remote command exits non-zero.
    pub fn remote_execution(
        node: impl Into<String>,
        command: impl Into<String>,
        status: i32,
        output: impl Into<String>,
    ) -> Self {
        Error::RemoteExecution {
            node: node.into(),
            command: command.into(),
            status,
            output: output.into(),
        }
    }

    /// Build the error reported when a remote file cannot be read or written.
    pub fn remote_io(
        node: impl Into<String>,
        path: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::RemoteIo {
            node: node.into(),
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Aliases of the nodes whose task failed, for aggregate errors.
    pub fn failed_nodes(&self) -> Vec<&str> {
        match self {
            Error::NodeTasks { failures, .. } => {
                failures.iter().map(|f| f.node.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

// Implement From for common error types
impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_tasks_display() {
        let err = Error::NodeTasks {
            total: 3,
            failures: vec![NodeFailure {
                node: "node002".into(),
                error: Error::remote_execution("node002", "mount /data", 32, "timed out"),
            }],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("1 of 3 node task(s) failed"));
        assert!(msg.contains("[node002]"));
        assert!(msg.contains("mount /data"));
        assert_eq!(err.failed_nodes(), vec!["node002"]);
    }

    #[test]
    fn test_failed_nodes_other_variants() {
        assert!(Error::InvalidConfig("x".into()).failed_nodes().is_empty());
    }
}
