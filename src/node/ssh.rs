//! SSH transport
//!
//! Every operation is a single `ssh` invocation. File contents travel over
//! stdin/stdout so nothing needs to be staged on the local disk.

use crate::common::{shell_quote, Error, NodeSpec, Result, SshConfig};
use crate::node::{CommandOutput, MountTable, RemoteNode};
use async_trait::async_trait;
use regex::Regex;
use std::process::{Output, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const PROC_MOUNTS: &str = "/proc/mounts";

/// A cluster node reached through the system `ssh` client
#[derive(Debug, Clone)]
pub struct SshNode {
    alias: String,
    address: String,
    ssh: SshConfig,
}

impl SshNode {
    pub fn new(spec: &NodeSpec, ssh: SshConfig) -> Self {
        Self {
            alias: spec.alias.clone(),
            address: spec.address().to_string(),
            ssh,
        }
    }

    /// Arguments passed to `ssh` before the remote command
    pub fn ssh_args(&self) -> Vec<String> {
        let mut args = vec!["-p".to_string(), self.ssh.port.to_string()];
        if let Some(identity) = &self.ssh.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        for option in &self.ssh.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        args.push(format!("{}@{}", self.ssh.user, self.address));
        args
    }

    async fn run(&self, command: &str, stdin: Option<&str>) -> Result<Output> {
        tracing::debug!("[{}] $ {}", self.alias, command);

        let mut child = Command::new("ssh")
            .args(self.ssh_args())
            .arg("--")
            .arg(command)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input.as_bytes()).await?;
                pipe.shutdown().await?;
            }
        }

        Ok(child.wait_with_output().await?)
    }

    async fn write_file(&self, path: &str, contents: &str, append: bool) -> Result<()> {
        let command = if append {
            format!("cat >> {}", shell_quote(path))
        } else {
            replace_command(path)
        };
        let output = self.run(&command, Some(contents)).await?;
        if !output.status.success() {
            return Err(Error::remote_io(&self.alias, path, stderr_or_stdout(&output)));
        }
        Ok(())
    }
}

/// Write stdin to a sibling temp file, then rename it over `path` so an
/// interrupted transfer never leaves `path` truncated.
fn replace_command(path: &str) -> String {
    let tmp = format!("{}.nfsshare.tmp", path);
    format!(
        "cat > {tmp} && chmod --reference={path} {tmp} && mv -f {tmp} {path}",
        tmp = shell_quote(&tmp),
        path = shell_quote(path)
    )
}

/// Remote files are rewritten from their decoded contents, so only valid
/// UTF-8 is accepted.
fn decode_utf8(alias: &str, path: &str, bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| {
        Error::remote_io(
            alias,
            path,
            format!("not valid UTF-8 at byte {}", e.utf8_error().valid_up_to()),
        )
    })
}

fn exit_status(output: &Output) -> i32 {
    output.status.code().unwrap_or(-1)
}

fn stderr_or_stdout(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.trim().is_empty() {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    } else {
        stderr.trim().to_string()
    }
}

#[async_trait]
impl RemoteNode for SshNode {
    fn alias(&self) -> &str {
        &self.alias
    }

    async fn execute(&self, command: &str, ignore_exit_status: bool) -> Result<CommandOutput> {
        let output = self.run(command, None).await?;
        let status = exit_status(&output);
        if status != 0 && !ignore_exit_status {
            return Err(Error::remote_execution(
                &self.alias,
                command,
                status,
                stderr_or_stdout(&output),
            ));
        }
        Ok(CommandOutput {
            output: String::from_utf8_lossy(&output.stdout).into_owned(),
            exit_status: status,
        })
    }

    async fn path_exists(&self, path: &str) -> Result<bool> {
        let out = self
            .execute(&format!("test -e {}", shell_quote(path)), true)
            .await?;
        // 255 is ssh itself failing, not a missing path
        if out.exit_status == 255 {
            return Err(Error::remote_execution(
                &self.alias,
                format!("test -e {}", path),
                out.exit_status,
                "ssh connection failed",
            ));
        }
        Ok(out.success())
    }

    async fn makedirs(&self, path: &str) -> Result<()> {
        self.execute(&format!("mkdir -p {}", shell_quote(path)), false)
            .await?;
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let output = self.run(&format!("cat {}", shell_quote(path)), None).await?;
        if !output.status.success() {
            return Err(Error::remote_io(&self.alias, path, stderr_or_stdout(&output)));
        }
        decode_utf8(&self.alias, path, output.stdout)
    }

    async fn append_file(&self, path: &str, contents: &str) -> Result<()> {
        self.write_file(path, contents, true).await
    }

    async fn remove_lines_matching(&self, path: &str, pattern: &Regex) -> Result<()> {
        let contents = self.read_file(path).await?;
        let kept = filter_lines(&contents, pattern);
        if kept.len() != contents.len() {
            self.write_file(path, &kept, false).await?;
        }
        Ok(())
    }

    async fn mount_table(&self) -> Result<MountTable> {
        let contents = self.read_file(PROC_MOUNTS).await?;
        Ok(MountTable::parse(&contents))
    }
}

/// Keep the lines not matched by `pattern`, preserving line endings.
pub(crate) fn filter_lines(contents: &str, pattern: &Regex) -> String {
    contents
        .split_inclusive('\n')
        .filter(|line| !pattern.is_match(line.trim_end_matches('\n')))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> SshNode {
        SshNode::new(
            &NodeSpec {
                alias: "node001".into(),
                host: Some("10.0.0.2".into()),
            },
            SshConfig::default(),
        )
    }

    #[test]
    fn test_ssh_args() {
        let args = node().ssh_args();
        assert_eq!(args[0], "-p");
        assert_eq!(args[1], "22");
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert_eq!(args.last().unwrap(), "root@10.0.0.2");
    }

    #[test]
    fn test_ssh_args_identity_file() {
        let mut ssh = SshConfig::default();
        ssh.identity_file = Some("/root/.ssh/cluster.rsa".into());
        ssh.user = "admin".into();
        let node = SshNode::new(&NodeSpec::new("master"), ssh);
        let args = node.ssh_args();
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[i + 1], "/root/.ssh/cluster.rsa");
        assert_eq!(args.last().unwrap(), "admin@master");
    }

    #[test]
    fn test_replace_command_renames_into_place() {
        assert_eq!(
            replace_command("/etc/fstab"),
            "cat > /etc/fstab.nfsshare.tmp && chmod --reference=/etc/fstab /etc/fstab.nfsshare.tmp \
             && mv -f /etc/fstab.nfsshare.tmp /etc/fstab"
        );
        let quoted = replace_command("/etc/my fstab");
        assert!(quoted.starts_with("cat > '/etc/my fstab.nfsshare.tmp' && "));
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        let bytes = b"/dev/sda1 /mnt/caf\xe9 ext4 defaults 0 0\n".to_vec();
        let err = decode_utf8("node001", "/etc/fstab", bytes).unwrap_err();
        assert!(matches!(err, Error::RemoteIo { .. }));
        assert!(err.to_string().contains("byte 18"));

        let bytes = b"proc /proc proc 0 0\n".to_vec();
        let text = decode_utf8("node001", "/etc/fstab", bytes).unwrap();
        assert_eq!(text, "proc /proc proc 0 0\n");
    }

    #[test]
    fn test_filter_lines() {
        let fstab = "/dev/xvda1 / ext4 defaults 0 0\nmaster:/data /data nfs rw 0 0\nproc /proc proc defaults 0 0";
        let pattern = Regex::new(r"(^|\s)master:/data\s").unwrap();
        assert_eq!(
            filter_lines(fstab, &pattern),
            "/dev/xvda1 / ext4 defaults 0 0\nproc /proc proc defaults 0 0"
        );
    }
}
