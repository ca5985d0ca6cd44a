//! Live mount table of a node
//!
//! Parsed from `/proc/mounts` (`device mount_point fs_type options dump pass`).
//! The kernel escapes whitespace in paths as octal sequences (`\040`), which
//! are decoded here so mount points compare equal to configured paths.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where and how a device is mounted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRecord {
    pub mount_point: String,
    pub fs_type: String,
    pub options: String,
}

/// Mounted devices keyed by device string (`host:/remote/path` for NFS)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountTable {
    entries: BTreeMap<String, MountRecord>,
}

impl MountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `/proc/mounts` content. Malformed lines are skipped.
    pub fn parse(contents: &str) -> Self {
        let mut table = Self::new();
        for line in contents.lines() {
            let mut fields = line.split_whitespace();
            let (Some(device), Some(mount_point), Some(fs_type), Some(options)) =
                (fields.next(), fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            table.insert(
                unescape(device),
                MountRecord {
                    mount_point: unescape(mount_point),
                    fs_type: fs_type.to_string(),
                    options: options.to_string(),
                },
            );
        }
        table
    }

    pub fn insert(&mut self, device: impl Into<String>, record: MountRecord) {
        self.entries.insert(device.into(), record);
    }

    pub fn get(&self, device: &str) -> Option<&MountRecord> {
        self.entries.get(device)
    }

    pub fn contains(&self, device: &str) -> bool {
        self.entries.contains_key(device)
    }

    /// Remove every device mounted at `mount_point`, returning how many were removed.
    pub fn remove_mount_point(&mut self, mount_point: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, r| r.mount_point != mount_point);
        before - self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MountRecord)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Decode `\NNN` octal escapes used by the kernel.
fn unescape(field: &str) -> String {
    if !field.contains('\\') {
        return field.to_string();
    }
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits
                    .iter()
                    .fold(0u16, |acc, d| acc * 8 + u16::from(d - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROC_MOUNTS: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
/dev/xvda1 / ext4 rw,relatime,discard 0 0
master:/home /home nfs rw,relatime,vers=3,rsize=1048576,addr=10.0.0.1 0 0
master:/mnt /share nfs rw,relatime,vers=3,addr=10.0.0.1 0 0
";

    #[test]
    fn test_parse_proc_mounts() {
        let table = MountTable::parse(PROC_MOUNTS);
        assert_eq!(table.len(), 4);
        let record = table.get("master:/mnt").unwrap();
        assert_eq!(record.mount_point, "/share");
        assert_eq!(record.fs_type, "nfs");
        assert!(record.options.starts_with("rw,relatime"));
        assert!(!table.contains("master:/data"));
    }

    #[test]
    fn test_parse_skips_malformed_lines() {
        let table = MountTable::parse("garbage\n\nmaster:/x /x nfs rw 0 0\n");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_octal_escapes() {
        let table = MountTable::parse("master:/my\\040data /my\\040data nfs rw 0 0\n");
        assert_eq!(table.get("master:/my data").unwrap().mount_point, "/my data");
    }

    #[test]
    fn test_trailing_backslash_kept() {
        assert_eq!(unescape("abc\\"), "abc\\");
        assert_eq!(unescape("a\\04"), "a\\04");
    }

    #[test]
    fn test_remove_mount_point() {
        let mut table = MountTable::parse(PROC_MOUNTS);
        assert_eq!(table.remove_mount_point("/share"), 1);
        assert_eq!(table.remove_mount_point("/share"), 0);
        assert!(!table.contains("master:/mnt"));
    }
}
