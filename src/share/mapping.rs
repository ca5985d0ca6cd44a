//! Share mapping and NFS option strings
//!
//! The mapping and both option strings are fixed when the orchestrator is
//! built and are never modified afterwards.

use crate::common::{
    validate_share_path, Error, Result, ShareConfig, DEFAULT_EXPORT_SETTINGS,
    DEFAULT_MOUNT_SETTINGS,
};
use serde::{Deserialize, Serialize};

/// Ordered `server_path → client_path` pairs with unique server paths
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareMapping {
    entries: Vec<(String, String)>,
}

impl ShareMapping {
    /// Single-entry mapping; `client_path` defaults to `server_path`.
    pub fn new(server_path: &str, client_path: Option<&str>) -> Result<Self> {
        let mut mapping = Self::default();
        mapping.insert(server_path, client_path)?;
        Ok(mapping)
    }

    pub fn from_config(config: &ShareConfig) -> Result<Self> {
        Self::new(&config.server_path, config.client_path.as_deref())
    }

    /// Add an entry. Duplicate server paths are rejected.
    pub fn insert(&mut self, server_path: &str, client_path: Option<&str>) -> Result<()> {
        let client_path = client_path.unwrap_or(server_path);
        validate_share_path("server_path", server_path)?;
        validate_share_path("client_path", client_path)?;

        if self.client_path(server_path).is_some() {
            return Err(Error::InvalidConfig(format!(
                "server_path {} is mapped twice",
                server_path
            )));
        }

        self.entries
            .push((server_path.to_string(), client_path.to_string()));
        Ok(())
    }

    pub fn client_path(&self, server_path: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(s, _)| s == server_path)
            .map(|(_, c)| c.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(s, c)| (s.as_str(), c.as_str()))
    }

    pub fn server_paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(s, _)| s.as_str())
    }

    pub fn client_paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, c)| c.as_str())
    }

    /// Entries whose client path differs from the server path
    pub fn remapped(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter().filter(|(s, c)| s != c)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Normalize an option string: trims it and drops one pair of surrounding
/// parentheses (`(rw,sync)` is accepted for exports).
fn normalize_options(what: &str, raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(trimmed);

    if inner.is_empty() {
        return Err(Error::InvalidConfig(format!("{} cannot be empty", what)));
    }
    if inner
        .chars()
        .any(|c| c.is_whitespace() || c == '(' || c == ')')
    {
        return Err(Error::InvalidConfig(format!(
            "{} must be a comma-separated option list: {:?}",
            what, raw
        )));
    }
    Ok(inner.to_string())
}

/// Options written inside the parentheses of every `/etc/exports` line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSettings(String);

impl ExportSettings {
    pub fn new(raw: &str) -> Result<Self> {
        normalize_options("export_nfs_settings", raw).map(Self)
    }

    pub fn from_option(raw: Option<&str>) -> Result<Self> {
        raw.map_or_else(|| Ok(Self::default()), Self::new)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self(DEFAULT_EXPORT_SETTINGS.to_string())
    }
}

/// Options field of every `/etc/fstab` line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSettings(String);

impl MountSettings {
    pub fn new(raw: &str) -> Result<Self> {
        normalize_options("mount_nfs_settings", raw).map(Self)
    }

    pub fn from_option(raw: Option<&str>) -> Result<Self> {
        raw.map_or_else(|| Ok(Self::default()), Self::new)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MountSettings {
    fn default() -> Self {
        Self(DEFAULT_MOUNT_SETTINGS.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_path_defaults() {
        let mapping = ShareMapping::new("/data", None).unwrap();
        assert_eq!(mapping.client_path("/data"), Some("/data"));
        assert_eq!(mapping.remapped().count(), 0);
    }

    #[test]
    fn test_remapped_entry() {
        let mapping = ShareMapping::new("/mnt", Some("/share")).unwrap();
        assert_eq!(mapping.remapped().collect::<Vec<_>>(), vec![("/mnt", "/share")]);
        assert_eq!(mapping.client_paths().collect::<Vec<_>>(), vec!["/share"]);
    }

    #[test]
    fn test_invalid_paths() {
        assert!(matches!(
            ShareMapping::new("", None),
            Err(Error::InvalidConfig(_))
        ));
        assert!(ShareMapping::new("relative", None).is_err());
        assert!(ShareMapping::new("/mnt", Some("")).is_err());
    }

    #[test]
    fn test_duplicate_server_path() {
        let mut mapping = ShareMapping::new("/mnt", None).unwrap();
        assert!(mapping.insert("/mnt", Some("/other")).is_err());
        mapping.insert("/opt", None).unwrap();
        assert_eq!(mapping.server_paths().collect::<Vec<_>>(), vec!["/mnt", "/opt"]);
    }

    #[test]
    fn test_settings_defaults() {
        assert_eq!(
            ExportSettings::from_option(None).unwrap().as_str(),
            "async,no_root_squash,no_subtree_check,rw"
        );
        assert_eq!(
            MountSettings::from_option(None).unwrap().as_str(),
            "vers=3,user,rw,exec,noauto"
        );
    }

    #[test]
    fn test_settings_parentheses_stripped() {
        let settings = ExportSettings::new("(sync,no_root_squash,no_subtree_check,rw)").unwrap();
        assert_eq!(settings.as_str(), "sync,no_root_squash,no_subtree_check,rw");
    }

    #[test]
    fn test_settings_rejected() {
        assert!(ExportSettings::new("").is_err());
        assert!(MountSettings::new("vers=3, rw").is_err());
        assert!(ExportSettings::new("rw)(sync").is_err());
    }
}
