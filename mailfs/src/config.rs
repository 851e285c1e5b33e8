//! YAML configuration shared by the filesystem core and the `mailfs` binary.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_MARKER_TEXT: &str = concat!(
    "This message is managed by mailfs and describes the folder it lives in.\n",
    "Deleting or editing it makes the folder invisible to the filesystem.\n",
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

impl Default for Owner {
    fn default() -> Self {
        Self {
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MailFsConfig {
    /// Fixed marker string every container name starts with.
    pub container_prefix: String,
    /// Stands in for `/` inside container names.
    pub separator: char,
    /// Remote store ceiling on container name length, in bytes.
    pub max_container_name_len: usize,
    pub owner: Owner,
    pub file_mode: u32,
    pub dir_mode: u32,
    /// Largest size a file buffer may grow to through writes, in bytes.
    pub max_file_size: u64,
    /// Rebuild the directory skeleton from container markers at connect time.
    pub eager_bootstrap: bool,
    /// Paths that always report not-found (desktop environment probes).
    pub ignored_paths: Vec<String>,
    pub marker_text: String,
    /// Root directory of the directory-backed store, used by the demo binary.
    pub local_store_root: Option<PathBuf>,
}

impl Default for MailFsConfig {
    fn default() -> Self {
        Self {
            container_prefix: "MAILFS".to_string(),
            separator: '|',
            max_container_name_len: 255,
            owner: Owner::default(),
            file_mode: 0o644,
            dir_mode: 0o755,
            max_file_size: 1 << 30,
            eager_bootstrap: true,
            ignored_paths: vec![
                "/.xdg-volume-info".to_string(),
                "/.Trash".to_string(),
                "/.Trash-1000".to_string(),
                "/autorun.inf".to_string(),
            ],
            marker_text: DEFAULT_MARKER_TEXT.to_string(),
            local_store_root: None,
        }
    }
}

impl MailFsConfig {
    pub fn from_yaml(content: &str) -> Result<Self> {
        let cfg: MailFsConfig =
            serde_yaml::from_str(content).context("Failed to parse YAML config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        Self::from_yaml(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.container_prefix.is_empty() {
            anyhow::bail!("container_prefix must not be empty");
        }
        if self.separator == '/' || self.container_prefix.contains(self.separator) {
            anyhow::bail!(
                "separator {:?} must differ from '/' and must not appear in the prefix",
                self.separator
            );
        }
        if self.max_container_name_len <= self.container_prefix.len() {
            anyhow::bail!("max_container_name_len leaves no room for folder names");
        }
        if self.max_file_size == 0 {
            anyhow::bail!("max_file_size must be positive");
        }
        Ok(())
    }

    /// Where the directory-backed store lives when none is configured.
    pub fn store_root(&self) -> PathBuf {
        self.local_store_root.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("mailfs")
        })
    }

    pub fn is_ignored(&self, path: &str) -> bool {
        self.ignored_paths.iter().any(|p| p == path)
    }
}
