use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const MIB: u64 = 1024 * 1024;

fn default_storage_key() -> String {
    "sampler-storage".to_string()
}

fn default_storage_ceiling() -> usize {
    padbank_project::STORAGE_CEILING
}

fn default_max_sample_bytes() -> u64 {
    30 * MIB
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Key the snapshot is stored under.
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
    /// Directory backing the file store. Defaults to the user data dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_dir: Option<PathBuf>,
    #[serde(default = "default_storage_ceiling")]
    pub storage_ceiling_bytes: usize,
    /// Hard limit enforced by the file store, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_quota_bytes: Option<u64>,
    /// Largest audio file accepted for a pad.
    #[serde(default = "default_max_sample_bytes")]
    pub max_sample_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_key: default_storage_key(),
            storage_dir: None,
            storage_ceiling_bytes: default_storage_ceiling(),
            storage_quota_bytes: None,
            max_sample_bytes: default_max_sample_bytes(),
        }
    }
}

impl Config {
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("padbank").join("config.toml"))
    }

    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        Self::load_from(&path)
    }

    /// Read a config file, falling back to defaults when it is missing or
    /// malformed.
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                log::warn!("ignoring malformed config {}: {e}", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self) {
        let Some(path) = Self::config_path() else {
            return;
        };
        if let Err(e) = self.save_to(&path) {
            log::warn!("failed to save config to {}: {e}", path.display());
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.storage_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|p| p.join("padbank"))
                .unwrap_or_else(|| PathBuf::from("padbank-data"))
        })
    }
}
