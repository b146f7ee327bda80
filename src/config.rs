// Configuration: a TOML file layered with `DRIVE_BACKUP__*` environment
// overrides, frozen into `Settings` and handed to each component.

use crate::error::{Error, Result};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Scope granting read/write access to files this service account created.
pub const DRIVE_FILE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

pub const DEFAULT_PATTERN: &str = "*.tar.gz";

/// Resumable upload chunks must be a multiple of this.
pub const CHUNK_GRANULARITY: usize = 256 * 1024;

pub const DEFAULT_CHUNK_SIZE: usize = 10 * 1024 * 1024;

/// A century; anything longer cannot be represented as a cutoff date.
pub const MAX_RETENTION_DAYS: u32 = 36_500;

const ENV_PREFIX: &str = "DRIVE_BACKUP";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UploadStrategy {
    /// Single request when the file fits in one chunk, resumable otherwise.
    #[default]
    Auto,
    Direct,
    Chunked,
}

/// One backup source: a local directory and the prefix its uploads carry.
#[derive(Debug, Clone, Deserialize)]
pub struct Category {
    pub name: String,
    pub source_dir: PathBuf,
    #[serde(default)]
    pub pattern: Option<String>,
}

impl Category {
    pub fn pattern(&self) -> &str {
        self.pattern.as_deref().unwrap_or(DEFAULT_PATTERN)
    }

    /// Remote display name for a local archive: `{category}_{basename}`.
    pub fn remote_name(&self, local: &Path) -> String {
        let base = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{}_{}", self.name, base)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_credentials_file")]
    pub credentials_file: PathBuf,
    pub parent_folder_id: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub upload_strategy: UploadStrategy,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    pub categories: Vec<Category>,
    /// Categories picked with `--category`; empty means all of them.
    #[serde(skip)]
    selected: Vec<String>,
}

fn default_credentials_file() -> PathBuf {
    PathBuf::from("service_account.json")
}

fn default_retention_days() -> u32 {
    7
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    2000
}

impl Settings {
    /// Load from `path`, then apply environment overrides
    /// (`DRIVE_BACKUP__RETENTION_DAYS=2`, ...).
    pub fn load(path: &Path) -> Result<Self> {
        let path_str = path.to_string_lossy();
        let s = Config::builder()
            .add_source(File::new(&path_str, FileFormat::Toml))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = s.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a TOML string without touching the environment.
    pub fn from_toml(text: &str) -> Result<Self> {
        let s = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?;
        let settings: Settings = s.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Where to look for the config file when `--config` and
    /// `DRIVE_BACKUP_CONFIG` are both absent.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("drive-backup")
            .join("config.toml")
    }

    pub fn validate(&self) -> Result<()> {
        if self.parent_folder_id.trim().is_empty() {
            return Err(Error::Config("parent_folder_id must not be empty".into()));
        }
        if self.retention_days > MAX_RETENTION_DAYS {
            return Err(Error::Config(format!(
                "retention_days {} exceeds the maximum of {MAX_RETENTION_DAYS}",
                self.retention_days
            )));
        }
        if self.chunk_size == 0 || self.chunk_size % CHUNK_GRANULARITY != 0 {
            return Err(Error::Config(format!(
                "chunk_size {} must be a positive multiple of {CHUNK_GRANULARITY}",
                self.chunk_size
            )));
        }
        if self.categories.is_empty() {
            return Err(Error::Config("at least one category is required".into()));
        }

        let mut seen = HashSet::new();
        for category in &self.categories {
            if category.name.trim().is_empty() {
                return Err(Error::Config("category name must not be empty".into()));
            }
            if !seen.insert(category.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate category `{}`",
                    category.name
                )));
            }
            globset::Glob::new(category.pattern()).map_err(|e| {
                Error::Config(format!("category `{}` pattern: {e}", category.name))
            })?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Names of every configured category, selected or not.
    pub fn category_names(&self) -> Vec<&str> {
        self.categories.iter().map(|c| c.name.as_str()).collect()
    }

    /// The categories this run processes.
    pub fn active_categories(&self) -> impl Iterator<Item = &Category> + '_ {
        self.categories
            .iter()
            .filter(|c| self.selected.is_empty() || self.selected.contains(&c.name))
    }

    /// Process only the named categories. The rest stay configured so the
    /// sweep still knows their prefixes. Unknown names are a config error.
    pub fn restrict_to(&mut self, names: &[String]) -> Result<()> {
        for name in names {
            if !self.categories.iter().any(|c| &c.name == name) {
                return Err(Error::Config(format!("unknown category `{name}`")));
            }
        }
        self.selected = names.to_vec();
        Ok(())
    }
}
