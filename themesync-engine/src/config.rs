//! Configuration loading for themesync.
//!
//! The configuration is stored in TOML format and defines:
//! - Storage locations (metadata files, extracted themes, archives)
//! - Listing queries (gallery endpoint, paging, pacing)
//! - Package acquisition (concurrency, download timeout)
//!
//! Every field has a default, so an empty file (or no file at all) is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::marketplace::listing::{DEFAULT_GALLERY_URL, Pagination};
use crate::marketplace::orchestrator::OrchestratorOptions;
use crate::marketplace::storage::CacheLayout;

/// Name of the configuration file looked up in the working and XDG config directories.
pub const CONFIG_FILE_NAME: &str = "themesync.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    ValidationError(String),

    #[error("Config file does not exist: {0}")]
    PathNotFound(PathBuf),
}

/// Where metadata and cached packages live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageConfig {
    /// Partition files, overrides and the search index.
    #[serde(default = "default_metadata_dir")]
    pub metadata_dir: PathBuf,

    /// Extracted `publisher.extension/version/` trees.
    #[serde(default = "default_themes_dir")]
    pub themes_dir: PathBuf,

    /// Downloaded packages awaiting extraction.
    #[serde(default = "default_archives_dir")]
    pub archives_dir: PathBuf,
}

fn default_metadata_dir() -> PathBuf {
    PathBuf::from("themes")
}

fn default_themes_dir() -> PathBuf {
    PathBuf::from("themes/themes")
}

fn default_archives_dir() -> PathBuf {
    PathBuf::from("themes/archives")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            metadata_dir: default_metadata_dir(),
            themes_dir: default_themes_dir(),
            archives_dir: default_archives_dir(),
        }
    }
}

/// Gallery listing queries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListingConfig {
    #[serde(default = "default_gallery_url")]
    pub gallery_url: String,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Pause between page requests, in milliseconds.
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,

    /// Pages requested at once.
    #[serde(default = "default_one")]
    pub page_concurrency: usize,

    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_gallery_url() -> String {
    DEFAULT_GALLERY_URL.to_string()
}

const fn default_page_size() -> u32 {
    54
}

const fn default_max_pages() -> u32 {
    10
}

const fn default_page_delay_ms() -> u64 {
    1000
}

const fn default_one() -> usize {
    1
}

const fn default_timeout_secs() -> u64 {
    30
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            gallery_url: default_gallery_url(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            page_delay_ms: default_page_delay_ms(),
            page_concurrency: default_one(),
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

/// Package acquisition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AcquireConfig {
    /// Packages downloaded and extracted at once.
    #[serde(default = "default_one")]
    pub concurrency: usize,

    #[serde(default = "default_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            concurrency: default_one(),
            download_timeout_secs: default_timeout_secs(),
        }
    }
}

/// Complete themesync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HarvestConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub listing: ListingConfig,

    #[serde(default)]
    pub acquire: AcquireConfig,
}

impl HarvestConfig {
    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::PathNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: HarvestConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no run could work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.listing.page_size == 0, "listing.page_size must be at least 1"),
            (self.listing.max_pages == 0, "listing.max_pages must be at least 1"),
            (
                self.listing.page_concurrency == 0,
                "listing.page_concurrency must be at least 1",
            ),
            (self.acquire.concurrency == 0, "acquire.concurrency must be at least 1"),
            (
                self.listing.request_timeout_secs == 0 || self.acquire.download_timeout_secs == 0,
                "timeouts must be at least 1 second",
            ),
            (
                self.storage.themes_dir == self.storage.archives_dir,
                "storage.themes_dir and storage.archives_dir must differ",
            ),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(ConfigError::ValidationError((*message).to_string())),
            None => Ok(()),
        }
    }

    pub fn layout(&self) -> CacheLayout {
        CacheLayout {
            metadata_dir: self.storage.metadata_dir.clone(),
            themes_dir: self.storage.themes_dir.clone(),
            archives_dir: self.storage.archives_dir.clone(),
        }
    }

    pub fn pagination(&self) -> Pagination {
        Pagination {
            page_size: self.listing.page_size,
            max_pages: self.listing.max_pages,
            delay: Duration::from_millis(self.listing.page_delay_ms),
            concurrency: self.listing.page_concurrency,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.listing.request_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire.download_timeout_secs)
    }

    pub fn orchestrator_options(&self, show_progress: bool) -> OrchestratorOptions {
        OrchestratorOptions {
            pagination: self.pagination(),
            acquire_concurrency: self.acquire.concurrency,
            force: false,
            show_progress,
        }
    }
}

/// Pick the configuration file: an explicit path, then the working
/// directory, then the XDG config directory (pure function).
#[must_use]
pub fn locate_config(
    explicit: Option<&Path>,
    working_dir: &Path,
    xdg_config_dir: Option<&Path>,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = working_dir.join(CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }
    xdg_config_dir
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .filter(|path| path.exists())
}

/// XDG config directory for themesync, if the platform provides one.
pub fn xdg_config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "themesync", "themesync")
        .map(|dirs| dirs.config_dir().to_path_buf())
}
