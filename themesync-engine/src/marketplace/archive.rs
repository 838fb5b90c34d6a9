//! Package download and extraction into the version-pinned cache.

use async_trait::async_trait;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::error::{HarvestError, Result};
use super::manifest::collect_theme_assets;
use super::record::{DisplayDetail, ListingRecord, NaturalKey, manifest_path_in};
use super::storage::CacheLayout;

/// Extension used for downloaded packages.
pub const ARCHIVE_EXTENSION: &str = "vsix";

/// How an acquisition ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// A complete version directory already existed; no network or extraction.
    Cached,
    /// The package was extracted during this call.
    Extracted,
    /// Download failed; the record is returned unchanged.
    DownloadFailed,
    /// Extraction failed; the record is returned unchanged.
    ExtractFailed,
}

impl AcquireOutcome {
    /// Whether the returned record reflects an extracted package.
    pub fn is_cached(self) -> bool {
        matches!(self, Self::Cached | Self::Extracted)
    }
}

/// Result of one acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct Acquisition {
    pub record: ListingRecord,
    pub outcome: AcquireOutcome,
}

/// Materializes listed packages into the local cache.
#[async_trait]
pub trait PackageAcquirer: Send + Sync {
    /// Bring `record`'s latest version into the cache and describe its assets.
    ///
    /// Download and extraction failures are reported through the outcome with
    /// the unchanged record; only unexpected failures return `Err`.
    async fn acquire(&self, record: ListingRecord, force: bool) -> Result<Acquisition>;
}

/// Downloads packages into `archives_dir` and extracts them under
/// `themes_dir/publisher.extension/version/`.
#[derive(Debug, Clone)]
pub struct ArchiveCache {
    themes_dir: PathBuf,
    archives_dir: PathBuf,
    http: reqwest::Client,
}

impl ArchiveCache {
    /// Create an archive cache over `layout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(layout: &CacheLayout, download_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(download_timeout)
            .user_agent(concat!("themesync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(layout, http))
    }

    /// Create an archive cache downloading through an existing client.
    pub fn with_client(layout: &CacheLayout, http: reqwest::Client) -> Self {
        Self {
            themes_dir: layout.themes_dir.clone(),
            archives_dir: layout.archives_dir.clone(),
            http,
        }
    }

    /// Directory holding every extracted version of a package.
    pub fn package_dir(&self, key: &NaturalKey) -> PathBuf {
        self.themes_dir.join(key.to_string())
    }

    /// Version-specific extraction directory.
    pub fn version_dir(&self, key: &NaturalKey, version: &str) -> PathBuf {
        self.package_dir(key).join(version)
    }

    /// Where the downloaded package for `version` is kept until extracted.
    pub fn archive_path(&self, key: &NaturalKey, version: &str) -> PathBuf {
        self.archives_dir
            .join(format!("{key}.{version}.{ARCHIVE_EXTENSION}"))
    }

    /// Download `url` to `dest` through a temporary file in the same directory.
    async fn download_archive(&self, url: &str, dest: &Path) -> Result<()> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| HarvestError::Network {
                url: url.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(HarvestError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| HarvestError::Network {
                url: url.to_string(),
                source,
            })?;

        std::fs::create_dir_all(&self.archives_dir)?;
        let mut temp = tempfile::NamedTempFile::new_in(&self.archives_dir)?;
        temp.write_all(&bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(dest).map_err(|e| e.error)?;
        Ok(())
    }

    /// Record the extracted tree's assets and recompute the picker summary.
    fn describe(&self, mut record: ListingRecord, version_dir: PathBuf) -> ListingRecord {
        let assets = collect_theme_assets(&version_dir);
        if assets.is_empty() {
            warn!("No theme files found for: {}", record.natural_key());
        }
        record.quick_pick = Some(DisplayDetail::for_record(&record, assets.len()));
        record.theme_files = assets;
        record.theme_dir = Some(version_dir);
        record
    }
}

#[async_trait]
impl PackageAcquirer for ArchiveCache {
    async fn acquire(&self, record: ListingRecord, force: bool) -> Result<Acquisition> {
        let key = record.natural_key();
        let version = record.version().to_string();
        let version_dir = self.checked_version_dir(&key, &version)?;

        let stale = version_dir.is_dir() && !is_complete(&version_dir);
        if !force && !stale && version_dir.is_dir() {
            info!("Skipping download: already have {key} (version {version})");
            return Ok(Acquisition {
                record: self.describe(record, version_dir),
                outcome: AcquireOutcome::Cached,
            });
        }
        if stale {
            warn!("{key} (version {version}) has no package manifest, fetching it again");
        }

        let archive = self.archive_path(&key, &version);
        if !force && archive.is_file() {
            info!("Theme archive already exists: {key} (version {version})");
        } else {
            info!("Downloading theme: {key} (version {version})");
            if let Err(e) = self
                .download_archive(&record.extension.download_url, &archive)
                .await
            {
                error!("Error downloading {key}: {e}");
                return Ok(Acquisition {
                    record,
                    outcome: AcquireOutcome::DownloadFailed,
                });
            }
        }

        let replace = force || stale;
        let extracted = {
            let archive = archive.clone();
            let version_dir = version_dir.clone();
            tokio::task::spawn_blocking(move || extract_into_place(&archive, &version_dir, replace))
                .await
                .map_err(|e| HarvestError::Io {
                    source: std::io::Error::other(format!("extraction task failed: {e}")),
                })?
        };

        if let Err(e) = extracted {
            return Ok(self.settle_failed_extraction(record, &version_dir, &archive, replace, e));
        }
        info!("Extracted: {} to {}", archive.display(), version_dir.display());

        remove_archive(&archive);

        Ok(Acquisition {
            record: self.describe(record, version_dir),
            outcome: AcquireOutcome::Extracted,
        })
    }
}

impl ArchiveCache {
    /// [`version_dir`](Self::version_dir) for names taken from a remote listing.
    ///
    /// Each of `publisher.extension` and `version` must be one plain path
    /// component, so the result always lies inside `themes_dir`.
    fn checked_version_dir(&self, key: &NaturalKey, version: &str) -> Result<PathBuf> {
        let key_name = key.to_string();
        if !is_plain_component(&key_name) {
            return Err(HarvestError::UnsafePath {
                field: "extension key",
                value: key_name,
            });
        }
        if !is_plain_component(version) {
            return Err(HarvestError::UnsafePath {
                field: "version",
                value: version.to_string(),
            });
        }
        Ok(self.version_dir(key, version))
    }

    /// Decide what a failed extraction means for `record`.
    ///
    /// A complete version directory published by another worker is used as
    /// is; anything else is an extraction failure. The archive is removed
    /// either way.
    fn settle_failed_extraction(
        &self,
        record: ListingRecord,
        version_dir: &Path,
        archive: &Path,
        replace: bool,
        err: HarvestError,
    ) -> Acquisition {
        let key = record.natural_key();
        remove_archive(archive);
        if !replace && is_complete(version_dir) {
            debug!("{key} was extracted concurrently: {err}");
            return Acquisition {
                record: self.describe(record, version_dir.to_path_buf()),
                outcome: AcquireOutcome::Cached,
            };
        }
        error!("Failed to extract theme {key}: {err}");
        Acquisition {
            record,
            outcome: AcquireOutcome::ExtractFailed,
        }
    }
}

/// A version directory is usable once its package manifest is present.
fn is_complete(version_dir: &Path) -> bool {
    manifest_path_in(version_dir).is_file()
}

fn is_plain_component(value: &str) -> bool {
    let mut components = Path::new(value).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !value.contains('\\')
}

/// Unpack `archive` and publish it as `version_dir`.
///
/// The package is unpacked into a staging directory next to `version_dir`
/// and renamed into place, so `version_dir` only ever exists complete. The
/// rename doubles as the claim on the version: if another worker published
/// first, the rename fails and our staging copy is discarded.
fn extract_into_place(archive: &Path, version_dir: &Path, replace: bool) -> Result<()> {
    let corrupt = |source: Box<dyn std::error::Error + Send + Sync>| HarvestError::CorruptArchive {
        path: archive.display().to_string(),
        source,
    };

    let package_dir = version_dir.parent().ok_or_else(|| HarvestError::Io {
        source: std::io::Error::other(format!(
            "version directory has no parent: {}",
            version_dir.display()
        )),
    })?;
    std::fs::create_dir_all(package_dir)?;

    let staging = tempfile::Builder::new()
        .prefix(".staging-")
        .tempdir_in(package_dir)?;

    let file = std::fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| corrupt(Box::new(e)))?;
    zip.extract(staging.path()).map_err(|e| corrupt(Box::new(e)))?;

    if replace {
        match std::fs::remove_dir_all(version_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }

    match std::fs::rename(staging.path(), version_dir) {
        Ok(()) => Ok(()),
        Err(e) if version_dir.is_dir() => Err(HarvestError::Io {
            source: std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already published: {e}", version_dir.display()),
            ),
        }),
        Err(e) => Err(e.into()),
    }
}

fn remove_archive(archive: &Path) {
    match std::fs::remove_file(archive) {
        Ok(()) => info!("Deleted archive: {}", archive.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not delete archive {}: {e}", archive.display()),
    }
}
