//! Per-partition workflows over a listing source, a record store and an acquirer.

use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{Instrument, error, info, info_span, warn};
use walkdir::WalkDir;

use super::archive::PackageAcquirer;
use super::error::{HarvestError, Result};
use super::listing::{ListingSource, Pagination, fetch_partition};
use super::partition::SortPartition;
use super::record::{ListingRecord, NaturalKey, manifest_path_in};
use super::search_index::SearchIndexBuilder;
use super::storage::{CacheLayout, RecordStore, SENTINEL_FILES};

/// Tuning knobs for an [`Orchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub pagination: Pagination,
    /// Packages acquired at once; 1 means strictly sequential.
    pub acquire_concurrency: usize,
    /// Re-download and re-extract packages that are already cached.
    pub force: bool,
    pub show_progress: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            pagination: Pagination::default(),
            acquire_concurrency: 1,
            force: false,
            show_progress: true,
        }
    }
}

/// Outcome counts of one acquisition batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Records the batch started from.
    pub listed: usize,
    /// Records whose package is now cached.
    pub processed: usize,
    /// Records kept with their previous state after a download or extraction failure.
    pub failed: usize,
    /// Records dropped after an unexpected error.
    pub dropped: usize,
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} processed", self.processed, self.listed)?;
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }
        if self.dropped > 0 {
            write!(f, ", {} dropped", self.dropped)?;
        }
        Ok(())
    }
}

/// A problem found by [`Orchestrator::verify_integrity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityFinding {
    MissingDirectory {
        key: NaturalKey,
        path: Option<PathBuf>,
    },
    /// The version directory exists but its package manifest is gone.
    MissingManifest {
        key: NaturalKey,
        path: PathBuf,
    },
    MissingFile {
        path: PathBuf,
    },
    CorruptedJson {
        path: PathBuf,
        reason: String,
    },
}

impl fmt::Display for IntegrityFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingDirectory { key, path: Some(path) } => {
                write!(f, "Theme directory not found for {key}: {}", path.display())
            }
            Self::MissingDirectory { key, path: None } => {
                write!(f, "Theme directory not recorded for {key}")
            }
            Self::MissingManifest { key, path } => {
                write!(f, "Package manifest missing for {key}: {}", path.display())
            }
            Self::MissingFile { path } => write!(f, "Missing file: {}", path.display()),
            Self::CorruptedJson { path, reason } => {
                write!(f, "Corrupted JSON file: {} ({reason})", path.display())
            }
        }
    }
}

/// Result of an integrity scan over one partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub checked: usize,
    pub findings: Vec<IntegrityFinding>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

/// What [`Orchestrator::reconcile`] removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub deleted_files: Vec<PathBuf>,
    pub removed_dirs: Vec<PathBuf>,
}

/// Summary of [`Orchestrator::run_all`].
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub partitions: Vec<(SortPartition, BatchReport)>,
    pub overrides: BatchReport,
    pub archives_cleared: usize,
    pub indexed: usize,
    pub reconciled: ReconcileReport,
}

/// Drives fetching, acquisition and maintenance for every partition.
pub struct Orchestrator<S, R, A> {
    source: S,
    store: R,
    acquirer: A,
    layout: CacheLayout,
    options: OrchestratorOptions,
}

impl<S, R, A> Orchestrator<S, R, A>
where
    S: ListingSource,
    R: RecordStore,
    A: PackageAcquirer,
{
    pub fn new(
        source: S,
        store: R,
        acquirer: A,
        layout: CacheLayout,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            source,
            store,
            acquirer,
            layout,
            options,
        }
    }

    pub fn store(&self) -> &R {
        &self.store
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    /// Fetch a partition from the listing source and replace its stored copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the fetch fails or the partition cannot be saved;
    /// the stored partition is untouched in both cases.
    pub async fn fetch_and_save(&self, partition: SortPartition) -> Result<usize> {
        async {
            let records = fetch_partition(&self.source, partition, &self.options.pagination).await?;
            self.store.save(partition, &records)?;
            info!("Saved {} listings", records.len());
            Ok(records.len())
        }
        .instrument(info_span!("partition", name = %partition))
        .await
    }

    /// Acquire every record of a partition and re-save the results.
    ///
    /// # Errors
    ///
    /// Returns an error only if the partition cannot be loaded or saved.
    pub async fn acquire_all(&self, partition: SortPartition) -> Result<BatchReport> {
        async {
            let records = self.store.load(partition)?;
            let (kept, report) = self
                .acquire_batch(records, &format!("Downloading themes ({partition})"), |record| {
                    std::future::ready(record)
                })
                .await;

            if kept.is_empty() {
                warn!("No themes were successfully processed");
            } else {
                self.store.save(partition, &kept)?;
                info!("{report}; metadata updated");
            }
            Ok(report)
        }
        .instrument(info_span!("partition", name = %partition))
        .await
    }

    /// Fetch one listing directly, acquire it and upsert it into the overrides.
    ///
    /// # Errors
    ///
    /// Returns `ListingNotFound` or a network error from the listing source,
    /// or a storage error if the overrides cannot be saved.
    pub async fn acquire_single(&self, publisher: &str, extension: &str) -> Result<ListingRecord> {
        let listing = self.source.fetch_single(publisher, extension).await?;
        let acquisition = self.acquirer.acquire(listing, self.options.force).await?;
        if !acquisition.outcome.is_cached() {
            warn!("{publisher}.{extension} could not be cached ({:?})", acquisition.outcome);
        }

        let mut overrides = self.store.load_overrides()?;
        upsert_by_extension_name(&mut overrides, acquisition.record.clone());
        self.store.save_overrides(&overrides)?;
        info!("Theme {publisher}.{extension} processed and saved");
        Ok(acquisition.record)
    }

    /// [`acquire_single`](Self::acquire_single) from a `publisher.extension` identifier.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKeyFormat` before any work if `key` is malformed.
    pub async fn acquire_single_key(&self, key: &str) -> Result<ListingRecord> {
        let key = NaturalKey::parse(key)?;
        self.acquire_single(&key.publisher, &key.extension).await
    }

    /// Re-fetch and re-acquire every override at its latest listed version.
    ///
    /// An override whose listing cannot be fetched is re-acquired from its
    /// stored record instead.
    ///
    /// # Errors
    ///
    /// Returns an error only if the overrides cannot be loaded or saved.
    pub async fn refresh_overrides(&self) -> Result<BatchReport> {
        let overrides = self.store.load_overrides()?;
        let (kept, report) = self
            .acquire_batch(overrides, "Refreshing single themes", move |stored| async move {
                let key = stored.natural_key();
                match self.source.fetch_single(&key.publisher, &key.extension).await {
                    Ok(latest) => latest,
                    Err(e) => {
                        warn!("Keeping stored listing for {key}: {e}");
                        stored
                    }
                }
            })
            .await;

        if !kept.is_empty() {
            self.store.save_overrides(&kept)?;
        }
        info!("Single themes: {report}");
        Ok(report)
    }

    async fn acquire_batch<F, Fut>(
        &self,
        records: Vec<ListingRecord>,
        message: &str,
        resolve: F,
    ) -> (Vec<ListingRecord>, BatchReport)
    where
        F: Fn(ListingRecord) -> Fut,
        Fut: Future<Output = ListingRecord>,
    {
        let mut report = BatchReport {
            listed: records.len(),
            ..BatchReport::default()
        };
        let bar = self.progress(records.len(), message);
        let resolve = &resolve;
        let bar_ref = &bar;

        // `buffered` keeps partition order, which the search index relies on.
        let results: Vec<(NaturalKey, Result<_>)> = stream::iter(records)
            .map(move |record| async move {
                let record = resolve(record).await;
                let key = record.natural_key();
                let result = self.acquirer.acquire(record, self.options.force).await;
                bar_ref.inc(1);
                (key, result)
            })
            .buffered(self.options.acquire_concurrency.max(1))
            .collect()
            .await;
        bar.finish_and_clear();

        let mut kept = Vec::with_capacity(results.len());
        for (key, result) in results {
            match result {
                Ok(acquisition) => {
                    if acquisition.outcome.is_cached() {
                        report.processed += 1;
                    } else {
                        report.failed += 1;
                    }
                    kept.push(acquisition.record);
                }
                Err(e) => {
                    error!("Error processing theme {key}: {e}");
                    report.dropped += 1;
                }
            }
        }
        (kept, report)
    }

    /// Check every record's cache directory and asset files.
    ///
    /// All findings are collected; one missing file never stops the scan.
    ///
    /// # Errors
    ///
    /// Returns an error only if the partition cannot be loaded.
    pub async fn verify_integrity(&self, partition: SortPartition) -> Result<IntegrityReport> {
        async {
            let records = self.store.load(partition)?;
            let bar = self.progress(records.len(), &format!("Checking theme integrity ({partition})"));
            let mut report = IntegrityReport {
                checked: records.len(),
                ..IntegrityReport::default()
            };

            for record in &records {
                check_record(record, &mut report.findings);
                bar.inc(1);
            }
            bar.finish_and_clear();

            if report.is_clean() {
                info!("All theme files passed integrity check");
            } else {
                error!("Integrity check failed:");
                for finding in &report.findings {
                    error!("{finding}");
                }
            }
            Ok(report)
        }
        .instrument(info_span!("partition", name = %partition))
        .await
    }

    /// Every cache file some record still needs, relative to `themes_dir`.
    ///
    /// Covers asset files and manifests of all partitions and the overrides.
    /// Paths are compared by physical location, so a record written under a
    /// different spelling of the cache root still counts.
    ///
    /// # Errors
    ///
    /// Returns an error if any metadata file cannot be read.
    pub fn referenced_files(&self) -> Result<HashSet<PathBuf>> {
        let root = physical_path(&self.layout.themes_dir);
        let mut referenced = HashSet::new();
        let mut collections = Vec::with_capacity(SortPartition::ALL.len() + 1);
        for partition in SortPartition::ALL {
            collections.push(self.store.load(partition)?);
        }
        collections.push(self.store.load_overrides()?);

        for record in collections.iter().flatten() {
            let Some(manifest) = record.manifest_path() else {
                continue;
            };
            for path in record.asset_paths().into_iter().chain(std::iter::once(manifest)) {
                if let Some(relative) = relative_to(&root, &path) {
                    referenced.insert(relative);
                }
            }
        }
        Ok(referenced)
    }

    /// Delete unreferenced files under `themes_dir`, then prune empty directories.
    ///
    /// Deletion failures are logged and skipped. Sentinel files and the
    /// cache root itself are always kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the referenced set cannot be computed.
    pub fn reconcile(&self) -> Result<ReconcileReport> {
        let referenced = self.referenced_files()?;
        let root = &self.layout.themes_dir;
        let mut report = ReconcileReport::default();
        if !root.is_dir() {
            warn!("Themes directory does not exist: {}", root.display());
            return Ok(report);
        }
        let physical_root = physical_path(root);

        for entry in WalkDir::new(root).min_depth(1).into_iter().filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry: {e}");
                None
            }
        }) {
            if entry.file_type().is_dir() || is_sentinel(entry.path()) {
                continue;
            }
            let Some(relative) = relative_to(&physical_root, entry.path()) else {
                continue;
            };
            if referenced.contains(&relative) {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => {
                    info!("Deleted: {}", entry.path().display());
                    report.deleted_files.push(entry.into_path());
                }
                Err(e) => warn!("Failed to delete {}: {e}", entry.path().display()),
            }
        }

        // Children come before parents, so nested empty dirs collapse in one pass.
        for entry in WalkDir::new(root)
            .min_depth(1)
            .contents_first(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
        {
            let is_empty = match std::fs::read_dir(entry.path()) {
                Ok(mut entries) => entries.next().is_none(),
                Err(_) => false,
            };
            if !is_empty {
                continue;
            }
            match std::fs::remove_dir(entry.path()) {
                Ok(()) => {
                    info!("Removed empty directory: {}", entry.path().display());
                    report.removed_dirs.push(entry.into_path());
                }
                Err(e) => warn!("Failed to remove {}: {e}", entry.path().display()),
            }
        }

        info!(
            "Cleanup complete: {} files deleted, {} directories removed",
            report.deleted_files.len(),
            report.removed_dirs.len()
        );
        Ok(report)
    }

    /// Build the search index from the stored metadata and persist it.
    ///
    /// # Errors
    ///
    /// Returns an error if metadata cannot be read or the index cannot be written.
    pub fn build_search_index(&self) -> Result<usize> {
        SearchIndexBuilder::new(&self.store, &self.layout.themes_dir).write()
    }

    /// Reset a partition to an empty list.
    pub fn clear_partition(&self, partition: SortPartition) -> Result<()> {
        self.store.clear(partition)?;
        info!("Cleared metadata for {partition}");
        Ok(())
    }

    /// Delete downloaded archives, keeping sentinel files.
    pub fn clear_archive_cache(&self) -> Result<usize> {
        let removed = clear_directory(&self.layout.archives_dir)?;
        info!("Archives directory cleared ({removed} entries)");
        Ok(removed)
    }

    /// Delete every extracted package, keeping sentinel files.
    pub fn clear_extracted_tree(&self) -> Result<usize> {
        let removed = clear_directory(&self.layout.themes_dir)?;
        info!("Themes directory cleared ({removed} entries)");
        Ok(removed)
    }

    /// Full refresh: fetch and acquire each partition, refresh overrides,
    /// drop archives, rebuild the index and reconcile the cache.
    ///
    /// A partition whose listing cannot be fetched is acquired from its
    /// stored copy.
    ///
    /// # Errors
    ///
    /// Returns the first storage error; the run stops there.
    pub async fn run_all(&self, partitions: &[SortPartition]) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        for &partition in partitions {
            match self.fetch_and_save(partition).await {
                Ok(_) => {}
                Err(e @ HarvestError::StorageWrite { .. }) => return Err(e),
                Err(e) if e.is_transient() => {
                    warn!("Fetching {partition} failed, using stored listings (re-run to retry): {e}")
                }
                Err(e) => error!("Fetching {partition} failed, using stored listings: {e}"),
            }
            let report = self.acquire_all(partition).await?;
            summary.partitions.push((partition, report));
        }

        summary.overrides = self.refresh_overrides().await?;
        summary.archives_cleared = self.clear_archive_cache()?;
        summary.indexed = self.build_search_index()?;
        summary.reconciled = self.reconcile()?;
        Ok(summary)
    }

    fn progress(&self, len: usize, message: &str) -> ProgressBar {
        if !self.options.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg} {bar:40.cyan/blue} {pos}/{len}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        bar.set_message(message.to_string());
        bar
    }
}

/// Replace the entry with the same extension name, or append.
fn upsert_by_extension_name(records: &mut Vec<ListingRecord>, record: ListingRecord) {
    let name = &record.extension.extension_name;
    match records
        .iter()
        .position(|r| &r.extension.extension_name == name)
    {
        Some(index) => records[index] = record,
        None => records.push(record),
    }
}

fn check_record(record: &ListingRecord, findings: &mut Vec<IntegrityFinding>) {
    let Some(theme_dir) = record.theme_dir.as_ref().filter(|dir| dir.is_dir()) else {
        findings.push(IntegrityFinding::MissingDirectory {
            key: record.natural_key(),
            path: record.theme_dir.clone(),
        });
        return;
    };

    let manifest = manifest_path_in(theme_dir);
    if !manifest.is_file() {
        findings.push(IntegrityFinding::MissingManifest {
            key: record.natural_key(),
            path: manifest,
        });
    }

    for asset in &record.theme_files {
        let path = theme_dir.join(&asset.file);
        if !path.is_file() {
            findings.push(IntegrityFinding::MissingFile { path });
            continue;
        }
        let is_json = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if !is_json {
            continue;
        }
        let parsed = std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|content| {
                serde_json::from_str::<serde_json::Value>(content.trim_start_matches('\u{feff}'))
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            });
        if let Err(reason) = parsed {
            findings.push(IntegrityFinding::CorruptedJson { path, reason });
        }
    }
}

/// Where `path` lives on disk; the lexical absolute path if it does not exist.
fn physical_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// `path` relative to the physical directory `root`, if it lies inside it.
fn relative_to(root: &Path, path: &Path) -> Option<PathBuf> {
    physical_path(path)
        .strip_prefix(root)
        .ok()
        .map(Path::to_path_buf)
}

fn is_sentinel(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| SENTINEL_FILES.iter().any(|s| name == *s))
}

/// Remove every entry of `dir` except sentinel files. A missing `dir` is a no-op.
fn clear_directory(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        warn!("Directory does not exist: {}", dir.display());
        return Ok(0);
    }
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if is_sentinel(&path) {
            continue;
        }
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
        removed += 1;
    }
    Ok(removed)
}
