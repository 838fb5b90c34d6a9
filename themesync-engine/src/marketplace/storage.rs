//! Metadata persistence and on-disk cache layout.
//!
//! Every metadata file is a single JSON array that is replaced atomically:
//! the new content is written to a temporary file next to the target and
//! renamed over it, so readers never observe a partially written file.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::error::{HarvestError, Result};
use super::partition::SortPartition;
use super::record::ListingRecord;
use super::search_index::SearchIndexEntry;

/// File holding single-item overrides fetched outside any partition.
pub const OVERRIDES_FILE: &str = "single_themes.json";

/// File holding the built search index.
pub const SEARCH_INDEX_FILE: &str = "search.json";

/// Placeholder files that destructive resets leave in place.
pub const SENTINEL_FILES: &[&str] = &[".gitkeep"];

/// Directories making up the local cache.
///
/// - `metadata_dir`: one JSON file per partition, overrides, search index
/// - `themes_dir`: extracted `publisher.extension/version/` trees
/// - `archives_dir`: transient downloaded packages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    pub metadata_dir: PathBuf,
    pub themes_dir: PathBuf,
    pub archives_dir: PathBuf,
}

impl CacheLayout {
    /// Layout rooted at a single directory, mirroring the default config.
    pub fn under(root: &Path) -> Self {
        Self {
            metadata_dir: root.to_path_buf(),
            themes_dir: root.join("themes"),
            archives_dir: root.join("archives"),
        }
    }

    /// Create all cache directories if they don't exist.
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(&self.metadata_dir)?;
        std::fs::create_dir_all(&self.themes_dir)?;
        std::fs::create_dir_all(&self.archives_dir)?;
        Ok(())
    }
}

/// Persistence of listing records, partitioned by sort order.
pub trait RecordStore: Send + Sync {
    /// Replace the partition's full record list.
    fn save(&self, partition: SortPartition, records: &[ListingRecord]) -> Result<()>;

    /// Load a partition; a partition never saved loads as empty.
    fn load(&self, partition: SortPartition) -> Result<Vec<ListingRecord>>;

    /// Replace the single-item override collection.
    fn save_overrides(&self, records: &[ListingRecord]) -> Result<()>;

    /// Load the single-item override collection.
    fn load_overrides(&self) -> Result<Vec<ListingRecord>>;

    /// Replace the search index.
    fn save_search_index(&self, entries: &[SearchIndexEntry]) -> Result<()>;

    /// Reset a partition to an empty list.
    fn clear(&self, partition: SortPartition) -> Result<()> {
        self.save(partition, &[])
    }
}

/// JSON-file backed [`RecordStore`].
#[derive(Debug, Clone)]
pub struct JsonRecordStore {
    base_dir: PathBuf,
    writers: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl JsonRecordStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            writers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path of a partition's metadata file.
    pub fn partition_path(&self, partition: SortPartition) -> PathBuf {
        self.base_dir.join(partition.file_name())
    }

    pub fn overrides_path(&self) -> PathBuf {
        self.base_dir.join(OVERRIDES_FILE)
    }

    pub fn search_index_path(&self) -> PathBuf {
        self.base_dir.join(SEARCH_INDEX_FILE)
    }

    /// Write `value` to `path`, serializing concurrent writers of the same file.
    fn write<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<()> {
        let writer = {
            let mut writers = self.writers.lock().map_err(|e| HarvestError::StorageWrite {
                path: path.display().to_string(),
                source: std::io::Error::other(format!("writer table lock: {e}")),
            })?;
            writers.entry(path.to_path_buf()).or_default().clone()
        };
        let _guard = writer.lock().map_err(|e| HarvestError::StorageWrite {
            path: path.display().to_string(),
            source: std::io::Error::other(format!("writer lock: {e}")),
        })?;
        write_json_atomic(path, value)
    }
}

impl RecordStore for JsonRecordStore {
    fn save(&self, partition: SortPartition, records: &[ListingRecord]) -> Result<()> {
        self.write(&self.partition_path(partition), records)
    }

    fn load(&self, partition: SortPartition) -> Result<Vec<ListingRecord>> {
        read_json_array(&self.partition_path(partition))
    }

    fn save_overrides(&self, records: &[ListingRecord]) -> Result<()> {
        self.write(&self.overrides_path(), records)
    }

    fn load_overrides(&self) -> Result<Vec<ListingRecord>> {
        read_json_array(&self.overrides_path())
    }

    fn save_search_index(&self, entries: &[SearchIndexEntry]) -> Result<()> {
        self.write(&self.search_index_path(), entries)
    }
}

/// Read a JSON array file, treating a missing file as empty.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn read_json_array<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&content).map_err(|source| HarvestError::JsonParse {
        path: path.display().to_string(),
        source,
    })
}

/// Atomically replace `path` with the JSON encoding of `value`.
///
/// The temporary file is created in the target's directory so the final
/// rename never crosses a filesystem. On any failure the temporary file is
/// removed and the previous content of `path` is left untouched.
///
/// # Errors
///
/// Returns `StorageWrite` if the temporary file cannot be written or renamed.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let storage_err = |source: std::io::Error| HarvestError::StorageWrite {
        path: path.display().to_string(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(storage_err)?;

    let prefix = format!(
        ".{}.",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    );
    let mut temp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(storage_err)?;

    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        serde_json::to_writer(&mut writer, value).map_err(|e| storage_err(e.into()))?;
        writer.flush().map_err(storage_err)?;
    }
    temp.as_file().sync_all().map_err(storage_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(temp.path(), std::fs::Permissions::from_mode(0o644))
            .map_err(storage_err)?;
    }

    temp.persist(path).map_err(|e| storage_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marketplace::record::fixtures::listing;
    use tempfile::TempDir;

    fn create_temp_store() -> (TempDir, JsonRecordStore) {
        let temp_dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(e) => panic!("Failed to create temp dir: {e}"),
        };
        let store = JsonRecordStore::new(temp_dir.path());
        (temp_dir, store)
    }

    fn leftover_temp_files(dir: &Path) -> Vec<PathBuf> {
        match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "tmp"))
                .collect(),
            Err(e) => panic!("Failed to list dir: {e}"),
        }
    }

    #[test]
    fn test_load_missing_partition_is_empty() {
        let (_temp, store) = create_temp_store();
        match store.load(SortPartition::ByName) {
            Ok(records) => assert!(records.is_empty()),
            Err(e) => panic!("Should load empty partition: {e}"),
        }
    }

    #[test]
    fn test_save_and_load_partition() {
        let (temp, store) = create_temp_store();
        let records = vec![
            listing("acme", "dark-pro", "1.2.0"),
            listing("zen", "calm", "0.1.0"),
        ];

        if let Err(e) = store.save(SortPartition::MostInstalled, &records) {
            panic!("Failed to save: {e}");
        }
        assert!(temp.path().join("mostinstalled.json").exists());

        match store.load(SortPartition::MostInstalled) {
            Ok(loaded) => assert_eq!(loaded, records),
            Err(e) => panic!("Failed to load: {e}"),
        }
        assert!(leftover_temp_files(temp.path()).is_empty());
    }

    #[test]
    fn test_save_replaces_previous_content() {
        let (_temp, store) = create_temp_store();
        let first = vec![listing("acme", "dark-pro", "1.2.0")];
        let second = vec![listing("zen", "calm", "0.1.0")];

        if let Err(e) = store.save(SortPartition::ByRating, &first) {
            panic!("Failed to save: {e}");
        }
        if let Err(e) = store.save(SortPartition::ByRating, &second) {
            panic!("Failed to save: {e}");
        }
        match store.load(SortPartition::ByRating) {
            Ok(loaded) => assert_eq!(loaded, second),
            Err(e) => panic!("Failed to load: {e}"),
        }
    }

    #[test]
    fn test_partitions_are_independent() {
        let (_temp, store) = create_temp_store();
        let records = vec![listing("acme", "dark-pro", "1.2.0")];
        if let Err(e) = store.save(SortPartition::ByName, &records) {
            panic!("Failed to save: {e}");
        }
        match store.load(SortPartition::Publisher) {
            Ok(loaded) => assert!(loaded.is_empty()),
            Err(e) => panic!("Failed to load: {e}"),
        }
    }

    struct FailingValue;

    impl Serialize for FailingValue {
        fn serialize<S: serde::Serializer>(&self, _serializer: S) -> std::result::Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("simulated crash mid-write"))
        }
    }

    #[test]
    fn test_failed_write_keeps_previous_file() {
        let (temp, store) = create_temp_store();
        let records = vec![listing("acme", "dark-pro", "1.2.0")];
        if let Err(e) = store.save(SortPartition::UpdateDate, &records) {
            panic!("Failed to save: {e}");
        }

        let path = store.partition_path(SortPartition::UpdateDate);
        let result = write_json_atomic(&path, &FailingValue);
        assert!(matches!(result, Err(HarvestError::StorageWrite { .. })));

        match store.load(SortPartition::UpdateDate) {
            Ok(loaded) => assert_eq!(loaded, records),
            Err(e) => panic!("Previous content should survive: {e}"),
        }
        assert!(leftover_temp_files(temp.path()).is_empty());
    }

    #[test]
    fn test_abandoned_temp_file_does_not_affect_target() {
        let (temp, store) = create_temp_store();
        let records = vec![listing("acme", "dark-pro", "1.2.0")];
        if let Err(e) = store.save(SortPartition::ByName, &records) {
            panic!("Failed to save: {e}");
        }

        // A writer that died before the rename leaves only its temp file.
        let stray = temp.path().join(".byname.json.abc123.tmp");
        if let Err(e) = std::fs::write(&stray, "[{\"trunc") {
            panic!("Failed to write stray temp file: {e}");
        }

        match store.load(SortPartition::ByName) {
            Ok(loaded) => assert_eq!(loaded, records),
            Err(e) => panic!("Target should be intact: {e}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_is_world_readable() {
        use std::os::unix::fs::PermissionsExt;

        let (_temp, store) = create_temp_store();
        if let Err(e) = store.save(SortPartition::ByName, &[]) {
            panic!("Failed to save: {e}");
        }
        match std::fs::metadata(store.partition_path(SortPartition::ByName)) {
            Ok(meta) => assert_eq!(meta.permissions().mode() & 0o777, 0o644),
            Err(e) => panic!("Failed to stat: {e}"),
        }
    }

    #[test]
    fn test_corrupt_partition_reports_parse_error() {
        let (_temp, store) = create_temp_store();
        let path = store.partition_path(SortPartition::ByName);
        if let Err(e) = std::fs::write(&path, "not json") {
            panic!("Failed to write: {e}");
        }
        assert!(matches!(
            store.load(SortPartition::ByName),
            Err(HarvestError::JsonParse { .. })
        ));
    }

    #[test]
    fn test_clear_partition_writes_empty_array() {
        let (_temp, store) = create_temp_store();
        let records = vec![listing("acme", "dark-pro", "1.2.0")];
        if let Err(e) = store.save(SortPartition::ByName, &records) {
            panic!("Failed to save: {e}");
        }
        if let Err(e) = store.clear(SortPartition::ByName) {
            panic!("Failed to clear: {e}");
        }
        match std::fs::read_to_string(store.partition_path(SortPartition::ByName)) {
            Ok(content) => assert_eq!(content, "[]"),
            Err(e) => panic!("Failed to read: {e}"),
        }
    }

    #[test]
    fn test_overrides_round_trip() {
        let (_temp, store) = create_temp_store();
        let records = vec![listing("acme", "dark-pro", "1.2.0")];
        if let Err(e) = store.save_overrides(&records) {
            panic!("Failed to save overrides: {e}");
        }
        match store.load_overrides() {
            Ok(loaded) => assert_eq!(loaded, records),
            Err(e) => panic!("Failed to load overrides: {e}"),
        }
    }

    #[test]
    fn test_layout_ensure_creates_directories() {
        let temp = match TempDir::new() {
            Ok(dir) => dir,
            Err(e) => panic!("Failed to create temp dir: {e}"),
        };
        let layout = CacheLayout::under(&temp.path().join("themes"));
        if let Err(e) = layout.ensure() {
            panic!("Failed to create layout: {e}");
        }
        assert!(layout.metadata_dir.is_dir());
        assert!(layout.themes_dir.is_dir());
        assert!(layout.archives_dir.is_dir());
    }
}
