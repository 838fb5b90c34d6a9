//! Deduplicated search index over every partition and the overrides.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path};
use tracing::info;

use super::detail::quick_pick_detail;
use super::error::Result;
use super::partition::SortPartition;
use super::record::ListingRecord;
use super::storage::RecordStore;

/// Prefix under which the front end serves the extracted tree.
pub const INDEX_PATH_PREFIX: &str = "themes/themes";

/// One package in the search index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SearchIndexEntry {
    pub label: String,
    pub description: String,
    pub detail: String,
    pub extension_name: String,
    pub theme_files: Vec<IndexedTheme>,
}

/// A theme file as addressed by the front end.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexedTheme {
    pub name: String,
    pub path: String,
}

/// Builds the index from whatever a [`RecordStore`] currently holds.
pub struct SearchIndexBuilder<'a, R: RecordStore + ?Sized> {
    store: &'a R,
    themes_dir: &'a Path,
}

impl<'a, R: RecordStore + ?Sized> SearchIndexBuilder<'a, R> {
    pub fn new(store: &'a R, themes_dir: &'a Path) -> Self {
        Self { store, themes_dir }
    }

    /// Merge partitions in [`SortPartition::ALL`] order, then the overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if any metadata file cannot be read.
    pub fn build(&self) -> Result<Vec<SearchIndexEntry>> {
        let mut collections = Vec::with_capacity(SortPartition::ALL.len() + 1);
        for partition in SortPartition::ALL {
            collections.push(self.store.load(partition)?);
        }
        collections.push(self.store.load_overrides()?);
        Ok(merge_entries(collections, self.themes_dir))
    }

    /// Build the index and replace the persisted copy. Returns the entry count.
    ///
    /// # Errors
    ///
    /// Returns an error if reading metadata or writing the index fails.
    pub fn write(&self) -> Result<usize> {
        let entries = self.build()?;
        self.store.save_search_index(&entries)?;
        info!("Total unique themes indexed: {}", entries.len());
        Ok(entries.len())
    }
}

/// Keep the first record seen for each extension name, in iteration order.
pub fn merge_entries<I>(collections: I, themes_dir: &Path) -> Vec<SearchIndexEntry>
where
    I: IntoIterator<Item = Vec<ListingRecord>>,
{
    let mut seen = HashSet::new();
    collections
        .into_iter()
        .flatten()
        .filter(|record| seen.insert(record.extension.extension_name.clone()))
        .map(|record| index_entry(&record, themes_dir))
        .collect()
}

fn index_entry(record: &ListingRecord, themes_dir: &Path) -> SearchIndexEntry {
    let theme_files: Vec<IndexedTheme> = match &record.theme_dir {
        Some(theme_dir) => record
            .theme_files
            .iter()
            .map(|asset| IndexedTheme {
                name: asset.name.clone(),
                path: index_path(&theme_dir.join(&asset.file), theme_dir, themes_dir),
            })
            .collect(),
        None => Vec::new(),
    };

    SearchIndexEntry {
        label: record.display_name.clone(),
        description: record.publisher.display_name.clone(),
        detail: quick_pick_detail(theme_files.len(), &record.statistics),
        extension_name: record.extension.extension_name.clone(),
        theme_files,
    }
}

/// Rewrite an asset path to `themes/themes/<pub.ext>/<version>/<file>`.
///
/// Paths recorded under a different cache root fall back to the last two
/// components of the record's `theme_dir`.
fn index_path(asset: &Path, theme_dir: &Path, themes_dir: &Path) -> String {
    let relative = match asset.strip_prefix(themes_dir) {
        Ok(relative) => forward_slashes(relative),
        Err(_) => {
            let tail: Vec<String> = theme_dir
                .components()
                .rev()
                .take(2)
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            let file = asset.strip_prefix(theme_dir).map(forward_slashes).unwrap_or_default();
            let mut parts: Vec<String> = tail.into_iter().rev().collect();
            parts.push(file);
            parts.join("/")
        }
    };
    format!("{INDEX_PATH_PREFIX}/{relative}")
}

fn forward_slashes(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marketplace::record::ThemeAsset;
    use crate::marketplace::record::fixtures::listing;
    use crate::marketplace::storage::JsonRecordStore;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn acquired(publisher: &str, extension: &str, version: &str, root: &Path) -> ListingRecord {
        let mut record = listing(publisher, extension, version);
        record.theme_dir = Some(root.join(format!("{publisher}.{extension}")).join(version));
        record.theme_files = vec![ThemeAsset {
            file: "extension/themes/dark.json".to_string(),
            name: format!("{extension} dark"),
            ui_theme: "vs-dark".to_string(),
        }];
        record
    }

    #[test]
    fn test_entry_paths_are_root_relative() {
        let root = PathBuf::from("/srv/cache/themes");
        let entries = merge_entries(vec![vec![acquired("acme", "dark-pro", "1.2.0", &root)]], &root);

        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.label, "dark-pro theme");
        assert_eq!(entry.description, "ACME");
        assert_eq!(entry.extension_name, "dark-pro");
        assert_eq!(
            entry.theme_files,
            vec![IndexedTheme {
                name: "dark-pro dark".to_string(),
                path: "themes/themes/acme.dark-pro/1.2.0/extension/themes/dark.json".to_string(),
            }]
        );
        assert!(entry.detail.starts_with("$(symbol-color) 1 Theme |"));
    }

    #[test]
    fn test_first_occurrence_wins() {
        let root = PathBuf::from("themes/themes");
        let first = acquired("acme", "dark-pro", "1.2.0", &root);
        let mut later = acquired("other", "dark-pro", "9.9.9", &root);
        later.display_name = "Impostor".to_string();
        let unique = listing("zen", "calm", "0.1.0");

        let entries = merge_entries(vec![vec![first], vec![unique, later]], &root);
        let names: Vec<_> = entries.iter().map(|e| e.extension_name.as_str()).collect();
        assert_eq!(names, vec!["dark-pro", "calm"]);
        assert_eq!(entries[0].label, "dark-pro theme");
        assert!(entries[0].theme_files[0].path.contains("acme.dark-pro/1.2.0"));
    }

    #[test]
    fn test_unacquired_record_has_no_theme_files() {
        let entries = merge_entries(vec![vec![listing("zen", "calm", "0.1.0")]], Path::new("t"));
        assert!(entries[0].theme_files.is_empty());
        assert!(entries[0].detail.starts_with("$(symbol-color) 0 Theme"));
    }

    #[test]
    fn test_foreign_root_falls_back_to_version_dir_tail() {
        let record = acquired("acme", "dark-pro", "1.2.0", Path::new("/old/root"));
        let entries = merge_entries(vec![vec![record]], Path::new("/new/root"));
        assert_eq!(
            entries[0].theme_files[0].path,
            "themes/themes/acme.dark-pro/1.2.0/extension/themes/dark.json"
        );
    }

    #[test]
    fn test_write_merges_partitions_then_overrides() {
        let temp = match TempDir::new() {
            Ok(dir) => dir,
            Err(e) => panic!("Failed to create temp dir: {e}"),
        };
        let store = JsonRecordStore::new(temp.path());
        let themes_dir = temp.path().join("themes");

        let in_partition = acquired("acme", "dark-pro", "1.2.0", &themes_dir);
        let mut override_dup = acquired("acme", "dark-pro", "2.0.0", &themes_dir);
        override_dup.display_name = "Override".to_string();
        let override_only = acquired("sol", "sun", "3.0.0", &themes_dir);

        if let Err(e) = store.save(SortPartition::ByRating, &[in_partition]) {
            panic!("Failed to save partition: {e}");
        }
        if let Err(e) = store.save_overrides(&[override_dup, override_only]) {
            panic!("Failed to save overrides: {e}");
        }

        let builder = SearchIndexBuilder::new(&store, &themes_dir);
        match builder.write() {
            Ok(count) => assert_eq!(count, 2),
            Err(e) => panic!("Failed to write index: {e}"),
        }

        let content = match std::fs::read_to_string(store.search_index_path()) {
            Ok(content) => content,
            Err(e) => panic!("Failed to read index: {e}"),
        };
        let entries: Vec<SearchIndexEntry> = match serde_json::from_str(&content) {
            Ok(entries) => entries,
            Err(e) => panic!("Index should be valid JSON: {e}"),
        };
        assert_eq!(entries[0].label, "dark-pro theme");
        assert_eq!(entries[1].extension_name, "sun");

        let raw: serde_json::Value = match serde_json::from_str(&content) {
            Ok(raw) => raw,
            Err(e) => panic!("Index should be valid JSON: {e}"),
        };
        assert!(raw[0].get("extensionName").is_some());
        assert!(raw[0].get("themeFiles").is_some());
    }
}
