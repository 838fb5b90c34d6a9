//! Listing records as persisted in the metadata files.
//!
//! The JSON shape matches the files consumed by the theme picker front end,
//! so field names are pinned with serde renames rather than derived.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use super::error::{HarvestError, Result};

/// Directory inside an extracted package that holds the extension payload.
pub const EXTENSION_SUBDIR: &str = "extension";

/// Manifest file name inside [`EXTENSION_SUBDIR`].
pub const MANIFEST_FILE: &str = "package.json";

/// One theme package as known to the system.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListingRecord {
    #[serde(default)]
    pub categories: Vec<String>,
    pub display_name: String,
    pub publisher: Publisher,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub statistics: Statistics,
    pub extension: ExtensionInfo,

    /// Theme definitions found in the extracted package.
    #[serde(rename = "theme_files", default, skip_serializing_if = "Vec::is_empty")]
    pub theme_files: Vec<ThemeAsset>,

    /// Version-specific extraction directory, set once extraction succeeded.
    #[serde(rename = "theme_dir", default, skip_serializing_if = "Option::is_none")]
    pub theme_dir: Option<PathBuf>,

    #[serde(rename = "quick_pick", default, skip_serializing_if = "Option::is_none")]
    pub quick_pick: Option<DisplayDetail>,
}

/// Publisher identity.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Publisher {
    pub display_name: String,
    pub publisher_name: String,
}

/// Gallery statistics snapshot.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Statistics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(rename = "ratingcount", default, skip_serializing_if = "Option::is_none")]
    pub rating_count: Option<u64>,
}

/// Extension identity and the version the gallery currently reports.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionInfo {
    #[serde(default)]
    pub extension_id: String,
    pub extension_name: String,
    pub latest_version: String,
    pub download_url: String,
}

/// One renderable theme definition inside a package.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ThemeAsset {
    /// Path relative to the record's `theme_dir`.
    pub file: String,
    pub name: String,
    #[serde(rename = "uiTheme", default)]
    pub ui_theme: String,
}

/// Presentation summary shown in the picker.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DisplayDetail {
    pub label: String,
    pub description: String,
    pub detail: String,
}

/// The `(publisherName, extensionName)` pair identifying a package across versions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NaturalKey {
    pub publisher: String,
    pub extension: String,
}

impl NaturalKey {
    pub fn new(publisher: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            publisher: publisher.into(),
            extension: extension.into(),
        }
    }

    /// Parse a `publisher.extensionName` identifier.
    ///
    /// Splits on the first `.`, so extension names may themselves contain dots.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKeyFormat` if either half is empty or there is no `.`.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        match trimmed.split_once('.') {
            Some((publisher, extension)) if !publisher.is_empty() && !extension.is_empty() => {
                Ok(Self::new(publisher, extension))
            }
            _ => Err(HarvestError::InvalidKeyFormat {
                input: input.to_string(),
            }),
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.publisher, self.extension)
    }
}

impl ListingRecord {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::new(
            &self.publisher.publisher_name,
            &self.extension.extension_name,
        )
    }

    pub fn version(&self) -> &str {
        &self.extension.latest_version
    }

    /// Path of the package manifest, if the record has been extracted.
    pub fn manifest_path(&self) -> Option<PathBuf> {
        self.theme_dir.as_deref().map(manifest_path_in)
    }

    /// Absolute (or root-relative) paths of every recorded theme file.
    pub fn asset_paths(&self) -> Vec<PathBuf> {
        match &self.theme_dir {
            Some(dir) => self.theme_files.iter().map(|a| dir.join(&a.file)).collect(),
            None => Vec::new(),
        }
    }
}

/// Manifest location inside an extracted version directory.
pub fn manifest_path_in(version_dir: &Path) -> PathBuf {
    version_dir.join(EXTENSION_SUBDIR).join(MANIFEST_FILE)
}


#[cfg(test)]
mod tests {
    use super::fixtures::listing;
    use super::*;

    #[test]
    fn test_parse_natural_key() {
        let key = match NaturalKey::parse("acme.dark-pro") {
            Ok(key) => key,
            Err(e) => panic!("Should parse key: {e}"),
        };
        assert_eq!(key.publisher, "acme");
        assert_eq!(key.extension, "dark-pro");
        assert_eq!(key.to_string(), "acme.dark-pro");
    }

    #[test]
    fn test_parse_natural_key_keeps_later_dots() {
        if let Ok(key) = NaturalKey::parse("acme.theme.night") {
            assert_eq!(key.extension, "theme.night");
        } else {
            panic!("Should parse key with dotted extension name");
        }
    }

    #[test]
    fn test_parse_natural_key_rejects_malformed() {
        for input in ["acme", ".dark", "acme.", ""] {
            assert!(
                matches!(
                    NaturalKey::parse(input),
                    Err(HarvestError::InvalidKeyFormat { .. })
                ),
                "{input:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_serialized_shape() {
        let mut record = listing("acme", "dark-pro", "1.2.0");
        record.theme_dir = Some(PathBuf::from("themes/themes/acme.dark-pro/1.2.0"));
        record.theme_files = vec![ThemeAsset {
            file: "extension/themes/dark.json".to_string(),
            name: "Dark".to_string(),
            ui_theme: "vs-dark".to_string(),
        }];

        let value = match serde_json::to_value(&record) {
            Ok(value) => value,
            Err(e) => panic!("Should serialize record: {e}"),
        };
        assert_eq!(value["displayName"], "dark-pro theme");
        assert_eq!(value["publisher"]["publisherName"], "acme");
        assert_eq!(value["extension"]["latestVersion"], "1.2.0");
        assert_eq!(value["statistics"]["ratingcount"], 42);
        assert_eq!(value["theme_files"][0]["uiTheme"], "vs-dark");
        assert_eq!(value["theme_dir"], "themes/themes/acme.dark-pro/1.2.0");
        assert!(value.get("quick_pick").is_none());
    }

    #[test]
    fn test_unacquired_record_parses_without_cache_fields() {
        let json = r#"{
            "categories": ["Themes"],
            "displayName": "Dark Pro",
            "publisher": {"displayName": "Acme", "publisherName": "acme"},
            "tags": [],
            "statistics": {"installs": 10},
            "extension": {
                "extensionId": "id",
                "extensionName": "dark-pro",
                "latestVersion": "1.2.0",
                "downloadUrl": "http://x/acme.dark-pro.vsix"
            }
        }"#;
        let record: ListingRecord = match serde_json::from_str(json) {
            Ok(record) => record,
            Err(e) => panic!("Should parse listing: {e}"),
        };
        assert!(record.theme_files.is_empty());
        assert!(record.theme_dir.is_none());
        assert!(record.manifest_path().is_none());
        assert_eq!(record.statistics.installs, Some(10));
        assert_eq!(record.statistics.rating, None);
    }

    #[test]
    fn test_paths_follow_theme_dir() {
        let mut record = listing("acme", "dark-pro", "1.2.0");
        record.theme_dir = Some(PathBuf::from("/cache/acme.dark-pro/1.2.0"));
        record.theme_files = vec![ThemeAsset {
            file: "extension/themes/dark.json".to_string(),
            name: "Dark".to_string(),
            ui_theme: String::new(),
        }];

        assert_eq!(
            record.manifest_path(),
            Some(PathBuf::from("/cache/acme.dark-pro/1.2.0/extension/package.json"))
        );
        assert_eq!(
            record.asset_paths(),
            vec![PathBuf::from(
                "/cache/acme.dark-pro/1.2.0/extension/themes/dark.json"
            )]
        );
    }
}
