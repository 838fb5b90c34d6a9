//! Package manifest parsing.
//!
//! An extracted package keeps its payload under `extension/`, with a
//! `package.json` that declares contributed color themes:
//!
//! ```json
//! { "contributes": { "themes": [
//!     { "label": "Dark Pro", "uiTheme": "vs-dark", "path": "./themes/dark.json" }
//! ] } }
//! ```

use serde::Deserialize;
use std::path::{Component, Path};
use tracing::{debug, warn};

use super::error::{HarvestError, Result};
use super::record::{EXTENSION_SUBDIR, ThemeAsset, manifest_path_in};

/// One `contributes.themes[]` entry.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ThemeContribution {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(rename = "uiTheme", default)]
    pub ui_theme: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

/// Read the theme contributions declared by the package in `version_dir`.
///
/// Entries that are not objects are skipped; the rest of the list is kept.
///
/// # Errors
///
/// Returns `ManifestParse` if the manifest is missing or is not valid JSON.
pub fn read_contributions(version_dir: &Path) -> Result<Vec<ThemeContribution>> {
    let path = manifest_path_in(version_dir);
    let parse_err = |reason: String| HarvestError::ManifestParse {
        path: path.display().to_string(),
        reason,
    };

    let content = std::fs::read_to_string(&path).map_err(|e| parse_err(e.to_string()))?;
    let content = content.trim_start_matches('\u{feff}');
    let manifest: serde_json::Value =
        serde_json::from_str(content).map_err(|e| parse_err(e.to_string()))?;

    let Some(themes) = manifest
        .get("contributes")
        .and_then(|c| c.get("themes"))
        .and_then(|t| t.as_array())
    else {
        return Ok(Vec::new());
    };

    Ok(themes
        .iter()
        .filter_map(|entry| match ThemeContribution::deserialize(entry) {
            Ok(contribution) => Some(contribution),
            Err(e) => {
                debug!("Skipping malformed theme entry in {}: {e}", path.display());
                None
            }
        })
        .collect())
}

/// Resolve the package's declared themes to assets that exist on disk.
///
/// A missing or malformed manifest yields no assets. A declared theme whose
/// file is absent is dropped without affecting the others.
pub fn collect_theme_assets(version_dir: &Path) -> Vec<ThemeAsset> {
    let contributions = match read_contributions(version_dir) {
        Ok(contributions) => contributions,
        Err(e) => {
            warn!("{e}");
            return Vec::new();
        }
    };

    if contributions.is_empty() {
        warn!(
            "No themes declared in {}",
            manifest_path_in(version_dir).display()
        );
    }

    contributions
        .iter()
        .filter_map(|contribution| match resolve_asset(version_dir, contribution) {
            Ok(asset) => {
                debug!("Added theme: {}", asset.name);
                Some(asset)
            }
            Err(e) => {
                warn!("{e}");
                None
            }
        })
        .collect()
}

/// Turn one contribution into an asset relative to `version_dir`.
///
/// # Errors
///
/// Returns `MissingAssetFile` if the entry has no usable path or its file
/// does not exist inside the package.
pub fn resolve_asset(version_dir: &Path, contribution: &ThemeContribution) -> Result<ThemeAsset> {
    let declared = contribution.path.as_deref().unwrap_or_default();
    let cleaned = normalize_relative(declared).ok_or_else(|| HarvestError::MissingAssetFile {
        path: format!("{} (declared as '{declared}')", version_dir.display()),
    })?;

    let relative = format!("{EXTENSION_SUBDIR}/{cleaned}");
    let full_path = version_dir.join(&relative);
    if !full_path.is_file() {
        return Err(HarvestError::MissingAssetFile {
            path: full_path.display().to_string(),
        });
    }

    let name = contribution
        .label
        .clone()
        .filter(|label| !label.trim().is_empty())
        .unwrap_or_else(|| file_stem(&cleaned));

    Ok(ThemeAsset {
        file: relative,
        name,
        ui_theme: contribution.ui_theme.clone().unwrap_or_default(),
    })
}

/// Strip leading `./`, unify separators, and reject paths leaving the package.
fn normalize_relative(declared: &str) -> Option<String> {
    let unified = declared.trim().replace('\\', "/");
    let mut rest = unified.as_str();
    while let Some(stripped) = rest.strip_prefix("./") {
        rest = stripped;
    }
    let rest = rest.trim_start_matches('/');
    if rest.is_empty() {
        return None;
    }

    let escapes = Path::new(rest)
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return None;
    }
    Some(rest.to_string())
}

fn file_stem(relative: &str) -> String {
    Path::new(relative)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| relative.to_string())
}
