//! Error types for theme acquisition and indexing.

use std::fmt;

/// Errors that can occur while fetching, caching, or indexing themes.
///
/// Errors local to one record (`Network`, `CorruptArchive`, `ManifestParse`,
/// `MissingAssetFile`) are caught by the batch operations and logged.
/// `StorageWrite` always reaches the caller of the enclosing operation.
#[derive(Debug)]
pub enum HarvestError {
    /// Error performing I/O operations
    Io { source: std::io::Error },

    /// Transport failure talking to the gallery or downloading an archive
    Network { url: String, source: reqwest::Error },

    /// The remote answered with a non-success status
    HttpStatus { url: String, status: u16 },

    /// The gallery answered with a body we could not interpret
    UnexpectedResponse { url: String, reason: String },

    /// A listing lookup matched nothing
    ListingNotFound {
        publisher: String,
        extension: String,
    },

    /// Archive could not be opened or unpacked
    CorruptArchive {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Package manifest is missing or malformed
    ManifestParse { path: String, reason: String },

    /// A manifest entry points at a file that is not in the package
    MissingAssetFile { path: String },

    /// Persisting a metadata file failed; the previous file is intact
    StorageWrite {
        path: String,
        source: std::io::Error,
    },

    /// Error parsing JSON
    JsonParse {
        path: String,
        source: serde_json::Error,
    },

    /// Identifier was not of the form `publisher.extension`
    InvalidKeyFormat { input: String },

    /// A listing field would place files outside the cache tree
    UnsafePath { field: &'static str, value: String },
}

impl fmt::Display for HarvestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { source } => write!(f, "I/O error: {source}"),
            Self::Network { url, source } => write!(f, "Request to {url} failed: {source}"),
            Self::HttpStatus { url, status } => write!(f, "HTTP {status} from {url}"),
            Self::UnexpectedResponse { url, reason } => {
                write!(f, "Unexpected response from {url}: {reason}")
            }
            Self::ListingNotFound {
                publisher,
                extension,
            } => write!(f, "Extension '{publisher}.{extension}' not found in gallery"),
            Self::CorruptArchive { path, source } => {
                write!(f, "Failed to extract archive at {path}: {source}")
            }
            Self::ManifestParse { path, reason } => {
                write!(f, "Invalid package manifest at {path}: {reason}")
            }
            Self::MissingAssetFile { path } => write!(f, "Theme file not found: {path}"),
            Self::StorageWrite { path, source } => {
                write!(f, "Failed to write {path}: {source}")
            }
            Self::JsonParse { path, source } => {
                write!(f, "Failed to parse JSON at {path}: {source}")
            }
            Self::InvalidKeyFormat { input } => write!(
                f,
                "Invalid theme identifier '{input}', expected 'publisher.extensionName'"
            ),
            Self::UnsafePath { field, value } => {
                write!(f, "Refusing {field} '{value}': not a single path component")
            }
        }
    }
}

impl std::error::Error for HarvestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source } => Some(source),
            Self::Network { source, .. } => Some(source),
            Self::CorruptArchive { source, .. } => Some(source.as_ref()),
            Self::StorageWrite { source, .. } => Some(source),
            Self::JsonParse { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for HarvestError {
    fn from(source: std::io::Error) -> Self {
        Self::Io { source }
    }
}

impl From<reqwest::Error> for HarvestError {
    fn from(source: reqwest::Error) -> Self {
        let url = source
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        Self::Network { url, source }
    }
}

impl HarvestError {
    /// Whether re-running the command may succeed without any local change.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::HttpStatus { .. })
    }
}

/// Result type for acquisition operations.
pub type Result<T> = std::result::Result<T, HarvestError>;
