//! Gallery harvesting for color themes.
//!
//! Listings are fetched per sort partition, every listed package is
//! materialized into a version-pinned extracted tree, and a deduplicated
//! search index is built over the result.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   themesync CLI                      │
//! │  ┌──────────┐  ┌──────────┐  ┌───────────────────┐  │
//! │  │ Metadata │  │ Download │  │ Integrity/Cleanup │  │
//! │  └──────────┘  └──────────┘  └───────────────────┘  │
//! └─────────────────────────────────────────────────────┘
//!         │                 │                 │
//!         ▼                 ▼                 ▼
//!    ┌──────────────────────────────────────────┐
//!    │              Orchestrator                │
//!    │   one workflow per sort partition        │
//!    └──────────────────────────────────────────┘
//!         │                 │                 │
//!         ▼                 ▼                 ▼
//!    ┌───────────┐   ┌──────────────┐   ┌──────────────┐
//!    │  Listing  │   │ ArchiveCache │   │ RecordStore  │
//!    │  Source   │   │ pub.ext/ver/ │   │ JSON arrays  │
//!    └───────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! # Example Usage
//!
//! ```bash
//! # Fetch listings for every partition
//! themesync metadata
//!
//! # Download themes for one partition
//! themesync download --sort mostinstalled
//!
//! # Add a theme outside any partition
//! themesync single acme.dark-pro
//!
//! # Everything, including index and cleanup
//! themesync all
//! ```

pub mod archive;
pub mod cli;
pub mod detail;
pub mod error;
pub mod listing;
pub mod manifest;
pub mod orchestrator;
pub mod partition;
pub mod record;
pub mod search_index;
pub mod storage;

pub use archive::{AcquireOutcome, Acquisition, ArchiveCache, PackageAcquirer};
pub use cli::{HarvestCommand, PartitionSelection, execute};
pub use error::{HarvestError, Result};
pub use listing::{GalleryClient, ListingSource, Pagination};
pub use orchestrator::{
    BatchReport, IntegrityFinding, IntegrityReport, Orchestrator, OrchestratorOptions,
    ReconcileReport, RunSummary,
};
pub use partition::SortPartition;
pub use record::{DisplayDetail, ListingRecord, NaturalKey, ThemeAsset};
pub use search_index::{SearchIndexBuilder, SearchIndexEntry};
pub use storage::{CacheLayout, JsonRecordStore, RecordStore};
