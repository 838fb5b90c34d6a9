//! themesync - color theme harvesting from the extension gallery
//!
//! Fetches theme listings under several sort orders, keeps a version-pinned
//! cache of extracted packages, and builds a deduplicated search index for
//! a theme picker front end.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          themesync                               │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │  Listing    │  │  Archive    │  │    Metadata Store       │  │
//! │  │  Source     │  │  Cache      │  │  (atomic JSON arrays)   │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//!         │                 │                 │
//!         ▼                 ▼                 ▼
//!    ┌─────────┐      ┌───────────┐      ┌──────────────┐
//!    │ Gallery │      │ themes/   │      │ search.json  │
//!    └─────────┘      └───────────┘      └──────────────┘
//! ```

pub mod config;
pub mod marketplace;

pub use config::HarvestConfig;
pub use marketplace::{HarvestError, ListingRecord, Orchestrator, SortPartition};
