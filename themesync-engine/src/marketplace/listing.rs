//! Gallery listing queries.
//!
//! The gallery exposes a paginated `extensionquery` endpoint. Only the
//! attributes the pipeline needs are read from its responses; everything
//! else about the wire protocol stays inside [`GalleryClient`].

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

use super::error::{HarvestError, Result};
use super::partition::SortPartition;
use super::record::{ExtensionInfo, ListingRecord, Publisher, Statistics};

/// Default gallery API root.
pub const DEFAULT_GALLERY_URL: &str = "https://marketplace.visualstudio.com/_apis/public/gallery";

const ACCEPT_HEADER: &str = "application/json;api-version=7.2-preview.1;excludeUrls=true";
const QUERY_FLAGS: u32 = 870;
const TARGET_PLATFORM: &str = "Microsoft.VisualStudio.Code";
const THEMES_CATEGORY: &str = "Themes";

// Gallery filter types.
const FILTER_EXTENSION_NAME: u8 = 7;
const FILTER_TARGET: u8 = 8;
const FILTER_CATEGORY: u8 = 5;
const FILTER_SEARCH_TEXT: u8 = 10;
const FILTER_EXCLUDE_FLAGS: u8 = 12;

/// Source of raw listing records.
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Fetch one page of color-theme listings under `partition`'s sort order.
    async fn fetch_page(
        &self,
        page_size: u32,
        page_number: u32,
        partition: SortPartition,
    ) -> Result<Vec<ListingRecord>>;

    /// Fetch a single listing directly, bypassing partitions.
    ///
    /// # Errors
    ///
    /// Returns `ListingNotFound` if the gallery has no such extension.
    async fn fetch_single(&self, publisher: &str, extension: &str) -> Result<ListingRecord>;
}

#[async_trait]
impl<T: ListingSource + ?Sized> ListingSource for std::sync::Arc<T> {
    async fn fetch_page(
        &self,
        page_size: u32,
        page_number: u32,
        partition: SortPartition,
    ) -> Result<Vec<ListingRecord>> {
        (**self).fetch_page(page_size, page_number, partition).await
    }

    async fn fetch_single(&self, publisher: &str, extension: &str) -> Result<ListingRecord> {
        (**self).fetch_single(publisher, extension).await
    }
}

/// How a partition is paged through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pagination {
    pub page_size: u32,
    pub max_pages: u32,
    /// Pause between consecutive requests (or request windows).
    pub delay: Duration,
    /// Pages in flight at once; 1 means strictly sequential.
    pub concurrency: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page_size: 54,
            max_pages: 10,
            delay: Duration::from_secs(1),
            concurrency: 1,
        }
    }
}

/// Fetch every page of a partition and concatenate them.
///
/// Duplicate packages within the partition keep their first occurrence.
/// Sequential paging stops at the first empty page.
///
/// # Errors
///
/// Any page failure fails the whole fetch, so a partition is never replaced
/// with a truncated listing.
pub async fn fetch_partition<S: ListingSource + ?Sized>(
    source: &S,
    partition: SortPartition,
    pagination: &Pagination,
) -> Result<Vec<ListingRecord>> {
    let pages = if pagination.concurrency <= 1 {
        fetch_sequential(source, partition, pagination).await?
    } else {
        fetch_windowed(source, partition, pagination).await?
    };

    let mut seen = HashSet::new();
    let mut records = Vec::new();
    for record in pages.into_iter().flatten() {
        if seen.insert(record.natural_key()) {
            records.push(record);
        } else {
            debug!("Dropping duplicate listing {}", record.natural_key());
        }
    }
    Ok(records)
}

async fn fetch_sequential<S: ListingSource + ?Sized>(
    source: &S,
    partition: SortPartition,
    pagination: &Pagination,
) -> Result<Vec<Vec<ListingRecord>>> {
    let mut pages = Vec::new();
    for page_number in 1..=pagination.max_pages {
        if page_number > 1 && !pagination.delay.is_zero() {
            tokio::time::sleep(pagination.delay).await;
        }
        let page = source
            .fetch_page(pagination.page_size, page_number, partition)
            .await?;
        info!(
            "Fetched page {page_number}/{} ({} listings)",
            pagination.max_pages,
            page.len()
        );
        let exhausted = page.is_empty();
        pages.push(page);
        if exhausted {
            break;
        }
    }
    Ok(pages)
}

async fn fetch_windowed<S: ListingSource + ?Sized>(
    source: &S,
    partition: SortPartition,
    pagination: &Pagination,
) -> Result<Vec<Vec<ListingRecord>>> {
    let window = pagination.concurrency;
    let results: Vec<Result<Vec<ListingRecord>>> = stream::iter(1..=pagination.max_pages)
        .map(move |page_number| async move {
            // Stagger each window so the gallery still sees paced bursts.
            let wave = (page_number as usize - 1) / window;
            if wave > 0 && !pagination.delay.is_zero() {
                tokio::time::sleep(pagination.delay * wave as u32).await;
            }
            source
                .fetch_page(pagination.page_size, page_number, partition)
                .await
        })
        .buffered(window)
        .collect()
        .await;

    results.into_iter().collect()
}

/// HTTP client for the public extension gallery.
#[derive(Debug, Clone)]
pub struct GalleryClient {
    http: reqwest::Client,
    base_url: String,
}

impl GalleryClient {
    /// Create a client for the gallery rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("themesync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn query_url(&self) -> String {
        format!("{}/extensionquery", self.base_url)
    }

    /// Package download URL for one extension version.
    pub fn download_url(&self, publisher: &str, extension: &str, version: &str) -> String {
        format!(
            "{}/publishers/{publisher}/vsextensions/{extension}/{version}/vspackage",
            self.base_url
        )
    }

    async fn query(&self, body: serde_json::Value) -> Result<QueryResponse> {
        let url = self.query_url();
        let response = self
            .http
            .post(&url)
            .header(reqwest::header::ACCEPT, ACCEPT_HEADER)
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .json(&body)
            .send()
            .await
            .map_err(|source| HarvestError::Network {
                url: url.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(HarvestError::HttpStatus {
                url,
                status: response.status().as_u16(),
            });
        }

        response
            .json::<QueryResponse>()
            .await
            .map_err(|e| HarvestError::UnexpectedResponse {
                url,
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl ListingSource for GalleryClient {
    async fn fetch_page(
        &self,
        page_size: u32,
        page_number: u32,
        partition: SortPartition,
    ) -> Result<Vec<ListingRecord>> {
        let body = page_query(page_size, page_number, partition);
        let response = self.query(body).await?;
        Ok(theme_listings(response, |p, e, v| self.download_url(p, e, v)))
    }

    async fn fetch_single(&self, publisher: &str, extension: &str) -> Result<ListingRecord> {
        let body = single_query(publisher, extension);
        let response = self.query(body).await?;
        response
            .results
            .into_iter()
            .flat_map(|r| r.extensions)
            .find(|raw| {
                raw.publisher.publisher_name.eq_ignore_ascii_case(publisher)
                    && raw.extension_name.eq_ignore_ascii_case(extension)
            })
            .and_then(|raw| raw.into_record(|p, e, v| self.download_url(p, e, v)))
            .ok_or_else(|| HarvestError::ListingNotFound {
                publisher: publisher.to_string(),
                extension: extension.to_string(),
            })
    }
}

/// Request body for one page of color themes.
fn page_query(page_size: u32, page_number: u32, partition: SortPartition) -> serde_json::Value {
    json!({
        "assetTypes": [
            "Microsoft.VisualStudio.Services.Icons.Default",
            "Microsoft.VisualStudio.Services.Icons.Branding",
            "Microsoft.VisualStudio.Services.Icons.Small",
        ],
        "filters": [{
            "criteria": [
                {"filterType": FILTER_TARGET, "value": TARGET_PLATFORM},
                {"filterType": FILTER_SEARCH_TEXT, "value": format!("target:\"{TARGET_PLATFORM}\" ")},
                {"filterType": FILTER_EXCLUDE_FLAGS, "value": "37888"},
                {"filterType": FILTER_CATEGORY, "value": THEMES_CATEGORY},
            ],
            "direction": 2,
            "pageSize": page_size,
            "pageNumber": page_number,
            "sortBy": partition.sort_code(),
            "sortOrder": 0,
            "pagingToken": null,
        }],
        "flags": QUERY_FLAGS,
    })
}

/// Request body for a direct `publisher.extension` lookup.
fn single_query(publisher: &str, extension: &str) -> serde_json::Value {
    json!({
        "filters": [{
            "criteria": [
                {"filterType": FILTER_TARGET, "value": TARGET_PLATFORM},
                {"filterType": FILTER_EXTENSION_NAME, "value": format!("{publisher}.{extension}")},
            ],
            "pageSize": 1,
            "pageNumber": 1,
        }],
        "flags": QUERY_FLAGS,
    })
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<QueryResult>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    extensions: Vec<RawExtension>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawExtension {
    #[serde(default)]
    extension_id: String,
    extension_name: String,
    #[serde(default)]
    display_name: String,
    publisher: RawPublisher,
    #[serde(default)]
    versions: Vec<RawVersion>,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    statistics: Vec<RawStatistic>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPublisher {
    publisher_name: String,
    #[serde(default)]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct RawVersion {
    version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStatistic {
    statistic_name: String,
    value: f64,
}

impl RawExtension {
    /// Icon packs are published under the themes category too.
    fn is_color_theme(&self) -> bool {
        let icons = self.tags.iter().any(|t| t.eq_ignore_ascii_case("icons"));
        let themed = self.categories.iter().any(|c| c == THEMES_CATEGORY);
        !icons && themed
    }

    fn statistics(&self) -> Statistics {
        let mut stats = Statistics::default();
        for stat in &self.statistics {
            match stat.statistic_name.as_str() {
                "install" => stats.installs = Some(stat.value.max(0.0).round() as u64),
                "averagerating" => stats.rating = Some(stat.value),
                "ratingcount" => stats.rating_count = Some(stat.value.max(0.0).round() as u64),
                _ => {}
            }
        }
        stats
    }

    fn into_record<F>(self, download_url: F) -> Option<ListingRecord>
    where
        F: Fn(&str, &str, &str) -> String,
    {
        let statistics = self.statistics();
        let version = self.versions.into_iter().next()?.version;
        let url = download_url(
            &self.publisher.publisher_name,
            &self.extension_name,
            &version,
        );
        Some(ListingRecord {
            categories: self.categories,
            display_name: self.display_name,
            publisher: Publisher {
                display_name: self.publisher.display_name,
                publisher_name: self.publisher.publisher_name,
            },
            tags: self.tags,
            statistics,
            extension: ExtensionInfo {
                extension_id: self.extension_id,
                extension_name: self.extension_name,
                latest_version: version,
                download_url: url,
            },
            theme_files: Vec::new(),
            theme_dir: None,
            quick_pick: None,
        })
    }
}

/// Convert a page response into listing records, keeping only color themes.
fn theme_listings<F>(response: QueryResponse, download_url: F) -> Vec<ListingRecord>
where
    F: Fn(&str, &str, &str) -> String,
{
    response
        .results
        .into_iter()
        .flat_map(|r| r.extensions)
        .filter(|raw| {
            let keep = raw.is_color_theme();
            if !keep {
                debug!("Skipping {}: not a color theme", raw.display_name);
            }
            keep
        })
        .filter_map(|raw| raw.into_record(&download_url))
        .collect()
}
