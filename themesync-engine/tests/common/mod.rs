//! Shared fixtures for the pipeline tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use themesync_engine::marketplace::record::{ExtensionInfo, Publisher, Statistics};
use themesync_engine::marketplace::{
    ArchiveCache, CacheLayout, HarvestError, JsonRecordStore, ListingRecord, ListingSource,
    Orchestrator, OrchestratorOptions, Pagination, Result, SortPartition,
};

pub const MANIFEST: &str = r#"{
    "name": "fixture",
    "contributes": {"themes": [
        {"label": "Dark", "uiTheme": "vs-dark", "path": "./themes/dark.json"},
        {"label": "Light", "uiTheme": "vs", "path": "./themes/light.json"}
    ]}
}"#;

/// Package bytes with a manifest declaring two themes, only the dark one present.
pub fn package_bytes() -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, content) in [
        ("extension/package.json", MANIFEST),
        ("extension/themes/dark.json", "{\"type\": \"dark\"}"),
        ("extension/README.md", "# fixture"),
    ] {
        if let Err(e) = zip.start_file(name, options) {
            panic!("Failed to start zip entry: {e}");
        }
        if let Err(e) = zip.write_all(content.as_bytes()) {
            panic!("Failed to write zip entry: {e}");
        }
    }
    match zip.finish() {
        Ok(cursor) => cursor.into_inner(),
        Err(e) => panic!("Failed to finish archive: {e}"),
    }
}

/// Minimal HTTP/1.1 server serving package archives from memory.
pub struct PackageServer {
    pub base_url: String,
    hits: Arc<AtomicUsize>,
    packages: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl PackageServer {
    pub async fn start() -> Self {
        let listener = match TcpListener::bind("127.0.0.1:0").await {
            Ok(listener) => listener,
            Err(e) => panic!("Failed to bind test server: {e}"),
        };
        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => panic!("Failed to read server address: {e}"),
        };
        let hits = Arc::new(AtomicUsize::new(0));
        let packages: Arc<Mutex<HashMap<String, Vec<u8>>>> = Arc::default();

        let (server_hits, server_packages) = (hits.clone(), packages.clone());
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let hits = server_hits.clone();
                let packages = server_packages.clone();
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    hits.fetch_add(1, Ordering::SeqCst);

                    let head = String::from_utf8_lossy(&request);
                    let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                    let body = packages.lock().ok().and_then(|p| p.get(&path).cloned());
                    let response = match body {
                        Some(body) => {
                            let mut response = format!(
                                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                                body.len()
                            )
                            .into_bytes();
                            response.extend_from_slice(&body);
                            response
                        }
                        None => b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                            .to_vec(),
                    };
                    let _ = socket.write_all(&response).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            hits,
            packages,
        }
    }

    /// Serve `bytes` for `publisher.extension` at `version` and return its URL.
    pub fn publish(&self, publisher: &str, extension: &str, version: &str, bytes: Vec<u8>) -> String {
        let path = format!("/{publisher}.{extension}.{version}.vsix");
        if let Ok(mut packages) = self.packages.lock() {
            packages.insert(path.clone(), bytes);
        }
        format!("{}{path}", self.base_url)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// A gallery listing for `publisher.extension` at `version`.
pub fn listing(publisher: &str, extension: &str, version: &str, download_url: &str) -> ListingRecord {
    ListingRecord {
        categories: vec!["Themes".to_string()],
        display_name: format!("{extension} by {publisher}"),
        publisher: Publisher {
            display_name: publisher.to_uppercase(),
            publisher_name: publisher.to_string(),
        },
        tags: Vec::new(),
        statistics: Statistics {
            installs: Some(15_500),
            rating: Some(4.0),
            rating_count: Some(8),
        },
        extension: ExtensionInfo {
            extension_id: format!("{publisher}.{extension}"),
            extension_name: extension.to_string(),
            latest_version: version.to_string(),
            download_url: download_url.to_string(),
        },
        theme_files: Vec::new(),
        theme_dir: None,
        quick_pick: None,
    }
}

/// Listing source serving in-memory pages and single listings.
#[derive(Default)]
pub struct MemorySource {
    pages: Mutex<HashMap<SortPartition, Vec<ListingRecord>>>,
    singles: Mutex<HashMap<String, ListingRecord>>,
}

impl MemorySource {
    pub fn set_page(&self, partition: SortPartition, records: Vec<ListingRecord>) {
        if let Ok(mut pages) = self.pages.lock() {
            pages.insert(partition, records);
        }
    }

    pub fn set_single(&self, record: ListingRecord) {
        if let Ok(mut singles) = self.singles.lock() {
            singles.insert(record.natural_key().to_string(), record);
        }
    }
}

#[async_trait]
impl ListingSource for MemorySource {
    async fn fetch_page(
        &self,
        _page_size: u32,
        page_number: u32,
        partition: SortPartition,
    ) -> Result<Vec<ListingRecord>> {
        if page_number > 1 {
            return Ok(Vec::new());
        }
        Ok(self
            .pages
            .lock()
            .ok()
            .and_then(|pages| pages.get(&partition).cloned())
            .unwrap_or_default())
    }

    async fn fetch_single(&self, publisher: &str, extension: &str) -> Result<ListingRecord> {
        self.singles
            .lock()
            .ok()
            .and_then(|singles| singles.get(&format!("{publisher}.{extension}")).cloned())
            .ok_or_else(|| HarvestError::ListingNotFound {
                publisher: publisher.to_string(),
                extension: extension.to_string(),
            })
    }
}

pub type Harness = Orchestrator<Arc<MemorySource>, JsonRecordStore, ArchiveCache>;

/// Orchestrator over a temp cache, an in-memory source and a real archive cache.
pub fn harness(temp: &TempDir, source: Arc<MemorySource>, concurrency: usize) -> Harness {
    let layout = CacheLayout::under(temp.path());
    if let Err(e) = layout.ensure() {
        panic!("Failed to create layout: {e}");
    }
    // The fixture server is local; never route it through an ambient proxy.
    let client = match reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
    {
        Ok(client) => client,
        Err(e) => panic!("Failed to build HTTP client: {e}"),
    };
    let acquirer = ArchiveCache::with_client(&layout, client);
    let options = OrchestratorOptions {
        pagination: Pagination {
            page_size: 54,
            max_pages: 2,
            delay: Duration::ZERO,
            concurrency: 1,
        },
        acquire_concurrency: concurrency,
        force: false,
        show_progress: false,
    };
    Orchestrator::new(
        source,
        JsonRecordStore::new(temp.path()),
        acquirer,
        layout,
        options,
    )
}

pub fn temp_dir() -> TempDir {
    match TempDir::new() {
        Ok(dir) => dir,
        Err(e) => panic!("Failed to create temp dir: {e}"),
    }
}

/// Every regular file under `root`, excluding sentinel placeholders.
pub fn files_under(root: &Path) -> Vec<std::path::PathBuf> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name() != ".gitkeep")
        .map(|e| e.into_path())
        .collect()
}
