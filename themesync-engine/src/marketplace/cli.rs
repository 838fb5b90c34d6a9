//! CLI commands and output formatting.

use clap::{Subcommand, ValueEnum};
use dialoguer::Confirm;
use std::fmt;
use std::io::IsTerminal;
use std::str::FromStr;

use super::archive::{ArchiveCache, PackageAcquirer};
use super::error::{HarvestError, Result};
use super::listing::{GalleryClient, ListingSource};
use super::orchestrator::{BatchReport, Orchestrator};
use super::partition::SortPartition;
use super::storage::{JsonRecordStore, RecordStore};
use crate::config::HarvestConfig;

/// Which partitions a command applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionSelection {
    #[default]
    All,
    One(SortPartition),
}

impl PartitionSelection {
    pub fn partitions(self) -> Vec<SortPartition> {
        match self {
            Self::All => SortPartition::ALL.to_vec(),
            Self::One(partition) => vec![partition],
        }
    }
}

impl FromStr for PartitionSelection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        s.parse().map(Self::One)
    }
}

impl fmt::Display for PartitionSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::One(partition) => write!(f, "{partition}"),
        }
    }
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// themesync subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum HarvestCommand {
    /// Fetch listings and replace the stored metadata
    Metadata {
        /// Sort partition, or "all"
        #[arg(short, long, value_name = "PARTITION", default_value = "all")]
        sort: PartitionSelection,
    },

    /// Download and extract every listed theme
    Download {
        /// Sort partition, or "all"
        #[arg(short, long, value_name = "PARTITION", default_value = "all")]
        sort: PartitionSelection,

        /// Re-download themes that are already cached
        #[arg(short, long)]
        force: bool,
    },

    /// Download a single theme outside any partition
    Single {
        /// Theme identifier as publisher.extensionName
        #[arg(value_name = "PUBLISHER.EXTENSION")]
        theme: String,

        /// Re-download even if already cached
        #[arg(short, long)]
        force: bool,

        /// Output format for the resulting record
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Check that recorded theme files exist and parse
    CheckIntegrity {
        /// Sort partition, or "all"
        #[arg(short, long, value_name = "PARTITION", default_value = "all")]
        sort: PartitionSelection,
    },

    /// Delete cached files no record references
    Cleanup,

    /// Build the deduplicated search index
    BuildSearchIndex,

    /// Reset stored metadata to empty lists
    ClearMetadata {
        /// Sort partition, or "all"
        #[arg(short, long, value_name = "PARTITION", default_value = "all")]
        sort: PartitionSelection,

        /// Skip confirmation prompts
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Delete downloaded archives
    ClearArchives {
        /// Skip confirmation prompts
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Delete extracted themes
    ClearThemes {
        /// Skip confirmation prompts
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Delete archives and extracted themes
    ClearCache {
        /// Skip confirmation prompts
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Reset metadata and delete every cached file
    ClearAll {
        /// Skip confirmation prompts
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Fetch, download, refresh single themes, index and clean up
    All {
        /// Sort partition, or "all"
        #[arg(short, long, value_name = "PARTITION", default_value = "all")]
        sort: PartitionSelection,
    },
}

impl HarvestCommand {
    fn force(&self) -> bool {
        match self {
            Self::Download { force, .. } | Self::Single { force, .. } => *force,
            _ => false,
        }
    }
}

/// Execute a command against the gallery and the configured cache.
pub async fn execute(command: HarvestCommand, config: &HarvestConfig, show_progress: bool) -> Result<()> {
    let layout = config.layout();
    layout.ensure()?;

    let source = GalleryClient::new(config.listing.gallery_url.clone(), config.request_timeout())?;
    let store = JsonRecordStore::new(layout.metadata_dir.clone());
    let acquirer = ArchiveCache::new(&layout, config.download_timeout())?;
    let mut options = config.orchestrator_options(show_progress);
    options.force = command.force();

    let orchestrator = Orchestrator::new(source, store, acquirer, layout, options);
    run(&orchestrator, command).await
}

/// Run a command on an assembled orchestrator.
pub async fn run<S, R, A>(orchestrator: &Orchestrator<S, R, A>, command: HarvestCommand) -> Result<()>
where
    S: ListingSource,
    R: RecordStore,
    A: PackageAcquirer,
{
    match command {
        HarvestCommand::Metadata { sort } => {
            let mut rows = Vec::new();
            for partition in sort.partitions() {
                let count = orchestrator.fetch_and_save(partition).await?;
                rows.push(vec![partition.to_string(), count.to_string()]);
            }
            format_table(&["PARTITION", "LISTINGS"], rows);
        }
        HarvestCommand::Download { sort, .. } => {
            let mut reports = Vec::new();
            for partition in sort.partitions() {
                reports.push((partition, orchestrator.acquire_all(partition).await?));
            }
            print_batches(&reports);
        }
        HarvestCommand::Single { theme, format, .. } => {
            let record = orchestrator.acquire_single_key(&theme).await?;
            match format {
                OutputFormat::Json => println!("{}", format_json(&record)?),
                OutputFormat::Table => {
                    let themes = record.theme_files.iter().map(|asset| {
                        vec![asset.name.clone(), asset.ui_theme.clone(), asset.file.clone()]
                    });
                    eprintln!("{} ({})", record.natural_key(), record.version());
                    format_table(&["NAME", "UI THEME", "FILE"], themes.collect());
                }
            }
        }
        HarvestCommand::CheckIntegrity { sort } => {
            let mut problems = 0;
            for partition in sort.partitions() {
                let report = orchestrator.verify_integrity(partition).await?;
                for finding in &report.findings {
                    println!("[{partition}] {finding}");
                }
                problems += report.findings.len();
            }
            if problems == 0 {
                eprintln!("All theme files passed integrity check");
            } else {
                eprintln!("{problems} integrity problem(s) found");
            }
        }
        HarvestCommand::Cleanup => {
            let report = orchestrator.reconcile()?;
            for path in &report.deleted_files {
                println!("deleted  {}", path.display());
            }
            for path in &report.removed_dirs {
                println!("removed  {}", path.display());
            }
            eprintln!(
                "{} files deleted, {} directories removed",
                report.deleted_files.len(),
                report.removed_dirs.len()
            );
        }
        HarvestCommand::BuildSearchIndex => {
            let count = orchestrator.build_search_index()?;
            eprintln!("Indexed {count} unique themes");
        }
        HarvestCommand::ClearMetadata { sort, yes } => {
            if confirmed(yes, &format!("Clear metadata for {sort}?"))? {
                for partition in sort.partitions() {
                    orchestrator.clear_partition(partition)?;
                }
            }
        }
        HarvestCommand::ClearArchives { yes } => {
            if confirmed(yes, "Delete all downloaded archives?")? {
                orchestrator.clear_archive_cache()?;
            }
        }
        HarvestCommand::ClearThemes { yes } => {
            if confirmed(yes, "Delete all extracted themes?")? {
                orchestrator.clear_extracted_tree()?;
            }
        }
        HarvestCommand::ClearCache { yes } => {
            if confirmed(yes, "Delete all archives and extracted themes?")? {
                orchestrator.clear_archive_cache()?;
                orchestrator.clear_extracted_tree()?;
            }
        }
        HarvestCommand::ClearAll { yes } => {
            if confirmed(yes, "Reset all metadata and delete every cached file?")? {
                for partition in SortPartition::ALL {
                    orchestrator.clear_partition(partition)?;
                }
                orchestrator.clear_archive_cache()?;
                orchestrator.clear_extracted_tree()?;
            }
        }
        HarvestCommand::All { sort } => {
            let summary = orchestrator.run_all(&sort.partitions()).await?;
            print_batches(&summary.partitions);
            eprintln!("Single themes: {}", summary.overrides);
            eprintln!("Archives removed: {}", summary.archives_cleared);
            eprintln!("Indexed {} unique themes", summary.indexed);
            eprintln!(
                "Cleanup: {} files deleted, {} directories removed",
                summary.reconciled.deleted_files.len(),
                summary.reconciled.removed_dirs.len()
            );
        }
    }

    Ok(())
}

fn print_batches(reports: &[(SortPartition, BatchReport)]) {
    let rows = reports
        .iter()
        .map(|(partition, report)| {
            vec![
                partition.to_string(),
                report.processed.to_string(),
                report.listed.to_string(),
                report.failed.to_string(),
                report.dropped.to_string(),
            ]
        })
        .collect();
    format_table(&["PARTITION", "PROCESSED", "LISTED", "FAILED", "DROPPED"], rows);
}

/// Ask before a destructive command unless `yes` was given or stdout is not a TTY.
fn confirmed(yes: bool, prompt: &str) -> Result<bool> {
    if yes || !is_tty() {
        return Ok(true);
    }
    let answer = confirm(prompt)?;
    if !answer {
        eprintln!("Cancelled");
    }
    Ok(answer)
}

/// Check if stdout is a TTY.
fn is_tty() -> bool {
    std::io::stdout().is_terminal()
}

/// Prompt user for confirmation.
fn confirm(prompt: &str) -> Result<bool> {
    let result = Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    Ok(result)
}

/// Render a table with left-aligned, padded columns.
fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let line = |cells: Vec<&str>| -> String {
        cells
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let width = widths.get(i).copied().unwrap_or(0);
                format!("{cell:width$}")
            })
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = vec![line(headers.to_vec())];
    let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push(separator.join("  "));
    for row in rows {
        out.push(line(row.iter().map(String::as_str).collect()));
    }
    out.join("\n")
}

/// Format and print a table to stdout.
fn format_table(headers: &[&str], rows: Vec<Vec<String>>) {
    if rows.is_empty() {
        eprintln!("No items found");
        return;
    }
    println!("{}", render_table(headers, &rows));
}

/// Format data as JSON.
fn format_json<T: serde::Serialize>(data: &T) -> Result<String> {
    serde_json::to_string_pretty(data).map_err(|source| HarvestError::JsonParse {
        path: "<stdout>".to_string(),
        source,
    })
}
