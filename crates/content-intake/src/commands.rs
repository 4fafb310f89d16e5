//! CLI command implementations.
//!
//! Each `run_*` function opens its own pool, runs one pipeline operation as
//! the configured admin, and prints a plain-text summary to stdout. Batch
//! commands print the report counters followed by one line per error.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use content_intake_core::batch::BatchReport;
use content_intake_core::models::{CandidateItem, ContentKind, FieldPatch, PublishTarget};
use content_intake_core::publish::PublicationCoordinator;
use content_intake_core::staging::{StagedFilter, StagingRepository};

use crate::config::Config;
use crate::crawl::Crawler;
use crate::db;
use crate::ingest::{self, IngestReport};
use crate::sqlite_store::SqliteStore;

async fn open_store(config: &Config) -> Result<SqliteStore> {
    Ok(SqliteStore::new(db::connect(config).await?))
}

/// Print a batch report.
pub fn print_report(report: &BatchReport) {
    println!("{}: {}", report.operation.counter_key(), report.succeeded);
    println!("skipped: {}", report.skipped);
    println!("errors: {}", report.failed());
    for error in &report.errors {
        println!("  ! {}", error);
    }
    println!("total: {}", report.total);
}

fn print_ingest(report: &IngestReport) {
    for (i, item) in report.candidates.iter().enumerate() {
        let flag = if item.is_published {
            "published"
        } else if item.is_duplicate {
            "duplicate"
        } else {
            "new"
        };
        println!(
            "{:>3}. [{}] {} ({})",
            i,
            flag,
            item.candidate.title,
            item.external_id
        );
    }
    for error in &report.errors {
        println!("  ! {}", error);
    }
    println!(
        "candidates: {} (duplicates: {}, rejected rows: {})",
        report.candidates.len(),
        report.duplicates(),
        report.errors.len()
    );
}

/// What to do with annotated candidates after ingestion.
#[derive(Debug, Clone, Default)]
pub struct IngestOutput<'a> {
    /// Write the annotated list as JSON for a later `commit`.
    pub save_to: Option<&'a Path>,
    /// Save every non-duplicate candidate to staging right away.
    pub commit: bool,
}

async fn finish_ingest(
    config: &Config,
    store: &SqliteStore,
    report: IngestReport,
    output: &IngestOutput<'_>,
) -> Result<()> {
    print_ingest(&report);
    if let Some(path) = output.save_to {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("saved candidates to {}", path.display());
    }
    if output.commit {
        let accepted: Vec<CandidateItem> = report
            .candidates
            .into_iter()
            .filter(|c| !c.is_duplicate)
            .map(|c| c.candidate)
            .collect();
        let saved = StagingRepository::new(store)
            .save_accepted(accepted, &config.admin.id)
            .await?;
        print_report(&saved);
    }
    Ok(())
}

/// `intake crawl`
pub async fn run_crawl(config: &Config, output: IngestOutput<'_>) -> Result<()> {
    let store = open_store(config).await?;
    let crawler = Crawler::from_config(&config.crawl)?;
    let report = ingest::crawl_candidates(&store, &crawler).await?;
    finish_ingest(config, &store, report, &output).await
}

/// `intake crawl --direct <target>`: publish crawled items without staging.
pub async fn run_crawl_direct(config: &Config, target: PublishTarget) -> Result<()> {
    let store = open_store(config).await?;
    let crawler = Crawler::from_config(&config.crawl)?;
    let candidates = crawler.crawl().await?;
    println!("crawled: {}", candidates.len());
    let report = PublicationCoordinator::new(&store)
        .publish_candidates(candidates, target, &config.admin.id)
        .await?;
    print_report(&report);
    Ok(())
}

/// `intake import <file> --kind <kind>`
pub async fn run_import(
    config: &Config,
    file: &Path,
    kind: ContentKind,
    output: IngestOutput<'_>,
) -> Result<()> {
    let bytes =
        std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let store = open_store(config).await?;
    let report = ingest::workbook_candidates(&store, kind, &file_name, &bytes).await?;
    finish_ingest(config, &store, report, &output).await
}

/// A saved candidate list: either an ingest report or a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum CandidateFile {
    Report { candidates: Vec<CandidateItem> },
    List(Vec<CandidateItem>),
}

/// Load candidates written by `crawl --save` / `import --save`.
pub fn load_candidates(path: &Path) -> Result<Vec<CandidateItem>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file: CandidateFile = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a candidate list", path.display()))?;
    Ok(match file {
        CandidateFile::Report { candidates } | CandidateFile::List(candidates) => candidates,
    })
}

/// `intake commit <file> [--select i,j,...]`
pub async fn run_commit(config: &Config, file: &Path, selected: Option<&[usize]>) -> Result<()> {
    let candidates = load_candidates(file)?;
    let picked = ingest::pick_selected(candidates, selected)?;
    let store = open_store(config).await?;
    let report = StagingRepository::new(&store)
        .save_accepted(picked, &config.admin.id)
        .await?;
    print_report(&report);
    Ok(())
}

/// `intake staged list`
pub async fn run_staged_list(config: &Config, filter: StagedFilter) -> Result<()> {
    let store = open_store(config).await?;
    let rows = StagingRepository::new(&store).list_staged(&filter).await?;
    if rows.is_empty() {
        println!("No staged items.");
        return Ok(());
    }
    for row in &rows {
        let mut flags = Vec::new();
        if row.record.is_published {
            flags.push("published");
        }
        if row.is_duplicate {
            flags.push("duplicate");
        }
        println!(
            "{}  {:<4}  {}{}",
            row.record.id,
            row.record.kind.as_str(),
            row.record.title,
            if flags.is_empty() {
                String::new()
            } else {
                format!("  [{}]", flags.join(", "))
            }
        );
    }
    println!("total: {}", rows.len());
    Ok(())
}

/// `intake staged delete <ids...>`
pub async fn run_staged_delete(config: &Config, ids: Vec<String>) -> Result<()> {
    let store = open_store(config).await?;
    let report = StagingRepository::new(&store).delete_staged(ids).await;
    print_report(&report);
    Ok(())
}

/// `intake publish <target> <ids...>`
pub async fn run_publish(config: &Config, target: PublishTarget, ids: Vec<String>) -> Result<()> {
    let store = open_store(config).await?;
    let report = PublicationCoordinator::new(&store)
        .publish_staged(ids, target, &config.admin.id)
        .await?;
    print_report(&report);
    Ok(())
}

/// `intake pin` / `intake unpin`
pub async fn run_pin(
    config: &Config,
    target: PublishTarget,
    ids: Vec<String>,
    pinned: bool,
) -> Result<()> {
    let store = open_store(config).await?;
    let report = PublicationCoordinator::new(&store)
        .set_pinned(target, ids, pinned)
        .await;
    print_report(&report);
    Ok(())
}

/// `intake delete <target> <ids...>`
pub async fn run_delete(config: &Config, target: PublishTarget, ids: Vec<String>) -> Result<()> {
    let store = open_store(config).await?;
    let report = PublicationCoordinator::new(&store)
        .delete_published(target, ids)
        .await;
    print_report(&report);
    Ok(())
}

/// `intake update <target>`
pub async fn run_update(
    config: &Config,
    target: PublishTarget,
    ids: Option<Vec<String>>,
    patch: FieldPatch,
) -> Result<()> {
    if patch.is_empty() {
        bail!("pass --author-name and/or --image-url");
    }
    let store = open_store(config).await?;
    let report = PublicationCoordinator::new(&store)
        .bulk_update(target, ids, patch)
        .await?;
    print_report(&report);
    Ok(())
}

/// `intake feed <target>`
pub async fn run_feed(config: &Config, target: PublishTarget) -> Result<()> {
    let store = open_store(config).await?;
    let listing = PublicationCoordinator::new(&store)
        .list_published(target, config.feed.max_pinned)
        .await?;
    if listing.pinned.is_empty() && listing.items.is_empty() {
        println!("No published items in {}.", target);
        return Ok(());
    }
    for row in &listing.pinned {
        println!("* {}  {}  {}", row.id, row.published_at, row.title);
    }
    for row in &listing.items {
        let mark = if row.is_pinned { "+" } else { " " };
        println!("{} {}  {}  {}", mark, row.id, row.published_at, row.title);
    }
    println!(
        "total: {} (pinned shown: {})",
        listing.pinned.len() + listing.items.len(),
        listing.pinned.len()
    );
    Ok(())
}
