//! # Content Intake CLI (`intake`)
//!
//! Operator interface for the intake pipeline: ingest candidates from the
//! search-page crawl or a spreadsheet, review and commit them to staging,
//! then publish, pin, edit and remove published items. `intake serve`
//! exposes the same operations over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! intake --config ./config/intake.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `intake init` | Create the SQLite database and run schema migrations |
//! | `intake crawl` | Crawl the search page and list annotated candidates |
//! | `intake import <file> --kind <kind>` | Read an `.xlsx` workbook and list annotated candidates |
//! | `intake commit <file>` | Save a reviewed candidate list to staging |
//! | `intake staged list` / `delete` | Inspect or prune staging |
//! | `intake publish <target> <ids..>` | Publish staged rows |
//! | `intake pin` / `unpin <target> <ids..>` | Toggle pinned rows |
//! | `intake delete <target> <ids..>` | Remove published rows |
//! | `intake update <target>` | Overwrite author / image on published rows |
//! | `intake feed <target>` | Show a published store, pinned first |
//! | `intake serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! # Review a case-study workbook, then stage rows 0 and 2
//! intake import ./cases.xlsx --kind case --save ./review.json
//! intake commit ./review.json --select 0,2
//!
//! # Crawl and push straight into the general feed
//! intake crawl --direct feed
//! ```
//!
//! Logs go to stderr; set `RUST_LOG=debug` for identity-resolution detail.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use content_intake::commands::{self, IngestOutput};
use content_intake::{config, migrate, server};
use content_intake_core::models::{ContentKind, FieldPatch, PublishTarget};
use content_intake_core::staging::StagedFilter;

/// Content Intake: crawl and spreadsheet ingestion with deduplicated publication.
#[derive(Parser)]
#[command(name = "intake", version, about)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/intake.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file (if it doesn't exist) and runs all
    /// schema migrations. Safe to run multiple times.
    Init,

    /// Crawl the news search page.
    ///
    /// Prints each candidate with its identity and whether it already
    /// exists in staging or a published store. Nothing is saved unless
    /// `--commit` or `--direct` is given.
    Crawl {
        /// Write the annotated candidates to a JSON file for `commit`
        #[arg(long)]
        save: Option<PathBuf>,

        /// Save every non-duplicate candidate to staging
        #[arg(long, conflicts_with = "direct")]
        commit: bool,

        /// Publish straight into a store (feed or selected), skipping staging
        #[arg(long)]
        direct: Option<PublishTarget>,
    },

    /// Read a spreadsheet (.xlsx) of news or case-study rows.
    Import {
        /// Workbook path
        file: PathBuf,

        /// Row kind: news or case
        #[arg(long)]
        kind: ContentKind,

        /// Write the annotated candidates to a JSON file for `commit`
        #[arg(long)]
        save: Option<PathBuf>,

        /// Save every non-duplicate candidate to staging
        #[arg(long)]
        commit: bool,
    },

    /// Save a reviewed candidate list to staging.
    ///
    /// Every candidate is resolved again before it is written, so
    /// committing the same file twice saves nothing the second time.
    Commit {
        /// JSON file written by `crawl --save` or `import --save`
        file: PathBuf,

        /// Comma-separated candidate indexes to keep (default: all)
        #[arg(long, value_delimiter = ',')]
        select: Option<Vec<usize>>,
    },

    /// Inspect or prune the staging store.
    Staged {
        #[command(subcommand)]
        action: StagedAction,
    },

    /// Publish staged rows into a store.
    Publish {
        /// Target store: feed, selected, or cases
        target: PublishTarget,

        /// Staged row ids
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Pin published rows.
    Pin {
        target: PublishTarget,
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Unpin published rows.
    Unpin {
        target: PublishTarget,
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Delete published rows. Their staged sources become publishable again.
    Delete {
        target: PublishTarget,
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Overwrite author name and/or image URL on published rows.
    Update {
        target: PublishTarget,

        /// Row ids (omit with --all to update every row)
        ids: Vec<String>,

        /// Apply to every row of the target
        #[arg(long, conflicts_with = "ids")]
        all: bool,

        #[arg(long)]
        author_name: Option<String>,

        #[arg(long)]
        image_url: Option<String>,
    },

    /// Show a published store, pinned rows first.
    Feed {
        target: PublishTarget,
    },

    /// Start the HTTP API server.
    Serve,
}

#[derive(Subcommand)]
enum StagedAction {
    /// List staged rows with live duplicate/published flags, newest first.
    List {
        /// Only this kind: news or case
        #[arg(long)]
        kind: Option<ContentKind>,

        /// Only rows whose live published state matches
        #[arg(long)]
        published: Option<bool>,

        /// Maximum rows to show
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Delete staged rows by id.
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Crawl {
            save,
            commit,
            direct,
        } => match direct {
            Some(target) => commands::run_crawl_direct(&cfg, target).await?,
            None => {
                let output = IngestOutput {
                    save_to: save.as_deref(),
                    commit,
                };
                commands::run_crawl(&cfg, output).await?;
            }
        },
        Commands::Import {
            file,
            kind,
            save,
            commit,
        } => {
            let output = IngestOutput {
                save_to: save.as_deref(),
                commit,
            };
            commands::run_import(&cfg, &file, kind, output).await?;
        }
        Commands::Commit { file, select } => {
            commands::run_commit(&cfg, &file, select.as_deref()).await?;
        }
        Commands::Staged { action } => match action {
            StagedAction::List {
                kind,
                published,
                limit,
            } => {
                let filter = StagedFilter {
                    kind,
                    published,
                    limit,
                };
                commands::run_staged_list(&cfg, filter).await?;
            }
            StagedAction::Delete { ids } => commands::run_staged_delete(&cfg, ids).await?,
        },
        Commands::Publish { target, ids } => commands::run_publish(&cfg, target, ids).await?,
        Commands::Pin { target, ids } => commands::run_pin(&cfg, target, ids, true).await?,
        Commands::Unpin { target, ids } => commands::run_pin(&cfg, target, ids, false).await?,
        Commands::Delete { target, ids } => commands::run_delete(&cfg, target, ids).await?,
        Commands::Update {
            target,
            ids,
            all,
            author_name,
            image_url,
        } => {
            let ids = match (all, ids.is_empty()) {
                (true, _) => None,
                (false, false) => Some(ids),
                (false, true) => anyhow::bail!("pass row ids or --all"),
            };
            let patch = FieldPatch {
                author_name,
                image_url,
            };
            commands::run_update(&cfg, target, ids, patch).await?;
        }
        Commands::Feed { target } => commands::run_feed(&cfg, target).await?,
        Commands::Serve => server::run_server(&cfg).await?,
    }

    Ok(())
}
