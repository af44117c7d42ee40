//! # Works Index CLI (`works-index`)
//!
//! Builds and queries the full-text index over a library of works.
//!
//! ## Usage
//!
//! ```bash
//! works-index --config ./config/works-index.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `works-index init` | Create the index file and schema |
//! | `works-index build` | Index stale and missing works (`--full` rebuilds everything) |
//! | `works-index check` | Report stale, missing, and orphaned documents |
//! | `works-index reindex <id>` | Re-extract a single work |
//! | `works-index search "<query>"` | Ranked search with optional metadata filters |
//! | `works-index get <id>...` | Print extracted content |
//! | `works-index stats` | Index statistics |
//! | `works-index delete` | Remove the index file |
//!
//! Progress and logs go to stderr; results go to stdout.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use works_index::builder::{BuildReport, IndexBuilder};
use works_index::config::{self, Config};
use works_index::metadata::{Catalog, MetadataSource};
use works_index::models::{WorkFilter, WorkId};
use works_index::progress::ProgressMode;
use works_index::search::{Query, Searcher};
use works_index::stats;
use works_index::store::IndexStore;

/// Works Index: full-text search over a library of creative works.
#[derive(Parser)]
#[command(name = "works-index", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/works-index.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the index file and schema. Safe to run repeatedly.
    Init,

    /// Bring the index up to date.
    ///
    /// Without `--full`, only stale and missing works are re-extracted.
    Build {
        /// Clear and rebuild the whole index in one transaction.
        #[arg(long)]
        full: bool,

        /// Progress output on stderr. Defaults to `human` on a terminal, `off` otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Report which works are stale, missing, or orphaned.
    Check,

    /// Re-extract one work by id.
    Reindex { id: WorkId },

    /// Search indexed works.
    Search {
        query: String,

        /// Only works of this type (repeatable).
        #[arg(long = "type")]
        types: Vec<String>,

        /// Only works from this year (repeatable).
        #[arg(long = "year")]
        years: Vec<i32>,

        /// Only works with this status (repeatable).
        #[arg(long = "status")]
        statuses: Vec<String>,

        /// Only these work ids (repeatable). Overrides the other filters.
        #[arg(long = "id")]
        ids: Vec<WorkId>,

        #[arg(long)]
        limit: Option<i64>,

        #[arg(long)]
        offset: Option<i64>,

        /// Include full text in results.
        #[arg(long)]
        content: bool,

        /// Print the response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the extracted content of one or more works.
    Get {
        #[arg(required = true)]
        ids: Vec<WorkId>,
    },

    /// Show index statistics.
    Stats,

    /// Delete the index file. It can be rebuilt from the works at any time.
    Delete,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let store = IndexStore::from_config(&cfg);

    match cli.command {
        Commands::Init => {
            store.open().await?;
            println!("Index initialized at {}", store.path().display());
        }
        Commands::Build { full, progress } => {
            let catalog = Catalog::from_config(&cfg)?;
            run_build(&cfg, &store, &catalog, full, progress).await?;
        }
        Commands::Check => {
            let catalog = Catalog::from_config(&cfg)?;
            run_check(&cfg, &store, &catalog).await?;
        }
        Commands::Reindex { id } => {
            let catalog = Catalog::from_config(&cfg)?;
            let report = IndexBuilder::new(&store, &catalog, &cfg.library.base_dir)
                .update_single_work(id)
                .await?;
            if report.document_count == 0 && report.errors.is_empty() {
                println!("Work {} is not in the catalog; nothing to do.", id);
            } else {
                print_report(&report);
            }
        }
        Commands::Search {
            query,
            types,
            years,
            statuses,
            ids,
            limit,
            offset,
            content,
            json,
        } => {
            let catalog = Catalog::from_config(&cfg)?;
            let query = Query {
                text: query,
                filters: WorkFilter {
                    types,
                    years,
                    statuses,
                    ids,
                },
                limit,
                offset,
                include_content: content,
            };
            run_search(&cfg, &store, &catalog, &query, json).await?;
        }
        Commands::Get { ids } => {
            let catalog = Catalog::from_config(&cfg)?;
            run_get(&cfg, &store, &catalog, &ids).await?;
        }
        Commands::Stats => {
            let stats = stats::index_stats(&store).await?;
            stats::print_stats(&stats);
        }
        Commands::Delete => {
            store.delete().await?;
            println!("Index deleted: {}", store.path().display());
        }
    }

    store.close().await;
    Ok(())
}

/// Open an index that is already on disk. Read-only commands must not create one.
async fn open_existing(store: &IndexStore) -> Result<()> {
    if !store.exists() {
        anyhow::bail!(
            "Index has not been built at {}; run `works-index build` first",
            store.path().display()
        );
    }
    store.open().await
}

async fn run_build(
    cfg: &Config,
    store: &IndexStore,
    catalog: &Catalog,
    full: bool,
    progress: Option<ProgressMode>,
) -> Result<()> {
    let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling after the current document...");
            on_signal.cancel();
        }
    });

    let builder = IndexBuilder::new(store, catalog, &cfg.library.base_dir)
        .with_progress(mode.reporter())
        .with_cancellation(cancel);

    let report = if full {
        builder.build_full().await?
    } else {
        builder.update_incremental().await?
    };
    print_report(&report);

    if report.cancelled {
        anyhow::bail!("build cancelled");
    }
    Ok(())
}

fn print_report(report: &BuildReport) {
    println!(
        "Indexed {} document(s), {} words in {} ms.",
        report.document_count, report.word_count, report.duration_ms
    );
    if !report.errors.is_empty() {
        println!("{} document(s) failed:", report.errors.len());
        for err in &report.errors {
            println!("  {}", err);
        }
    }
}

async fn run_check(cfg: &Config, store: &IndexStore, catalog: &Catalog) -> Result<()> {
    let report = IndexBuilder::new(store, catalog, &cfg.library.base_dir)
        .check_staleness()
        .await?;

    println!("Works:     {}", report.total_works);
    println!("Indexed:   {}", report.indexed);
    println!("Stale:     {}", report.stale.len());
    println!("Missing:   {}", report.missing.len());
    println!("Orphaned:  {}", report.orphaned);
    if report.skipped > 0 {
        println!("Skipped:   {} (file could not be read)", report.skipped);
    }
    println!();
    if report.needs_update() {
        println!("Run `works-index build` to update.");
    } else {
        println!("Index is up to date.");
    }
    Ok(())
}

async fn run_search(
    cfg: &Config,
    store: &IndexStore,
    catalog: &Catalog,
    query: &Query,
    json: bool,
) -> Result<()> {
    open_existing(store).await?;
    let searcher = Searcher::new(store, catalog, &cfg.search);
    let response = searcher.search(query).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    if response.results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    let offset = query.offset.unwrap_or(0).max(0) as usize;
    for (i, result) in response.results.iter().enumerate() {
        let title = if result.title.is_empty() {
            "(untitled)"
        } else {
            result.title.as_str()
        };
        println!("{}. [{:.2}] {}", offset + i + 1, result.rank, title);
        let year = result.year.map(|y| y.to_string()).unwrap_or_default();
        println!(
            "    {} {} {} · {} words",
            result.work_type, year, result.status, result.word_count
        );
        println!(
            "    excerpt: \"{}\"",
            result.snippet.replace('\n', " ").trim()
        );
        println!("    id: {}", result.id);
        if let Some(text) = &result.text_content {
            println!();
            println!("{}", text);
        }
        println!();
    }
    println!(
        "{} of {} match(es) in {:.1} ms",
        response.results.len(),
        response.total_count,
        response.query_time_ms
    );
    Ok(())
}

async fn run_get(cfg: &Config, store: &IndexStore, catalog: &Catalog, ids: &[WorkId]) -> Result<()> {
    open_existing(store).await?;
    let searcher = Searcher::new(store, catalog, &cfg.search);
    let docs = searcher.batch_get_content(ids).await?;

    if docs.is_empty() {
        anyhow::bail!("No indexed content for the given id(s)");
    }

    let works = catalog.works_by_ids(ids).await?;
    for doc in docs {
        let title = works
            .iter()
            .find(|w| w.id == doc.id)
            .map(|w| w.title.as_str())
            .unwrap_or("(unknown)");
        println!("--- Work {} ---", doc.id);
        println!("title:      {}", title);
        println!("words:      {}", doc.word_count);
        if let Some(dateline) = &doc.dateline {
            println!("dateline:   {}", dateline);
        }
        if let Some(headings) = &doc.headings {
            println!("headings:   {}", headings.join(" / "));
        }
        println!();
        println!("{}", doc.text_content);
        println!();
    }
    Ok(())
}
