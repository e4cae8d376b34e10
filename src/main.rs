//! # news_backfill
//!
//! Command-line front end for the discovery and backfill engine.
//!
//! ## Usage
//!
//! ```sh
//! news_backfill sources
//! news_backfill discover telex.hu --date-from 2024-01-01 --date-to 2024-02-01
//! news_backfill backfill 444.hu --years 3 --batch-days 30 --resume
//! news_backfill find --domain 444.hu --text "Orbán Viktor" --limit 20
//! news_backfill read https://telex.hu/belfold/2024/01/05/valami
//! ```
//!
//! `RUST_LOG` controls logging (default `info`, or `debug` with `-v`).

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use clap::Parser;
use itertools::Itertools;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

use news_backfill::batch::{Backfill, BackfillOptions, ReportStore};
use news_backfill::discovery::Discovery;
use news_backfill::fetch::{FetchSettings, HttpFetcher};
use news_backfill::models::{DiscoveredLink, FindQuery};
use news_backfill::reader::{ArticleReader, ContentSource};
use news_backfill::source::SourceRegistry;
use news_backfill::store::{ArticleStore, FillOutcome};
use news_backfill::utils::{ensure_writable_dir, truncate_for_log};

mod cli;

use cli::{BackfillArgs, Cli, Command, DiscoverArgs, FindArgs, ReadArgs, SortOrder};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();

    // --- Tracing init ---
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    debug!(?args, "Parsed CLI arguments");

    let registry = match &args.sources {
        Some(path) => SourceRegistry::from_path(path)?,
        None => SourceRegistry::builtin()?,
    };

    let result = match args.command {
        Command::Discover(a) => discover(&registry, a).await,
        Command::Backfill(a) => backfill(&registry, a).await,
        Command::Find(a) => find(a),
        Command::Read(a) => read(&registry, a).await,
        Command::Sources => {
            list_sources(&registry);
            Ok(())
        }
    };

    match &result {
        Ok(()) => info!(elapsed_ms = start_time.elapsed().as_millis() as u64, "Done"),
        Err(e) => error!(error = %e, "Command failed"),
    }
    result
}

fn http_fetcher() -> Result<HttpFetcher, Box<dyn Error>> {
    Ok(HttpFetcher::new(FetchSettings::default())?)
}

#[instrument(level = "info", skip_all, fields(domain = %args.domain))]
async fn discover(registry: &SourceRegistry, args: DiscoverArgs) -> Result<(), Box<dyn Error>> {
    let source = registry.get(&args.domain)?.compile(Default::default())?;
    let fetcher = http_fetcher()?;
    let options = args.crawl.discovery_options(args.date_from, args.date_to);
    let outcome = Discovery::new(&source, &fetcher, options)?.run().await;

    if let Some(db) = &args.db {
        let store = ArticleStore::open(db)?
            .with_canonicalizer(source.canonicalizer());
        for link in &outcome.links {
            store.upsert_link(source.domain(), link)?;
        }
        info!(db = %db.display(), count = outcome.links.len(), "Persisted discovered links");
    }

    let stats = &outcome.stats;
    println!(
        "{}: {} accepted ({} pages, {} fetch errors, {} duplicates, {} out of range, {} out of section{})",
        source.domain(),
        outcome.links.len(),
        stats.pages_fetched,
        stats.page_fetch_errors,
        stats.dup_links,
        stats.range_filtered,
        stats.section_filtered,
        if stats.stopped_early {
            ", stopped early"
        } else {
            ""
        },
    );

    let sorted = sort_links(outcome.links, args.sort);
    let shown = if args.print {
        sorted.len()
    } else {
        args.limit.min(sorted.len())
    };
    for link in sorted.iter().take(shown) {
        let date = link
            .date_guess
            .map(|d| d.to_string())
            .unwrap_or_else(|| "----------".to_string());
        println!("{date}  {}", link.url);
    }
    if shown < sorted.len() {
        let rest = sorted.len() - shown;
        println!("... {rest} more (use --print to list all)");
    }
    Ok(())
}

/// Dated links first in the requested order, undated ones after them.
fn sort_links(links: Vec<DiscoveredLink>, order: SortOrder) -> Vec<DiscoveredLink> {
    let (dated, undated): (Vec<_>, Vec<_>) =
        links.into_iter().partition(|l| l.date_guess.is_some());
    let dated = dated.into_iter().sorted_by(|a, b| match order {
        SortOrder::Asc => a.date_guess.cmp(&b.date_guess),
        SortOrder::Desc => b.date_guess.cmp(&a.date_guess),
    });
    dated.chain(undated).collect()
}

#[instrument(level = "info", skip_all, fields(domain = %args.domain))]
async fn backfill(registry: &SourceRegistry, args: BackfillArgs) -> Result<(), Box<dyn Error>> {
    let source = registry.get(&args.domain)?.compile(Default::default())?;
    let (date_from, date_to) = args.resolve_range(Utc::now().date_naive())?;

    let outdir = args.outdir.display().to_string();
    if let Err(e) = ensure_writable_dir(&outdir).await {
        error!(path = %outdir, error = %e, "Output directory is not writable");
        return Err(e.into());
    }

    let options = BackfillOptions {
        batch_days: args.batch_days,
        resume: args.resume,
        force: args.force,
        window_copy: !args.no_window_copy,
        backup_master: args.backup_master,
        backup_prefix: args.backup_prefix.clone(),
        max_articles: args.max_articles,
        discovery: args.crawl.discovery_options(None, None),
        ..BackfillOptions::new(date_from, date_to)
    };

    let fetcher = http_fetcher()?;
    let reader = ArticleReader::new(fetcher.clone()).with_registry(registry);
    let master = ArticleStore::open(&args.master_db)?
        .with_canonicalizer(source.canonicalizer());

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C received; stopping after the current window");
                stop.store(true, Ordering::SeqCst);
            }
        });
    }

    let reports = ReportStore::new(&args.outdir);
    let summary = Backfill::new(&source, fetcher, reader, master, reports, options)?
        .with_stop_flag(stop)
        .run()
        .await?;

    println!(
        "{}: {} windows, {} skipped, {} succeeded, {} failed{}",
        source.domain(),
        summary.windows,
        summary.skipped,
        summary.succeeded,
        summary.failed,
        if summary.interrupted {
            ", interrupted"
        } else {
            ""
        },
    );
    if summary.failed > 0 {
        warn!(
            failed = summary.failed,
            "Some windows failed; re-run with --resume to retry them"
        );
    }
    Ok(())
}

fn find(args: FindArgs) -> Result<(), Box<dyn Error>> {
    let store = ArticleStore::open(&args.db)?;
    let hits = store.find(&FindQuery {
        domain: args.domain,
        date_from: args.date_from,
        date_to: args.date_to,
        text: args.text,
        limit: Some(args.limit),
    })?;
    for hit in &hits {
        if args.json {
            println!("{}", serde_json::to_string(hit)?);
        } else {
            let date = hit.date.map(|d| d.to_string()).unwrap_or_default();
            println!(
                "{date}  {}\n    {}\n    {}\n",
                hit.title,
                hit.url,
                truncate_for_log(&hit.snippet, 160)
            );
        }
    }
    info!(count = hits.len(), "Query finished");
    Ok(())
}

#[instrument(level = "info", skip_all, fields(url = %args.url))]
async fn read(registry: &SourceRegistry, args: ReadArgs) -> Result<(), Box<dyn Error>> {
    let reader = ArticleReader::new(http_fetcher()?).with_registry(registry);
    let Some(db) = &args.db else {
        let content = reader.read(&args.url).await?;
        println!("{}\n\n{}", content.title, content.body);
        return Ok(());
    };

    let store = ArticleStore::open(db)?;
    match store.content_fill(&args.url, &reader).await? {
        FillOutcome::Filled(a) | FillOutcome::AlreadyFilled(a) => {
            println!(
                "{}\n\n{}",
                a.title.unwrap_or_default(),
                a.body.unwrap_or_default()
            );
            Ok(())
        }
        FillOutcome::Failed(e) => Err(e.into()),
    }
}

fn list_sources(registry: &SourceRegistry) {
    for cfg in registry.iter() {
        let mut strategies = Vec::new();
        if cfg.listing.is_some() {
            strategies.push("listing");
        }
        if cfg.year_month.is_some() {
            strategies.push("year-month");
        }
        if cfg.year_month_day.is_some() {
            strategies.push("year-month-day");
        }
        strategies.push("sitemap");
        println!(
            "{:<12} {:<10} {}",
            cfg.domain,
            cfg.name.as_deref().unwrap_or("-"),
            strategies.join(", ")
        );
    }
}
