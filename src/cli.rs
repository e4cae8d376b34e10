//! Command-line interface definitions.
//!
//! Crawl tunables can be given as flags or through the environment
//! (`CRAWL_SLEEP_MS`, `CRAWL_MAX_PAGES`, `CRAWL_YM_MAX_PAGES`,
//! `CRAWL_YMD_MAX_PAGES`, `CRAWL_MIN_ACCEPTED`).

use std::path::PathBuf;
use std::time::Duration;

use chrono::{Days, Months, NaiveDate};
use clap::{Args, Parser, Subcommand, ValueEnum};

use news_backfill::discovery::{DiscoveryOptions, Mode};
use news_backfill::error::ConfigError;

/// Discover and backfill news article URLs.
///
/// # Examples
///
/// ```sh
/// # Last three years of 444.hu in 30-day windows, resumable
/// news_backfill backfill 444.hu --years 3 --resume
///
/// # What would discovery find for January?
/// news_backfill discover telex.hu --date-from 2024-01-01 --date-to 2024-02-01
///
/// # Query the store
/// news_backfill find --domain telex.hu --text "Orbán Viktor"
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// YAML sources file replacing the built-in registry
    #[arg(long, global = true, env = "NEWS_SOURCES")]
    pub sources: Option<PathBuf>,

    /// Log every link decision
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run discovery for one source and print what it found
    Discover(DiscoverArgs),
    /// Windowed, resumable discovery plus content fill
    Backfill(BackfillArgs),
    /// Query the article store
    Find(FindArgs),
    /// Fetch and print a single article
    Read(ReadArgs),
    /// List configured sources
    Sources,
}

/// Discovery tunables shared by `discover` and `backfill`.
#[derive(Args, Debug, Clone)]
pub struct CrawlArgs {
    /// Strategy selection
    #[arg(long, value_enum, default_value_t = Mode::Auto)]
    pub mode: Mode,

    /// Accept links whose URL carries no date
    #[arg(long)]
    pub allow_missing_date: bool,

    /// Only accept links in the source's section allowlist
    #[arg(long)]
    pub political_only: bool,

    /// Delay before every request, in milliseconds
    #[arg(long, env = "CRAWL_SLEEP_MS", default_value_t = 250)]
    pub sleep_ms: u64,

    /// Hard cap on listing pages
    #[arg(long, env = "CRAWL_MAX_PAGES", default_value_t = 200)]
    pub max_pages: u32,

    /// Paginated pages per month (overrides the source)
    #[arg(long, env = "CRAWL_YM_MAX_PAGES")]
    pub ym_max_pages: Option<u32>,

    /// Paginated pages per day (overrides the source)
    #[arg(long, env = "CRAWL_YMD_MAX_PAGES")]
    pub ymd_max_pages: Option<u32>,

    /// Below this many accepted links, try the next fallback
    #[arg(long, env = "CRAWL_MIN_ACCEPTED", default_value_t = 200)]
    pub min_accepted: usize,

    /// Unproductive listing pages before stopping
    #[arg(long, default_value_t = 3)]
    pub empty_streak: u32,

    /// Most recent days walked by the day fallback
    #[arg(long, default_value_t = 62)]
    pub max_days: usize,

    /// Sitemap documents fetched at most
    #[arg(long, default_value_t = 50)]
    pub max_sitemaps: usize,
}

impl CrawlArgs {
    pub fn discovery_options(
        &self,
        date_from: Option<NaiveDate>,
        date_to: Option<NaiveDate>,
    ) -> DiscoveryOptions {
        DiscoveryOptions {
            date_from,
            date_to,
            mode: self.mode,
            allow_missing_date: self.allow_missing_date,
            restrict_sections: self.political_only,
            empty_streak_threshold: self.empty_streak,
            max_listing_pages: self.max_pages,
            min_accepted: self.min_accepted,
            max_days: Some(self.max_days),
            ym_max_pages: self.ym_max_pages,
            ymd_max_pages: self.ymd_max_pages,
            newest_first: true,
            delay: Duration::from_millis(self.sleep_ms),
            max_sitemaps: self.max_sitemaps,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Args, Debug)]
pub struct DiscoverArgs {
    /// Source domain, e.g. telex.hu
    pub domain: String,

    /// Inclusive lower bound (YYYY-MM-DD)
    #[arg(long)]
    pub date_from: Option<NaiveDate>,

    /// Exclusive upper bound (YYYY-MM-DD)
    #[arg(long)]
    pub date_to: Option<NaiveDate>,

    /// Order of the printed sample; undated links always come last
    #[arg(long, value_enum, default_value_t = SortOrder::Desc)]
    pub sort: SortOrder,

    /// Links printed
    #[arg(long, default_value_t = 50)]
    pub limit: usize,

    /// Print every link instead of a sample
    #[arg(long)]
    pub print: bool,

    /// Also upsert meta-only records into this store
    #[arg(long)]
    pub db: Option<PathBuf>,

    #[command(flatten)]
    pub crawl: CrawlArgs,
}

#[derive(Args, Debug)]
pub struct BackfillArgs {
    /// Source domain, e.g. 444.hu
    pub domain: String,

    /// Cover this many years back from --date-to
    #[arg(long, conflicts_with = "date_from")]
    pub years: Option<u32>,

    /// Inclusive lower bound (YYYY-MM-DD)
    #[arg(long)]
    pub date_from: Option<NaiveDate>,

    /// Exclusive upper bound (YYYY-MM-DD), default tomorrow
    #[arg(long)]
    pub date_to: Option<NaiveDate>,

    /// Window size in days
    #[arg(long, default_value_t = 30)]
    pub batch_days: u32,

    /// Master article store
    #[arg(long, default_value = "data/articles.sqlite")]
    pub master_db: PathBuf,

    /// Directory for reports, window stores and backups
    #[arg(long, default_value = "backfill")]
    pub outdir: PathBuf,

    /// Skip windows whose report already succeeded
    #[arg(long)]
    pub resume: bool,

    /// Re-run windows even with --resume
    #[arg(long)]
    pub force: bool,

    /// Do not write per-window stores
    #[arg(long)]
    pub no_window_copy: bool,

    /// Snapshot the master store before each window
    #[arg(long)]
    pub backup_master: bool,

    /// File name prefix for master snapshots
    #[arg(long, default_value = "master_before_")]
    pub backup_prefix: String,

    /// Content-fill at most this many articles per window
    #[arg(long)]
    pub max_articles: Option<usize>,

    #[command(flatten)]
    pub crawl: CrawlArgs,
}

impl BackfillArgs {
    /// Resolve `[date_from, date_to)` from explicit dates or `--years`.
    pub fn resolve_range(&self, today: NaiveDate) -> Result<(NaiveDate, NaiveDate), ConfigError> {
        let date_to = match self.date_to {
            Some(d) => d,
            None => today.checked_add_days(Days::new(1)).unwrap_or(today),
        };
        let date_from = match (self.date_from, self.years) {
            (Some(d), _) => d,
            (None, Some(years)) => date_to
                .checked_sub_months(Months::new(years.saturating_mul(12)))
                .unwrap_or(NaiveDate::MIN),
            (None, None) => {
                return Err(ConfigError::MissingDateBounds {
                    strategy: "backfill",
                });
            }
        };
        if date_from >= date_to {
            return Err(ConfigError::InvalidRange {
                from: date_from,
                to: date_to,
            });
        }
        Ok((date_from, date_to))
    }
}

#[derive(Args, Debug)]
pub struct FindArgs {
    /// Article store to query
    #[arg(long, default_value = "data/articles.sqlite")]
    pub db: PathBuf,

    #[arg(long)]
    pub domain: Option<String>,

    /// Inclusive lower bound (YYYY-MM-DD)
    #[arg(long)]
    pub date_from: Option<NaiveDate>,

    /// Exclusive upper bound (YYYY-MM-DD)
    #[arg(long)]
    pub date_to: Option<NaiveDate>,

    /// Substring of title, body or URL
    #[arg(long)]
    pub text: Option<String>,

    #[arg(long, default_value_t = 200)]
    pub limit: usize,

    /// Print hits as JSON lines
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ReadArgs {
    /// Article URL
    pub url: String,

    /// Content-fill the record in this store instead of only printing
    #[arg(long)]
    pub db: Option<PathBuf>,
}
