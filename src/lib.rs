//! # news_backfill
//!
//! Discovers, deduplicates and incrementally persists article URLs from news
//! sites that offer no reliable sitemap, then backfills them in bounded,
//! resumable date windows.
//!
//! ## Architecture
//!
//! ```text
//! Backfill (per window)
//!   └─ Discovery state machine ── Fetcher
//!        └─ LinkExtractor ── Canonicalizer
//!   └─ ArticleStore (upsert, content fill) ── ContentSource
//!   └─ integrity check ── ReportStore
//! ```
//!
//! - [`source`]: sites as configuration values (YAML), compiled once
//! - [`discovery`]: listing, month, day and sitemap strategies
//! - [`store`]: the idempotent SQLite article store
//! - [`batch`]: window partitioning, resume and reports

pub mod batch;
pub mod canonical;
pub mod discovery;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod models;
pub mod reader;
pub mod source;
pub mod store;
pub mod utils;

pub use batch::{Backfill, BackfillOptions, BackfillSummary, ReportStore, partition};
pub use canonical::{Canonicalizer, canonicalize};
pub use discovery::{Discovery, DiscoveryOptions, DiscoveryOutcome, DiscoveryStats, Mode, Strategy};
pub use error::{BackfillError, ConfigError, FetchError, ReportError, StoreError};
pub use fetch::{FetchSettings, Fetcher, HttpFetcher};
pub use models::{
    Article, BatchReport, BatchWindow, DiscoveredLink, FindQuery, SearchHit, WindowState,
};
pub use reader::{ArticleReader, ContentSource};
pub use source::{Source, SourceConfig, SourceRegistry};
pub use store::{ArticleStore, FillOutcome};
