//! Error types shared across the crate.
//!
//! Only configuration problems are fatal. Everything the crawl can run into
//! at runtime (a page that will not load, a body that cannot be extracted)
//! is reported through these types and then counted or recorded by the
//! caller instead of aborting the run.

use thiserror::Error;

/// Problems with the static source configuration or the requested run.
///
/// These are raised before any network activity happens.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown source: {0}")]
    UnknownSource(String),
    #[error("duplicate source domain: {0}")]
    DuplicateDomain(String),
    #[error("source {domain} has no {strategy} template")]
    MissingTemplate {
        domain: String,
        strategy: &'static str,
    },
    #[error("template {template:?} is missing the {{{placeholder}}} placeholder")]
    MissingPlaceholder {
        template: String,
        placeholder: &'static str,
    },
    #[error("{strategy} discovery needs both date_from and date_to")]
    MissingDateBounds { strategy: &'static str },
    #[error("invalid date range: {from} is not before {to}")]
    InvalidRange {
        from: chrono::NaiveDate,
        to: chrono::NaiveDate,
    },
    #[error("window size must be at least one day")]
    ZeroWindow,
    #[error("invalid regex for {domain}: {source}")]
    Regex {
        domain: String,
        #[source]
        source: regex::Error,
    },
    #[error("invalid base url {url:?}: {source}")]
    BaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("failed to read sources file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse sources file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// The "unavailable" signal of the fetch collaborator.
///
/// A fetch never panics or throws past its caller; every way a page can be
/// missing ends up as one of these variants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("http status {0}")]
    HttpStatus(u16),
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("no article body found")]
    EmptyContent,
}

/// Errors raised by the article store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid url {0:?}")]
    InvalidUrl(String),
}

/// Errors raised while reading or writing batch reports.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure of a whole backfill run (not of a single window).
#[derive(Debug, Error)]
pub enum BackfillError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Report(#[from] ReportError),
}
