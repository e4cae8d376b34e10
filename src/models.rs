//! Data models shared by discovery, the article store and the batch
//! orchestrator.
//!
//! - [`DiscoveredLink`]: an accepted candidate URL coming out of discovery
//! - [`Article`]: the durable record kept by the store
//! - [`BatchWindow`]: one half-open slice of a backfill range
//! - [`BatchReport`]: the persisted outcome of processing a window
//! - [`SearchHit`] / [`FindQuery`]: the outward query contract

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::discovery::DiscoveryStats;

/// A candidate article URL with a best-effort publish date taken from the
/// URL path. `date_guess` is `None` when the pattern does not encode a date
/// or the captured numbers do not form a calendar date.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveredLink {
    pub url: String,
    pub date_guess: Option<NaiveDate>,
}

impl DiscoveredLink {
    pub fn new(url: impl Into<String>, date_guess: Option<NaiveDate>) -> Self {
        Self {
            url: url.into(),
            date_guess,
        }
    }
}

/// Stable record id: hex SHA-256 of the canonical URL.
///
/// The id depends on the URL alone, so the same article reached through
/// any strategy or any run maps to the same record.
pub fn article_id(canonical_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_url.as_bytes());
    hex::encode(hasher.finalize())
}

/// The durable article record.
///
/// `title` and `body` stay `None` until content-fill populates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    /// Domain of the source the article belongs to.
    pub source: String,
    pub url: String,
    pub title: Option<String>,
    pub body: Option<String>,
    pub published: Option<NaiveDate>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Article {
    /// A meta-only record for a URL that has just been discovered.
    ///
    /// `url` is expected to be canonical already; the store canonicalizes
    /// again on write, so passing a raw URL is harmless.
    pub fn discovered(source: &str, url: &str, published: Option<NaiveDate>) -> Self {
        let now = Utc::now();
        Self {
            id: article_id(url),
            source: source.to_ascii_lowercase(),
            url: url.to_string(),
            title: None,
            body: None,
            published,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_content(mut self, title: Option<String>, body: Option<String>) -> Self {
        self.title = title;
        self.body = body;
        self
    }

    /// `true` when the record still needs content-fill.
    pub fn needs_body(&self) -> bool {
        self.body.as_deref().is_none_or(|b| b.trim().is_empty())
    }
}

/// Title and body produced by the content collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleContent {
    pub title: String,
    pub body: String,
}

/// One half-open date slice `[date_from, date_to)` of a backfill for a
/// single source domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchWindow {
    pub domain: String,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
}

impl BatchWindow {
    /// Deterministic key used for report and window-store file names.
    pub fn key(&self) -> String {
        format!(
            "{}_{}_to_{}",
            self.domain,
            self.date_from.format("%Y-%m-%d"),
            self.date_to.format("%Y-%m-%d")
        )
    }

    pub fn days(&self) -> i64 {
        (self.date_to - self.date_from).num_days()
    }
}

/// Lifecycle of a window as recorded in its report.
///
/// A report is first written as `Running`; only a finished, fully
/// consistent window is ever marked `Succeeded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WindowState {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// A content-fill failure for a single URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentFailure {
    pub url: String,
    pub error: String,
}

/// Persisted outcome of one window attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub domain: String,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub state: WindowState,
    pub master_store: String,
    pub window_store: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub seconds: Option<f64>,
    pub discovered: usize,
    pub content_filled: usize,
    #[serde(default)]
    pub content_errors: Vec<ContentFailure>,
    pub copied: usize,
    pub total_in_master_after: usize,
    pub total_in_window_store: usize,
    pub integrity_master_ok: Option<bool>,
    pub integrity_window_ok: Option<bool>,
    #[serde(default)]
    pub discovery: DiscoveryStats,
    /// Store failure that cut the window short, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub success: bool,
}

impl BatchReport {
    /// A fresh report for a window that is about to run.
    pub fn start(window: &BatchWindow, master_store: String, window_store: Option<String>) -> Self {
        Self {
            domain: window.domain.clone(),
            date_from: window.date_from,
            date_to: window.date_to,
            state: WindowState::Running,
            master_store,
            window_store,
            started_at: Utc::now(),
            finished_at: None,
            seconds: None,
            discovered: 0,
            content_filled: 0,
            content_errors: Vec::new(),
            copied: 0,
            total_in_master_after: 0,
            total_in_window_store: 0,
            integrity_master_ok: None,
            integrity_window_ok: None,
            discovery: DiscoveryStats::default(),
            error: None,
            success: false,
        }
    }

    pub fn window(&self) -> BatchWindow {
        BatchWindow {
            domain: self.domain.clone(),
            date_from: self.date_from,
            date_to: self.date_to,
        }
    }

    /// Close the report. `success` is true only when every integrity check
    /// that ran passed; a check that never ran counts as a failure for the
    /// master store and is ignored for an absent window store.
    pub fn finish(&mut self) {
        let now = Utc::now();
        self.seconds = Some((now - self.started_at).num_milliseconds() as f64 / 1000.0);
        self.finished_at = Some(now);
        let master_ok = self.integrity_master_ok == Some(true);
        let window_ok = match self.window_store {
            Some(_) => self.integrity_window_ok == Some(true),
            None => true,
        };
        self.success = master_ok && window_ok && self.error.is_none();
        self.state = if self.success {
            WindowState::Succeeded
        } else {
            WindowState::Failed
        };
    }

    /// Whether a resumed run may skip this window.
    pub fn is_complete(&self) -> bool {
        self.success && self.state == WindowState::Succeeded
    }
}

/// Filters accepted by [`crate::store::ArticleStore::find`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindQuery {
    pub domain: Option<String>,
    /// Inclusive lower bound on the published date.
    pub date_from: Option<NaiveDate>,
    /// Exclusive upper bound on the published date.
    pub date_to: Option<NaiveDate>,
    /// Substring matched against title, body and URL.
    pub text: Option<String>,
    pub limit: Option<usize>,
}

/// One row of a [`FindQuery`] result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub date: Option<NaiveDate>,
    pub snippet: String,
}
