//! Windowed, resumable backfill.
//!
//! A long date range is cut into half-open windows of `batch_days` days and
//! processed oldest first. For each window:
//!
//! 1. Skip it if resuming and its report says it already succeeded.
//! 2. Persist a `Running` report (and optionally back up the master store).
//! 3. Discover links scoped to the window and upsert them meta-only.
//! 4. Content-fill every record of the window that still has no body.
//! 5. Check master store integrity.
//! 6. Optionally copy the window's records into their own store and check
//!    that one too.
//! 7. Close the report: `success` only when every check passed.
//!
//! The stop flag is only looked at between windows. A window that has
//! started always gets a final report.

pub mod report;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{Days, NaiveDate};
use futures::stream::{self, StreamExt};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

use crate::discovery::{Discovery, DiscoveryOptions};
use crate::error::{BackfillError, ConfigError, StoreError};
use crate::fetch::Fetcher;
use crate::models::{BatchReport, BatchWindow, ContentFailure};
use crate::reader::ContentSource;
use crate::source::Source;
use crate::store::{ArticleStore, FillOutcome};

pub use report::ReportStore;

/// Split `[start, end)` into contiguous windows of `days` days. The last
/// window may be shorter.
pub fn partition(
    domain: &str,
    start: NaiveDate,
    end: NaiveDate,
    days: u32,
) -> Result<Vec<BatchWindow>, ConfigError> {
    if days == 0 {
        return Err(ConfigError::ZeroWindow);
    }
    if start >= end {
        return Err(ConfigError::InvalidRange {
            from: start,
            to: end,
        });
    }
    let mut windows = Vec::new();
    let mut cur = start;
    while cur < end {
        let next = cur
            .checked_add_days(Days::new(u64::from(days)))
            .map_or(end, |n| n.min(end));
        windows.push(BatchWindow {
            domain: domain.to_string(),
            date_from: cur,
            date_to: next,
        });
        cur = next;
    }
    Ok(windows)
}

/// Settings for one backfill run.
#[derive(Debug, Clone)]
pub struct BackfillOptions {
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub batch_days: u32,
    /// Skip windows whose report already succeeded.
    pub resume: bool,
    /// Re-run windows even when resuming.
    pub force: bool,
    /// Copy each window's records into `windows/<key>.sqlite`.
    pub window_copy: bool,
    pub backup_master: bool,
    pub backup_prefix: String,
    /// Content-fill at most this many records per window.
    pub max_articles: Option<usize>,
    /// Template for per-window discovery; the date bounds are replaced.
    pub discovery: DiscoveryOptions,
}

impl BackfillOptions {
    pub fn new(date_from: NaiveDate, date_to: NaiveDate) -> Self {
        Self {
            date_from,
            date_to,
            batch_days: 30,
            resume: false,
            force: false,
            window_copy: true,
            backup_master: false,
            backup_prefix: "master_before_".to_string(),
            max_articles: None,
            discovery: DiscoveryOptions::default(),
        }
    }

    fn discovery_for(&self, window: &BatchWindow) -> DiscoveryOptions {
        DiscoveryOptions {
            date_from: Some(window.date_from),
            date_to: Some(window.date_to),
            ..self.discovery.clone()
        }
    }
}

/// What a backfill run did.
#[derive(Debug, Clone, Default)]
pub struct BackfillSummary {
    pub windows: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// The stop flag ended the run before every window was processed.
    pub interrupted: bool,
    pub reports: Vec<BatchReport>,
}

/// Backfill orchestrator for one source.
pub struct Backfill<'a, F, C> {
    source: &'a Source,
    fetcher: F,
    reader: C,
    master: ArticleStore,
    reports: ReportStore,
    options: BackfillOptions,
    stop: Arc<AtomicBool>,
}

impl<'a, F: Fetcher, C: ContentSource> Backfill<'a, F, C> {
    /// Validate the whole run before any window is touched.
    pub fn new(
        source: &'a Source,
        fetcher: F,
        reader: C,
        master: ArticleStore,
        reports: ReportStore,
        options: BackfillOptions,
    ) -> Result<Self, BackfillError> {
        partition(
            source.domain(),
            options.date_from,
            options.date_to,
            options.batch_days,
        )?;
        let whole_range = DiscoveryOptions {
            date_from: Some(options.date_from),
            date_to: Some(options.date_to),
            ..options.discovery.clone()
        };
        Discovery::new(source, &fetcher, whole_range)?;
        Ok(Self {
            source,
            fetcher,
            reader,
            master,
            reports,
            options,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Share a stop flag, e.g. one set by a Ctrl-C handler.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn windows(&self) -> Result<Vec<BatchWindow>, ConfigError> {
        partition(
            self.source.domain(),
            self.options.date_from,
            self.options.date_to,
            self.options.batch_days,
        )
    }

    /// Process every window of the range, oldest first.
    ///
    /// With `resume` set (and `force` not), windows whose report already
    /// succeeded are skipped without any fetch. The stop flag is checked
    /// before each window.
    ///
    /// # Returns
    ///
    /// A [`BackfillSummary`] with one report per processed or skipped
    /// window. A failed window is counted in `failed` and does not stop
    /// the run.
    ///
    /// # Errors
    ///
    /// Returns [`BackfillError::Report`] when a report file cannot be
    /// written, since resume would no longer be trustworthy.
    #[instrument(
        level = "info",
        skip_all,
        fields(
            domain = %self.source.domain(),
            from = %self.options.date_from,
            to = %self.options.date_to
        )
    )]
    pub async fn run(&self) -> Result<BackfillSummary, BackfillError> {
        let windows = self.windows()?;
        let mut summary = BackfillSummary {
            windows: windows.len(),
            ..BackfillSummary::default()
        };
        info!(
            windows = windows.len(),
            batch_days = self.options.batch_days,
            "Starting backfill"
        );

        for window in &windows {
            if self.stop.load(Ordering::SeqCst) {
                warn!(
                    next = %window.key(),
                    "Stop requested; leaving remaining windows for a later run"
                );
                summary.interrupted = true;
                break;
            }

            if self.options.resume && !self.options.force {
                let previous = self.reports.load(window).await;
                if let Some(previous) = previous.filter(BatchReport::is_complete) {
                    info!(key = %window.key(), "Window already succeeded; skipping");
                    summary.skipped += 1;
                    summary.reports.push(previous);
                    continue;
                }
            }

            let report = self.process_window(window).await?;
            if report.success {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
            summary.reports.push(report);
        }

        info!(
            windows = summary.windows,
            skipped = summary.skipped,
            succeeded = summary.succeeded,
            failed = summary.failed,
            interrupted = summary.interrupted,
            "Backfill finished"
        );
        Ok(summary)
    }

    /// Run one window and persist its report. Store failures end up in the
    /// report as a failed window; only report I/O is returned as an error.
    #[instrument(level = "info", skip_all, fields(key = %window.key()))]
    pub async fn process_window(&self, window: &BatchWindow) -> Result<BatchReport, BackfillError> {
        let copy_path = self
            .options
            .window_copy
            .then(|| self.reports.window_store_path(window));
        let mut report = BatchReport::start(
            window,
            self.master.path().display().to_string(),
            copy_path.as_ref().map(|p| p.display().to_string()),
        );
        self.reports.save(&report).await?;

        if let Err(e) = self.fill_report(window, copy_path, &mut report).await {
            error!(error = %e, "Window aborted by a store failure");
            report.error = Some(e.to_string());
        }

        report.finish();
        let path = self.reports.save(&report).await?;
        info!(
            success = report.success,
            discovered = report.discovered,
            content_filled = report.content_filled,
            content_errors = report.content_errors.len(),
            copied = report.copied,
            seconds = report.seconds.unwrap_or_default(),
            report = %path.display(),
            "Window finished"
        );
        Ok(report)
    }

    async fn fill_report(
        &self,
        window: &BatchWindow,
        window_store_path: Option<PathBuf>,
        report: &mut BatchReport,
    ) -> Result<(), BackfillError> {
        let domain = self.source.domain();

        if self.options.backup_master {
            let target = self
                .reports
                .backup_path(&self.options.backup_prefix, window);
            if let Err(e) = self.master.backup_to(&target) {
                warn!(target = %target.display(), error = %e, "Master backup failed; continuing");
            }
        }

        let options = self.options.discovery_for(window);
        let discovery = Discovery::new(self.source, &self.fetcher, options)?;
        let outcome = discovery.run().await;
        report.discovery = outcome.stats;

        let mut undated = Vec::new();
        for link in &outcome.links {
            self.master.upsert_link(domain, link)?;
            if link.date_guess.is_none() {
                undated.push(link.url.clone());
            }
        }
        report.discovered = outcome.links.len();
        info!(discovered = report.discovered, "Upserted discovered links");

        self.content_fill(window, undated, report).await?;

        report.integrity_master_ok = Some(integrity_ok(&self.master));
        report.total_in_master_after = self.master.count_domain(domain)?;

        if let Some(path) = window_store_path {
            let window_store = ArticleStore::open(&path)?;
            let (from, to) = (window.date_from, window.date_to);
            let articles = self.master.articles_in_window(domain, from, to)?;
            for article in &articles {
                window_store.upsert(article)?;
            }
            report.copied = articles.len();
            report.total_in_window_store = window_store.count()?;
            report.integrity_window_ok = Some(integrity_ok(&window_store));
        }
        Ok(())
    }

    /// Fill every body-less record of the window, plus undated links from
    /// this run, one at a time with the politeness delay in between.
    async fn content_fill(
        &self,
        window: &BatchWindow,
        undated: Vec<String>,
        report: &mut BatchReport,
    ) -> Result<(), StoreError> {
        let (from, to) = (window.date_from, window.date_to);
        let mut targets = self
            .master
            .urls_missing_body(self.source.domain(), from, to)?;
        let mut seen: HashSet<String> = targets.iter().cloned().collect();
        for url in undated {
            let fresh = seen.insert(url.clone());
            if fresh && self.master.get_by_url(&url)?.is_none_or(|a| a.needs_body()) {
                targets.push(url);
            }
        }
        if let Some(max) = self.options.max_articles {
            targets.truncate(max);
        }
        info!(targets = targets.len(), "Content fill starting");

        let delay = self.options.discovery.delay;
        let outcomes: Vec<(String, Result<FillOutcome, StoreError>)> = stream::iter(targets)
            .then(|url| async move {
                if !delay.is_zero() {
                    sleep(delay).await;
                }
                let outcome = self.master.content_fill(&url, &self.reader).await;
                (url, outcome)
            })
            .collect()
            .await;

        tally_fills(outcomes, report)
    }
}

/// A check that cannot even run counts as failed.
fn integrity_ok(store: &ArticleStore) -> bool {
    store.integrity_check().unwrap_or_else(|e| {
        warn!(path = %store.path().display(), error = %e, "Integrity check could not run");
        false
    })
}

/// Fold content-fill outcomes into the report. Every outcome is counted
/// before the first store error, if any, is returned.
fn tally_fills(
    outcomes: Vec<(String, Result<FillOutcome, StoreError>)>,
    report: &mut BatchReport,
) -> Result<(), StoreError> {
    let mut first_error = None;
    for (url, outcome) in outcomes {
        match outcome {
            Ok(FillOutcome::Filled(_)) => report.content_filled += 1,
            Ok(FillOutcome::AlreadyFilled(_)) => {}
            Ok(FillOutcome::Failed(e)) => report.content_errors.push(ContentFailure {
                url,
                error: e.to_string(),
            }),
            Err(e) => {
                error!(%url, error = %e, "Store failed during content fill");
                first_error.get_or_insert(e);
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}
