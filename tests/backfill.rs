//! End-to-end scenarios against the library API with scripted HTTP.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use pretty_assertions::assert_eq;

use news_backfill::batch::{Backfill, BackfillOptions, BackfillSummary, ReportStore};
use news_backfill::discovery::{Discovery, DiscoveryOptions, Mode};
use news_backfill::error::FetchError;
use news_backfill::fetch::Fetcher;
use news_backfill::models::{ArticleContent, BatchReport, BatchWindow, WindowState};
use news_backfill::reader::ContentSource;
use news_backfill::source::{Source, SourceRegistry};
use news_backfill::store::ArticleStore;
use news_backfill::{Canonicalizer, FindQuery};

const SOURCES: &str = r#"
sources:
  - domain: example.com
    base_url: https://example.com
    article_regex: 'https?://example\.com/(20\d{2})/([01]\d)/([0-3]\d)/[a-z0-9\-]+/?'
    listing:
      template: https://example.com/archive?page={page}
  - domain: archive.example
    base_url: https://archive.example
    article_regex: 'https?://archive\.example/(20\d{2})/([01]\d)/([0-3]\d)/[a-z0-9\-]+/?'
    listing:
      template: https://archive.example/friss?page={page}
    year_month:
      template: https://archive.example/{year}/{month}
"#;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn source(domain: &str) -> Source {
    SourceRegistry::from_yaml_str(SOURCES)
        .unwrap()
        .get(domain)
        .unwrap()
        .compile(Canonicalizer::default())
        .unwrap()
}

#[derive(Default)]
struct ScriptedFetcher {
    pages: HashMap<String, String>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    fn page(mut self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.pages.insert(url.into(), body.into());
        self
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.requests.lock().unwrap().push(url.to_string());
        self.pages
            .get(url)
            .cloned()
            .ok_or(FetchError::HttpStatus(404))
    }
}

#[derive(Default)]
struct StubReader {
    calls: AtomicUsize,
    failing: HashSet<String>,
}

#[async_trait]
impl ContentSource for StubReader {
    async fn read(&self, url: &str) -> Result<ArticleContent, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(url) {
            return Err(FetchError::HttpStatus(500));
        }
        Ok(ArticleContent {
            title: format!("Title of {url}"),
            body: format!("Body of {url}"),
        })
    }
}

fn article_url(date: NaiveDate) -> String {
    format!(
        "https://example.com/{}/cikk-{}",
        date.format("%Y/%m/%d"),
        date.format("%d")
    )
}

/// Listing of January 2024 (newest first, 8 per page) followed by three
/// pages of 2023 articles and one more 2023 page that must never be read.
fn january_listing() -> ScriptedFetcher {
    let days: Vec<NaiveDate> = (1..=31).rev().map(|day| d(2024, 1, day)).collect();
    let mut fetcher = ScriptedFetcher::default();
    let mut page = 0;
    for chunk in days.chunks(8) {
        page += 1;
        let html: String = chunk
            .iter()
            .map(|date| article_url(*date))
            .map(|url| format!("<li><a href=\"{url}\">x</a></li>\n"))
            .collect();
        fetcher = fetcher.page(format!("https://example.com/archive?page={page}"), html);
    }
    for month in [12, 11, 10, 9] {
        page += 1;
        let html = format!(
            "<a href=\"https://example.com/2023/{month:02}/10/regi-{page}\">a</a>\
             <a href=\"https://example.com/2023/{month:02}/05/regi-{page}b\">b</a>"
        );
        fetcher = fetcher.page(format!("https://example.com/archive?page={page}"), html);
    }
    fetcher
}

fn options(from: NaiveDate, to: NaiveDate, batch_days: u32) -> BackfillOptions {
    BackfillOptions {
        batch_days,
        discovery: DiscoveryOptions {
            delay: Duration::ZERO,
            ..DiscoveryOptions::default()
        },
        ..BackfillOptions::new(from, to)
    }
}

fn master(dir: &Path) -> ArticleStore {
    ArticleStore::open(dir.join("master.sqlite")).unwrap()
}

async fn run(
    src: &Source,
    fetcher: &ScriptedFetcher,
    reader: &StubReader,
    store: ArticleStore,
    reports: &ReportStore,
    options: BackfillOptions,
) -> BackfillSummary {
    Backfill::new(src, fetcher, reader, store, reports.clone(), options)
        .unwrap()
        .run()
        .await
        .unwrap()
}

#[tokio::test]
async fn january_backfill_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let src = source("example.com");
    let fetcher = january_listing();
    let reader = StubReader {
        failing: HashSet::from([article_url(d(2024, 1, 15))]),
        ..StubReader::default()
    };
    let store = master(dir.path());
    let reports = ReportStore::new(dir.path().join("out"));

    let january = options(d(2024, 1, 1), d(2024, 2, 1), 31);
    let summary = run(&src, &fetcher, &reader, store.clone(), &reports, january).await;

    assert_eq!(summary.windows, 1);
    assert_eq!(summary.succeeded, 1);
    let report = &summary.reports[0];
    assert_eq!(report.discovered, 31);
    assert_eq!(report.content_filled, 30);
    assert_eq!(report.content_errors.len(), 1);
    assert_eq!(report.content_errors[0].url, article_url(d(2024, 1, 15)));
    assert_eq!(report.copied, 31);
    assert_eq!(report.total_in_window_store, 31);
    assert_eq!(report.integrity_master_ok, Some(true));
    assert_eq!(report.integrity_window_ok, Some(true));
    assert!(report.discovery.stopped_early);
    assert!(report.success);
    assert_eq!(report.state, WindowState::Succeeded);

    // Exactly the January records, nothing from 2023.
    assert_eq!(store.count().unwrap(), 31);
    let hits = store
        .find(&FindQuery {
            date_to: Some(d(2024, 1, 1)),
            ..FindQuery::default()
        })
        .unwrap();
    assert!(hits.is_empty());

    // Pages 5-7 hold only 2023 links; the streak of three ends the listing
    // there and page 8 is never requested.
    let requests = fetcher.requests();
    let page = |n: u32| format!("https://example.com/archive?page={n}");
    assert!(requests.contains(&page(7)));
    assert!(!requests.contains(&page(8)));

    let window = BatchWindow {
        domain: "example.com".into(),
        date_from: d(2024, 1, 1),
        date_to: d(2024, 2, 1),
    };
    let on_disk = reports.load(&window).await.unwrap();
    assert!(on_disk.is_complete());
    assert!(reports.window_store_path(&window).exists());
}

#[tokio::test]
async fn resume_skips_succeeded_windows_without_fetching() {
    let dir = tempfile::tempdir().unwrap();
    let src = source("example.com");
    let reports = ReportStore::new(dir.path().join("out"));

    let first = january_listing();
    let reader = StubReader::default();
    let january = options(d(2024, 1, 1), d(2024, 2, 1), 31);
    run(&src, &first, &reader, master(dir.path()), &reports, january).await;

    let second = january_listing();
    let second_reader = StubReader::default();
    let resumed = BackfillOptions {
        resume: true,
        ..options(d(2024, 1, 1), d(2024, 2, 1), 31)
    };
    let store = master(dir.path());
    let summary = run(&src, &second, &second_reader, store, &reports, resumed).await;

    assert_eq!(summary.skipped, 1);
    assert!(second.requests().is_empty());
    assert_eq!(second_reader.calls.load(Ordering::SeqCst), 0);

    // --force re-runs it; bodies are already there, so nothing is re-read.
    let third = january_listing();
    let forced = BackfillOptions {
        resume: true,
        force: true,
        ..options(d(2024, 1, 1), d(2024, 2, 1), 31)
    };
    let store = master(dir.path());
    let summary = run(&src, &third, &second_reader, store, &reports, forced).await;
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.reports[0].discovered, 31);
    assert_eq!(summary.reports[0].content_filled, 0);
    assert!(!third.requests().is_empty());
    assert_eq!(second_reader.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unfinished_window_is_rerun_on_resume() {
    let dir = tempfile::tempdir().unwrap();
    let src = source("example.com");
    let reports = ReportStore::new(dir.path().join("out"));
    let window = BatchWindow {
        domain: "example.com".into(),
        date_from: d(2024, 1, 1),
        date_to: d(2024, 2, 1),
    };
    // A crash mid-window leaves only the Running report behind.
    let crashed = BatchReport::start(&window, "master.sqlite".into(), None);
    reports.save(&crashed).await.unwrap();

    let fetcher = january_listing();
    let reader = StubReader::default();
    let resumed = BackfillOptions {
        resume: true,
        ..options(d(2024, 1, 1), d(2024, 2, 1), 31)
    };
    let store = master(dir.path());
    let summary = run(&src, &fetcher, &reader, store, &reports, resumed).await;

    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.succeeded, 1);
    assert!(reports.load(&window).await.unwrap().is_complete());
}

#[tokio::test]
async fn windows_are_processed_in_order_with_one_report_each() {
    let dir = tempfile::tempdir().unwrap();
    let src = source("example.com");
    let reports = ReportStore::new(dir.path().join("out"));
    let fetcher = january_listing();
    let reader = StubReader::default();
    let no_copy = BackfillOptions {
        window_copy: false,
        ..options(d(2024, 1, 1), d(2024, 2, 1), 10)
    };

    let store = master(dir.path());
    let summary = run(&src, &fetcher, &reader, store, &reports, no_copy).await;

    let bounds: Vec<_> = summary
        .reports
        .iter()
        .map(|r| (r.date_from, r.date_to))
        .collect();
    assert_eq!(
        bounds,
        vec![
            (d(2024, 1, 1), d(2024, 1, 11)),
            (d(2024, 1, 11), d(2024, 1, 21)),
            (d(2024, 1, 21), d(2024, 1, 31)),
            (d(2024, 1, 31), d(2024, 2, 1)),
        ]
    );
    let discovered: usize = summary.reports.iter().map(|r| r.discovered).sum();
    assert_eq!(discovered, 31);
    for report in &summary.reports {
        assert!(report.success);
        assert!(report.window_store.is_none());
        assert!(reports.report_path(&report.window()).exists());
    }
}

#[tokio::test]
async fn failed_window_does_not_stop_later_windows() {
    let dir = tempfile::tempdir().unwrap();
    let src = source("example.com");
    let reports = ReportStore::new(dir.path().join("out"));
    let fetcher = january_listing();
    let reader = StubReader::default();
    let first = BatchWindow {
        domain: "example.com".into(),
        date_from: d(2024, 1, 1),
        date_to: d(2024, 1, 11),
    };
    // A directory where the first window's store should go cannot be opened.
    std::fs::create_dir_all(reports.window_store_path(&first)).unwrap();

    let ten_days = options(d(2024, 1, 1), d(2024, 2, 1), 10);
    let store = master(dir.path());
    let summary = run(&src, &fetcher, &reader, store, &reports, ten_days).await;

    assert_eq!(summary.windows, 4);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 3);

    let failed = &summary.reports[0];
    assert_eq!(failed.window(), first);
    assert!(!failed.success);
    assert_eq!(failed.state, WindowState::Failed);
    assert!(failed.error.is_some());
    assert!(!reports.load(&first).await.unwrap().is_complete());

    for report in &summary.reports[1..] {
        assert!(report.success);
        assert_eq!(report.integrity_window_ok, Some(true));
        assert!(reports.load(&report.window()).await.unwrap().is_complete());
    }
}

#[tokio::test]
async fn stop_flag_prevents_new_windows() {
    let dir = tempfile::tempdir().unwrap();
    let src = source("example.com");
    let fetcher = january_listing();
    let reader = StubReader::default();
    let stop = Arc::new(AtomicBool::new(true));

    let summary = Backfill::new(
        &src,
        &fetcher,
        &reader,
        master(dir.path()),
        ReportStore::new(dir.path().join("out")),
        options(d(2024, 1, 1), d(2024, 2, 1), 10),
    )
    .unwrap()
    .with_stop_flag(stop)
    .run()
    .await
    .unwrap();

    assert!(summary.interrupted);
    assert!(summary.reports.is_empty());
    assert!(fetcher.requests().is_empty());
}

#[tokio::test]
async fn config_errors_stop_before_any_request() {
    let dir = tempfile::tempdir().unwrap();
    let src = source("example.com");
    let fetcher = ScriptedFetcher::default();
    let reader = StubReader::default();
    let month_only = BackfillOptions {
        discovery: DiscoveryOptions {
            mode: Mode::YearMonth,
            ..DiscoveryOptions::default()
        },
        ..options(d(2024, 1, 1), d(2024, 2, 1), 31)
    };
    let result = Backfill::new(
        &src,
        &fetcher,
        &reader,
        master(dir.path()),
        ReportStore::new(dir.path().join("out")),
        month_only,
    );
    assert!(result.is_err());
    assert!(fetcher.requests().is_empty());
}

#[tokio::test]
async fn same_article_from_two_strategies_is_one_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = master(dir.path());
    let src = source("archive.example");
    let fetcher = ScriptedFetcher::default()
        .page(
            "https://archive.example/friss?page=1",
            "<a href=\"https://archive.example/2024/01/05/hir\">x</a>",
        )
        .page(
            "https://archive.example/2024/01",
            "<a href=\"http://archive.example/2024/01/05/hir/\">x</a>",
        );

    let mut ids = Vec::new();
    for mode in [Mode::Listing, Mode::YearMonth] {
        let opts = DiscoveryOptions {
            mode,
            max_listing_pages: 1,
            delay: Duration::ZERO,
            ..DiscoveryOptions::for_range(d(2024, 1, 1), d(2024, 2, 1))
        };
        let outcome = Discovery::new(&src, &fetcher, opts).unwrap().run().await;
        assert_eq!(outcome.links.len(), 1);
        let stored = store.upsert_link(src.domain(), &outcome.links[0]).unwrap();
        ids.push(stored.id);
    }

    assert_eq!(ids[0], ids[1]);
    assert_eq!(store.count().unwrap(), 1);
}
