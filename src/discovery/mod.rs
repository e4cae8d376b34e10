//! Per-source URL discovery.
//!
//! Discovery is a small state machine over the navigation idioms a news
//! site may offer:
//!
//! | State | Walks | Stops |
//! |-------|-------|-------|
//! | `Listing` | `{page}` = 1, 2, 3, ... | empty streak reached (lower bound given) or page cap |
//! | `YearMonthFallback` | every month in the range, newest first | after the last month |
//! | `YearMonthDayFallback` | every day in the range, newest first, capped | after the last day |
//! | `Sitemap` | robots.txt / sitemap index / url sets | document cap |
//!
//! In [`Mode::Auto`] the listing runs first; the month walk only runs if the
//! listing accepted fewer than `min_accepted` links, and the day walk only
//! if the total is still short. All strategies feed one run-scoped,
//! de-duplicated result set, so a URL accepted by an earlier strategy is not
//! counted again by a later one.
//!
//! Page fetches never abort a run: a failed fetch is counted and treated as
//! an empty page. Only configuration problems (a missing template for the
//! selected mode, missing date bounds for a fallback) are errors, and those
//! are raised by [`Discovery::new`] before any request is made.

pub mod periods;
pub mod sitemap;

use std::collections::HashSet;
use std::ops::AddAssign;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::error::ConfigError;
use crate::fetch::Fetcher;
use crate::models::DiscoveredLink;
use crate::source::{PeriodTemplate, Source, render_template};

use periods::{days_in_range, months_in_range};

/// Which strategies a run may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Listing, then month and day fallbacks while under-producing.
    #[default]
    Auto,
    Listing,
    YearMonth,
    YearMonthDay,
    /// Sitemap documents only. Never part of `Auto`.
    Sitemap,
}

/// A navigation idiom that contributed to a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Listing,
    YearMonth,
    YearMonthDay,
    Sitemap,
}

/// States of the discovery state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Listing,
    YearMonthFallback,
    YearMonthDayFallback,
    Sitemap,
    Done,
}

/// Knobs for one discovery run.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Inclusive lower bound; enables the listing early stop.
    pub date_from: Option<NaiveDate>,
    /// Exclusive upper bound.
    pub date_to: Option<NaiveDate>,
    pub mode: Mode,
    /// Accept links whose URL carries no date.
    pub allow_missing_date: bool,
    /// Reject links outside the source's section allowlist.
    pub restrict_sections: bool,
    /// Consecutive unproductive listing pages before stopping.
    pub empty_streak_threshold: u32,
    /// Hard cap on listing pages.
    pub max_listing_pages: u32,
    /// Below this many accepted links `Auto` tries the next fallback.
    pub min_accepted: usize,
    /// Most recent days walked by the day fallback.
    pub max_days: Option<usize>,
    /// Overrides the per-month page cap of the source.
    pub ym_max_pages: Option<u32>,
    /// Overrides the per-day page cap of the source.
    pub ymd_max_pages: Option<u32>,
    /// Walk periods newest first.
    pub newest_first: bool,
    /// Politeness delay before every request.
    pub delay: Duration,
    /// Cap on sitemap documents fetched.
    pub max_sitemaps: usize,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            date_from: None,
            date_to: None,
            mode: Mode::Auto,
            allow_missing_date: false,
            restrict_sections: false,
            empty_streak_threshold: 3,
            max_listing_pages: 200,
            min_accepted: 200,
            max_days: Some(62),
            ym_max_pages: None,
            ymd_max_pages: None,
            newest_first: true,
            delay: Duration::from_millis(250),
            max_sitemaps: 50,
        }
    }
}

impl DiscoveryOptions {
    /// Options scoped to `[date_from, date_to)`.
    pub fn for_range(date_from: NaiveDate, date_to: NaiveDate) -> Self {
        Self {
            date_from: Some(date_from),
            date_to: Some(date_to),
            ..Self::default()
        }
    }

    fn bounds(&self) -> Option<(NaiveDate, NaiveDate)> {
        self.date_from.zip(self.date_to)
    }
}

/// Counters for a discovery run or a part of one.
///
/// Strategies return these by value; callers add them together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryStats {
    pub pages_fetched: usize,
    pub page_fetch_errors: usize,
    pub links_seen: usize,
    pub dup_links: usize,
    pub range_filtered: usize,
    pub section_filtered: usize,
    pub accepted: usize,
    pub stopped_early: bool,
    pub strategies: Vec<Strategy>,
}

impl AddAssign for DiscoveryStats {
    fn add_assign(&mut self, rhs: Self) {
        self.pages_fetched += rhs.pages_fetched;
        self.page_fetch_errors += rhs.page_fetch_errors;
        self.links_seen += rhs.links_seen;
        self.dup_links += rhs.dup_links;
        self.range_filtered += rhs.range_filtered;
        self.section_filtered += rhs.section_filtered;
        self.accepted += rhs.accepted;
        self.stopped_early |= rhs.stopped_early;
        for s in rhs.strategies {
            if !self.strategies.contains(&s) {
                self.strategies.push(s);
            }
        }
    }
}

/// Result of a discovery run: accepted links in discovery order.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOutcome {
    pub links: Vec<DiscoveredLink>,
    pub stats: DiscoveryStats,
}

/// Run-scoped set of accepted links.
#[derive(Debug, Default)]
struct Accepted {
    seen: HashSet<String>,
    links: Vec<DiscoveredLink>,
}

impl Accepted {
    fn len(&self) -> usize {
        self.links.len()
    }
}

/// What one page contributed.
#[derive(Debug, Default)]
struct PageTally {
    stats: DiscoveryStats,
    /// The page had dated links and every one of them is newer than the
    /// window: a newest-first listing has not reached the window yet.
    newer_than_window: bool,
}

enum Verdict {
    Accept,
    OutOfRange,
    OutOfSection,
}

/// `true` if `date` lies in `[start, end_excl)`; undated links pass only
/// when `allow_missing` is set.
pub fn within_range(
    date: Option<NaiveDate>,
    start: Option<NaiveDate>,
    end_excl: Option<NaiveDate>,
    allow_missing: bool,
) -> bool {
    let Some(date) = date else {
        return allow_missing;
    };
    start.is_none_or(|s| date >= s) && end_excl.is_none_or(|e| date < e)
}

/// Discovery for one source and one run.
pub struct Discovery<'a, F> {
    source: &'a Source,
    fetcher: F,
    options: DiscoveryOptions,
}

impl<'a, F: Fetcher> Discovery<'a, F> {
    /// Validate `options` against the source's templates. Fails before any
    /// network activity if the selected mode cannot run.
    pub fn new(
        source: &'a Source,
        fetcher: F,
        options: DiscoveryOptions,
    ) -> Result<Self, ConfigError> {
        check_options(source, &options)?;
        Ok(Self {
            source,
            fetcher,
            options,
        })
    }

    fn initial_state(&self) -> State {
        match self.options.mode {
            Mode::Listing => State::Listing,
            Mode::YearMonth => State::YearMonthFallback,
            Mode::YearMonthDay => State::YearMonthDayFallback,
            Mode::Sitemap => State::Sitemap,
            Mode::Auto => {
                if self.source.listing().is_some() {
                    State::Listing
                } else if self.source.year_month().is_some() {
                    State::YearMonthFallback
                } else if self.source.year_month_day().is_some() {
                    State::YearMonthDayFallback
                } else {
                    State::Done
                }
            }
        }
    }

    /// Where to go after `finished`, given how much has been accepted.
    fn transition(&self, finished: State, accepted: usize) -> State {
        if self.options.mode != Mode::Auto {
            return State::Done;
        }
        let short = accepted < self.options.min_accepted;
        let bounded = self.options.bounds().is_some();
        let ym = short && bounded && self.source.year_month().is_some();
        let ymd = short && bounded && self.source.year_month_day().is_some();
        match finished {
            State::Listing if ym => State::YearMonthFallback,
            State::Listing | State::YearMonthFallback if ymd => State::YearMonthDayFallback,
            _ => State::Done,
        }
    }

    /// Run the state machine to completion.
    ///
    /// Strategies are tried in the order the mode allows; in `auto` mode a
    /// fallback only runs while fewer than `min_accepted` links have been
    /// accepted. Every strategy feeds the same de-duplicated result set.
    ///
    /// # Returns
    ///
    /// The accepted links in discovery order, together with the summed
    /// [`DiscoveryStats`] of every strategy that ran. Fetch and parse
    /// failures only show up in the stats; this never fails.
    #[instrument(level = "info", skip_all, fields(domain = %self.source.domain(), mode = ?self.options.mode))]
    pub async fn run(&self) -> DiscoveryOutcome {
        let mut accepted = Accepted::default();
        let mut stats = DiscoveryStats::default();
        let mut state = self.initial_state();

        while state != State::Done {
            debug!(?state, accepted = accepted.len(), "Entering discovery state");
            let part = match state {
                State::Listing => self.run_listing(&mut accepted).await,
                State::YearMonthFallback => self.run_year_month(&mut accepted).await,
                State::YearMonthDayFallback => self.run_year_month_day(&mut accepted).await,
                State::Sitemap => self.run_sitemap(&mut accepted).await,
                State::Done => DiscoveryStats::default(),
            };
            stats += part;
            state = self.transition(state, accepted.len());
        }

        info!(
            accepted = accepted.len(),
            pages_fetched = stats.pages_fetched,
            page_fetch_errors = stats.page_fetch_errors,
            links_seen = stats.links_seen,
            dup_links = stats.dup_links,
            range_filtered = stats.range_filtered,
            stopped_early = stats.stopped_early,
            "Discovery finished"
        );
        DiscoveryOutcome {
            links: accepted.links,
            stats,
        }
    }

    /// Fetch one page after the politeness delay. Failures are counted in
    /// `stats` and reported as `None`.
    async fn fetch_page(&self, url: &str, stats: &mut DiscoveryStats) -> Option<String> {
        if !self.options.delay.is_zero() {
            sleep(self.options.delay).await;
        }
        stats.pages_fetched += 1;
        match self.fetcher.fetch(url).await {
            Ok(text) => Some(text),
            Err(e) => {
                stats.page_fetch_errors += 1;
                warn!(%url, error = %e, "Page unavailable");
                None
            }
        }
    }

    fn verdict(&self, link: &DiscoveredLink) -> Verdict {
        let o = &self.options;
        if !within_range(
            link.date_guess,
            o.date_from,
            o.date_to,
            o.allow_missing_date,
        ) {
            return Verdict::OutOfRange;
        }
        if o.restrict_sections && !self.source.section_allowed(&link.url) {
            return Verdict::OutOfSection;
        }
        Verdict::Accept
    }

    /// Classify every link of a page against the run-scoped result set.
    fn absorb(&self, links: Vec<DiscoveredLink>, accepted: &mut Accepted) -> PageTally {
        let mut tally = PageTally::default();
        let mut dated = 0usize;
        let mut newer = 0usize;

        for link in links {
            tally.stats.links_seen += 1;
            if let (Some(date), Some(to)) = (link.date_guess, self.options.date_to) {
                dated += 1;
                if date >= to {
                    newer += 1;
                }
            }
            if accepted.seen.contains(&link.url) {
                tally.stats.dup_links += 1;
                continue;
            }
            match self.verdict(&link) {
                Verdict::Accept => {
                    debug!(url = %link.url, date = ?link.date_guess, "Accepted link");
                    accepted.seen.insert(link.url.clone());
                    accepted.links.push(link);
                    tally.stats.accepted += 1;
                }
                Verdict::OutOfRange => tally.stats.range_filtered += 1,
                Verdict::OutOfSection => tally.stats.section_filtered += 1,
            }
        }

        tally.newer_than_window = dated > 0 && dated == newer && tally.stats.accepted == 0;
        tally
    }

    async fn run_listing(&self, accepted: &mut Accepted) -> DiscoveryStats {
        let mut stats = DiscoveryStats {
            strategies: vec![Strategy::Listing],
            ..DiscoveryStats::default()
        };
        let Some(listing) = self.source.listing() else {
            return stats;
        };
        let threshold = self.options.empty_streak_threshold.max(1);
        let mut empty_streak = 0u32;

        for page in 1..=self.options.max_listing_pages {
            let url = render_template(&listing.template, None, Some(page));
            match self.fetch_page(&url, &mut stats).await {
                None => empty_streak += 1,
                Some(text) => {
                    let tally = self.absorb(self.source.extractor().extract(&text), accepted);
                    debug!(
                        page,
                        new = tally.stats.accepted,
                        seen = tally.stats.links_seen,
                        "Listing page processed"
                    );
                    if tally.stats.accepted > 0 {
                        empty_streak = 0;
                    } else if !tally.newer_than_window {
                        empty_streak += 1;
                    }
                    stats += tally.stats;
                }
            }

            if self.options.date_from.is_some() && empty_streak >= threshold {
                info!(
                    page,
                    empty_streak,
                    "Listing reached the end of the window; stopping early"
                );
                stats.stopped_early = true;
                break;
            }
        }
        stats
    }

    async fn run_year_month(&self, accepted: &mut Accepted) -> DiscoveryStats {
        let mut stats = DiscoveryStats {
            strategies: vec![Strategy::YearMonth],
            ..DiscoveryStats::default()
        };
        let Some(template) = self.source.year_month() else {
            return stats;
        };
        let Some((from, to)) = self.options.bounds() else {
            return stats;
        };
        let mut months = months_in_range(from, to);
        if self.options.newest_first {
            months.reverse();
        }
        info!(months = months.len(), "Walking month archives");
        let max_pages = self.options.ym_max_pages.unwrap_or(template.max_pages);
        for month in months {
            stats += self.walk_period(template, month, max_pages, accepted).await;
        }
        stats
    }

    async fn run_year_month_day(&self, accepted: &mut Accepted) -> DiscoveryStats {
        let mut stats = DiscoveryStats {
            strategies: vec![Strategy::YearMonthDay],
            ..DiscoveryStats::default()
        };
        let Some(template) = self.source.year_month_day() else {
            return stats;
        };
        let Some((from, to)) = self.options.bounds() else {
            return stats;
        };
        let mut days = days_in_range(from, to);
        if self.options.newest_first {
            days.reverse();
        }
        if let Some(max_days) = self.options.max_days {
            days.truncate(max_days);
        }
        info!(days = days.len(), "Walking day archives");
        let max_pages = self.options.ymd_max_pages.unwrap_or(template.max_pages);
        for day in days {
            stats += self.walk_period(template, day, max_pages, accepted).await;
        }
        stats
    }

    /// Fetch the first page of a period, then its paginated variants until
    /// a page fails, carries no links at all, or `max_pages` is reached.
    async fn walk_period(
        &self,
        template: &PeriodTemplate,
        date: NaiveDate,
        max_pages: u32,
        accepted: &mut Accepted,
    ) -> DiscoveryStats {
        let mut stats = DiscoveryStats::default();

        if let Some(first) = &template.template {
            let url = render_template(first, Some(date), None);
            if let Some(text) = self.fetch_page(&url, &mut stats).await {
                let links = self.source.extractor().extract(&text);
                stats += self.absorb(links, accepted).stats;
            }
        }

        if let Some(paged) = &template.paged_template {
            for page in 1..=max_pages {
                let url = render_template(paged, Some(date), Some(page));
                let Some(text) = self.fetch_page(&url, &mut stats).await else {
                    break;
                };
                let links = self.source.extractor().extract(&text);
                if links.is_empty() {
                    break;
                }
                stats += self.absorb(links, accepted).stats;
            }
        }

        debug!(%date, accepted = stats.accepted, pages = stats.pages_fetched, "Period processed");
        stats
    }
}

/// Reject runs that cannot possibly work before touching the network.
fn check_options(source: &Source, options: &DiscoveryOptions) -> Result<(), ConfigError> {
    let domain = source.domain().to_string();
    if let Some((from, to)) = options.bounds() {
        if from >= to {
            return Err(ConfigError::InvalidRange { from, to });
        }
    }
    let missing = |strategy: &'static str| ConfigError::MissingTemplate {
        domain: domain.clone(),
        strategy,
    };
    let unbounded = |strategy: &'static str| ConfigError::MissingDateBounds { strategy };
    match options.mode {
        Mode::Listing => {
            source.listing().ok_or_else(|| missing("listing"))?;
        }
        Mode::YearMonth => {
            source.year_month().ok_or_else(|| missing("year_month"))?;
            options.bounds().ok_or_else(|| unbounded("year_month"))?;
        }
        Mode::YearMonthDay => {
            source
                .year_month_day()
                .ok_or_else(|| missing("year_month_day"))?;
            options.bounds().ok_or_else(|| unbounded("year_month_day"))?;
        }
        Mode::Auto => {
            if source.listing().is_none() {
                if source.year_month().is_none() && source.year_month_day().is_none() {
                    return Err(missing("listing"));
                }
                if options.bounds().is_none() {
                    return Err(unbounded("year_month"));
                }
            }
        }
        Mode::Sitemap => {}
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::canonical::Canonicalizer;
    use crate::error::FetchError;
    use crate::source::SourceRegistry;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned pages and records every requested URL.
    #[derive(Default)]
    pub(crate) struct ScriptedFetcher {
        pub pages: HashMap<String, String>,
        pub requests: Mutex<Vec<String>>,
    }

    impl ScriptedFetcher {
        pub fn with_page(mut self, url: &str, body: String) -> Self {
            self.pages.insert(url.to_string(), body);
            self
        }

        pub fn requests(&self) -> Vec<String> {
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

    const SOURCES: &str = r#"
sources:
  - domain: example.com
    base_url: https://example.com
    article_regex: 'https://example\.com/(?:[a-z]+/)?(20\d{2})/([01]\d)/([0-3]\d)/[a-z0-9\-]+'
    relative_article_regex: 'href="/((?:[a-z]+/)?(20\d{2})/([01]\d)/([0-3]\d)/[a-z0-9\-]+)"'
    listing:
      template: https://example.com/archive?page={page}
    year_month:
      template: https://example.com/{year}/{month}
      paged_template: https://example.com/{year}/{month}?page={page}
      max_pages: 3
    year_month_day:
      template: https://example.com/{year}/{month}/{day}
    sections: [belfold]
  - domain: monthly.example
    base_url: https://monthly.example
    article_regex: 'https://monthly\.example/(20\d{2})/([01]\d)/([0-3]\d)/[a-z0-9\-]+'
    year_month:
      template: https://monthly.example/{year}/{month}
"#;

    pub(crate) fn source(domain: &str) -> Source {
        SourceRegistry::from_yaml_str(SOURCES)
            .unwrap()
            .get(domain)
            .unwrap()
            .compile(Canonicalizer::default())
            .unwrap()
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    pub(crate) fn page_of(dates: &[NaiveDate], slug: &str) -> String {
        dates
            .iter()
            .map(|date| {
                format!(
                    "<a href=\"https://example.com/{}/{slug}-{}\">x</a>\n",
                    date.format("%Y/%m/%d"),
                    date.format("%d")
                )
            })
            .collect()
    }

    async fn discover(
        src: &Source,
        fetcher: &ScriptedFetcher,
        options: DiscoveryOptions,
    ) -> DiscoveryOutcome {
        Discovery::new(src, fetcher, options).unwrap().run().await
    }

    fn quiet(from: NaiveDate, to: NaiveDate) -> DiscoveryOptions {
        DiscoveryOptions {
            delay: Duration::ZERO,
            ..DiscoveryOptions::for_range(from, to)
        }
    }

    #[tokio::test]
    async fn listing_stops_within_threshold_after_window() {
        let src = source("example.com");
        let mut fetcher = ScriptedFetcher::default();
        for page in 1..=5u32 {
            let day = d(2024, 1, 1 + page);
            fetcher = fetcher.with_page(
                &format!("https://example.com/archive?page={page}"),
                page_of(&[day], "in"),
            );
        }
        for page in 6..=40u32 {
            fetcher = fetcher.with_page(
                &format!("https://example.com/archive?page={page}"),
                page_of(&[d(2023, 6, 1 + page % 28)], &format!("old{page}")),
            );
        }

        let options = DiscoveryOptions {
            mode: Mode::Listing,
            ..quiet(d(2024, 1, 1), d(2024, 2, 1))
        };
        let outcome = discover(&src, &fetcher, options).await;

        assert_eq!(outcome.links.len(), 5);
        assert!(outcome.stats.stopped_early);
        let requested = fetcher.requests();
        assert_eq!(requested.len(), 8);
        assert_eq!(
            requested.last().unwrap(),
            "https://example.com/archive?page=8"
        );
    }

    #[tokio::test]
    async fn listing_without_lower_bound_runs_to_page_cap() {
        let src = source("example.com");
        let fetcher = ScriptedFetcher::default();
        let options = DiscoveryOptions {
            mode: Mode::Listing,
            max_listing_pages: 7,
            delay: Duration::ZERO,
            ..DiscoveryOptions::default()
        };
        let outcome = discover(&src, &fetcher, options).await;
        assert_eq!(fetcher.requests().len(), 7);
        assert_eq!(outcome.stats.page_fetch_errors, 7);
        assert!(!outcome.stats.stopped_early);
    }

    #[tokio::test]
    async fn pages_newer_than_window_do_not_count_toward_streak() {
        let src = source("example.com");
        let mut fetcher = ScriptedFetcher::default();
        for page in 1..=4u32 {
            fetcher = fetcher.with_page(
                &format!("https://example.com/archive?page={page}"),
                page_of(&[d(2024, 3, page)], &format!("new{page}")),
            );
        }
        fetcher = fetcher.with_page(
            "https://example.com/archive?page=5",
            page_of(&[d(2024, 1, 10)], "in"),
        );

        let options = DiscoveryOptions {
            mode: Mode::Listing,
            ..quiet(d(2024, 1, 1), d(2024, 2, 1))
        };
        let outcome = discover(&src, &fetcher, options).await;
        assert_eq!(outcome.links.len(), 1);
        assert_eq!(outcome.links[0].date_guess, Some(d(2024, 1, 10)));
        // Page 5 plus three misses after it.
        assert_eq!(fetcher.requests().len(), 8);
    }

    #[tokio::test]
    async fn auto_falls_back_to_months_and_does_not_recount() {
        let src = source("example.com");
        let fetcher = ScriptedFetcher::default()
            .with_page(
                "https://example.com/archive?page=1",
                page_of(&[d(2024, 1, 20)], "a"),
            )
            .with_page(
                "https://example.com/2024/01",
                page_of(&[d(2024, 1, 20), d(2024, 1, 3)], "a"),
            )
            .with_page(
                "https://example.com/2024/01?page=1",
                page_of(&[d(2024, 1, 4)], "b"),
            )
            .with_page(
                "https://example.com/2023/12",
                page_of(&[d(2023, 12, 30)], "c"),
            );

        let options = quiet(d(2023, 12, 15), d(2024, 2, 1));
        let outcome = discover(&src, &fetcher, options).await;

        let urls: Vec<_> = outcome.links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/2024/01/20/a-20",
                "https://example.com/2024/01/03/a-03",
                "https://example.com/2024/01/04/b-04",
                "https://example.com/2023/12/30/c-30",
            ]
        );
        assert_eq!(outcome.stats.dup_links, 1);
        assert_eq!(
            outcome.stats.strategies,
            vec![
                Strategy::Listing,
                Strategy::YearMonth,
                Strategy::YearMonthDay,
            ]
        );
        // Newest month first.
        let requests = fetcher.requests();
        let jan = requests
            .iter()
            .position(|u| u == "https://example.com/2024/01")
            .unwrap();
        let dec = requests
            .iter()
            .position(|u| u == "https://example.com/2023/12")
            .unwrap();
        assert!(jan < dec);
    }

    #[tokio::test]
    async fn auto_skips_fallbacks_when_listing_is_productive() {
        let src = source("example.com");
        let fetcher = ScriptedFetcher::default().with_page(
            "https://example.com/archive?page=1",
            page_of(&[d(2024, 1, 20)], "a"),
        );
        let options = DiscoveryOptions {
            min_accepted: 1,
            ..quiet(d(2024, 1, 1), d(2024, 2, 1))
        };
        let outcome = discover(&src, &fetcher, options).await;
        assert_eq!(outcome.links.len(), 1);
        assert_eq!(outcome.stats.strategies, vec![Strategy::Listing]);
        assert!(fetcher.requests().iter().all(|u| u.contains("archive")));
    }

    #[tokio::test]
    async fn source_without_listing_starts_with_months() {
        let src = source("monthly.example");
        let fetcher = ScriptedFetcher::default().with_page(
            "https://monthly.example/2024/01",
            "<a href=\"https://monthly.example/2024/01/09/x\">x</a>".to_string(),
        );
        let outcome = discover(&src, &fetcher, quiet(d(2024, 1, 1), d(2024, 2, 1))).await;
        assert_eq!(outcome.links.len(), 1);
        assert_eq!(
            fetcher.requests(),
            vec!["https://monthly.example/2024/01".to_string()]
        );
    }

    #[tokio::test]
    async fn day_fallback_respects_max_days() {
        let src = source("example.com");
        let fetcher = ScriptedFetcher::default();
        let options = DiscoveryOptions {
            mode: Mode::YearMonthDay,
            max_days: Some(3),
            ..quiet(d(2024, 1, 1), d(2024, 2, 1))
        };
        discover(&src, &fetcher, options).await;
        assert_eq!(
            fetcher.requests(),
            vec![
                "https://example.com/2024/01/31".to_string(),
                "https://example.com/2024/01/30".to_string(),
                "https://example.com/2024/01/29".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn missing_dates_are_accepted_only_when_allowed() {
        let src = source("example.com");
        let page = "<a href=\"https://example.com/2024/02/30/weird\">x</a>".to_string();
        let fetcher =
            ScriptedFetcher::default().with_page("https://example.com/archive?page=1", page);

        let strict = DiscoveryOptions {
            mode: Mode::Listing,
            max_listing_pages: 1,
            ..quiet(d(2024, 1, 1), d(2024, 2, 1))
        };
        let outcome = discover(&src, &fetcher, strict.clone()).await;
        assert!(outcome.links.is_empty());
        assert_eq!(outcome.stats.range_filtered, 1);

        let lenient = DiscoveryOptions {
            allow_missing_date: true,
            ..strict
        };
        let outcome = discover(&src, &fetcher, lenient).await;
        assert_eq!(outcome.links.len(), 1);
        assert_eq!(outcome.links[0].date_guess, None);
    }

    #[tokio::test]
    async fn section_restriction_filters_links() {
        let src = source("example.com");
        let page = [
            "<a href=\"/belfold/2024/01/05/in\">a</a>",
            "<a href=\"/sport/2024/01/05/out\">b</a>",
        ]
        .concat();
        let fetcher =
            ScriptedFetcher::default().with_page("https://example.com/archive?page=1", page);
        let options = DiscoveryOptions {
            mode: Mode::Listing,
            max_listing_pages: 1,
            restrict_sections: true,
            ..quiet(d(2024, 1, 1), d(2024, 2, 1))
        };
        let outcome = discover(&src, &fetcher, options).await;
        assert_eq!(outcome.links.len(), 1);
        assert_eq!(
            outcome.links[0].url,
            "https://example.com/belfold/2024/01/05/in"
        );
        assert_eq!(outcome.stats.section_filtered, 1);
    }

    #[test]
    fn config_errors_are_raised_before_running() {
        let monthly = source("monthly.example");
        let fetcher = ScriptedFetcher::default();

        let listing_only = DiscoveryOptions {
            mode: Mode::Listing,
            ..DiscoveryOptions::default()
        };
        match Discovery::new(&monthly, &fetcher, listing_only) {
            Err(ConfigError::MissingTemplate { strategy, .. }) => assert_eq!(strategy, "listing"),
            other => panic!("unexpected outcome: {:?}", other.err()),
        }

        let unbounded = DiscoveryOptions::default();
        assert!(matches!(
            Discovery::new(&monthly, &fetcher, unbounded),
            Err(ConfigError::MissingDateBounds { .. })
        ));

        let inverted = DiscoveryOptions::for_range(d(2024, 2, 1), d(2024, 1, 1));
        assert!(matches!(
            Discovery::new(&monthly, &fetcher, inverted),
            Err(ConfigError::InvalidRange { .. })
        ));
        assert!(fetcher.requests().is_empty());
    }

    #[test]
    fn within_range_is_half_open() {
        let from = Some(d(2024, 1, 1));
        let to = Some(d(2024, 2, 1));
        assert!(within_range(Some(d(2024, 1, 1)), from, to, false));
        assert!(!within_range(Some(d(2024, 2, 1)), from, to, false));
        assert!(!within_range(Some(d(2023, 12, 31)), from, to, false));
        assert!(within_range(None, from, to, true));
        assert!(!within_range(None, from, to, false));
        assert!(within_range(Some(d(1999, 1, 1)), None, None, false));
    }
}
