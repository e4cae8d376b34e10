//! Sitemap discovery.
//!
//! Roots come from the source's `sitemap` setting, else from `Sitemap:` lines
//! in `robots.txt`, else `{base_url}/sitemap.xml`. Index documents are
//! followed breadth-first up to `max_sitemaps` documents; child sitemaps whose
//! `lastmod` predates the window are skipped.

use std::collections::{HashSet, VecDeque};

use chrono::NaiveDate;
use quick_xml::Reader;
use quick_xml::events::Event;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{Accepted, Discovery, DiscoveryStats, Strategy};
use crate::fetch::Fetcher;
use crate::models::DiscoveredLink;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed sitemap: {0}")]
pub struct SitemapError(String);

fn malformed(e: impl std::fmt::Display) -> SitemapError {
    SitemapError(e.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// `<sitemap>` inside a `<sitemapindex>`.
    Sitemap,
    /// `<url>` inside a `<urlset>`.
    Page,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapEntry {
    pub kind: EntryKind,
    pub loc: String,
    pub lastmod: Option<NaiveDate>,
}

#[derive(Clone, Copy)]
enum Field {
    Loc,
    Lastmod,
}

/// Parse a sitemap index or url set into its entries, in document order.
pub fn parse_sitemap(xml: &str) -> Result<Vec<SitemapEntry>, SitemapError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut kind: Option<EntryKind> = None;
    let mut loc: Option<String> = None;
    let mut lastmod: Option<NaiveDate> = None;
    let mut field: Option<Field> = None;
    let mut text = String::new();

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"sitemap" => kind = Some(EntryKind::Sitemap),
                b"url" => kind = Some(EntryKind::Page),
                b"loc" => {
                    field = Some(Field::Loc);
                    text.clear();
                }
                b"lastmod" => {
                    field = Some(Field::Lastmod);
                    text.clear();
                }
                _ => {}
            },
            Event::Text(t) if field.is_some() => text.push_str(&t.decode().map_err(malformed)?),
            Event::CData(c) if field.is_some() => text.push_str(&String::from_utf8_lossy(&c)),
            Event::GeneralRef(r) if field.is_some() => {
                let name = r.decode().map_err(malformed)?;
                let resolved = resolve_entity(&name)
                    .ok_or_else(|| malformed(format!("unknown entity &{name};")))?;
                text.push_str(&resolved);
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"loc" | b"lastmod" => match field.take() {
                    Some(Field::Loc) => loc = Some(text.trim().to_string()),
                    Some(Field::Lastmod) => lastmod = parse_lastmod(&text),
                    None => {}
                },
                b"sitemap" | b"url" => {
                    if let (Some(kind), Some(loc)) = (kind.take(), loc.take()) {
                        if !loc.is_empty() {
                            entries.push(SitemapEntry { kind, loc, lastmod });
                        }
                    }
                    lastmod = None;
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(entries)
}

/// The five predefined XML entities plus numeric character references.
fn resolve_entity(name: &str) -> Option<String> {
    let ch = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse().ok()?,
            };
            char::from_u32(code)?
        }
    };
    Some(ch.to_string())
}

/// `2024-01-05`, `2024-01-05T10:00:00+01:00` and similar; only the date part
/// is kept.
fn parse_lastmod(text: &str) -> Option<NaiveDate> {
    let t = text.trim();
    NaiveDate::parse_from_str(t.get(..10)?, "%Y-%m-%d").ok()
}

/// `Sitemap:` lines of a robots.txt, case-insensitive.
pub fn robots_sitemaps(robots: &str) -> Vec<String> {
    robots
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case("sitemap")
                .then(|| value.trim().to_string())
        })
        .filter(|v| !v.is_empty())
        .collect()
}

impl<F: Fetcher> Discovery<'_, F> {
    async fn sitemap_roots(&self, stats: &mut DiscoveryStats) -> Vec<String> {
        if let Some(configured) = &self.source.config().sitemap {
            return vec![configured.clone()];
        }
        let base = self.source.config().base_url.trim_end_matches('/');
        let robots_url = format!("{base}/robots.txt");
        let from_robots = match self.fetch_page(&robots_url, stats).await {
            Some(text) => robots_sitemaps(&text),
            None => Vec::new(),
        };
        if from_robots.is_empty() {
            vec![format!("{base}/sitemap.xml")]
        } else {
            from_robots
        }
    }

    pub(super) async fn run_sitemap(&self, accepted: &mut Accepted) -> DiscoveryStats {
        let mut stats = DiscoveryStats {
            strategies: vec![Strategy::Sitemap],
            ..DiscoveryStats::default()
        };
        let mut queue: VecDeque<String> = self.sitemap_roots(&mut stats).await.into();
        let mut visited = HashSet::new();
        let mut documents = 0usize;
        info!(roots = queue.len(), "Walking sitemaps");

        while let Some(url) = queue.pop_front() {
            if !visited.insert(url.clone()) {
                continue;
            }
            if documents >= self.options.max_sitemaps {
                info!(documents, "Sitemap document cap reached");
                stats.stopped_early = true;
                break;
            }
            documents += 1;

            let Some(xml) = self.fetch_page(&url, &mut stats).await else {
                continue;
            };
            let entries = match parse_sitemap(&xml) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(%url, error = %e, "Skipping unreadable sitemap");
                    stats.page_fetch_errors += 1;
                    continue;
                }
            };

            let mut links = Vec::new();
            for entry in entries {
                match entry.kind {
                    EntryKind::Sitemap => {
                        let stale = matches!(
                            (entry.lastmod, self.options.date_from),
                            (Some(modified), Some(from)) if modified < from
                        );
                        if stale {
                            debug!(loc = %entry.loc, "Skipping sitemap older than the window");
                        } else {
                            queue.push_back(entry.loc);
                        }
                    }
                    EntryKind::Page => links.extend(self.page_link(&entry)),
                }
            }
            let tally = self.absorb(links, accepted);
            debug!(%url, new = tally.stats.accepted, "Sitemap processed");
            stats += tally.stats;
        }
        stats
    }

    /// An article link for a url-set entry, if its location is an article.
    /// The date in the URL wins over `lastmod`.
    fn page_link(&self, entry: &SitemapEntry) -> Option<DiscoveredLink> {
        let found = self
            .source
            .extractor()
            .extract(&entry.loc)
            .into_iter()
            .next()?;
        let date_guess = found.date_guess.or(entry.lastmod);
        Some(DiscoveredLink::new(found.url, date_guess))
    }
}
