//! Article link extraction from raw page text.
//!
//! Each source supplies an absolute-link regex whose capture groups 1-3 are
//! year, month and day, and optionally a relative-link regex that matches an
//! `href` attribute: group 1 is the relative path, groups 2-4 the date.

use chrono::NaiveDate;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::{Captures, Regex, RegexBuilder};
use url::Url;

use crate::canonical::Canonicalizer;
use crate::error::ConfigError;
use crate::models::DiscoveredLink;

static HREF_VALUE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r#"href\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .case_insensitive(true)
        .build()
        .expect("valid href regex")
});

/// Compiled link patterns for one source.
#[derive(Debug, Clone)]
pub struct LinkExtractor {
    absolute: Regex,
    relative: Option<Regex>,
    base: Url,
    canonicalizer: Canonicalizer,
}

impl LinkExtractor {
    pub fn new(
        domain: &str,
        article_regex: &str,
        relative_regex: Option<&str>,
        base_url: &str,
        canonicalizer: Canonicalizer,
    ) -> Result<Self, ConfigError> {
        let compile = |pattern: &str| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| ConfigError::Regex {
                    domain: domain.to_string(),
                    source,
                })
        };

        // Relative paths resolve against the base as a directory.
        let base_dir = format!("{}/", base_url.trim_end_matches('/'));
        let base = Url::parse(&base_dir).map_err(|source| ConfigError::BaseUrl {
            url: base_url.to_string(),
            source,
        })?;

        Ok(Self {
            absolute: compile(article_regex)?,
            relative: relative_regex.map(compile).transpose()?,
            base,
            canonicalizer,
        })
    }

    /// Extract article links from `page`, absolute matches first, then
    /// relative ones. Duplicates within the page collapse to their first
    /// occurrence.
    pub fn extract(&self, page: &str) -> Vec<DiscoveredLink> {
        let absolute = self.absolute.captures_iter(page).map(|caps| {
            let url = self.canonicalizer.canonicalize(&caps[0]);
            DiscoveredLink::new(url, date_from_groups(&caps, 1))
        });

        let relative = self
            .relative
            .iter()
            .flat_map(|re| re.captures_iter(page))
            .filter_map(|caps| {
                let path = match caps.get(1) {
                    Some(m) if caps.len() > 4 => m.as_str().to_string(),
                    _ => href_value(&caps[0])?,
                };
                let resolved = self.base.join(path.trim()).ok()?;
                let url = self.canonicalizer.canonicalize(resolved.as_str());
                let first_date_group = if caps.len() > 4 { 2 } else { 1 };
                let date_guess = date_from_groups(&caps, first_date_group);
                Some(DiscoveredLink::new(url, date_guess))
            });

        absolute
            .chain(relative)
            .unique_by(|link| link.url.clone())
            .collect()
    }
}

/// Pull the quoted value out of an `href=...` match.
fn href_value(attr: &str) -> Option<String> {
    let caps = HREF_VALUE.captures(attr)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().trim().to_string())
}

/// Read year/month/day from three consecutive groups starting at `first`.
/// Anything missing, non-numeric or not a calendar date yields `None`.
fn date_from_groups(caps: &Captures<'_>, first: usize) -> Option<NaiveDate> {
    let num = |i: usize| caps.get(i)?.as_str().parse::<u32>().ok();
    let year = i32::try_from(num(first)?).ok()?;
    NaiveDate::from_ymd_opt(year, num(first + 1)?, num(first + 2)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ABS: &str =
        r#"https?://example\.com/(?:[a-z0-9\-]+/)?(20\d{2})/([01]\d)/([0-3]\d)/[^"'<>\s]+"#;
    const REL: &str = r#"href=["']/((?:[a-z0-9\-]+/)?(20\d{2})/([01]\d)/([0-3]\d)/[^"'<>]+)["']"#;

    fn extractor() -> LinkExtractor {
        LinkExtractor::new(
            "example.com",
            ABS,
            Some(REL),
            "https://example.com",
            Canonicalizer::default(),
        )
        .unwrap()
    }

    fn link(path: &str, date_guess: Option<NaiveDate>) -> DiscoveredLink {
        DiscoveredLink::new(format!("https://example.com{path}"), date_guess)
    }

    fn d(y: i32, m: u32, day: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, day)
    }

    #[test]
    fn extracts_absolute_and_relative_links_in_order() {
        let page = r#"
            <a href="https://example.com/belfold/2024/01/05/elso">1</a>
            <a href="/kulfold/2024/01/04/masodik/">2</a>
            <a href="http://EXAMPLE.com/2024/01/03/harmadik">3</a>
        "#;
        let links = extractor().extract(page);
        assert_eq!(
            links,
            vec![
                link("/belfold/2024/01/05/elso", d(2024, 1, 5)),
                link("/2024/01/03/harmadik", d(2024, 1, 3)),
                link("/kulfold/2024/01/04/masodik", d(2024, 1, 4)),
            ]
        );
    }

    #[test]
    fn duplicates_within_a_page_collapse() {
        let page = r#"
            <a href="https://example.com/2024/01/05/a">x</a>
            <a href="/2024/01/05/a/">y</a>
            <a href="https://example.com/2024/01/05/a/">z</a>
        "#;
        let links = extractor().extract(page);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://example.com/2024/01/05/a");
    }

    #[test]
    fn invalid_calendar_date_degrades_to_none() {
        let page = r#"<a href="https://example.com/2024/02/31/nope">x</a>"#;
        let links = extractor().extract(page);
        assert_eq!(links, vec![link("/2024/02/31/nope", None)]);
    }

    #[test]
    fn pattern_without_date_groups_yields_undated_links() {
        let ex = LinkExtractor::new(
            "example.com",
            r#"https://example\.com/cikk/[a-z\-]+"#,
            None,
            "https://example.com",
            Canonicalizer::default(),
        )
        .unwrap();
        let links = ex.extract(r#"<a href="https://example.com/cikk/valami-hir">x</a>"#);
        assert_eq!(links, vec![link("/cikk/valami-hir", None)]);
    }

    #[test]
    fn relative_regex_without_path_group_uses_href_value() {
        let ex = LinkExtractor::new(
            "example.com",
            r#"https://example\.com/(20\d{2})/([01]\d)/([0-3]\d)/[a-z]+"#,
            Some(r#"href='/(20\d{2})/([01]\d)/([0-3]\d)/[a-z]+'"#),
            "https://example.com/",
            Canonicalizer::default(),
        )
        .unwrap();
        let links = ex.extract("<a href='/2023/12/31/szilveszter'>x</a>");
        assert_eq!(
            links,
            vec![link("/2023/12/31/szilveszter", d(2023, 12, 31))]
        );
    }

    #[test]
    fn compact_date_patterns_are_supported() {
        let ex = LinkExtractor::new(
            "hvg.hu",
            r#"https?://hvg\.hu/(?:[a-z0-9\-]+/)+(20\d{2})([01]\d)([0-3]\d)_[^"'<>\s]+"#,
            None,
            "https://hvg.hu",
            Canonicalizer::default(),
        )
        .unwrap();
        let links = ex.extract(r#"<a href="https://hvg.hu/itthon/20240105_cim">x</a>"#);
        assert_eq!(links[0].date_guess, d(2024, 1, 5));
    }

    #[test]
    fn bad_regex_is_a_config_error() {
        let err = LinkExtractor::new(
            "example.com",
            "(unclosed",
            None,
            "https://example.com",
            Canonicalizer::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Regex { .. }));
    }
}
