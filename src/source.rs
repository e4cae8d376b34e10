//! Source configuration.
//!
//! A news site is a configuration value, not a type: the same discovery
//! code drives every site from its templates and link patterns. Sources are
//! read from YAML (a built-in registry ships with the binary) and compiled
//! into a [`Source`] once, before a crawl starts, so templates cannot change
//! mid-run.
//!
//! ```yaml
//! sources:
//!   - domain: 444.hu
//!     base_url: https://444.hu
//!     article_regex: 'https?://444\.hu/(20\d{2})/([01]\d)/([0-3]\d)/[^"''<>%\s]+'
//!     listing:
//!       template: https://444.hu/archivum?page={page}
//!     year_month:
//!       template: https://444.hu/{year}/{month}
//!       paged_template: https://444.hu/{year}/{month}?page={page}
//!       max_pages: 8
//! ```

use std::collections::HashSet;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::canonical::Canonicalizer;
use crate::error::ConfigError;
use crate::extract::LinkExtractor;

const BUILTIN_SOURCES: &str = include_str!("../sources.yaml");

fn default_period_pages() -> u32 {
    8
}

/// Listing (newest-first pagination) template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingTemplate {
    /// Page URL with a `{page}` placeholder, pages counted from 1.
    pub template: String,
}

/// Month or day archive templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodTemplate {
    /// First page of the period.
    #[serde(default)]
    pub template: Option<String>,
    /// Paginated variant with an additional `{page}` placeholder.
    #[serde(default)]
    pub paged_template: Option<String>,
    /// Upper bound on paginated pages fetched per period.
    #[serde(default = "default_period_pages")]
    pub max_pages: u32,
}

/// One site as written in the sources file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub domain: String,
    #[serde(default)]
    pub name: Option<String>,
    pub base_url: String,
    /// Capture groups 1-3 are year, month and day.
    pub article_regex: String,
    /// Matches an `href` attribute; group 1 is the path, groups 2-4 the date.
    #[serde(default)]
    pub relative_article_regex: Option<String>,
    #[serde(default)]
    pub listing: Option<ListingTemplate>,
    #[serde(default)]
    pub year_month: Option<PeriodTemplate>,
    #[serde(default)]
    pub year_month_day: Option<PeriodTemplate>,
    /// Sitemap or sitemap index URL; `robots.txt` is consulted when absent.
    #[serde(default)]
    pub sitemap: Option<String>,
    /// First path segments considered in scope when sections are restricted.
    #[serde(default)]
    pub sections: Vec<String>,
    /// CSS selectors tried in order when extracting an article body.
    #[serde(default)]
    pub content_selectors: Vec<String>,
    /// Overrides the canonicalizer's `https` forcing for this site.
    #[serde(default)]
    pub force_https: Option<bool>,
}

impl SourceConfig {
    /// Check templates for their placeholders. Regexes are checked when the
    /// source is compiled.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(listing) = &self.listing {
            require_placeholders(&listing.template, &["page"])?;
        }
        if let Some(ym) = &self.year_month {
            validate_period(ym, &["year", "month"])?;
        }
        if let Some(ymd) = &self.year_month_day {
            validate_period(ymd, &["year", "month", "day"])?;
        }
        Ok(())
    }

    /// Freeze this configuration into a runnable [`Source`]. A per-source
    /// `force_https` wins over the caller's canonicalizer.
    pub fn compile(&self, canonicalizer: Canonicalizer) -> Result<Source, ConfigError> {
        self.validate()?;
        let canonicalizer = self.force_https.map_or(canonicalizer, Canonicalizer::new);
        let extractor = LinkExtractor::new(
            &self.domain,
            &self.article_regex,
            self.relative_article_regex.as_deref(),
            &self.base_url,
            canonicalizer,
        )?;
        Ok(Source {
            config: self.clone(),
            extractor,
            canonicalizer,
        })
    }
}

fn validate_period(
    period: &PeriodTemplate,
    placeholders: &[&'static str],
) -> Result<(), ConfigError> {
    if let Some(t) = &period.template {
        require_placeholders(t, placeholders)?;
    }
    if let Some(t) = &period.paged_template {
        require_placeholders(t, placeholders)?;
        require_placeholders(t, &["page"])?;
    }
    Ok(())
}

fn require_placeholders(template: &str, names: &[&'static str]) -> Result<(), ConfigError> {
    for name in names {
        if !template.contains(&format!("{{{name}}}")) {
            return Err(ConfigError::MissingPlaceholder {
                template: template.to_string(),
                placeholder: name,
            });
        }
    }
    Ok(())
}

/// Fill `{year}`, `{month}`, `{day}` and `{page}`. Month and day are
/// zero-padded to two digits.
pub fn render_template(template: &str, date: Option<NaiveDate>, page: Option<u32>) -> String {
    use chrono::Datelike;

    let mut out = template.to_string();
    if let Some(date) = date {
        out = out
            .replace("{year}", &format!("{:04}", date.year()))
            .replace("{month}", &format!("{:02}", date.month()))
            .replace("{day}", &format!("{:02}", date.day()));
    }
    if let Some(page) = page {
        out = out.replace("{page}", &page.to_string());
    }
    out
}

/// A compiled, immutable source ready for discovery.
#[derive(Debug, Clone)]
pub struct Source {
    config: SourceConfig,
    extractor: LinkExtractor,
    canonicalizer: Canonicalizer,
}

impl Source {
    /// Normalized domain, the registry key.
    pub fn domain(&self) -> &str {
        &self.config.domain
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn extractor(&self) -> &LinkExtractor {
        &self.extractor
    }

    pub fn canonicalizer(&self) -> Canonicalizer {
        self.canonicalizer
    }

    pub fn listing(&self) -> Option<&ListingTemplate> {
        self.config.listing.as_ref()
    }

    /// Month template, only if it can actually produce a URL.
    pub fn year_month(&self) -> Option<&PeriodTemplate> {
        usable(self.config.year_month.as_ref())
    }

    pub fn year_month_day(&self) -> Option<&PeriodTemplate> {
        usable(self.config.year_month_day.as_ref())
    }

    /// `true` if `url`'s first path segment is in the source's section list,
    /// or if the source defines no list at all.
    pub fn section_allowed(&self, url: &str) -> bool {
        if self.config.sections.is_empty() {
            return true;
        }
        let Ok(parsed) = url::Url::parse(url) else {
            return true;
        };
        let first = parsed
            .path_segments()
            .and_then(|mut segs| segs.next())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if first.is_empty() {
            return true;
        }
        self.config
            .sections
            .iter()
            .any(|s| s.eq_ignore_ascii_case(&first))
    }
}

fn usable(period: Option<&PeriodTemplate>) -> Option<&PeriodTemplate> {
    period.filter(|p| p.template.is_some() || p.paged_template.is_some())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SourcesFile {
    #[serde(default)]
    sources: Vec<SourceConfig>,
}

/// All configured sources, keyed by domain.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    sources: Vec<SourceConfig>,
}

impl SourceRegistry {
    /// The sources shipped with the binary.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_yaml_str(BUILTIN_SOURCES)
    }

    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let registry = Self::from_yaml_str(&text)?;
        info!(count = registry.sources.len(), "Loaded sources file");
        Ok(registry)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let file: SourcesFile = serde_yaml::from_str(text)?;
        let mut seen = HashSet::new();
        let mut sources = Vec::with_capacity(file.sources.len());
        for mut source in file.sources {
            source.domain = normalize_domain(&source.domain);
            if !seen.insert(source.domain.clone()) {
                return Err(ConfigError::DuplicateDomain(source.domain));
            }
            source.validate()?;
            debug!(domain = %source.domain, "Registered source");
            sources.push(source);
        }
        Ok(Self { sources })
    }

    pub fn get(&self, domain: &str) -> Result<&SourceConfig, ConfigError> {
        let wanted = normalize_domain(domain);
        self.sources
            .iter()
            .find(|s| s.domain == wanted)
            .ok_or(ConfigError::UnknownSource(wanted))
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Lower-case and drop a leading `www.`.
pub fn normalize_domain(domain: &str) -> String {
    let d = domain.trim().to_ascii_lowercase();
    d.strip_prefix("www.").map(str::to_string).unwrap_or(d)
}
