//! Article content reader.
//!
//! Content-fill only needs something that turns a URL into a title and a
//! body; that is the [`ContentSource`] trait. [`ArticleReader`] is the
//! default implementation: it fetches the page through a [`Fetcher`] and
//! pulls text out of it with `scraper`.
//!
//! # Extraction
//!
//! - **Title**: `og:title`, then `<title>`, then the first `<h1>`.
//! - **Body**: the first container matching the source's configured
//!   selectors, then `article`, `.content`, `.post-content`, `body`. Inside
//!   the container the text of `p` and `li` elements is collected; a
//!   container with neither contributes its whole text.

use std::collections::HashMap;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument, warn};

use crate::canonical::host_of;
use crate::error::FetchError;
use crate::fetch::Fetcher;
use crate::models::ArticleContent;
use crate::source::{SourceRegistry, normalize_domain};

const FALLBACK_SELECTORS: [&str; 4] = ["article", ".content", ".post-content", "body"];

/// Turns an article URL into its title and body.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn read(&self, url: &str) -> Result<ArticleContent, FetchError>;
}

#[async_trait]
impl<T: ContentSource + ?Sized> ContentSource for &T {
    async fn read(&self, url: &str) -> Result<ArticleContent, FetchError> {
        (**self).read(url).await
    }
}

/// Fetch-and-scrape [`ContentSource`].
pub struct ArticleReader<F> {
    fetcher: F,
    /// Body selectors per normalized domain, configured ones first.
    selectors: HashMap<String, Vec<Selector>>,
    fallback: Vec<Selector>,
}

fn compile_selectors<'a>(raw: impl IntoIterator<Item = &'a str>) -> Vec<Selector> {
    raw.into_iter()
        .filter_map(|s| match Selector::parse(s) {
            Ok(sel) => Some(sel),
            Err(e) => {
                warn!(selector = %s, error = %e, "Ignoring invalid content selector");
                None
            }
        })
        .collect()
}

impl<F: Fetcher> ArticleReader<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            selectors: HashMap::new(),
            fallback: compile_selectors(FALLBACK_SELECTORS),
        }
    }

    /// Use each source's `content_selectors` for pages on its domain.
    pub fn with_registry(mut self, registry: &SourceRegistry) -> Self {
        for cfg in registry.iter() {
            let compiled = compile_selectors(cfg.content_selectors.iter().map(String::as_str));
            if !compiled.is_empty() {
                self.selectors.insert(cfg.domain.clone(), compiled);
            }
        }
        self
    }

    fn selectors_for(&self, url: &str) -> impl Iterator<Item = &Selector> {
        let configured = host_of(url)
            .map(|h| normalize_domain(&h))
            .and_then(|h| self.selectors.get(&h))
            .into_iter()
            .flatten();
        configured.chain(self.fallback.iter())
    }

    /// Parse an already-fetched page.
    pub fn parse(&self, url: &str, html: &str) -> Option<ArticleContent> {
        let document = Html::parse_document(html);
        let title = extract_title(&document).unwrap_or_default();
        let body = self
            .selectors_for(url)
            .find_map(|sel| selected_text(&document, sel))?;
        Some(ArticleContent { title, body })
    }
}

#[async_trait]
impl<F: Fetcher> ContentSource for ArticleReader<F> {
    #[instrument(level = "debug", skip(self))]
    async fn read(&self, url: &str) -> Result<ArticleContent, FetchError> {
        let html = self.fetcher.fetch(url).await?;
        let content = self.parse(url, &html).ok_or(FetchError::EmptyContent)?;
        debug!(%url, title = %content.title, bytes = content.body.len(), "Parsed article");
        Ok(content)
    }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn clean(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_title(document: &Html) -> Option<String> {
    let og = selector(r#"meta[property="og:title"]"#).and_then(|sel| {
        document
            .select(&sel)
            .filter_map(|m| m.value().attr("content"))
            .map(clean)
            .find(|t| !t.is_empty())
    });
    og.or_else(|| first_text(document, "title"))
        .or_else(|| first_text(document, "h1"))
}

fn first_text(document: &Html, css: &str) -> Option<String> {
    let sel = selector(css)?;
    document
        .select(&sel)
        .map(|el| clean(&el.text().collect::<String>()))
        .find(|t| !t.is_empty())
}

fn selected_text(document: &Html, sel: &Selector) -> Option<String> {
    document
        .select(sel)
        .map(container_text)
        .find(|t| !t.is_empty())
}

/// Paragraph and list-item text of a container, one block per line.
fn container_text(container: ElementRef<'_>) -> String {
    let blocks: Vec<String> = selector("p, li")
        .map(|sel| {
            container
                .select(&sel)
                .map(|el| clean(&el.text().collect::<Vec<_>>().join(" ")))
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default();
    if blocks.is_empty() {
        clean(&container.text().collect::<Vec<_>>().join(" "))
    } else {
        blocks.join("\n")
    }
}
