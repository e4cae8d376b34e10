//! SQLite-backed article store.
//!
//! One row per article, keyed by `id = sha256(canonical_url)`. Every write
//! goes through [`ArticleStore::upsert`], a single `INSERT .. ON CONFLICT`
//! statement, so a crash can never leave a half-merged row behind.
//!
//! # Merge rule
//!
//! For `title`, `body`, `published` and `tags`, an incoming empty value
//! never overwrites a stored one and an incoming non-empty value always
//! replaces it. Upserting a URL-only record and later the same URL with a
//! body converges on the record with the body, whatever the order.
//!
//! The store assumes a single writer. Connections are opened per operation
//! with WAL journaling, so readers may run alongside.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info, instrument, warn};

use crate::canonical::{Canonicalizer, host_of};
use crate::error::{FetchError, StoreError};
use crate::models::{Article, DiscoveredLink, FindQuery, SearchHit, article_id};
use crate::reader::ContentSource;
use crate::source::normalize_domain;
use crate::utils::{ascii_slug, snippet};

const SNIPPET_CHARS: usize = 400;
const DEFAULT_FIND_LIMIT: usize = 200;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS articles (
    id TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    url TEXT NOT NULL UNIQUE,
    title TEXT,
    body TEXT,
    published TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_articles_source_published ON articles(source, published);
"#;

const UPSERT: &str = r#"
INSERT INTO articles (id, source, url, title, body, published, tags, created_at, updated_at)
VALUES (?1, ?2, ?3, NULLIF(TRIM(?4), ''), NULLIF(TRIM(?5), ''), ?6, ?7, ?8, ?9)
ON CONFLICT(id) DO UPDATE SET
    title = COALESCE(NULLIF(TRIM(excluded.title), ''), articles.title),
    body = COALESCE(NULLIF(TRIM(excluded.body), ''), articles.body),
    published = COALESCE(excluded.published, articles.published),
    tags = CASE WHEN excluded.tags = '[]' THEN articles.tags ELSE excluded.tags END,
    updated_at = excluded.updated_at
"#;

const COLUMNS: &str = "id, source, url, title, body, published, tags, created_at, updated_at";
const COUNT_ALL: &str = "SELECT COUNT(*) FROM articles";
const COUNT_DOMAIN: &str = "SELECT COUNT(*) FROM articles WHERE source = ?1";

/// Result of [`ArticleStore::content_fill`].
#[derive(Debug, Clone, PartialEq)]
pub enum FillOutcome {
    /// The record already had a body; nothing was fetched.
    AlreadyFilled(Article),
    /// The body was fetched and merged in.
    Filled(Article),
    /// The content collaborator reported the page unavailable.
    Failed(FetchError),
}

/// Handle to one SQLite article database.
#[derive(Debug, Clone)]
pub struct ArticleStore {
    path: PathBuf,
    canonicalizer: Canonicalizer,
}

impl ArticleStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    #[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self {
            path,
            canonicalizer: Canonicalizer::default(),
        };
        let conn = store.connect()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch(SCHEMA)?;
        debug!("Article store ready");
        Ok(store)
    }

    pub fn with_canonicalizer(mut self, canonicalizer: Canonicalizer) -> Self {
        self.canonicalizer = canonicalizer;
        self
    }

    /// Database file backing this store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA synchronous = NORMAL; PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    /// Insert or merge `article` and return the stored record.
    ///
    /// The URL is canonicalized and the id recomputed from it; the id
    /// carried by `article` is ignored. On conflict each field keeps its
    /// stored value unless the incoming one is non-empty.
    ///
    /// # Arguments
    ///
    /// * `article` - The record to write; `None` or empty fields never
    ///   overwrite populated ones
    ///
    /// # Returns
    ///
    /// The record as stored after the merge.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidUrl`] for an empty URL, or any SQLite failure.
    /// The write runs in one transaction, so a failure leaves no partial
    /// record behind.
    pub fn upsert(&self, article: &Article) -> Result<Article, StoreError> {
        let url = self.canonicalizer.canonicalize(&article.url);
        if url.is_empty() {
            return Err(StoreError::InvalidUrl(article.url.clone()));
        }
        let id = article_id(&url);
        let tags = serde_json::to_string(&article.tags)?;
        let now = Utc::now().to_rfc3339();

        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(
            UPSERT,
            params![
                id,
                article.source.to_ascii_lowercase(),
                url,
                article.title,
                article.body,
                article.published.map(|d| d.format("%Y-%m-%d").to_string()),
                tags,
                article.created_at.to_rfc3339(),
                now,
            ],
        )?;
        let sql = format!("SELECT {COLUMNS} FROM articles WHERE id = ?1");
        let stored = tx.query_row(&sql, params![id], row_to_raw)?.into_article()?;
        tx.commit()?;
        Ok(stored)
    }

    /// Upsert a meta-only record for a discovered link.
    pub fn upsert_link(&self, source: &str, link: &DiscoveredLink) -> Result<Article, StoreError> {
        self.upsert(&Article::discovered(source, &link.url, link.date_guess))
    }

    /// Exact lookup after canonicalization.
    pub fn get_by_url(&self, url: &str) -> Result<Option<Article>, StoreError> {
        let id = article_id(&self.canonicalizer.canonicalize(url));
        let conn = self.connect()?;
        let sql = format!("SELECT {COLUMNS} FROM articles WHERE id = ?1");
        let raw = conn.query_row(&sql, params![id], row_to_raw).optional()?;
        raw.map(RawArticle::into_article).transpose()
    }

    /// Fill the body of `url` from `reader` unless it already has one.
    ///
    /// # Arguments
    ///
    /// * `url` - Article URL, canonicalized before lookup
    /// * `reader` - Content collaborator used when the body is missing
    ///
    /// # Returns
    ///
    /// [`FillOutcome::AlreadyFilled`] without calling `reader` when a body
    /// is stored, [`FillOutcome::Filled`] after a successful merge, or
    /// [`FillOutcome::Failed`] when the content was unavailable.
    ///
    /// # Errors
    ///
    /// Only database problems are returned as `Err`.
    #[instrument(level = "debug", skip(self, reader))]
    pub async fn content_fill<C>(&self, url: &str, reader: &C) -> Result<FillOutcome, StoreError>
    where
        C: ContentSource + ?Sized,
    {
        let existing = self.get_by_url(url)?;
        if let Some(article) = existing.as_ref().filter(|a| !a.needs_body()) {
            return Ok(FillOutcome::AlreadyFilled(article.clone()));
        }

        let content = match reader.read(url).await {
            Ok(content) => content,
            Err(e) => {
                warn!(%url, error = %e, "Content fill failed");
                return Ok(FillOutcome::Failed(e));
            }
        };

        let base = existing.unwrap_or_else(|| {
            let source = host_of(url)
                .map(|h| normalize_domain(&h))
                .unwrap_or_default();
            Article::discovered(&source, url, None)
        });
        let title = Some(content.title).filter(|t| !t.trim().is_empty());
        let stored = self.upsert(&base.with_content(title, Some(content.body)))?;
        debug!(%url, bytes = stored.body.as_deref().map_or(0, str::len), "Content filled");
        Ok(FillOutcome::Filled(stored))
    }

    /// URLs of `domain` published in `[from, to)` that still lack a body,
    /// oldest first.
    pub fn urls_missing_body(
        &self,
        domain: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<String>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT url FROM articles
            WHERE source = ?1 AND published >= ?2 AND published < ?3
              AND (body IS NULL OR TRIM(body) = '')
            ORDER BY published, url
            "#,
        )?;
        let urls = stmt
            .query_map(params![domain, ymd(from), ymd(to)], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(urls)
    }

    /// Every record of `domain` published in `[from, to)`.
    pub fn articles_in_window(
        &self,
        domain: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Article>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM articles
             WHERE source = ?1 AND published >= ?2 AND published < ?3
             ORDER BY published, url"
        ))?;
        let raws = stmt
            .query_map(params![domain, ymd(from), ymd(to)], row_to_raw)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawArticle::into_article).collect()
    }

    /// Number of records stored for `domain`.
    pub fn count_domain(&self, domain: &str) -> Result<usize, StoreError> {
        let conn = self.connect()?;
        let n: i64 = conn.query_row(COUNT_DOMAIN, params![domain], |r| r.get(0))?;
        Ok(usize::try_from(n).unwrap_or_default())
    }

    /// Number of records in the store.
    pub fn count(&self) -> Result<usize, StoreError> {
        let conn = self.connect()?;
        let n: i64 = conn.query_row(COUNT_ALL, [], |r| r.get(0))?;
        Ok(usize::try_from(n).unwrap_or_default())
    }

    /// SQLite's own structural check plus id/url consistency of every row.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display()))]
    pub fn integrity_check(&self) -> Result<bool, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("PRAGMA integrity_check")?;
        let verdict = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        if verdict != ["ok"] {
            warn!(problems = ?verdict, "SQLite integrity check failed");
            return Ok(false);
        }

        let mut stmt = conn.prepare("SELECT id, url FROM articles")?;
        let mut rows = stmt.query([])?;
        let mut mismatched = 0usize;
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let url: String = row.get(1)?;
            if article_id(&url) != id {
                mismatched += 1;
            }
        }
        if mismatched > 0 {
            warn!(mismatched, "Rows whose id does not match their url");
            return Ok(false);
        }
        info!("Store integrity ok");
        Ok(true)
    }

    /// Snapshot the database into `target` with `VACUUM INTO`, replacing any
    /// existing file.
    #[instrument(level = "info", skip_all, fields(target = %target.as_ref().display()))]
    pub fn backup_to(&self, target: impl AsRef<Path>) -> Result<(), StoreError> {
        let target = target.as_ref();
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        if target.exists() {
            std::fs::remove_file(target)?;
        }
        let conn = self.connect()?;
        let dest = target.to_string_lossy().into_owned();
        conn.execute("VACUUM INTO ?1", params![dest])?;
        info!("Store backed up");
        Ok(())
    }

    /// Search stored articles.
    ///
    /// # Arguments
    ///
    /// * `query` - Optional domain, `[date_from, date_to)` bounds and a
    ///   case-insensitive substring of title, body or URL. The text is also
    ///   matched as an ASCII slug against the URL, so `Orbán Viktor` finds
    ///   `.../orban-viktor-...`.
    ///
    /// # Returns
    ///
    /// At most `limit` hits (200 by default), newest first with undated
    /// records last. Each hit carries a 400-character body snippet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if the query fails.
    pub fn find(&self, query: &FindQuery) -> Result<Vec<SearchHit>, StoreError> {
        let text = query
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());
        let pattern = text.map(|t| format!("%{}%", escape_like(t)));
        let slug_pattern = text
            .map(ascii_slug)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", escape_like(&s)));
        let limit = i64::try_from(query.limit.unwrap_or(DEFAULT_FIND_LIMIT)).unwrap_or(i64::MAX);

        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT title, url, published, body FROM articles
            WHERE (?1 IS NULL OR source = ?1)
              AND (?2 IS NULL OR published >= ?2)
              AND (?3 IS NULL OR published < ?3)
              AND (?4 IS NULL
                   OR title LIKE ?4 ESCAPE '\'
                   OR body LIKE ?4 ESCAPE '\'
                   OR url LIKE ?4 ESCAPE '\'
                   OR (?5 IS NOT NULL AND url LIKE ?5 ESCAPE '\'))
            ORDER BY published IS NULL, published DESC, url
            LIMIT ?6
            "#,
        )?;
        let hits = stmt
            .query_map(
                params![
                    query.domain.as_deref().map(normalize_domain),
                    query.date_from.map(ymd),
                    query.date_to.map(ymd),
                    pattern,
                    slug_pattern,
                    limit,
                ],
                |row| {
                    let title: Option<String> = row.get(0)?;
                    let url: String = row.get(1)?;
                    let published: Option<String> = row.get(2)?;
                    let body: Option<String> = row.get(3)?;
                    Ok(SearchHit {
                        title: title.unwrap_or_default(),
                        url,
                        date: published.as_deref().and_then(parse_ymd),
                        snippet: snippet(body.as_deref().unwrap_or_default(), SNIPPET_CHARS),
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(hits)
    }
}

fn ymd(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn parse_ymd(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Column values as stored, converted outside the row callback.
struct RawArticle {
    id: String,
    source: String,
    url: String,
    title: Option<String>,
    body: Option<String>,
    published: Option<String>,
    tags: String,
    created_at: String,
    updated_at: String,
}

fn row_to_raw(row: &Row<'_>) -> rusqlite::Result<RawArticle> {
    Ok(RawArticle {
        id: row.get(0)?,
        source: row.get(1)?,
        url: row.get(2)?,
        title: row.get(3)?,
        body: row.get(4)?,
        published: row.get(5)?,
        tags: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn parse_timestamp(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

impl RawArticle {
    fn into_article(self) -> Result<Article, StoreError> {
        Ok(Article {
            id: self.id,
            source: self.source,
            url: self.url,
            title: self.title,
            body: self.body,
            published: self.published.as_deref().and_then(parse_ymd),
            tags: serde_json::from_str(&self.tags)?,
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        })
    }
}
