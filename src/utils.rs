//! Small helpers shared by the store, the orchestrator and the binary.
//!
//! - String truncation for logs and search snippets
//! - ASCII slugs for matching accented queries against URL paths
//! - File system validation for output directories

use std::io;

use tokio::fs;
use tracing::{info, instrument};
use unicode_normalization::UnicodeNormalization;

/// Truncate a string for logging purposes.
///
/// Long strings are cut to `max` bytes (rounded down to a character
/// boundary) with an ellipsis and a byte count appended.
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let cut = floor_char_boundary(s, max);
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    (0..=max.min(s.len()))
        .rev()
        .find(|&i| s.is_char_boundary(i))
        .unwrap_or(0)
}

/// First `max_chars` characters of `text`, whitespace collapsed.
pub fn snippet(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(max_chars).collect()
}

/// Fold `text` to a lower-case ASCII slug joined by hyphens, the way news
/// sites build article paths.
///
/// ```ignore
/// assert_eq!(ascii_slug("Árvíztűrő tükörfúrógép!"), "arvizturo-tukorfurogep");
/// ```
pub fn ascii_slug(text: &str) -> String {
    let folded: String = text
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    folded
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then creates and removes a scratch file.
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn ensure_writable_dir(path: &str) -> io::Result<()> {
    fs::create_dir_all(path).await?;
    let scratch_path = format!("{}/..__write_check__", path.trim_end_matches('/'));
    fs::write(&scratch_path, b"").await?;
    let _ = fs::remove_file(&scratch_path).await;
    info!("Output directory is writable");
    Ok(())
}
