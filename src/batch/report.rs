//! Per-window report files.
//!
//! Reports are the only resume bookkeeping. Each `(domain, window)` pair
//! owns one JSON file named after [`BatchWindow::key`]:
//!
//! ```text
//! outdir/
//! ├── reports/
//! │   └── telex.hu_2024-01-01_to_2024-02-01.json
//! ├── windows/
//! │   └── telex.hu_2024-01-01_to_2024-02-01.sqlite
//! └── backups/
//!     └── master_before_telex.hu_2024-01-01_to_2024-02-01.sqlite
//! ```
//!
//! Files are written to a temporary sibling and renamed into place, so a
//! reader never sees a half-written report.

use std::path::PathBuf;

use tokio::fs;
use tracing::{debug, instrument, warn};

use crate::error::ReportError;
use crate::models::{BatchReport, BatchWindow};

/// Directory layout for one backfill output directory.
#[derive(Debug, Clone)]
pub struct ReportStore {
    outdir: PathBuf,
}

impl ReportStore {
    pub fn new(outdir: impl Into<PathBuf>) -> Self {
        Self {
            outdir: outdir.into(),
        }
    }

    pub fn report_path(&self, window: &BatchWindow) -> PathBuf {
        self.outdir
            .join("reports")
            .join(format!("{}.json", window.key()))
    }

    pub fn window_store_path(&self, window: &BatchWindow) -> PathBuf {
        self.outdir
            .join("windows")
            .join(format!("{}.sqlite", window.key()))
    }

    pub fn backup_path(&self, prefix: &str, window: &BatchWindow) -> PathBuf {
        self.outdir
            .join("backups")
            .join(format!("{prefix}{}.sqlite", window.key()))
    }

    /// The stored report for `window`. A missing or unreadable file counts
    /// as "never ran".
    pub async fn load(&self, window: &BatchWindow) -> Option<BatchReport> {
        let path = self.report_path(window);
        let text = fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str(&text) {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Ignoring unreadable report"
                );
                None
            }
        }
    }

    /// Atomically write `report` to its file.
    #[instrument(
        level = "debug",
        skip_all,
        fields(key = %report.window().key(), state = ?report.state)
    )]
    pub async fn save(&self, report: &BatchReport) -> Result<PathBuf, ReportError> {
        let path = self.report_path(&report.window());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(report)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), "Wrote report");
        Ok(path)
    }
}
