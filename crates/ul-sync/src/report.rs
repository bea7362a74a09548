//! Persisting run results for manual review and retry
//!
//! Rendering reports is someone else's job; this only writes the raw sets:
//!
//! - `<source>-failed.json`: records whose write failed, with the error
//! - `<source>-updated.json`: `{original, updated}` pairs for diffing
//! - `<source>-abandoned.json`: records never attempted because the run was
//!   cancelled
//! - `<source>-summary.json`: counts and a UTC timestamp

use crate::error::Result;
use crate::reconcile::{ReconcileCounts, ReconcileReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub source: String,
    pub generated_at: DateTime<Utc>,
    pub counts: ReconcileCounts,
}

/// Paths written by [`persist_report`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedReport {
    pub failed: PathBuf,
    pub updated: PathBuf,
    pub abandoned: PathBuf,
    pub summary: PathBuf,
}

/// Write the failed, updated and summary files for `source` into `dir`
///
/// `dir` is created if missing. Existing files for the same source are
/// overwritten.
pub fn persist_report(report: &ReconcileReport, dir: &Path, source: &str) -> Result<PersistedReport> {
    std::fs::create_dir_all(dir)?;

    let paths = PersistedReport {
        failed: dir.join(format!("{}-failed.json", source)),
        updated: dir.join(format!("{}-updated.json", source)),
        abandoned: dir.join(format!("{}-abandoned.json", source)),
        summary: dir.join(format!("{}-summary.json", source)),
    };

    let summary = RunSummary {
        source: source.to_string(),
        generated_at: Utc::now(),
        counts: report.summary(),
    };

    write_json(&paths.failed, &report.failed)?;
    write_json(&paths.updated, &report.updated)?;
    write_json(&paths.abandoned, &report.abandoned)?;
    write_json(&paths.summary, &summary)?;

    info!(
        source = %source,
        dir = %dir.display(),
        failed = report.failed.len(),
        updated = report.updated.len(),
        abandoned = report.abandoned.len(),
        "Report persisted"
    );
    Ok(paths)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}
