use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::models::OutputRow;

/// Writes every row to `path` in one go.
///
/// Rows land in a sibling `.tmp` file first and are renamed into place, so an
/// interrupted run leaves any earlier output untouched.
pub fn write_csv(path: &Path, rows: &[OutputRow]) -> Result<()> {
    let tmp = tmp_path(path);

    let result = write_rows(&tmp, rows).and_then(|()| {
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move {} to {}", tmp.display(), path.display()))
    });
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

fn write_rows(tmp: &Path, rows: &[OutputRow]) -> Result<()> {
    let mut writer = csv::Writer::from_path(tmp)
        .with_context(|| format!("Failed to create {}", tmp.display()))?;
    // serde only emits a header with the first record
    if rows.is_empty() {
        writer.write_record(HEADER)?;
    }
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush().context("Failed to flush CSV output")?;
    Ok(())
}

pub const HEADER: [&str; 10] = [
    "full_name",
    "url",
    "age_days",
    "merged_prs",
    "releases",
    "days_since_update",
    "primary_language",
    "issues_total",
    "issues_closed",
    "issues_closed_ratio",
];

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
