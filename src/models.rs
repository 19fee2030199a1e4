use chrono::{DateTime, Utc};
use serde::Serialize;

/// Written in place of a missing primary language.
pub const UNKNOWN_LANGUAGE: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryBasic {
    pub owner: String,
    pub name: String,
    pub created_at: String,
    pub pushed_at: Option<String>,
    pub primary_language: Option<String>,
    pub url: String,
}

impl RepositoryBasic {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepositoryCounters {
    pub merged_prs: u64,
    pub releases: u64,
    pub issues_total: u64,
    pub issues_closed: u64,
}

impl RepositoryCounters {
    pub fn closed_ratio(&self) -> f64 {
        closed_ratio(self.issues_closed, self.issues_total)
    }
}

/// One CSV record. `None` fields render as empty cells.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputRow {
    pub full_name: String,
    pub url: String,
    pub age_days: Option<i64>,
    pub merged_prs: Option<u64>,
    pub releases: Option<u64>,
    pub days_since_update: Option<i64>,
    pub primary_language: String,
    pub issues_total: Option<u64>,
    pub issues_closed: Option<u64>,
    pub issues_closed_ratio: Option<f64>,
}

impl OutputRow {
    /// Joins a search hit with its counters. `counters` is `None` when the
    /// lookup failed, which keeps the row but leaves counter cells empty.
    pub fn assemble(
        basic: &RepositoryBasic,
        counters: Option<RepositoryCounters>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            full_name: basic.full_name(),
            url: basic.url.clone(),
            age_days: days_since(&basic.created_at, now),
            merged_prs: counters.map(|c| c.merged_prs),
            releases: counters.map(|c| c.releases),
            days_since_update: basic.pushed_at.as_deref().and_then(|ts| days_since(ts, now)),
            primary_language: basic
                .primary_language
                .clone()
                .unwrap_or_else(|| UNKNOWN_LANGUAGE.to_string()),
            issues_total: counters.map(|c| c.issues_total),
            issues_closed: counters.map(|c| c.issues_closed),
            issues_closed_ratio: counters.map(|c| c.closed_ratio()),
        }
    }
}

/// `closed / total` rounded to four decimals; `0.0` when there are no issues.
pub fn closed_ratio(closed: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let ratio = closed as f64 / total as f64;
    (ratio * 10_000.0).round() / 10_000.0
}

/// Whole days between an RFC 3339 timestamp and `now`; `None` if unparsable.
pub fn days_since(timestamp: &str, now: DateTime<Utc>) -> Option<i64> {
    DateTime::parse_from_rfc3339(timestamp)
        .ok()
        .map(|ts| (now - ts.with_timezone(&Utc)).num_days())
}
