//! Machine-readable report for CI ingestion.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{CoverageSummary, FileSummary, Totals};

#[derive(Debug, Serialize)]
pub struct ReportMeta<'a> {
    pub name: &'a str,
    pub version: &'static str,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct JsonReport<'a> {
    pub meta: ReportMeta<'a>,
    pub files: &'a [FileSummary],
    pub totals: &'a Totals,
}

impl<'a> JsonReport<'a> {
    pub fn new(name: &'a str, summary: &'a CoverageSummary, generated_at: DateTime<Utc>) -> Self {
        Self {
            meta: ReportMeta {
                name,
                version: env!("CARGO_PKG_VERSION"),
                generated_at,
            },
            files: &summary.files,
            totals: &summary.totals,
        }
    }
}

pub fn render(name: &str, summary: &CoverageSummary, generated_at: DateTime<Utc>) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&JsonReport::new(name, summary, generated_at))
}
