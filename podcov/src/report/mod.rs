//! Coverage reports rendered from a snapshot.
//!
//! Everything here is a pure function of the snapshot, the exclusion policy
//! and a [`SourceAnalyzer`]; rendering never mutates the snapshot and can be
//! repeated in any order.

pub mod analyzer;
pub mod html;
pub mod json;
pub mod text;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use podcov_common::{ExclusionPolicy, Snapshot};

pub use analyzer::{LineAnalyzer, SourceAnalysis, SourceAnalyzer};

/// Output formats the client can write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, clap::ValueEnum)]
pub enum ReportFormat {
    Text,
    Html,
    Json,
}

impl ReportFormat {
    pub const ALL: [ReportFormat; 3] = [ReportFormat::Text, ReportFormat::Html, ReportFormat::Json];
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportFormat::Text => write!(f, "text"),
            ReportFormat::Html => write!(f, "html"),
            ReportFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "txt" => Ok(ReportFormat::Text),
            "html" => Ok(ReportFormat::Html),
            "json" => Ok(ReportFormat::Json),
            other => Err(format!("unknown report format '{other}' (expected text, html or json)")),
        }
    }
}

/// Per-file coverage numbers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileSummary {
    pub path: String,
    pub statements: usize,
    pub missed: usize,
    pub covered: usize,
    pub percent: f64,
    pub executed_lines: Vec<u32>,
    pub missing_lines: Vec<u32>,
    /// The source was not readable; the file counts no statements.
    pub source_missing: bool,
    #[serde(skip)]
    pub source: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Totals {
    pub files: usize,
    pub statements: usize,
    pub missed: usize,
    pub covered: usize,
    pub percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoverageSummary {
    pub files: Vec<FileSummary>,
    pub totals: Totals,
}

fn percent(covered: usize, statements: usize) -> f64 {
    if statements == 0 {
        100.0
    } else {
        covered as f64 * 100.0 / statements as f64
    }
}

fn summarize_file(path: &str, executed: &BTreeSet<u32>, analyzer: &dyn SourceAnalyzer) -> FileSummary {
    let (statements, source, source_missing) = match analyzer.analyze(path) {
        Some(analysis) => {
            let mut statements = analysis.statements;
            statements.extend(executed.iter().copied());
            (statements, analysis.lines, false)
        }
        // Unknown statements: recorded lines stay listed but count toward nothing.
        None => (BTreeSet::new(), Vec::new(), true),
    };

    let missing_lines: Vec<u32> = statements.difference(executed).copied().collect();
    let executed_lines: Vec<u32> = executed.iter().copied().collect();
    let covered = statements.intersection(executed).count();

    FileSummary {
        path: path.to_string(),
        statements: statements.len(),
        missed: missing_lines.len(),
        covered,
        percent: percent(covered, statements.len()),
        executed_lines,
        missing_lines,
        source_missing,
        source,
    }
}

/// Compute per-file and total coverage, skipping excluded paths.
pub fn summarize(snapshot: &Snapshot, exclusions: &ExclusionPolicy, analyzer: &dyn SourceAnalyzer) -> CoverageSummary {
    let files: Vec<FileSummary> = snapshot
        .iter()
        .filter(|(path, _)| !exclusions.is_excluded(path))
        .map(|(path, record)| summarize_file(path, &record.lines, analyzer))
        .collect();

    let statements: usize = files.iter().map(|f| f.statements).sum();
    let missed: usize = files.iter().map(|f| f.missed).sum();
    let covered = statements - missed;
    let totals = Totals {
        files: files.len(),
        statements,
        missed,
        covered,
        percent: percent(covered, statements),
    };
    CoverageSummary { files, totals }
}
