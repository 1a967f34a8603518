//! Plain-text table report.

use std::fmt::Write;

use super::CoverageSummary;

/// Render `Name  Stmts  Miss  Cover` rows plus a `TOTAL` line.
pub fn render(summary: &CoverageSummary) -> String {
    let name_width = summary
        .files
        .iter()
        .map(|f| f.path.len())
        .chain(["Name".len(), "TOTAL".len()])
        .max()
        .unwrap_or(5);
    let rule = "-".repeat(name_width + 21);

    let mut out = String::new();
    let _ = writeln!(out, "{:<name_width$} {:>6} {:>6} {:>6}", "Name", "Stmts", "Miss", "Cover");
    let _ = writeln!(out, "{rule}");
    for file in &summary.files {
        let marker = if file.source_missing { " (source missing)" } else { "" };
        let _ = writeln!(
            out,
            "{:<name_width$} {:>6} {:>6} {:>5.0}%{marker}",
            file.path, file.statements, file.missed, file.percent
        );
    }
    let _ = writeln!(out, "{rule}");
    let totals = &summary.totals;
    let _ = writeln!(
        out,
        "{:<name_width$} {:>6} {:>6} {:>5.0}%",
        "TOTAL", totals.statements, totals.missed, totals.percent
    );
    out
}

#[cfg(test)]
mod tests {
    use super::super::{FileSummary, Totals};
    use super::*;

    fn file(path: &str, statements: usize, missed: usize) -> FileSummary {
        FileSummary {
            path: path.into(),
            statements,
            missed,
            covered: statements - missed,
            percent: (statements - missed) as f64 * 100.0 / statements as f64,
            executed_lines: Vec::new(),
            missing_lines: Vec::new(),
            source_missing: false,
            source: Vec::new(),
        }
    }

    #[test]
    fn renders_aligned_table() {
        let summary = CoverageSummary {
            files: vec![file("/local/project/app.py", 4, 1), file("/local/project/util.py", 10, 5)],
            totals: Totals {
                files: 2,
                statements: 14,
                missed: 6,
                covered: 8,
                percent: 8.0 * 100.0 / 14.0,
            },
        };

        let text = render(&summary);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 6);
        assert!(lines[0].starts_with("Name"));
        assert!(lines[0].ends_with("Stmts   Miss  Cover"));
        assert!(lines[2].starts_with("/local/project/app.py"));
        assert!(lines[2].ends_with("4      1    75%"));
        assert!(lines[5].starts_with("TOTAL"));
        assert!(lines[5].ends_with("14      6    57%"));
        // all columns line up
        assert_eq!(lines[0].len(), lines[2].len());
        assert_eq!(lines[2].len(), lines[5].len());
    }

    #[test]
    fn flags_missing_sources() {
        let mut missing = file("/app/gone.py", 2, 0);
        missing.source_missing = true;
        let summary = CoverageSummary {
            files: vec![missing],
            totals: Totals::default(),
        };
        assert!(render(&summary).contains("/app/gone.py"));
        assert!(render(&summary).contains("(source missing)"));
    }
}
