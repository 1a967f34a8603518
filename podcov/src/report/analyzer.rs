//! Statement detection for report generation.

use std::collections::BTreeSet;
use std::path::Path;

/// Source text and statement lines of one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceAnalysis {
    pub lines: Vec<String>,
    /// 1-based line numbers that count as statements.
    pub statements: BTreeSet<u32>,
}

/// Decides which lines of a source file are statements.
pub trait SourceAnalyzer: Send + Sync {
    /// `None` when the file is not available locally.
    fn analyze(&self, path: &str) -> Option<SourceAnalysis>;
}

/// Line-based heuristic that works for any brace or indentation language.
///
/// Blank lines, pure comments (`#`, `//`, `/*`, `*`) and lone braces are not
/// statements; everything else is.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineAnalyzer;

impl LineAnalyzer {
    pub fn is_statement(line: &str) -> bool {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return false;
        }
        if ["#", "//", "/*", "*"].iter().any(|p| trimmed.starts_with(p)) {
            return false;
        }
        !matches!(trimmed, "{" | "}" | "};" | "}," | "})" | "});" | "(" | ")" | "]" | "[")
    }
}

impl SourceAnalyzer for LineAnalyzer {
    fn analyze(&self, path: &str) -> Option<SourceAnalysis> {
        let text = std::fs::read_to_string(Path::new(path)).ok()?;
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        let statements = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| Self::is_statement(line))
            .map(|(idx, _)| idx as u32 + 1)
            .collect();
        Some(SourceAnalysis { lines, statements })
    }
}
