//! Static HTML report: an index page plus one page per file.

use std::collections::BTreeSet;
use std::fmt::Write;
use std::io;
use std::path::{Path, PathBuf};

use super::{CoverageSummary, FileSummary};

const STYLE: &str = "body{font-family:sans-serif;margin:2em}\
table{border-collapse:collapse}td,th{padding:2px 8px;text-align:right}\
td.name,th.name{text-align:left}pre{margin:0}\
.src td{text-align:left;font-family:monospace;white-space:pre}\
.run{background:#dfd}.mis{background:#fdd}.num{color:#888;text-align:right}";

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Stable page name for a source path.
pub fn page_name(path: &str) -> String {
    let slug: String = path
        .trim_start_matches('/')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    format!("{slug}.html")
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{}</title><style>{STYLE}</style></head>\n<body>\n{body}</body></html>\n",
        escape_html(title)
    )
}

pub fn render_index(title: &str, summary: &CoverageSummary) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "<h1>{}</h1>", escape_html(title));
    body.push_str("<table>\n<tr><th class=\"name\">Name</th><th>Stmts</th><th>Miss</th><th>Cover</th></tr>\n");
    for file in &summary.files {
        let _ = writeln!(
            body,
            "<tr><td class=\"name\"><a href=\"{}\">{}</a></td><td>{}</td><td>{}</td><td>{:.0}%</td></tr>",
            escape_html(&page_name(&file.path)),
            escape_html(&file.path),
            file.statements,
            file.missed,
            file.percent
        );
    }
    let totals = &summary.totals;
    let _ = writeln!(
        body,
        "<tr><td class=\"name\"><b>TOTAL</b></td><td>{}</td><td>{}</td><td>{:.0}%</td></tr>\n</table>",
        totals.statements, totals.missed, totals.percent
    );
    page(title, &body)
}

pub fn render_file(file: &FileSummary) -> String {
    let executed: BTreeSet<u32> = file.executed_lines.iter().copied().collect();
    let missing: BTreeSet<u32> = file.missing_lines.iter().copied().collect();

    let mut body = String::new();
    let _ = writeln!(
        body,
        "<h1>{}</h1>\n<p>{} statements, {} missed, {:.0}% covered</p>\n<p><a href=\"index.html\">index</a></p>",
        escape_html(&file.path),
        file.statements,
        file.missed,
        file.percent
    );
    if file.source_missing {
        body.push_str("<p>Source not available locally.</p>\n");
    }
    body.push_str("<table class=\"src\">\n");
    for (idx, line) in file.source.iter().enumerate() {
        let number = idx as u32 + 1;
        let class = if executed.contains(&number) {
            " class=\"run\""
        } else if missing.contains(&number) {
            " class=\"mis\""
        } else {
            ""
        };
        let _ = writeln!(
            body,
            "<tr{class}><td class=\"num\">{number}</td><td>{}</td></tr>",
            escape_html(line)
        );
    }
    body.push_str("</table>\n");
    page(&file.path, &body)
}

/// Write `index.html` and the per-file pages into `dir`, returning the index path.
pub fn write_report(dir: &Path, title: &str, summary: &CoverageSummary) -> io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    for file in &summary.files {
        std::fs::write(dir.join(page_name(&file.path)), render_file(file))?;
    }
    let index = dir.join("index.html");
    std::fs::write(&index, render_index(title, summary))?;
    Ok(index)
}
