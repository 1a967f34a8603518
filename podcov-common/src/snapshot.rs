//! Coverage snapshot data model.
//!
//! A [`Snapshot`] maps absolute file paths (as observed where the code ran)
//! to the lines and arcs executed in that file. Maps and sets are ordered so
//! that serializing the same snapshot always yields the same bytes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// An executed transition between two source lines.
///
/// Negative line numbers are allowed: coverage backends use them for
/// function entry and exit pseudo-lines.
pub type LineArc = (i32, i32);

/// Executed lines (and optionally arcs) for one source file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// 1-based executed line numbers.
    #[serde(default)]
    pub lines: BTreeSet<u32>,
    /// Executed branch arcs.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub arcs: BTreeSet<LineArc>,
}

impl FileRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from executed lines only.
    pub fn from_lines(lines: impl IntoIterator<Item = u32>) -> Self {
        Self {
            lines: lines.into_iter().collect(),
            arcs: BTreeSet::new(),
        }
    }

    /// Union another record into this one.
    pub fn merge(&mut self, other: &FileRecord) {
        self.lines.extend(other.lines.iter().copied());
        self.arcs.extend(other.arcs.iter().copied());
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.arcs.is_empty()
    }
}

/// Point-in-time copy of accumulated coverage, keyed by file path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    files: BTreeMap<String, FileRecord>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_map(files: BTreeMap<String, FileRecord>) -> Self {
        Self { files }
    }

    /// Insert or union a record for `path`.
    pub fn insert(&mut self, path: impl Into<String>, record: FileRecord) {
        self.files
            .entry(path.into())
            .and_modify(|existing| existing.merge(&record))
            .or_insert(record);
    }

    /// Builder-style insert used heavily by tests and fixtures.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<String>, lines: impl IntoIterator<Item = u32>) -> Self {
        self.insert(path, FileRecord::from_lines(lines));
        self
    }

    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.files.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Measured file paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FileRecord)> {
        self.files.iter().map(|(path, record)| (path.as_str(), record))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Total number of executed lines across all files.
    pub fn line_count(&self) -> usize {
        self.files.values().map(|r| r.lines.len()).sum()
    }

    /// Union `other` into this snapshot, per path.
    pub fn merge(&mut self, other: &Snapshot) {
        for (path, record) in &other.files {
            self.files
                .entry(path.clone())
                .and_modify(|existing| existing.merge(record))
                .or_insert_with(|| record.clone());
        }
    }

    /// Non-mutating union of two snapshots.
    #[must_use]
    pub fn merged(&self, other: &Snapshot) -> Snapshot {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    /// Keep only the files for which `keep` returns true.
    #[must_use]
    pub fn filtered(&self, mut keep: impl FnMut(&str) -> bool) -> Snapshot {
        Snapshot {
            files: self
                .files
                .iter()
                .filter(|(path, _)| keep(path.as_str()))
                .map(|(path, record)| (path.clone(), record.clone()))
                .collect(),
        }
    }
}

impl FromIterator<(String, FileRecord)> for Snapshot {
    fn from_iter<T: IntoIterator<Item = (String, FileRecord)>>(iter: T) -> Self {
        let mut snapshot = Snapshot::new();
        for (path, record) in iter {
            snapshot.insert(path, record);
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(lines: &[u32], arcs: &[(i32, i32)]) -> FileRecord {
        FileRecord {
            lines: lines.iter().copied().collect(),
            arcs: arcs.iter().copied().collect(),
        }
    }

    #[test]
    fn insert_unions_existing_record() {
        let mut snapshot = Snapshot::new();
        snapshot.insert("/app/app.py", FileRecord::from_lines([1, 2]));
        snapshot.insert("/app/app.py", FileRecord::from_lines([2, 5]));

        let lines: Vec<u32> = snapshot.get("/app/app.py").unwrap().lines.iter().copied().collect();
        assert_eq!(lines, vec![1, 2, 5]);
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn merge_unions_lines_and_arcs() {
        let mut a = Snapshot::new();
        a.insert("/app/a.py", record(&[1, 2], &[(-1, 1), (1, 2)]));
        let mut b = Snapshot::new();
        b.insert("/app/a.py", record(&[3], &[(2, 3)]));
        b.insert("/app/b.py", record(&[7], &[]));

        a.merge(&b);

        let a_rec = a.get("/app/a.py").unwrap();
        assert_eq!(a_rec.lines.len(), 3);
        assert_eq!(a_rec.arcs.len(), 3);
        assert!(a.contains("/app/b.py"));
    }

    #[test]
    fn filtered_keeps_matching_paths() {
        let snapshot = Snapshot::new()
            .with_file("/app/keep.py", [1])
            .with_file("/app/drop.py", [1]);
        let kept = snapshot.filtered(|p| p.ends_with("keep.py"));
        assert_eq!(kept.paths().collect::<Vec<_>>(), vec!["/app/keep.py"]);
    }

    #[test]
    fn arcs_omitted_from_json_when_empty() {
        let snapshot = Snapshot::new().with_file("/app/a.py", [1]);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(!json.contains("arcs"));
    }

    fn arb_snapshot() -> impl Strategy<Value = Snapshot> {
        let path = prop::sample::select(vec!["/a.py", "/b.py", "/c/d.py", "/e.rs"]);
        let rec = (
            prop::collection::btree_set(1u32..40, 0..8),
            prop::collection::btree_set((-2i32..20, -2i32..20), 0..4),
        )
            .prop_map(|(lines, arcs)| FileRecord { lines, arcs });
        prop::collection::vec((path, rec), 0..5).prop_map(|entries| {
            entries
                .into_iter()
                .map(|(p, r)| (p.to_string(), r))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn merge_is_commutative(a in arb_snapshot(), b in arb_snapshot()) {
            prop_assert_eq!(a.merged(&b), b.merged(&a));
        }

        #[test]
        fn merge_is_associative(a in arb_snapshot(), b in arb_snapshot(), c in arb_snapshot()) {
            prop_assert_eq!(a.merged(&b).merged(&c), a.merged(&b.merged(&c)));
        }

        #[test]
        fn empty_snapshot_is_merge_identity(a in arb_snapshot()) {
            prop_assert_eq!(a.merged(&Snapshot::new()), a.clone());
        }
    }
}
