//! Remote-to-local path reconciliation.
//!
//! Coverage captured in a container records paths such as `/app/pkg/mod.py`
//! that do not exist on the machine rendering the report. The remapper
//! derives `(remote_prefix, local_prefix)` pairs from files whose basename
//! matches exactly one local source file, then applies the longest matching
//! prefix to every other unresolved path.
//!
//! Nothing is guessed: a path whose basename is shared by several local files
//! is kept as captured and reported, even when a derived prefix covers it. The result depends only on the snapshot
//! and the file tree, never on directory traversal order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use podcov_common::Snapshot;

/// Which local files are candidates for remapping.
#[derive(Debug, Clone)]
pub struct RemapOptions {
    /// Source file extensions, without the dot.
    pub extensions: Vec<String>,
    /// Directory names never descended into.
    pub skip_dirs: Vec<String>,
}

impl Default for RemapOptions {
    fn default() -> Self {
        Self {
            extensions: vec!["rs".into(), "py".into()],
            skip_dirs: vec!["target".into(), ".git".into(), "node_modules".into()],
        }
    }
}

impl RemapOptions {
    fn wants_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e == ext))
    }

    fn skips_dir(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return false;
        }
        let name = entry.file_name().to_string_lossy();
        name.starts_with('.') || self.skip_dirs.iter().any(|d| d == name.as_ref())
    }
}

/// Why a path was left as captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// No local file has this basename.
    NoMatch { path: String },
    /// Several local files share this basename.
    Ambiguous { path: String, candidates: Vec<PathBuf> },
    /// The longest matching prefix produced a path that does not exist.
    RewriteMissing { path: String, rewritten: String },
    /// One remote directory was derived to map to different local directories.
    ConflictingPrefix { remote_prefix: String, local_prefixes: Vec<String> },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMatch { path } => write!(f, "no_match={path}"),
            Self::Ambiguous { path, candidates } => {
                write!(f, "ambiguous={path} candidates=")?;
                let list: Vec<String> = candidates.iter().map(|c| c.display().to_string()).collect();
                write!(f, "[{}]", list.join(", "))
            }
            Self::RewriteMissing { path, rewritten } => {
                write!(f, "rewrite_missing={path} -> {rewritten}")
            }
            Self::ConflictingPrefix {
                remote_prefix,
                local_prefixes,
            } => write!(f, "conflicting_prefix={remote_prefix} -> [{}]", local_prefixes.join(", ")),
        }
    }
}

/// Ordered `(remote_prefix, local_prefix)` pairs, longest remote prefix first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathMapping {
    pairs: Vec<(String, String)>,
}

impl PathMapping {
    fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut pairs: Vec<(String, String)> = pairs.into_iter().collect();
        pairs.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        Self { pairs }
    }

    /// Rewrite `path` with the longest matching remote prefix.
    pub fn apply(&self, path: &str) -> Option<String> {
        self.pairs.iter().find_map(|(remote, local)| {
            path.strip_prefix(remote.as_str())
                .map(|rest| format!("{local}{rest}"))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(r, l)| (r.as_str(), l.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Result of remapping a snapshot.
#[derive(Debug, Clone)]
pub struct RemapOutcome {
    pub snapshot: Snapshot,
    pub mapping: PathMapping,
    pub diagnostics: Vec<Diagnostic>,
}

impl RemapOutcome {
    /// Number of paths that were rewritten.
    pub fn remapped(&self, original: &Snapshot) -> usize {
        original.paths().filter(|p| !self.snapshot.contains(p)).count()
    }
}

/// Error walking the local source tree.
#[derive(Debug, thiserror::Error)]
pub enum RemapError {
    #[error("source root {} is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("failed to walk source tree: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Local candidate files grouped by basename.
#[derive(Debug, Default)]
pub struct SourceIndex {
    by_basename: BTreeMap<String, BTreeSet<PathBuf>>,
}

impl SourceIndex {
    pub fn build(root: &Path, options: &RemapOptions) -> Result<Self, RemapError> {
        if !root.is_dir() {
            return Err(RemapError::NotADirectory(root.to_path_buf()));
        }
        let mut index = SourceIndex::default();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| !options.skips_dir(entry));
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() || !options.wants_file(entry.path()) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            index
                .by_basename
                .entry(name)
                .or_default()
                .insert(entry.into_path());
        }
        debug!(root = %root.display(), basenames = index.by_basename.len(), "Indexed local sources");
        Ok(index)
    }

    pub fn candidates(&self, basename: &str) -> Option<&BTreeSet<PathBuf>> {
        self.by_basename.get(basename)
    }
}

fn split_basename(path: &str) -> Option<(&str, &str)> {
    let idx = path.rfind('/')?;
    let (dir, name) = path.split_at(idx + 1);
    (!name.is_empty()).then_some((dir, name))
}

fn dir_prefix(path: &Path) -> Option<String> {
    let parent = path.parent()?.to_string_lossy().into_owned();
    Some(if parent.ends_with('/') { parent } else { format!("{parent}/") })
}

/// Remap `snapshot` against the source tree under `root` with default options.
pub fn remap(snapshot: &Snapshot, root: &Path) -> Result<RemapOutcome, RemapError> {
    remap_with(snapshot, root, &RemapOptions::default())
}

/// Remap `snapshot` against the source tree under `root`.
pub fn remap_with(snapshot: &Snapshot, root: &Path, options: &RemapOptions) -> Result<RemapOutcome, RemapError> {
    let index = SourceIndex::build(root, options)?;

    let (present, unresolved): (Vec<&str>, Vec<&str>) =
        snapshot.paths().partition(|path| Path::new(path).is_file());

    // Basename matching; `unresolved` is sorted because snapshot paths are.
    let mut basename_diagnostics: BTreeMap<&str, Diagnostic> = BTreeMap::new();
    let mut derived: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for &path in &unresolved {
        let Some((remote_dir, name)) = split_basename(path) else {
            basename_diagnostics.insert(path, Diagnostic::NoMatch { path: path.to_string() });
            continue;
        };
        match index.candidates(name) {
            None => {
                basename_diagnostics.insert(path, Diagnostic::NoMatch { path: path.to_string() });
            }
            Some(candidates) if candidates.len() > 1 => {
                basename_diagnostics.insert(
                    path,
                    Diagnostic::Ambiguous {
                        path: path.to_string(),
                        candidates: candidates.iter().cloned().collect(),
                    },
                );
            }
            Some(candidates) => {
                let local_dir = candidates.iter().next().and_then(|c| dir_prefix(c));
                if let Some(local_dir) = local_dir {
                    derived.entry(remote_dir.to_string()).or_default().insert(local_dir);
                }
            }
        }
    }

    let mut diagnostics = Vec::new();
    let mut pairs = Vec::new();
    for (remote_prefix, locals) in derived {
        if locals.len() == 1 {
            if let Some(local) = locals.into_iter().next() {
                pairs.push((remote_prefix, local));
            }
        } else {
            diagnostics.push(Diagnostic::ConflictingPrefix {
                remote_prefix,
                local_prefixes: locals.into_iter().collect(),
            });
        }
    }
    let mapping = PathMapping::from_pairs(pairs);

    let mut out = Snapshot::new();
    for path in present {
        if let Some(record) = snapshot.get(path) {
            out.insert(path, record.clone());
        }
    }
    for &path in &unresolved {
        let Some(record) = snapshot.get(path) else { continue };
        // Shared basenames stay as captured even when a sibling's prefix covers them.
        if matches!(basename_diagnostics.get(path), Some(Diagnostic::Ambiguous { .. })) {
            if let Some(diag) = basename_diagnostics.remove(path) {
                diagnostics.push(diag);
            }
            out.insert(path, record.clone());
            continue;
        }
        let target = match mapping.apply(path) {
            Some(rewritten) if Path::new(&rewritten).is_file() => rewritten,
            Some(rewritten) => {
                diagnostics.push(Diagnostic::RewriteMissing {
                    path: path.to_string(),
                    rewritten,
                });
                path.to_string()
            }
            None => {
                if let Some(diag) = basename_diagnostics.remove(path) {
                    diagnostics.push(diag);
                }
                path.to_string()
            }
        };
        out.insert(target, record.clone());
    }

    info!(
        files = snapshot.len(),
        prefixes = mapping.len(),
        diagnostics = diagnostics.len(),
        "Remapped coverage paths"
    );
    Ok(RemapOutcome {
        snapshot: out,
        mapping,
        diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use podcov_common::encode_blob;
    use std::fs;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    struct TestFixture {
        root: PathBuf,
    }

    impl TestFixture {
        fn new(prefix: &str) -> Self {
            let id = COUNTER.fetch_add(1, Ordering::SeqCst);
            let root = std::env::temp_dir().join(format!("podcov-remap-{}-{}-{}", prefix, std::process::id(), id));
            fs::create_dir_all(&root).expect("create fixture root");
            Self { root }
        }

        fn touch(&self, rel: &str) -> PathBuf {
            let path = self.root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).expect("create parent");
            fs::write(&path, "x = 1\n").expect("write file");
            path
        }

        fn local(&self, rel: &str) -> String {
            self.root.join(rel).to_string_lossy().into_owned()
        }
    }

    impl Drop for TestFixture {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.root);
        }
    }

    #[test]
    fn exact_match_rewrites_path() {
        let fixture = TestFixture::new("exact");
        fixture.touch("app.py");
        let snapshot = Snapshot::new().with_file("/app/app.py", [1, 2, 5]);

        let outcome = remap(&snapshot, &fixture.root).unwrap();

        assert_eq!(outcome.snapshot, Snapshot::new().with_file(fixture.local("app.py"), [1, 2, 5]));
        assert!(outcome.diagnostics.is_empty());
        assert_eq!(outcome.mapping.iter().next().unwrap().0, "/app/");
    }

    #[test]
    fn no_match_is_left_unchanged_with_diagnostic() {
        let fixture = TestFixture::new("nomatch");
        fixture.touch("app.py");
        let snapshot = Snapshot::new().with_file("/app/unknown.py", [3]);

        let outcome = remap(&snapshot, &fixture.root).unwrap();

        assert_eq!(outcome.snapshot, snapshot);
        assert_eq!(
            outcome.diagnostics,
            vec![Diagnostic::NoMatch {
                path: "/app/unknown.py".into()
            }]
        );
    }

    #[test]
    fn shared_basename_is_never_guessed() {
        let fixture = TestFixture::new("ambiguous");
        fixture.touch("a/util.py");
        fixture.touch("b/util.py");
        let snapshot = Snapshot::new().with_file("/srv/util.py", [1]);

        let outcome = remap(&snapshot, &fixture.root).unwrap();

        assert!(outcome.mapping.is_empty());
        assert_eq!(outcome.snapshot, snapshot);
        match &outcome.diagnostics[..] {
            [Diagnostic::Ambiguous { path, candidates }] => {
                assert_eq!(path, "/srv/util.py");
                assert_eq!(candidates.len(), 2);
            }
            other => panic!("unexpected diagnostics: {other:?}"),
        }
    }

    #[test]
    fn sibling_prefix_does_not_resolve_shared_basename() {
        let fixture = TestFixture::new("sibling");
        fixture.touch("pkg/app.py");
        fixture.touch("pkg/util.py");
        fixture.touch("other/util.py");
        let snapshot = Snapshot::new()
            .with_file("/app/pkg/app.py", [1])
            .with_file("/app/pkg/util.py", [2]);

        let outcome = remap(&snapshot, &fixture.root).unwrap();

        assert!(outcome.snapshot.contains(&fixture.local("pkg/app.py")));
        assert!(outcome.snapshot.contains("/app/pkg/util.py"));
        assert!(!outcome.snapshot.contains(&fixture.local("pkg/util.py")));
        match &outcome.diagnostics[..] {
            [Diagnostic::Ambiguous { path, candidates }] => {
                assert_eq!(path, "/app/pkg/util.py");
                assert_eq!(candidates.len(), 2);
            }
            other => panic!("unexpected diagnostics: {other:?}"),
        }
    }

    #[test]
    fn rewrite_to_missing_file_keeps_original() {
        let fixture = TestFixture::new("missing");
        fixture.touch("app.py");
        let snapshot = Snapshot::new()
            .with_file("/app/app.py", [1])
            .with_file("/app/deleted.py", [4]);

        let outcome = remap(&snapshot, &fixture.root).unwrap();

        assert!(outcome.snapshot.contains("/app/deleted.py"));
        assert!(matches!(
            &outcome.diagnostics[..],
            [Diagnostic::RewriteMissing { path, .. }] if path == "/app/deleted.py"
        ));
    }

    #[test]
    fn conflicting_prefix_is_dropped() {
        let fixture = TestFixture::new("conflict");
        fixture.touch("x/one.py");
        fixture.touch("y/two.py");
        let snapshot = Snapshot::new()
            .with_file("/app/one.py", [1])
            .with_file("/app/two.py", [1]);

        let outcome = remap(&snapshot, &fixture.root).unwrap();

        assert!(outcome.mapping.is_empty());
        assert_eq!(outcome.snapshot, snapshot);
        assert!(
            outcome
                .diagnostics
                .iter()
                .any(|d| matches!(d, Diagnostic::ConflictingPrefix { remote_prefix, .. } if remote_prefix == "/app/"))
        );
    }

    #[test]
    fn skipped_directories_are_not_candidates() {
        let fixture = TestFixture::new("skip");
        fixture.touch("src/lib.rs");
        fixture.touch("target/debug/build/lib.rs");
        fixture.touch(".hidden/lib.rs");
        let snapshot = Snapshot::new().with_file("/build/src/lib.rs", [7]);

        let outcome = remap(&snapshot, &fixture.root).unwrap();
        assert!(outcome.snapshot.contains(&fixture.local("src/lib.rs")));
    }

    #[test]
    fn longest_prefix_wins() {
        let mapping = PathMapping::from_pairs([
            ("/app/".to_string(), "/l/".to_string()),
            ("/app/pkg/".to_string(), "/l/src/pkg/".to_string()),
        ]);
        assert_eq!(mapping.apply("/app/pkg/a.py").as_deref(), Some("/l/src/pkg/a.py"));
        assert_eq!(mapping.apply("/app/b.py").as_deref(), Some("/l/b.py"));
        assert_eq!(mapping.apply("/other/c.py"), None);
    }

    #[test]
    fn remapping_is_deterministic() {
        let fixture = TestFixture::new("determinism");
        for rel in ["svc/a.py", "svc/b.py", "lib/c.py", "x/d.py", "y/d.py"] {
            fixture.touch(rel);
        }
        let snapshot = Snapshot::new()
            .with_file("/app/svc/a.py", [1, 2])
            .with_file("/app/svc/b.py", [3])
            .with_file("/app/lib/c.py", [4])
            .with_file("/app/d.py", [5]);

        let first = remap(&snapshot, &fixture.root).unwrap();
        let second = remap(&snapshot, &fixture.root).unwrap();

        assert_eq!(encode_blob(&first.snapshot).unwrap(), encode_blob(&second.snapshot).unwrap());
        assert_eq!(first.diagnostics, second.diagnostics);
        assert_eq!(first.mapping, second.mapping);
    }

    #[test]
    fn missing_root_is_an_error() {
        let err = remap(&Snapshot::new(), Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, RemapError::NotADirectory(_)));
    }
}
