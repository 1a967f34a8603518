//! In-process coverage accumulation.
//!
//! [`SnapshotStore`] is the single piece of state shared between the
//! measured program's threads (which call [`SnapshotStore::record`]) and the
//! relay thread (which calls [`SnapshotStore::snapshot`] per scrape). Every
//! operation takes the same mutex for a short, bounded critical section:
//! an insert, a clone of the accumulated map, or a clear.
//!
//! Exclusion globs are applied to the copy produced by `snapshot()`, after the
//! lock is released, so the policy can change while recording continues.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, RwLock};

use glob::{MatchOptions, Pattern};
use tracing::{debug, info, warn};

use crate::snapshot::{FileRecord, Snapshot};

/// Error building an exclusion policy from glob patterns.
#[derive(Debug, thiserror::Error)]
#[error("invalid exclusion pattern '{pattern}': {source}")]
pub struct PatternError {
    pub pattern: String,
    #[source]
    pub source: glob::PatternError,
}

/// Glob-based exclusion of measured paths.
#[derive(Debug, Clone, Default)]
pub struct ExclusionPolicy {
    patterns: Vec<Pattern>,
}

impl ExclusionPolicy {
    /// Patterns excluded unless configured otherwise: the relay's own sources
    /// and third-party dependency directories.
    pub const DEFAULT_PATTERNS: &'static [&'static str] = &[
        "*/podcov-relay/src/*",
        "*/.cargo/registry/*",
        "*/.cargo/git/*",
        "*/rustc/*",
        "*/site-packages/*",
        "*/dist-packages/*",
    ];

    /// An empty policy that excludes nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// Build a policy from glob patterns.
    pub fn new<I, S>(patterns: I) -> Result<Self, PatternError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                Pattern::new(p.as_ref()).map_err(|source| PatternError {
                    pattern: p.as_ref().to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Policy built from [`Self::DEFAULT_PATTERNS`].
    pub fn with_defaults() -> Self {
        let patterns = Self::DEFAULT_PATTERNS
            .iter()
            .filter_map(|p| match Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(err) => {
                    debug_assert!(false, "default exclusion pattern {p} does not compile: {err}");
                    warn!(pattern = %p, error = %err, "Skipping invalid default exclusion pattern");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    /// Whether `path` matches any exclusion pattern.
    pub fn is_excluded(&self, path: &str) -> bool {
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };
        self.patterns
            .iter()
            .any(|pattern| pattern.matches_with(path, options))
    }

    /// Copy of `snapshot` without excluded files.
    pub fn apply(&self, snapshot: &Snapshot) -> Snapshot {
        if self.patterns.is_empty() {
            return snapshot.clone();
        }
        snapshot.filtered(|path| !self.is_excluded(path))
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(Pattern::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Counters exposed on the relay health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    /// Number of files with at least one observation.
    pub files: usize,
    /// Number of resets since the store was created.
    pub epoch: u64,
}

#[derive(Debug, Default)]
struct StoreInner {
    files: BTreeMap<String, FileRecord>,
    epoch: u64,
}

/// Thread-safe accumulator of coverage observations.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    inner: Mutex<StoreInner>,
    exclusions: RwLock<ExclusionPolicy>,
}

impl SnapshotStore {
    /// Store with no exclusions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with the given exclusion policy.
    pub fn with_exclusions(policy: ExclusionPolicy) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            exclusions: RwLock::new(policy),
        }
    }

    // A panic in a recording thread must not disable coverage for the rest of
    // the process; the map is only ever mutated by whole-entry inserts.
    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record one executed line.
    pub fn record(&self, file_path: &str, line: u32) {
        let mut inner = self.lock();
        match inner.files.get_mut(file_path) {
            Some(record) => {
                record.lines.insert(line);
            }
            None => {
                inner
                    .files
                    .insert(file_path.to_string(), FileRecord::from_lines([line]));
            }
        }
    }

    /// Record several executed lines of one file under a single lock.
    pub fn record_lines(&self, file_path: &str, lines: impl IntoIterator<Item = u32>) {
        let mut inner = self.lock();
        inner
            .files
            .entry(file_path.to_string())
            .or_default()
            .lines
            .extend(lines);
    }

    /// Record one executed arc.
    pub fn record_arc(&self, file_path: &str, from_line: i32, to_line: i32) {
        let mut inner = self.lock();
        inner
            .files
            .entry(file_path.to_string())
            .or_default()
            .arcs
            .insert((from_line, to_line));
    }

    /// Consistent copy of everything recorded so far, minus excluded paths.
    pub fn snapshot(&self) -> Snapshot {
        let copied = {
            let inner = self.lock();
            inner.files.clone()
        };
        let raw = Snapshot::from_map(copied);
        let policy = self
            .exclusions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let snapshot = policy.apply(&raw);
        debug!(
            files = snapshot.len(),
            excluded = raw.len() - snapshot.len(),
            "Coverage snapshot taken"
        );
        snapshot
    }

    /// Discard all observations and start a new epoch.
    pub fn reset(&self) -> u64 {
        let epoch = {
            let mut inner = self.lock();
            inner.files.clear();
            inner.epoch += 1;
            inner.epoch
        };
        info!(epoch, "Coverage store reset");
        epoch
    }

    /// Replace the exclusion policy; applies to subsequent snapshots.
    pub fn set_exclusions(&self, policy: ExclusionPolicy) {
        let mut guard = self
            .exclusions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = policy;
    }

    /// File count and epoch, without copying any data.
    pub fn stats(&self) -> StoreStats {
        let inner = self.lock();
        StoreStats {
            files: inner.files.len(),
            epoch: inner.epoch,
        }
    }
}
