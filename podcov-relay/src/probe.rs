//! Line probes for programs that record their own coverage.
//!
//! A [`LineTracer`] turns `file!()`/`line!()` pairs into absolute paths
//! under a source root and records them into the shared store. The
//! [`probe!`](crate::probe) macro is the intended call site.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use podcov_common::SnapshotStore;

/// Records source locations into a [`SnapshotStore`].
#[derive(Debug, Clone)]
pub struct LineTracer {
    store: Arc<SnapshotStore>,
    root: PathBuf,
}

impl LineTracer {
    /// `root` is prepended to the relative paths `file!()` yields.
    pub fn new(store: Arc<SnapshotStore>, root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            root: root.into(),
        }
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path recorded for a `file!()` value.
    pub fn resolve(&self, file: &str) -> String {
        let path = Path::new(file);
        if path.is_absolute() {
            file.to_string()
        } else {
            self.root.join(path).to_string_lossy().into_owned()
        }
    }

    pub fn hit(&self, file: &str, line: u32) {
        self.store.record(&self.resolve(file), line);
    }
}

/// Record the current source line through a [`LineTracer`].
#[macro_export]
macro_rules! probe {
    ($tracer:expr) => {
        $tracer.hit(file!(), line!())
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_files_are_rooted() {
        let tracer = LineTracer::new(Arc::new(SnapshotStore::new()), "/app");
        assert_eq!(tracer.resolve("demo/main.rs"), "/app/demo/main.rs");
        assert_eq!(tracer.resolve("/abs/x.rs"), "/abs/x.rs");
    }

    #[test]
    fn probe_macro_records_call_site() {
        let tracer = LineTracer::new(Arc::new(SnapshotStore::new()), "/app");
        let line = line!() + 1;
        crate::probe!(tracer);

        let snapshot = tracer.store().snapshot();
        let (path, record) = snapshot.iter().next().unwrap();
        assert!(path.starts_with("/app/"));
        assert!(path.ends_with("probe.rs"));
        assert!(record.lines.contains(&line));
    }
}
