use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use podcov::{ClientConfig, CoverageClient, DirectTunnel, TunnelKind};
use podcov_common::{RetryPolicy, SnapshotStore};
use podcov_relay::{RelayConfig, RelayHandle, RelayServer};
use tempfile::TempDir;

/// A local checkout the captured `/app/...` paths should map onto.
pub struct SourceTree {
    pub dir: TempDir,
}

impl SourceTree {
    pub fn new() -> Self {
        crate::test_log!("FIXTURE: Creating local source tree");

        let dir = TempDir::new().expect("Failed to create temp dir");
        let tree = Self { dir };
        tree.write("app.py", "import os\n\ndef main():\n    return 1\n\ndef unused():\n    return 2\n");
        tree.write("lib/util.py", "def helper():\n    return 3\n");
        tree
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(rel);
        fs::create_dir_all(path.parent().expect("file has a parent")).expect("Failed to create parent dir");
        fs::write(&path, content).expect("Failed to write source file");
        path
    }

    pub fn local(&self, rel: &str) -> String {
        self.dir.path().join(rel).to_string_lossy().into_owned()
    }
}

/// A relay on a loopback port with its store.
pub struct LocalRelay {
    pub store: Arc<SnapshotStore>,
    pub handle: RelayHandle,
}

impl LocalRelay {
    pub fn start() -> Self {
        crate::test_log!("FIXTURE: Starting loopback relay");

        let store = Arc::new(SnapshotStore::new());
        let handle = RelayServer::start(&RelayConfig::loopback(), store.clone()).expect("Failed to start relay");
        Self { store, handle }
    }

    pub fn port(&self) -> u16 {
        self.handle.local_addr().port()
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        jitter: 0.0,
    }
}

/// Client reaching `relay` directly, writing into `output_dir`.
pub fn client_for(relay: &LocalRelay, output_dir: &Path) -> CoverageClient {
    let config = ClientConfig {
        tunnel: TunnelKind::Direct,
        pod: Some("127.0.0.1".to_string()),
        remote_port: relay.port(),
        output_dir: output_dir.to_path_buf(),
        timeout: Duration::from_secs(10),
        retry: fast_retry(),
        health_retry: fast_retry(),
        ..ClientConfig::default()
    };
    CoverageClient::with_backend(config, Box::new(DirectTunnel::new(fast_retry()))).unwrap()
}
