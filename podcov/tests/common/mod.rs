#![allow(dead_code)]

pub mod assertions;
pub mod fixtures;
pub mod logging;

pub use assertions::{assert_contains, assert_no_blobs, assert_path_exists};
pub use fixtures::{LocalRelay, SourceTree, client_for};
pub use logging::init_test_logging;
