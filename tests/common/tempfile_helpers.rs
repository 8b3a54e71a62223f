//! Helper functions for tempfile/tempdir usage in tests

use anyhow::Context;
use std::path::PathBuf;

/// Create a temp directory with a helpful error message.
pub fn create_temp_dir() -> anyhow::Result<tempfile::TempDir> {
    tempfile::tempdir().context("Failed to create temporary directory for test")
}

/// A path inside the temp dir that does not exist.
pub fn missing_dir() -> PathBuf {
    std::env::temp_dir().join(format!("aotforge_missing_{}", std::process::id()))
}

pub use tempfile::TempDir;
