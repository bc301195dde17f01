//! Scratch directories holding table files.

// Helpers fail the calling test on any I/O error
#![allow(clippy::expect_used)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A database root that is deleted when dropped.
///
/// Tests open tables under [`path`](Self::path) and inspect or damage the
/// resulting files with [`read`](Self::read) and [`write`](Self::write).
///
/// ```
/// use simpledb_test_utils::TestDir;
///
/// let dir = TestDir::new();
/// assert!(dir.table_file("countries").ends_with("countries.dat"));
/// ```
pub struct TestDir {
    root: TempDir,
}

impl TestDir {
    /// Creates an empty root.
    ///
    /// # Panics
    ///
    /// If the system temp directory is unusable.
    #[must_use]
    pub fn new() -> Self {
        Self { root: tempfile::tempdir().expect("create database root") }
    }

    /// Root directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// `relative` resolved against the root.
    #[must_use]
    pub fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.path().join(relative)
    }

    /// Where a table named `table` lives when no file name is configured.
    #[must_use]
    pub fn table_file(&self, table: &str) -> PathBuf {
        self.join(format!("{table}.dat"))
    }

    /// Raw bytes of a file under the root.
    ///
    /// # Panics
    ///
    /// If the file is missing or unreadable.
    #[must_use]
    pub fn read(&self, relative: impl AsRef<Path>) -> Vec<u8> {
        let path = self.join(relative);
        std::fs::read(&path).unwrap_or_else(|e| panic!("read {}: {e}", path.display()))
    }

    /// Replaces a file under the root with `bytes`.
    ///
    /// # Panics
    ///
    /// If the file cannot be written.
    pub fn write(&self, relative: impl AsRef<Path>, bytes: &[u8]) {
        let path = self.join(relative);
        std::fs::write(&path, bytes).unwrap_or_else(|e| panic!("write {}: {e}", path.display()));
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}
