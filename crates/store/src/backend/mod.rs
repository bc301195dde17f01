//! Storage backend abstraction for table files.
//!
//! A table file is small enough to be rewritten as a whole on every
//! persist, so the backend works on complete images plus one positional
//! write used to update the header in place. Both the file-based
//! (production) and in-memory (testing) implementations hold the image for
//! exactly one table.

mod file;
mod memory;

pub use file::FileBackend;
pub use memory::InMemoryBackend;

use crate::error::Result;

/// Storage backend trait for abstracting table file I/O.
pub trait StorageBackend: Send + Sync {
    /// Reads the complete file image.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the read fails.
    fn read_all(&self) -> Result<Vec<u8>>;

    /// Replaces the complete file image, truncating any trailing bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the write fails.
    fn replace(&self, bytes: &[u8]) -> Result<()>;

    /// Overwrites `bytes.len()` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the write fails.
    fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<()>;

    /// Flushes all writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the sync fails.
    fn sync(&self) -> Result<()>;

    /// Returns the current image size in bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the size cannot be determined.
    fn len(&self) -> Result<u64>;

    /// Returns `true` if nothing has been written yet.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the size cannot be determined.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Path or description used in error messages.
    fn origin(&self) -> &str;
}
