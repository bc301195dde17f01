//! In-memory storage backend for testing.

use parking_lot::RwLock;

use super::StorageBackend;
use crate::error::Result;

/// In-memory storage backend for testing.
///
/// The image is lost when the backend is dropped. Tests use
/// [`from_bytes`](Self::from_bytes) and [`snapshot`](Self::snapshot) to
/// inspect or corrupt it.
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
    origin: String,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::from_bytes(Vec::new())
    }

    /// Creates a backend holding an existing image.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { data: RwLock::new(bytes), origin: "<memory>".to_string() }
    }

    /// Names the backend in error messages.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Returns a copy of the current image.
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_all(&self) -> Result<Vec<u8>> {
        Ok(self.data.read().clone())
    }

    fn replace(&self, bytes: &[u8]) -> Result<()> {
        let mut data = self.data.write();
        data.clear();
        data.extend_from_slice(bytes);
        Ok(())
    }

    fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        let mut data = self.data.write();
        let start = offset as usize;
        let end = start + bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn origin(&self) -> &str {
        &self.origin
    }
}
