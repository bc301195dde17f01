//! Table files on disk.
//!
//! The file is opened once per table and held with an exclusive advisory
//! lock (`fs2`), so a second handle on the same file, in this process or
//! another, fails with [`Error::FileLocked`] instead of silently
//! interleaving writes. Header updates overwrite the first bytes in place;
//! full persists rewrite the image and truncate the remainder.

use std::{
    fs::{self, File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use fs2::FileExt;
use parking_lot::Mutex;
use tracing::debug;

use super::StorageBackend;
use crate::error::{Error, Result};

/// Storage backed by one locked table file.
///
/// The handle sits behind a mutex because reads and writes share its
/// cursor.
pub struct FileBackend {
    file: Mutex<File>,
    path: PathBuf,
    origin: String,
    created: bool,
}

impl FileBackend {
    /// Opens a table file, creating it (and its parent directories) if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be opened or created, and
    /// [`Error::FileLocked`] if another handle holds its lock.
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let origin = path.display().to_string();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let created = !path.exists();
        let file =
            OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path)?;

        if FileExt::try_lock_exclusive(&file).is_err() {
            return Err(Error::FileLocked { path: origin });
        }
        debug!(path = %origin, created, "Table file opened");

        Ok(Self { file: Mutex::new(file), path: path.to_path_buf(), origin, created })
    }

    /// Whether this open created the file.
    #[inline]
    pub fn created(&self) -> bool {
        self.created
    }

    /// Location of the table file.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_all(&self) -> Result<Vec<u8>> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn replace(&self, bytes: &[u8]) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(bytes)?;
        file.set_len(bytes.len() as u64)?;
        Ok(())
    }

    fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.lock().sync_data()?;
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    fn origin(&self) -> &str {
        &self.origin
    }
}

impl Drop for FileBackend {
    fn drop(&mut self) {
        if let Err(error) = FileExt::unlock(&*self.file.get_mut()) {
            debug!(path = %self.origin, %error, "Failed to release table file lock");
        }
    }
}
