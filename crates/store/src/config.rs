//! Table and database configuration.
//!
//! [`TableOptions`] carries the physical settings of one table file (where it
//! lives, how it is paged, compressed, cached and flushed). Options are
//! validated when built and again when a table opens, so values loaded
//! through serde go through the same checks.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    codec::Compression,
    error::{Error, Result},
};

/// Default physical page size: 8 KB.
pub const DEFAULT_PAGE_SIZE: usize = 8192;

/// Smallest accepted page size.
pub const MIN_PAGE_SIZE: usize = 64;

/// Largest accepted page size: 1 MB.
pub const MAX_PAGE_SIZE: usize = 1 << 20;

/// Extension appended to table file names that have none.
pub const DEFAULT_EXTENSION: &str = "dat";

/// Default bound on waiting for a table lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Whether decoded rows stay in memory between operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CachingStrategy {
    /// Rows are decoded from disk for every operation.
    None,
    /// Rows stay resident for the lifetime of the table.
    #[default]
    Memory,
    /// Rows are loaded on first read and dropped after the next write.
    Lazy,
}

/// When mutations reach the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WriteStrategy {
    /// Every mutation is written and synced before it returns.
    #[default]
    Forced,
    /// Mutations stay in memory until [`Table::force_write`](crate::Table::force_write)
    /// or close.
    Lazy,
}

/// Physical settings of one table.
///
/// # Validation Rules
///
/// - `page_size` must be within 64..=1048576 bytes
/// - `compression_level`, if set, must be within the algorithm's range
///   (brotli 0-11, zstd 1-22)
/// - `lock_timeout_ms` must be > 0
/// - `domain` must be a relative path
///
/// # Example
///
/// ```
/// # use simpledb_store::{CachingStrategy, Compression, TableOptions};
/// let options = TableOptions::builder()
///     .domain("geo")
///     .page_size(4096)
///     .compression(Compression::Brotli)
///     .caching(CachingStrategy::Lazy)
///     .build()
///     .expect("valid table options");
/// assert_eq!(options.file_name_for("countries"), "countries.dat");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableOptions {
    /// Sub-directory under the database root.
    #[serde(default)]
    pub domain: Option<String>,
    /// File name override. `.dat` is appended when it has no extension.
    #[serde(default)]
    pub file_name: Option<String>,
    /// Physical page size in bytes.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Payload compression.
    #[serde(default)]
    pub compression: Compression,
    /// Compression level; the algorithm's default when unset.
    #[serde(default)]
    pub compression_level: Option<i32>,
    /// Row caching policy.
    #[serde(default)]
    pub caching: CachingStrategy,
    /// Write policy.
    #[serde(default)]
    pub write_strategy: WriteStrategy,
    /// Lock wait bound in milliseconds.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

#[bon::bon]
impl TableOptions {
    /// Creates validated table options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOptions`] if any value is out of range.
    #[builder]
    pub fn new(
        #[builder(into)] domain: Option<String>,
        #[builder(into)] file_name: Option<String>,
        #[builder(default = DEFAULT_PAGE_SIZE)] page_size: usize,
        #[builder(default)] compression: Compression,
        compression_level: Option<i32>,
        #[builder(default)] caching: CachingStrategy,
        #[builder(default)] write_strategy: WriteStrategy,
        #[builder(default = DEFAULT_LOCK_TIMEOUT)] lock_timeout: Duration,
    ) -> Result<Self> {
        let options = Self {
            domain,
            file_name,
            page_size,
            compression,
            compression_level,
            caching,
            write_strategy,
            lock_timeout_ms: u64::try_from(lock_timeout.as_millis()).unwrap_or(u64::MAX),
        };
        options.validate()?;
        Ok(options)
    }
}

impl TableOptions {
    /// Validates the option values.
    ///
    /// Call after deserialization to ensure values are within valid ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOptions`] if any value is out of range.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(Error::InvalidOptions { message });

        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return invalid(format!(
                "page_size must be {MIN_PAGE_SIZE}-{MAX_PAGE_SIZE}, got {}",
                self.page_size
            ));
        }
        if let Some(level) = self.compression_level {
            let (min, max) = self.compression.level_bounds();
            if level < min || level > max {
                return invalid(format!(
                    "compression_level for {:?} must be {min}-{max}, got {level}",
                    self.compression
                ));
            }
        }
        if self.lock_timeout_ms == 0 {
            return invalid("lock_timeout must be > 0".to_string());
        }
        if let Some(domain) = &self.domain {
            if Path::new(domain).is_absolute() {
                return invalid(format!("domain must be a relative path, got {domain}"));
            }
        }
        if let Some(name) = &self.file_name {
            if name.trim().is_empty() {
                return invalid("file_name must not be empty".to_string());
            }
        }
        Ok(())
    }

    /// Lock wait bound.
    #[inline]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Effective compression level.
    #[inline]
    pub fn effective_compression_level(&self) -> i32 {
        self.compression_level.unwrap_or_else(|| self.compression.default_level())
    }

    /// File name for `table`, with the default extension applied.
    pub fn file_name_for(&self, table: &str) -> String {
        let name = self.file_name.as_deref().unwrap_or(table);
        if Path::new(name).extension().is_some() {
            name.to_string()
        } else {
            format!("{name}.{DEFAULT_EXTENSION}")
        }
    }

    /// Path of the table file relative to the database root.
    pub fn relative_path(&self, table: &str) -> PathBuf {
        let file = self.file_name_for(table);
        match &self.domain {
            Some(domain) => Path::new(domain).join(file),
            None => PathBuf::from(file),
        }
    }
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            domain: None,
            file_name: None,
            page_size: DEFAULT_PAGE_SIZE,
            compression: Compression::None,
            compression_level: None,
            caching: CachingStrategy::Memory,
            write_strategy: WriteStrategy::Forced,
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_lock_timeout_ms() -> u64 {
    30_000
}

/// Database-wide configuration.
#[derive(Debug, Clone, bon::Builder)]
pub struct DatabaseConfig {
    /// Directory holding all table files.
    #[builder(into)]
    pub root: PathBuf,
    /// Options used by [`Database::open_table`](crate::Database::open_table).
    #[builder(default)]
    pub table_defaults: TableOptions,
}
