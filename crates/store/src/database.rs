//! The owned registry of open tables.
//!
//! A [`Database`] replaces process-wide state: it owns the [`Catalog`] that
//! every table opened through it registers with, and resolves table files
//! under one root directory.
//!
//! ```no_run
//! use serde::{Deserialize, Serialize};
//! use simpledb_store::{
//!     ColumnDef, ColumnKind, ColumnValue, Database, DatabaseConfig, IndexDef, Record, TableSchema,
//! };
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct Country {
//!     id: i64,
//!     code: String,
//! }
//!
//! impl Record for Country {
//!     fn id(&self) -> i64 {
//!         self.id
//!     }
//!
//!     fn set_id(&mut self, id: i64) {
//!         self.id = id;
//!     }
//!
//!     fn column(&self, name: &str) -> Option<ColumnValue> {
//!         (name == "code").then(|| self.code.as_str().into())
//!     }
//! }
//!
//! # fn main() -> simpledb_store::Result<()> {
//! let db = Database::open(DatabaseConfig::builder().root("/var/lib/app/data").build())?;
//! let schema = TableSchema::builder()
//!     .name("countries")
//!     .columns(vec![ColumnDef::new("code", ColumnKind::Text)])
//!     .indexes(vec![IndexDef::unique("ix_code", ["code"])])
//!     .build();
//! let countries = db.open_table::<Country>(schema)?;
//! countries.insert_one(Country { id: 0, code: "GB".into() })?;
//! countries.close()?;
//! # Ok(())
//! # }
//! ```

use std::{
    collections::BTreeMap,
    fs,
    path::PathBuf,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{
    config::{DatabaseConfig, TableOptions},
    error::{Error, Result},
    foreign_key::{ForeignKeyManager, ReferenceTarget},
    record::Record,
    schema::TableSchema,
    table::{Table, TableExtensions},
};

/// Open tables of one database and the foreign keys between them.
///
/// Tables register on open and unregister on close. The catalog lock and
/// the foreign-key registry lock are both leaves: neither is held while
/// calling into a table.
#[derive(Debug, Default)]
pub struct Catalog {
    foreign_keys: ForeignKeyManager,
    tables: Mutex<BTreeMap<String, String>>,
}

impl Catalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// The foreign-key registry.
    #[inline]
    pub fn foreign_keys(&self) -> &ForeignKeyManager {
        &self.foreign_keys
    }

    /// Names of the open tables, sorted.
    pub fn open_tables(&self) -> Vec<String> {
        self.tables.lock().keys().cloned().collect()
    }

    /// Location of an open table's file, if it is open.
    pub fn origin_of(&self, table: &str) -> Option<String> {
        self.tables.lock().get(table).cloned()
    }

    pub(crate) fn register(
        &self,
        name: &str,
        origin: &str,
        target: Weak<dyn ReferenceTarget>,
    ) -> Result<()> {
        let mut tables = self.tables.lock();
        if tables.contains_key(name) {
            return Err(Error::TableAlreadyRegistered { table: name.to_string() });
        }
        self.foreign_keys.register_table(name, target)?;
        tables.insert(name.to_string(), origin.to_string());
        Ok(())
    }

    pub(crate) fn unregister(&self, name: &str) -> Result<()> {
        let mut tables = self.tables.lock();
        if tables.remove(name).is_none() {
            return Err(Error::TableNotRegistered { table: name.to_string() });
        }
        self.foreign_keys.unregister_table(name)
    }
}

/// A set of tables under one root directory.
#[derive(Debug, Clone)]
pub struct Database {
    config: DatabaseConfig,
    catalog: Arc<Catalog>,
}

impl Database {
    /// Opens a database, creating its root directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOptions`] if the default table options are
    /// invalid, and [`Error::Io`] if the root cannot be created.
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        config.table_defaults.validate()?;
        fs::create_dir_all(&config.root)?;
        info!(root = %config.root.display(), "Opened database");
        Ok(Self { config, catalog: Arc::new(Catalog::new()) })
    }

    /// Database configuration.
    #[inline]
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Registry shared by this database's tables.
    #[inline]
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Names of the open tables, sorted.
    pub fn open_tables(&self) -> Vec<String> {
        self.catalog.open_tables()
    }

    /// File location of a table with the given options.
    pub fn table_path(&self, table: &str, options: &TableOptions) -> PathBuf {
        self.config.root.join(options.relative_path(table))
    }

    /// Opens a table with the default options and no seed data or hooks.
    ///
    /// # Errors
    ///
    /// See [`open_table_with`](Self::open_table_with).
    pub fn open_table<R: Record>(&self, schema: TableSchema) -> Result<Table<R>> {
        self.open_table_with(schema, self.config.table_defaults.clone(), TableExtensions::default())
    }

    /// Opens (creating if absent) a table file under the root.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TableAlreadyRegistered`] if a table with the same name
    /// is open (checked before the file is touched), schema and option
    /// validation errors, [`Error::FileLocked`] if the file is held by another
    /// handle, corruption errors if the file cannot be decoded, and any error
    /// raised while applying seed data.
    pub fn open_table_with<R: Record>(
        &self,
        schema: TableSchema,
        options: TableOptions,
        extensions: TableExtensions<R>,
    ) -> Result<Table<R>> {
        if let Some(open_at) = self.catalog.origin_of(&schema.name) {
            debug!(table = %schema.name, path = %open_at, "Table is already open");
            return Err(Error::TableAlreadyRegistered { table: schema.name });
        }
        let path = self.table_path(&schema.name, &options);
        Table::open(path, schema, options, &self.catalog, extensions)
    }
}
