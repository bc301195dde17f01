//! simpledb-store: an embedded record store with one file per table.
//!
//! Each table holds a collection of serde-serializable rows with an `i64`
//! primary key. The whole collection is persisted as one paged, optionally
//! compressed image:
//!
//! - **One file per table**: 53-byte header, then fixed-size page entries
//! - **Unique indexes**: single or composite columns, checked before writes
//! - **Foreign keys**: checked on insert/update, cascade or reset on delete
//! - **Versioned format**: legacy files stay readable, new ones are written
//!   in the current format
//! - **Seed data**: versioned initial rows applied once per version
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                Database API                  │
//! │     (open, open_table, catalog, paths)      │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │                Table Layer                   │
//! │ (select, insert, update, delete, sequences) │
//! └───────┬────────────────────────────┬────────┘
//!         │                            │
//! ┌───────▼─────────────┐   ┌──────────▼────────┐
//! │  Index / Batch      │   │  Foreign Keys     │
//! │  (unique keys)      │   │  (registry)       │
//! └───────┬─────────────┘   └───────────────────┘
//!         │
//! ┌───────▼─────────────────────────────────────┐
//! │               Codec Layer                    │
//! │  (header, pages, compression, versions)     │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │            Storage Backend                   │
//! │      (FileBackend / InMemoryBackend)        │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! See [`Database`] for a complete example.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
// Test code style - allow field reassignment after default
#![cfg_attr(test, allow(clippy::field_reassign_with_default))]

pub mod backend;
pub mod batch;
pub mod codec;
pub mod config;
pub mod database;
pub mod error;
pub mod foreign_key;
pub mod header;
pub mod index;
pub mod integrity;
pub mod record;
pub mod schema;
pub mod table;
pub mod types;

// Re-export commonly used types
pub use backend::{FileBackend, InMemoryBackend, StorageBackend};
pub use batch::BatchUpdateCoordinator;
pub use codec::{BinaryPageCodec, Compression, FormatCodec, VersionedCodecFactory};
pub use config::{CachingStrategy, DatabaseConfig, TableOptions, WriteStrategy};
pub use database::{Catalog, Database};
pub use error::{Error, Result};
pub use foreign_key::{
    ForeignKeyManager, ForeignKeyUsage, ReferenceTarget, ReferenceUse, Relationship,
};
pub use header::{CURRENT_FORMAT_VERSION, HEADER_SIZE, MAGIC, TableHeader};
pub use index::IndexManager;
pub use integrity::{ScrubError, ScrubResult, Severity};
pub use record::{Record, SeedProvider, TableHooks};
pub use schema::{
    ColumnDef, CompositeKeyStrategy, ForeignKeyAttributes, ForeignKeyDef, IndexDef, TableSchema,
};
pub use table::{InsertOptions, Table, TableExtensions, TablePhase, TableStats};
pub use types::{ColumnKind, ColumnValue, IndexKey, SortOrder};
