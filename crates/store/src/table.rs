//! Table lifecycle and row operations.
//!
//! A [`Table`] owns one table file, its decoded rows (subject to the caching
//! strategy) and its unique indexes, all behind one timed lock. Every
//! mutation follows the same order:
//!
//! 1. `before_*` hooks
//! 2. foreign keys into other tables are checked (own lock not held)
//! 3. under the lock: uniqueness and self-references are validated against
//!    the stored rows, a candidate row set is built and persisted
//! 4. only after the persist succeeds are the cached rows, the header and the
//!    indexes replaced
//! 5. the lock is released and `after_*` hooks run
//!
//! A failed operation therefore leaves the table exactly as it was.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::{Arc, Weak},
};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::{
    backend::{FileBackend, StorageBackend},
    batch::BatchUpdateCoordinator,
    codec::{BinaryPageCodec, Compression},
    config::{CachingStrategy, TableOptions, WriteStrategy},
    database::Catalog,
    error::{Error, Result},
    foreign_key::{ForeignKeyUsage, ReferenceTarget, ReferenceUse, Relationship},
    header::TableHeader,
    index::IndexManager,
    record::{Record, SeedProvider, TableHooks, column_value},
    schema::{ForeignKeyAttributes, ForeignKeyDef, ID_COLUMN, TableSchema},
    types::{ColumnValue, IndexKey},
};

/// Lifecycle phase of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TablePhase {
    /// Not usable; the file handle is released.
    Closed,
    /// Opening or creating the file.
    Opening,
    /// Checking the header and decoding the stored rows.
    Validating,
    /// Steady state; all operations are legal.
    Open,
    /// Flushing pending writes and unregistering.
    Closing,
}

/// Options for [`Table::insert_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, bon::Builder)]
pub struct InsertOptions {
    /// Assign ids from the primary sequence. When `false`, the ids already
    /// set on the rows are kept and the sequence is advanced past them.
    #[builder(default = true)]
    pub assign_primary_key: bool,
}

impl Default for InsertOptions {
    fn default() -> Self {
        Self { assign_primary_key: true }
    }
}

/// Optional collaborators of a table.
#[derive(bon::Builder)]
pub struct TableExtensions<R: Record> {
    /// Seed data applied when the table opens.
    seed: Option<Box<dyn SeedProvider<R>>>,
    /// Mutation callbacks.
    hooks: Option<Arc<dyn TableHooks<R>>>,
}

impl<R: Record> Default for TableExtensions<R> {
    fn default() -> Self {
        Self { seed: None, hooks: None }
    }
}

/// Point-in-time description of a table.
///
/// Layout fields (`page_count`, lengths, `compression`) describe the image
/// last written to disk; with a lazy write strategy they lag until the next
/// [`force_write`](Table::force_write).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStats {
    /// Rows currently stored, including unwritten changes.
    pub record_count: usize,
    /// Last issued primary key.
    pub primary_sequence: i64,
    /// Auxiliary counter.
    pub secondary_sequence: i64,
    /// Highest applied seed-data version.
    pub seed_version: u32,
    /// On-disk format version.
    pub format_version: u16,
    /// Compression of the stored payload.
    pub compression: Compression,
    /// Pages in the stored image.
    pub page_count: i32,
    /// Stored payload bytes.
    pub stored_length: i32,
    /// Payload bytes before compression.
    pub uncompressed_length: i32,
    /// Whether changes are waiting for a write.
    pub pending_write: bool,
}

/// Handle to an open table. Clones share the same table.
pub struct Table<R: Record, B: StorageBackend + 'static = FileBackend> {
    inner: Arc<TableInner<R, B>>,
}

impl<R: Record, B: StorageBackend + 'static> Clone for Table<R, B> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<R: Record, B: StorageBackend + 'static> std::fmt::Debug for Table<R, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.inner.name)
            .field("origin", &self.inner.origin)
            .finish_non_exhaustive()
    }
}

impl<R: Record> Table<R, FileBackend> {
    /// Opens (creating if absent) the table file at `path`.
    ///
    /// # Errors
    ///
    /// See [`open_with_backend`](Table::open_with_backend); additionally
    /// [`Error::FileLocked`] if another handle holds the file.
    pub fn open(
        path: impl AsRef<Path>,
        schema: TableSchema,
        options: TableOptions,
        catalog: &Arc<Catalog>,
        extensions: TableExtensions<R>,
    ) -> Result<Self> {
        let backend = FileBackend::open_or_create(path)?;
        Self::open_with_backend(backend, schema, options, catalog, extensions)
    }
}

impl<R: Record, B: StorageBackend + 'static> Table<R, B> {
    /// Opens a table on an existing backend.
    ///
    /// An empty backend is initialized with a header and zero rows. A
    /// non-empty one is decoded and validated; on failure the backend is
    /// released and the table never becomes usable. Indexes are rebuilt from
    /// the stored rows, the table registers with `catalog`, and finally any
    /// seed versions not yet applied are inserted.
    ///
    /// # Errors
    ///
    /// Returns schema or option validation errors, corruption errors if the
    /// stored image is malformed, [`Error::TableAlreadyRegistered`] if a
    /// table with the same name is open, and any error raised while seeding.
    pub fn open_with_backend(
        backend: B,
        schema: TableSchema,
        options: TableOptions,
        catalog: &Arc<Catalog>,
        extensions: TableExtensions<R>,
    ) -> Result<Self> {
        schema.validate()?;
        options.validate()?;

        let name = schema.name.clone();
        let origin = backend.origin().to_string();
        let codec = BinaryPageCodec::from_options(&options);
        debug!(table = %name, path = %origin, phase = ?TablePhase::Opening, "Opening table");

        let created = backend.is_empty()?;
        let (header, rows) = if created {
            let mut header = TableHeader::new(0);
            let bytes = codec.encode::<R>(&mut header, &[], &origin)?;
            backend.replace(&bytes)?;
            backend.sync()?;
            (header, Vec::new())
        } else {
            debug!(
                table = %name,
                path = %origin,
                phase = ?TablePhase::Validating,
                "Validating table file"
            );
            let bytes = backend.read_all()?;
            BinaryPageCodec::decode::<R>(&bytes, &origin)?
        };

        let mut indexes = BatchUpdateCoordinator::new(&schema);
        indexes.rebuild(&rows)?;

        let record_count = rows.len();
        let format_version = header.format_version;
        let rows = match options.caching {
            CachingStrategy::None => None,
            CachingStrategy::Memory | CachingStrategy::Lazy => Some(rows),
        };

        let TableExtensions { seed, hooks } = extensions;
        let inner = Arc::new(TableInner {
            name: name.clone(),
            origin: origin.clone(),
            schema,
            options,
            codec,
            catalog: Arc::clone(catalog),
            hooks,
            state: Mutex::new(TableState {
                phase: TablePhase::Open,
                backend: Some(backend),
                header,
                rows,
                rows_dirty: false,
                header_dirty: false,
                indexes,
            }),
        });

        let target: Weak<dyn ReferenceTarget> = Arc::downgrade(&inner) as Weak<dyn ReferenceTarget>;
        if let Err(error) = catalog.register(&name, &origin, target) {
            inner.state.lock().phase = TablePhase::Closed;
            return Err(error);
        }
        for fk in &inner.schema.foreign_keys {
            catalog.foreign_keys().add_relationship(Relationship {
                source_table: name.clone(),
                source_column: fk.column.clone(),
                target_table: fk.target_table.clone(),
                target_column: fk.target_column.clone(),
                attributes: fk.attributes,
            });
        }
        info!(
            table = %name,
            path = %origin,
            created,
            records = record_count,
            format_version,
            "Table opened"
        );

        let table = Self { inner };
        if let Some(seed) = seed {
            if let Err(error) = table.apply_seed(seed.as_ref()) {
                if let Err(close_error) = table.close() {
                    warn!(
                        table = %name,
                        error = %close_error,
                        "Failed to close table after seeding error"
                    );
                }
                return Err(error);
            }
        }
        Ok(table)
    }

    /// Table name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Path or description of the table file.
    #[inline]
    pub fn origin(&self) -> &str {
        &self.inner.origin
    }

    /// Declared schema.
    #[inline]
    pub fn schema(&self) -> &TableSchema {
        &self.inner.schema
    }

    /// Physical options.
    #[inline]
    pub fn options(&self) -> &TableOptions {
        &self.inner.options
    }

    /// Current lifecycle phase.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockTimeout`] if the lock is not acquired in time.
    pub fn phase(&self) -> Result<TablePhase> {
        Ok(self.inner.lock()?.phase)
    }

    /// Returns every row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TableClosed`], [`Error::LockTimeout`], or a
    /// corruption error if rows must be decoded from disk.
    pub fn select(&self) -> Result<Vec<R>> {
        self.inner.read(|rows, _| Ok(rows.to_vec()))
    }

    /// Returns the rows matching `predicate`.
    ///
    /// # Errors
    ///
    /// See [`select`](Self::select).
    pub fn select_where(&self, predicate: impl Fn(&R) -> bool) -> Result<Vec<R>> {
        self.inner.read(|rows, _| Ok(rows.iter().filter(|row| predicate(row)).cloned().collect()))
    }

    /// Returns the row with primary key `id`.
    ///
    /// # Errors
    ///
    /// See [`select`](Self::select).
    pub fn select_by_id(&self, id: i64) -> Result<Option<R>> {
        self.inner.read(|rows, indexes| {
            if !indexes.primary().contains(&IndexKey::I64(id)) {
                return Ok(None);
            }
            Ok(rows.iter().find(|row| row.id() == id).cloned())
        })
    }

    /// Returns the row whose key in unique index `index` equals `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownIndex`] if the table declares no such index,
    /// otherwise see [`select`](Self::select).
    pub fn select_by_index(&self, index: &str, key: impl Into<IndexKey>) -> Result<Option<R>> {
        let key = key.into();
        self.inner.read(|rows, indexes| {
            let index = self.inner.index(indexes, index)?;
            if !index.contains(&key) {
                return Ok(None);
            }
            Ok(rows.iter().find(|row| index.key_for(*row).as_ref() == Some(&key)).cloned())
        })
    }

    /// Whether unique index `index` holds `key`. Answered from the index alone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownIndex`], [`Error::TableClosed`] or
    /// [`Error::LockTimeout`].
    pub fn contains_key(&self, index: &str, key: impl Into<IndexKey>) -> Result<bool> {
        let key = key.into();
        let state = self.inner.lock_open()?;
        Ok(self.inner.index(&state.indexes, index)?.contains(&key))
    }

    /// Number of stored rows, without decoding or cloning them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TableClosed`] or [`Error::LockTimeout`].
    pub fn count(&self) -> Result<usize> {
        let state = self.inner.lock_open()?;
        Ok(state.indexes.primary().len())
    }

    /// Inserts rows, assigning primary keys from the sequence.
    ///
    /// # Errors
    ///
    /// See [`insert_with`](Self::insert_with).
    pub fn insert(&self, rows: Vec<R>) -> Result<Vec<R>> {
        self.inner.insert_rows(rows, InsertOptions::default(), None)
    }

    /// Inserts one row, returning it with its assigned id.
    ///
    /// # Errors
    ///
    /// See [`insert_with`](Self::insert_with).
    pub fn insert_one(&self, row: R) -> Result<R> {
        let mut inserted = self.inner.insert_rows(vec![row], InsertOptions::default(), None)?;
        inserted.pop().ok_or_else(|| Error::TableClosed { table: self.inner.name.clone() })
    }

    /// Inserts rows, returning them with their final ids.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ForeignKeyMissing`] for a reference to a missing
    /// row, [`Error::TableNotRegistered`] if a referenced table is not open,
    /// [`Error::UniqueIndexViolation`] if a key collides with a stored row or
    /// another inserted row, and persist errors. Nothing is stored on error.
    pub fn insert_with(&self, rows: Vec<R>, options: InsertOptions) -> Result<Vec<R>> {
        self.inner.insert_rows(rows, options, None)
    }

    /// Stores changed rows, matched by primary key. Rows equal to their
    /// stored version are skipped. Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RecordNotFound`] if an id is not stored, foreign key
    /// and uniqueness errors as for inserts, and persist errors.
    pub fn update(&self, rows: Vec<R>) -> Result<usize> {
        self.inner.update(rows)
    }

    /// Updates the row if its id is stored, otherwise inserts it.
    ///
    /// # Errors
    ///
    /// See [`update`](Self::update) and [`insert`](Self::insert).
    pub fn insert_or_update(&self, row: R) -> Result<R> {
        let exists = {
            let state = self.inner.lock_open()?;
            state.indexes.primary().contains(&IndexKey::I64(row.id()))
        };
        if exists {
            self.inner.update(vec![row.clone()])?;
            Ok(row)
        } else {
            self.insert_one(row)
        }
    }

    /// Deletes rows, matched by primary key. Returns the number of rows deleted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ForeignKeyInUse`] if another row still references a
    /// deleted row through a relationship that neither cascades nor resets to
    /// the default, and persist errors.
    pub fn delete(&self, rows: &[R]) -> Result<usize> {
        let ids: Vec<i64> = rows.iter().map(Record::id).collect();
        self.inner.delete_by_ids(&ids)
    }

    /// Deletes the row with primary key `id`, returning whether it existed.
    ///
    /// # Errors
    ///
    /// See [`delete`](Self::delete).
    pub fn delete_by_id(&self, id: i64) -> Result<bool> {
        Ok(self.inner.delete_by_ids(&[id])? > 0)
    }

    /// Deletes every row through the regular delete path.
    ///
    /// # Errors
    ///
    /// See [`delete`](Self::delete).
    pub fn truncate(&self) -> Result<usize> {
        let ids = self.inner.read(|rows, _| Ok(rows.iter().map(Record::id).collect::<Vec<_>>()))?;
        self.inner.delete_by_ids(&ids)
    }

    /// Advances the primary sequence by `increment` and returns the new value.
    ///
    /// Ids issued here are never assigned to inserted rows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIncrement`] for increments ≤ 0 or on
    /// overflow, and persist errors.
    pub fn next_sequence(&self, increment: i64) -> Result<i64> {
        self.inner.advance_sequence(increment, |header| &mut header.primary_sequence)
    }

    /// Advances the secondary sequence by `increment` and returns the new value.
    ///
    /// # Errors
    ///
    /// See [`next_sequence`](Self::next_sequence).
    pub fn next_secondary_sequence(&self, increment: i64) -> Result<i64> {
        self.inner.advance_sequence(increment, |header| &mut header.secondary_sequence)
    }

    /// Writes pending changes now, whatever the write strategy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TableClosed`], [`Error::LockTimeout`] or persist errors.
    pub fn force_write(&self) -> Result<()> {
        let mut state = self.inner.lock_open()?;
        let wrote = state.flush(&self.inner.name, &self.inner.codec)?;
        state.settle(self.inner.options.caching, wrote);
        Ok(())
    }

    /// Returns counters and layout fields.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TableClosed`] or [`Error::LockTimeout`].
    pub fn stats(&self) -> Result<TableStats> {
        let state = self.inner.lock_open()?;
        let header = &state.header;
        Ok(TableStats {
            record_count: state.indexes.primary().len(),
            primary_sequence: header.primary_sequence,
            secondary_sequence: header.secondary_sequence,
            seed_version: header.seed_version(),
            format_version: header.format_version,
            compression: header.compression,
            page_count: header.page_count,
            stored_length: header.stored_length,
            uncompressed_length: header.uncompressed_length,
            pending_write: state.rows_dirty || state.header_dirty,
        })
    }

    /// Flushes pending writes, unregisters the table and releases the file.
    ///
    /// Closing a closed table is a no-op. If the final write fails the table
    /// stays open so the caller can retry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockTimeout`] or the final write's error.
    pub fn close(&self) -> Result<()> {
        self.inner.close()
    }

    fn apply_seed(&self, provider: &dyn SeedProvider<R>) -> Result<()> {
        let mut version = self.inner.lock_open()?.header.seed_version();
        while let Some(next) = version.checked_add(1) {
            let Some(rows) = provider.seed(next) else { break };
            let count = rows.len();
            if rows.is_empty() {
                let mut state = self.inner.lock_open()?;
                let previous = state.header.seed_version();
                state.header.set_seed_version(next);
                state.header_dirty = true;
                if let Err(error) = state.flush(&self.inner.name, &self.inner.codec) {
                    state.header.set_seed_version(previous);
                    return Err(error);
                }
                state.settle(self.inner.options.caching, true);
            } else {
                // Rows and the reached version land in the same write.
                self.inner.insert_rows(rows, InsertOptions::default(), Some(next))?;
            }

            info!(table = %self.inner.name, version = next, rows = count, "Applied seed data");
            version = next;
        }
        Ok(())
    }
}

struct TableInner<R: Record, B: StorageBackend> {
    name: String,
    origin: String,
    schema: TableSchema,
    options: TableOptions,
    codec: BinaryPageCodec,
    catalog: Arc<Catalog>,
    hooks: Option<Arc<dyn TableHooks<R>>>,
    state: Mutex<TableState<R, B>>,
}

struct TableState<R, B> {
    phase: TablePhase,
    backend: Option<B>,
    header: TableHeader,
    rows: Option<Vec<R>>,
    /// Rows changed since the last write (lazy write strategy).
    rows_dirty: bool,
    /// Header changed since the last write (lazy sequence updates, seed marker).
    header_dirty: bool,
    indexes: BatchUpdateCoordinator,
}

impl<R: Record, B: StorageBackend> TableState<R, B> {
    fn backend(&self, table: &str) -> Result<&B> {
        self.backend.as_ref().ok_or_else(|| Error::TableClosed { table: table.to_string() })
    }

    /// Decodes the rows from disk if they are not cached.
    fn ensure_loaded(&mut self, table: &str) -> Result<()> {
        if self.rows.is_none() {
            let backend = self.backend(table)?;
            let bytes = backend.read_all()?;
            let (_, rows) = BinaryPageCodec::decode::<R>(&bytes, backend.origin())?;
            self.rows = Some(rows);
        }
        Ok(())
    }

    #[inline]
    fn rows(&self) -> &[R] {
        self.rows.as_deref().unwrap_or(&[])
    }

    /// Installs `candidate` as the stored rows, writing it first when the
    /// strategy is forced. On error nothing changes.
    fn commit(
        &mut self,
        table: &str,
        candidate: Vec<R>,
        mut header: TableHeader,
        codec: &BinaryPageCodec,
        strategy: WriteStrategy,
    ) -> Result<()> {
        match strategy {
            WriteStrategy::Forced => {
                let backend = self.backend(table)?;
                let bytes = codec.encode(&mut header, &candidate, backend.origin())?;
                backend.replace(&bytes)?;
                backend.sync()?;
                self.rows_dirty = false;
                self.header_dirty = false;
            },
            WriteStrategy::Lazy => {
                self.rows_dirty = true;
                debug!(table, records = candidate.len(), "Deferred table write");
            },
        }
        self.header = header;
        self.rows = Some(candidate);
        Ok(())
    }

    /// Writes pending rows (full image) or a pending header (in place).
    /// Returns whether anything was written.
    fn flush(&mut self, table: &str, codec: &BinaryPageCodec) -> Result<bool> {
        if self.rows_dirty {
            let backend = self.backend(table)?;
            let mut header = self.header.clone();
            let bytes = codec.encode(&mut header, self.rows(), backend.origin())?;
            backend.replace(&bytes)?;
            backend.sync()?;
            self.header = header;
            self.rows_dirty = false;
            self.header_dirty = false;
            return Ok(true);
        }
        if self.header_dirty {
            if let Some(backend) = &self.backend {
                backend.write_at(0, &self.header.to_bytes())?;
                backend.sync()?;
            }
            self.header_dirty = false;
            return Ok(true);
        }
        Ok(false)
    }

    /// Drops cached rows the caching strategy does not retain. Unwritten rows
    /// are always retained.
    fn settle(&mut self, caching: CachingStrategy, wrote: bool) {
        if self.rows_dirty {
            return;
        }
        let drop_rows = match caching {
            CachingStrategy::None => true,
            CachingStrategy::Lazy => wrote,
            CachingStrategy::Memory => false,
        };
        if drop_rows {
            self.rows = None;
        }
    }
}

impl<R: Record, B: StorageBackend + 'static> TableInner<R, B> {
    fn lock(&self) -> Result<MutexGuard<'_, TableState<R, B>>> {
        let timeout = self.options.lock_timeout();
        self.state
            .try_lock_for(timeout)
            .ok_or_else(|| Error::LockTimeout { table: self.name.clone(), timeout })
    }

    fn lock_open(&self) -> Result<MutexGuard<'_, TableState<R, B>>> {
        let state = self.lock()?;
        if state.phase != TablePhase::Open {
            return Err(Error::TableClosed { table: self.name.clone() });
        }
        Ok(state)
    }

    /// Runs `f` over the stored rows under the lock.
    fn read<T>(&self, f: impl FnOnce(&[R], &BatchUpdateCoordinator) -> Result<T>) -> Result<T> {
        let mut state = self.lock_open()?;
        let state = &mut *state;
        state.ensure_loaded(&self.name)?;
        let result = f(state.rows.as_deref().unwrap_or(&[]), &state.indexes);
        state.settle(self.options.caching, false);
        result
    }

    fn index<'a>(
        &self,
        indexes: &'a BatchUpdateCoordinator,
        name: &str,
    ) -> Result<&'a IndexManager> {
        indexes
            .get(name)
            .ok_or_else(|| Error::UnknownIndex {
                table: self.name.clone(),
                index: name.to_string(),
            })
    }

    /// Inserts `rows`; `seed_version`, when set, is stored in the same write.
    fn insert_rows(
        &self,
        mut rows: Vec<R>,
        options: InsertOptions,
        seed_version: Option<u32>,
    ) -> Result<Vec<R>> {
        if rows.is_empty() {
            self.lock_open()?;
            return Ok(rows);
        }
        if let Some(hooks) = &self.hooks {
            rows.iter().for_each(|row| hooks.before_insert(row));
        }
        self.check_external_references(&rows)?;

        let mut guard = self.lock_open()?;
        let state = &mut *guard;
        let mut header = state.header.clone();
        if let Some(version) = seed_version {
            header.set_seed_version(version);
        }
        if options.assign_primary_key {
            for row in &mut rows {
                header.primary_sequence = header
                    .primary_sequence
                    .checked_add(1)
                    .ok_or_else(|| Error::InvalidIncrement {
                        table: self.name.clone(),
                        increment: 1,
                    })?;
                row.set_id(header.primary_sequence);
            }
        } else if let Some(max) = rows.iter().map(Record::id).max() {
            header.primary_sequence = header.primary_sequence.max(max);
        }

        let added: Vec<&R> = rows.iter().collect();
        state.indexes.check_unique::<R>(&[], &added)?;

        state.ensure_loaded(&self.name)?;
        let mut candidate = state.rows().to_vec();
        candidate.extend(rows.iter().cloned());
        self.check_self_references(&candidate, &added)?;

        state.commit(&self.name, candidate, header, &self.codec, self.options.write_strategy)?;
        state.indexes.batch(|indexes| {
            for row in &rows {
                indexes.add_row(row);
            }
            Ok(())
        })?;
        state.settle(self.options.caching, true);
        drop(guard);

        debug!(table = %self.name, rows = rows.len(), "Inserted rows");
        if let Some(hooks) = &self.hooks {
            rows.iter().for_each(|row| hooks.after_insert(row));
        }
        Ok(rows)
    }

    fn update(&self, rows: Vec<R>) -> Result<usize> {
        if rows.is_empty() {
            self.lock_open()?;
            return Ok(0);
        }

        let changed = {
            let mut guard = self.lock_open()?;
            let state = &mut *guard;
            state.ensure_loaded(&self.name)?;
            let stored = state.rows();
            let positions = positions(stored);
            let mut changed = Vec::with_capacity(rows.len());
            for row in rows {
                let position = *positions
                    .get(&row.id())
                    .ok_or_else(|| Error::RecordNotFound {
                        table: self.name.clone(),
                        id: row.id(),
                    })?;
                if stored[position] != row {
                    changed.push(row);
                }
            }
            state.settle(self.options.caching, false);
            changed
        };
        if changed.is_empty() {
            return Ok(0);
        }
        self.check_external_references(&changed)?;

        let mut guard = self.lock_open()?;
        let state = &mut *guard;
        state.ensure_loaded(&self.name)?;
        let mut candidate = state.rows().to_vec();
        let positions = positions(&candidate);
        let mut pairs: Vec<(usize, R, R)> = Vec::with_capacity(changed.len());
        for row in changed {
            let position = *positions
                .get(&row.id())
                .ok_or_else(|| Error::RecordNotFound { table: self.name.clone(), id: row.id() })?;
            if candidate[position] != row {
                pairs.push((position, candidate[position].clone(), row));
            }
        }
        if pairs.is_empty() {
            state.settle(self.options.caching, false);
            return Ok(0);
        }
        if let Some(hooks) = &self.hooks {
            pairs.iter().for_each(|(_, old, new)| hooks.before_update(old, new));
        }

        let removed: Vec<&R> = pairs.iter().map(|(_, old, _)| old).collect();
        let added: Vec<&R> = pairs.iter().map(|(_, _, new)| new).collect();
        state.indexes.check_unique(&removed, &added)?;
        for (position, _, new) in &pairs {
            candidate[*position] = new.clone();
        }
        self.check_self_references(&candidate, &added)?;

        let header = state.header.clone();
        state.commit(&self.name, candidate, header, &self.codec, self.options.write_strategy)?;
        state.indexes.batch(|indexes| {
            for (_, old, _) in &pairs {
                indexes.remove_row(old);
            }
            for (_, _, new) in &pairs {
                indexes.add_row(new);
            }
            Ok(())
        })?;
        state.settle(self.options.caching, true);
        drop(guard);

        debug!(table = %self.name, rows = pairs.len(), "Updated rows");
        if let Some(hooks) = &self.hooks {
            pairs.iter().for_each(|(_, old, new)| hooks.after_update(old, new));
        }
        Ok(pairs.len())
    }

    fn delete_by_ids(&self, ids: &[i64]) -> Result<usize> {
        let targets: Vec<R> = {
            let wanted: HashSet<i64> = ids.iter().copied().collect();
            self.read(|rows, _| {
                Ok(rows.iter().filter(|row| wanted.contains(&row.id())).cloned().collect())
            })?
        };
        if targets.is_empty() {
            return Ok(0);
        }

        let (resets, cascades): (Vec<_>, Vec<_>) = self
            .external_uses(&targets)?
            .into_iter()
            .partition(|(reference, _)| reference.usage == ForeignKeyUsage::AllowDefault);

        // Resets before the own delete, cascades after it.
        self.release(&resets)?;
        let deleted = self.delete_stored(&targets)?;
        self.release(&cascades)?;
        Ok(deleted)
    }

    fn release(&self, uses: &[(ReferenceUse, ColumnValue)]) -> Result<()> {
        let foreign_keys = self.catalog.foreign_keys();
        for (reference, value) in uses {
            let affected = foreign_keys.release(&self.name, reference, value)?;
            debug!(
                table = %self.name,
                using_table = %reference.using_table,
                usage = ?reference.usage,
                affected,
                "Released references"
            );
        }
        Ok(())
    }

    fn delete_stored(&self, targets: &[R]) -> Result<usize> {
        let mut guard = self.lock_open()?;
        let state = &mut *guard;
        state.ensure_loaded(&self.name)?;
        let mut candidate = state.rows().to_vec();

        let stored_ids: HashSet<i64> = candidate.iter().map(Record::id).collect();
        let mut doomed: HashSet<i64> =
            targets.iter().map(Record::id).filter(|id| stored_ids.contains(id)).collect();
        let resets = self.resolve_self_references(&candidate, &mut doomed)?;
        if doomed.is_empty() {
            state.settle(self.options.caching, false);
            return Ok(0);
        }

        let deleted: Vec<R> =
            candidate.iter().filter(|row| doomed.contains(&row.id())).cloned().collect();
        if let Some(hooks) = &self.hooks {
            deleted.iter().for_each(|row| hooks.before_delete(row));
        }

        let positions = positions(&candidate);
        let reset_pairs: Vec<(R, R)> = resets
            .into_iter()
            .filter(|(id, _)| !doomed.contains(id))
            .filter_map(|(id, new)| positions.get(&id).map(|&p| (candidate[p].clone(), new)))
            .collect();

        let mut removed: Vec<&R> = deleted.iter().collect();
        removed.extend(reset_pairs.iter().map(|(old, _)| old));
        let added: Vec<&R> = reset_pairs.iter().map(|(_, new)| new).collect();
        state.indexes.check_unique(&removed, &added)?;

        for (_, new) in &reset_pairs {
            if let Some(&position) = positions.get(&new.id()) {
                candidate[position] = new.clone();
            }
        }
        candidate.retain(|row| !doomed.contains(&row.id()));

        let header = state.header.clone();
        state.commit(&self.name, candidate, header, &self.codec, self.options.write_strategy)?;
        state.indexes.batch(|indexes| {
            for row in &deleted {
                indexes.remove_row(row);
            }
            for (old, new) in &reset_pairs {
                indexes.remove_row(old);
                indexes.add_row(new);
            }
            Ok(())
        })?;
        state.settle(self.options.caching, true);
        drop(guard);

        debug!(table = %self.name, rows = deleted.len(), reset = reset_pairs.len(), "Deleted rows");
        if let Some(hooks) = &self.hooks {
            deleted.iter().for_each(|row| hooks.after_delete(row));
        }
        Ok(deleted.len())
    }

    fn advance_sequence(
        &self,
        increment: i64,
        field: impl Fn(&mut TableHeader) -> &mut i64,
    ) -> Result<i64> {
        let mut state = self.lock_open()?;
        let invalid = || Error::InvalidIncrement { table: self.name.clone(), increment };
        if increment <= 0 {
            return Err(invalid());
        }

        let previous = state.header.clone();
        let slot = field(&mut state.header);
        let next = slot.checked_add(increment).ok_or_else(invalid)?;
        *slot = next;

        match self.options.write_strategy {
            WriteStrategy::Forced => {
                state.header_dirty = true;
                if let Err(error) = state.flush(&self.name, &self.codec) {
                    state.header = previous;
                    return Err(error);
                }
            },
            WriteStrategy::Lazy => {
                state.header_dirty = true;
                debug!(table = %self.name, "Deferred sequence write");
            },
        }
        Ok(next)
    }

    fn close(&self) -> Result<()> {
        let mut state = self.lock()?;
        if state.phase != TablePhase::Open {
            return Ok(());
        }
        state.phase = TablePhase::Closing;
        if let Err(error) = state.flush(&self.name, &self.codec) {
            state.phase = TablePhase::Open;
            return Err(error);
        }
        if let Err(error) = self.catalog.unregister(&self.name) {
            warn!(table = %self.name, %error, "Table was not registered at close");
        }
        state.backend = None;
        state.rows = None;
        state.phase = TablePhase::Closed;
        drop(state);

        info!(table = %self.name, path = %self.origin, "Table closed");
        Ok(())
    }

    /// Checks foreign keys that point at other tables. Called without the
    /// own lock held.
    fn check_external_references(&self, rows: &[R]) -> Result<()> {
        let foreign_keys = self.catalog.foreign_keys();
        for fk in self.schema.foreign_keys.iter().filter(|fk| fk.target_table != self.name) {
            let mut confirmed: Vec<ColumnValue> = Vec::new();
            for row in rows {
                let value = column_value(row, &fk.column).unwrap_or(ColumnValue::Null);
                if (fk.allows_default() && value.is_default())
                    || confirmed.iter().any(|v| v.matches(&value))
                {
                    continue;
                }
                if !foreign_keys.value_exists(&fk.target_table, &fk.target_column, &value)? {
                    return Err(self.missing_reference(fk, &value));
                }
                confirmed.push(value);
            }
        }
        Ok(())
    }

    /// Checks self-referencing foreign keys of `rows` against `candidate`,
    /// the row set as it will be stored.
    fn check_self_references(&self, candidate: &[R], rows: &[&R]) -> Result<()> {
        for fk in self.schema.foreign_keys.iter().filter(|fk| fk.target_table == self.name) {
            for row in rows {
                let value = column_value(*row, &fk.column).unwrap_or(ColumnValue::Null);
                if fk.allows_default() && value.is_default() {
                    continue;
                }
                let found = candidate
                    .iter()
                    .any(|r| column_value(r, &fk.target_column).is_some_and(|v| v.matches(&value)));
                if !found {
                    return Err(self.missing_reference(fk, &value));
                }
            }
        }
        Ok(())
    }

    /// Collects references from other tables to `targets`, failing on the
    /// first one that blocks the delete.
    fn external_uses(&self, targets: &[R]) -> Result<Vec<(ReferenceUse, ColumnValue)>> {
        let foreign_keys = self.catalog.foreign_keys();
        let mut columns: Vec<String> = foreign_keys
            .relationships_to(&self.name)
            .into_iter()
            .filter(|r| !r.is_self_reference())
            .map(|r| r.target_column)
            .collect();
        columns.sort();
        columns.dedup();

        let mut found = Vec::new();
        for column in &columns {
            for row in targets {
                let Some(value) = column_value(row, column) else { continue };
                let uses = foreign_keys.value_in_use(&self.name, column, &value)?;
                let blocking = ReferenceUse::strongest(&uses)
                    .filter(|u| u.usage == ForeignKeyUsage::Referenced);
                if let Some(blocking) = blocking {
                    return Err(Error::ForeignKeyInUse {
                        table: self.name.clone(),
                        value: value.to_string(),
                        using_table: blocking.using_table.clone(),
                        using_column: blocking.using_column.clone(),
                    });
                }
                found.extend(uses.into_iter().map(|reference| (reference, value.clone())));
            }
        }
        Ok(found)
    }

    /// Extends `doomed` with rows cascading from it and returns the reset
    /// versions of rows whose references fall back to the default.
    fn resolve_self_references(
        &self,
        rows: &[R],
        doomed: &mut HashSet<i64>,
    ) -> Result<HashMap<i64, R>> {
        let self_fks: Vec<&ForeignKeyDef> =
            self.schema.foreign_keys.iter().filter(|fk| fk.target_table == self.name).collect();
        let mut resets: HashMap<i64, R> = HashMap::new();
        if self_fks.is_empty() {
            return Ok(resets);
        }

        loop {
            let mut cascaded = Vec::new();
            for fk in &self_fks {
                let values: Vec<ColumnValue> = rows
                    .iter()
                    .filter(|row| doomed.contains(&row.id()))
                    .filter_map(|row| column_value(row, &fk.target_column))
                    .collect();

                for row in rows.iter().filter(|row| !doomed.contains(&row.id())) {
                    let Some(value) = column_value(row, &fk.column) else { continue };
                    if !values.iter().any(|v| v.matches(&value)) {
                        continue;
                    }
                    match fk.attributes {
                        ForeignKeyAttributes::None => {
                            return Err(Error::ForeignKeyInUse {
                                table: self.name.clone(),
                                value: value.to_string(),
                                using_table: self.name.clone(),
                                using_column: fk.column.clone(),
                            });
                        },
                        ForeignKeyAttributes::CascadeDelete => cascaded.push(row.id()),
                        ForeignKeyAttributes::AllowDefaultValue => {
                            let mut reset = resets.remove(&row.id()).unwrap_or_else(|| row.clone());
                            self.reset_column(&mut reset, &fk.column)?;
                            resets.insert(row.id(), reset);
                        },
                    }
                }
            }
            if cascaded.is_empty() {
                return Ok(resets);
            }
            doomed.extend(cascaded);
        }
    }

    fn reset_column(&self, row: &mut R, column: &str) -> Result<()> {
        let kind = self
            .schema
            .column_kind(column)
            .ok_or_else(|| Error::UnknownColumn {
                table: self.name.clone(),
                column: column.to_string(),
            })?;
        if !row.set_column(column, ColumnValue::default_for(kind)) {
            return Err(Error::InvalidSchema {
                table: self.name.clone(),
                message: format!(
                    "column {column} cannot be reset to its default; \
                     Record::set_column must support it"
                ),
            });
        }
        Ok(())
    }

    fn missing_reference(&self, fk: &ForeignKeyDef, value: &ColumnValue) -> Error {
        Error::ForeignKeyMissing {
            table: self.name.clone(),
            column: fk.column.clone(),
            target_table: fk.target_table.clone(),
            target_column: fk.target_column.clone(),
            value: value.to_string(),
        }
    }
}

impl<R: Record, B: StorageBackend + 'static> ReferenceTarget for TableInner<R, B> {
    fn table_name(&self) -> &str {
        &self.name
    }

    fn contains_value(&self, column: &str, value: &ColumnValue) -> Result<bool> {
        if column == ID_COLUMN {
            let state = self.lock_open()?;
            let primary = state.indexes.primary();
            return Ok(value.as_i64().is_some_and(|id| primary.contains(&IndexKey::I64(id))));
        }
        self.read(|rows, _| {
            Ok(rows.iter().any(|row| column_value(row, column).is_some_and(|v| v.matches(value))))
        })
    }

    fn delete_referencing(&self, column: &str, value: &ColumnValue) -> Result<usize> {
        let ids = self.read(|rows, _| {
            Ok(rows
                .iter()
                .filter(|row| column_value(*row, column).is_some_and(|v| v.matches(value)))
                .map(Record::id)
                .collect::<Vec<_>>())
        })?;
        self.delete_by_ids(&ids)
    }

    fn reset_referencing(&self, column: &str, value: &ColumnValue) -> Result<usize> {
        let mut rows = self.read(|rows, _| {
            Ok(rows
                .iter()
                .filter(|row| column_value(*row, column).is_some_and(|v| v.matches(value)))
                .cloned()
                .collect::<Vec<_>>())
        })?;
        for row in &mut rows {
            self.reset_column(row, column)?;
        }
        self.update(rows)
    }
}

impl<R: Record, B: StorageBackend> Drop for TableInner<R, B> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.phase != TablePhase::Open {
            return;
        }
        warn!(table = %self.name, "Table dropped while open, closing");
        if let Err(error) = state.flush(&self.name, &self.codec) {
            warn!(table = %self.name, %error, "Pending writes lost on implicit close");
        }
        if let Err(error) = self.catalog.unregister(&self.name) {
            debug!(table = %self.name, %error, "Table was not registered at drop");
        }
        state.backend = None;
        state.rows = None;
        state.phase = TablePhase::Closed;
    }
}

fn positions<R: Record>(rows: &[R]) -> HashMap<i64, usize> {
    rows.iter().enumerate().map(|(position, row)| (row.id(), position)).collect()
}
