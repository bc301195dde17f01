//! All indexes of one table, updated as a unit.

use std::collections::HashSet;

use tracing::debug;

use crate::{
    error::{Error, Result},
    index::IndexManager,
    record::Record,
    schema::TableSchema,
    types::IndexKey,
};

/// Owns a table's primary index and its declared unique indexes.
///
/// [`begin_update`](Self::begin_update) and [`end_update`](Self::end_update)
/// forward to every index, so one insert, update or delete of many rows
/// performs at most one sort per index.
#[derive(Debug, Clone)]
pub struct BatchUpdateCoordinator {
    scope: String,
    indexes: Vec<IndexManager>,
    updating: bool,
}

impl BatchUpdateCoordinator {
    /// Creates empty indexes for a validated schema. The primary index comes first.
    pub fn new(schema: &TableSchema) -> Self {
        let mut indexes = Vec::with_capacity(schema.indexes.len() + 1);
        indexes.push(IndexManager::primary());
        indexes.extend(
            schema.indexes.iter().map(|def| IndexManager::new(def, schema.composite_keys)),
        );
        Self { scope: schema.name.clone(), indexes, updating: false }
    }

    /// The implicit index over the primary key.
    #[inline]
    pub fn primary(&self) -> &IndexManager {
        &self.indexes[0]
    }

    /// Looks up an index by name.
    pub fn get(&self, name: &str) -> Option<&IndexManager> {
        self.indexes.iter().find(|index| index.name() == name)
    }

    /// Iterates indexes, primary first.
    pub fn iter(&self) -> impl Iterator<Item = &IndexManager> {
        self.indexes.iter()
    }

    /// Whether a batch is open.
    #[inline]
    pub fn is_updating(&self) -> bool {
        self.updating
    }

    /// Total physical sorts across all indexes.
    pub fn sort_count(&self) -> usize {
        self.indexes.iter().map(IndexManager::sort_count).sum()
    }

    /// Opens a batch on every index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyUpdating`] if a batch is already open.
    pub fn begin_update(&mut self) -> Result<()> {
        if self.updating {
            return Err(Error::AlreadyUpdating { scope: self.scope.clone() });
        }
        for index in &mut self.indexes {
            index.begin_update()?;
        }
        self.updating = true;
        Ok(())
    }

    /// Closes the batch on every index, sorting where required.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotUpdating`] if no batch is open.
    pub fn end_update(&mut self) -> Result<()> {
        if !self.updating {
            return Err(Error::NotUpdating { scope: self.scope.clone() });
        }
        for index in &mut self.indexes {
            index.end_update()?;
        }
        self.updating = false;
        Ok(())
    }

    /// Runs `f` inside a batch. The batch is closed even if `f` fails.
    ///
    /// # Errors
    ///
    /// Returns the batch guard errors, or `f`'s error.
    pub fn batch<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.begin_update()?;
        let result = f(self);
        self.end_update()?;
        result
    }

    /// Adds a row's keys to every index.
    pub fn add_row<R: Record>(&mut self, row: &R) {
        for index in &mut self.indexes {
            if let Some(key) = index.key_for(row) {
                index.add(key);
            }
        }
    }

    /// Removes a row's keys from every index.
    pub fn remove_row<R: Record>(&mut self, row: &R) {
        for index in &mut self.indexes {
            if let Some(key) = index.key_for(row) {
                index.remove(&key);
            }
        }
    }

    /// Checks that replacing `removed` with `added` keeps every index unique.
    ///
    /// Keys held by `removed` rows count as free, so a row may keep its own
    /// key and two rows may swap keys within one batch. Nothing is mutated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UniqueIndexViolation`] for the first colliding key.
    pub fn check_unique<R: Record>(&self, removed: &[&R], added: &[&R]) -> Result<()> {
        for index in &self.indexes {
            let freed: HashSet<IndexKey> =
                removed.iter().filter_map(|row| index.key_for(*row)).collect();
            let mut claimed = HashSet::with_capacity(added.len());
            for row in added {
                let Some(key) = index.key_for(*row) else { continue };
                let taken = index.contains(&key) && !freed.contains(&key);
                if taken || claimed.contains(&key) {
                    return Err(self.violation(index, &key));
                }
                claimed.insert(key);
            }
        }
        Ok(())
    }

    /// Rebuilds every index from `rows`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if the stored rows already violate an index.
    pub fn rebuild<R: Record>(&mut self, rows: &[R]) -> Result<()> {
        for index in &mut self.indexes {
            index.clear();
        }
        self.batch(|indexes| {
            for row in rows {
                indexes.add_row(row);
            }
            Ok(())
        })?;

        for index in &self.indexes {
            if let Some(key) = index.first_duplicate() {
                return Err(Error::Corrupted {
                    origin: self.scope.clone(),
                    reason: format!(
                        "stored rows repeat key {key} in unique index {}",
                        index.name()
                    ),
                });
            }
        }
        debug!(
            table = %self.scope,
            rows = rows.len(),
            indexes = self.indexes.len(),
            "Rebuilt indexes"
        );
        Ok(())
    }

    fn violation(&self, index: &IndexManager, key: &IndexKey) -> Error {
        Error::UniqueIndexViolation {
            table: self.scope.clone(),
            index: index.name().to_string(),
            columns: index.columns().to_vec(),
            value: key.to_string(),
        }
    }
}
