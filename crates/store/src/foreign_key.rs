//! Registry of open tables and the foreign keys between them.
//!
//! # Lock ordering
//!
//! The registry lock is a leaf: it is held only to clone a table handle or
//! copy relationships, and never across a call into a table. Tables in turn
//! never call into the registry (or into another table) while holding their
//! own lock. So two tables referencing each other can be mutated from
//! different threads without deadlock.
//!
//! Relationships whose source and target are the same table are not
//! answered here; a self-referencing table checks its own rows under its
//! own lock.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    error::{Error, Result},
    schema::ForeignKeyAttributes,
    types::ColumnValue,
};

/// What the registry needs from an open table.
pub trait ReferenceTarget: Send + Sync {
    /// Name the table is registered under.
    fn table_name(&self) -> &str;

    /// Whether any stored row holds `value` in `column`.
    ///
    /// # Errors
    ///
    /// Returns the table's read errors (closed table, lock timeout, corruption).
    fn contains_value(&self, column: &str, value: &ColumnValue) -> Result<bool>;

    /// Deletes every row holding `value` in `column`, returning the count.
    ///
    /// # Errors
    ///
    /// Returns the table's delete errors.
    fn delete_referencing(&self, column: &str, value: &ColumnValue) -> Result<usize>;

    /// Resets `column` to its default in every row holding `value`.
    ///
    /// # Errors
    ///
    /// Returns the table's update errors.
    fn reset_referencing(&self, column: &str, value: &ColumnValue) -> Result<usize>;
}

/// A declared edge from a referencing column to a referenced column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    /// Referencing table.
    pub source_table: String,
    /// Referencing column.
    pub source_column: String,
    /// Referenced table.
    pub target_table: String,
    /// Referenced column.
    pub target_column: String,
    /// Delete behaviour.
    pub attributes: ForeignKeyAttributes,
}

impl Relationship {
    /// Whether source and target are the same table.
    #[inline]
    pub fn is_self_reference(&self) -> bool {
        self.source_table == self.target_table
    }
}

/// How a value is used by a referencing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ForeignKeyUsage {
    /// Not referenced.
    None,
    /// Referenced through a relationship that resets to the default value.
    AllowDefault,
    /// Referenced through a relationship that cascades deletes.
    CascadeDelete,
    /// Referenced through a relationship that blocks deletes.
    Referenced,
}

impl From<ForeignKeyAttributes> for ForeignKeyUsage {
    fn from(attributes: ForeignKeyAttributes) -> Self {
        match attributes {
            ForeignKeyAttributes::None => Self::Referenced,
            ForeignKeyAttributes::AllowDefaultValue => Self::AllowDefault,
            ForeignKeyAttributes::CascadeDelete => Self::CascadeDelete,
        }
    }
}

/// One referencing column currently holding a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceUse {
    /// How the reference reacts to deletes.
    pub usage: ForeignKeyUsage,
    /// Table holding the reference.
    pub using_table: String,
    /// Column holding the reference.
    pub using_column: String,
}

impl ReferenceUse {
    /// Most restrictive use among `uses`.
    pub fn strongest(uses: &[ReferenceUse]) -> Option<&ReferenceUse> {
        uses.iter().max_by_key(|u| u.usage)
    }
}

#[derive(Default)]
struct Registry {
    tables: HashMap<String, Weak<dyn ReferenceTarget>>,
    relationships: Vec<Relationship>,
}

/// Shared registry consulted by every table of one [`Database`](crate::Database).
#[derive(Default)]
pub struct ForeignKeyManager {
    registry: Mutex<Registry>,
}

impl ForeignKeyManager {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an open table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TableAlreadyRegistered`] if a live table already uses the name.
    pub fn register_table(&self, name: &str, table: Weak<dyn ReferenceTarget>) -> Result<()> {
        let mut registry = self.registry.lock();
        if registry.tables.get(name).is_some_and(|existing| existing.strong_count() > 0) {
            return Err(Error::TableAlreadyRegistered { table: name.to_string() });
        }
        registry.tables.insert(name.to_string(), table);
        debug!(table = name, "Registered table");
        Ok(())
    }

    /// Unregisters a table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TableNotRegistered`] if the name is not registered.
    pub fn unregister_table(&self, name: &str) -> Result<()> {
        let mut registry = self.registry.lock();
        if registry.tables.remove(name).is_none() {
            return Err(Error::TableNotRegistered { table: name.to_string() });
        }
        debug!(table = name, "Unregistered table");
        Ok(())
    }

    /// Whether a live table is registered under `name`.
    pub fn is_registered(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Records a relationship. Neither table needs to be open; repeats are ignored.
    pub fn add_relationship(&self, relationship: Relationship) {
        let mut registry = self.registry.lock();
        if !registry.relationships.contains(&relationship) {
            registry.relationships.push(relationship);
        }
    }

    /// Relationships referencing `target_table`.
    pub fn relationships_to(&self, target_table: &str) -> Vec<Relationship> {
        self.registry
            .lock()
            .relationships
            .iter()
            .filter(|r| r.target_table == target_table)
            .cloned()
            .collect()
    }

    /// Whether `target_table` holds `value` in `target_column`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TableNotRegistered`] if the target table is not open,
    /// or the target table's read error.
    pub fn value_exists(
        &self,
        target_table: &str,
        target_column: &str,
        value: &ColumnValue,
    ) -> Result<bool> {
        let target = self
            .lookup(target_table)
            .ok_or_else(|| Error::TableNotRegistered { table: target_table.to_string() })?;
        target.contains_value(target_column, value)
    }

    /// Lists other tables that currently hold `value` in a column referencing
    /// `target_table.target_column`.
    ///
    /// Referencing tables that are not open are skipped.
    ///
    /// # Errors
    ///
    /// Returns a referencing table's read error.
    pub fn value_in_use(
        &self,
        target_table: &str,
        target_column: &str,
        value: &ColumnValue,
    ) -> Result<Vec<ReferenceUse>> {
        let mut uses = Vec::new();
        for relationship in self.relationships_to(target_table) {
            if relationship.target_column != target_column || relationship.is_self_reference() {
                continue;
            }
            let Some(source) = self.lookup(&relationship.source_table) else { continue };
            if source.contains_value(&relationship.source_column, value)? {
                uses.push(ReferenceUse {
                    usage: relationship.attributes.into(),
                    using_table: relationship.source_table,
                    using_column: relationship.source_column,
                });
            }
        }
        Ok(uses)
    }

    /// Applies the delete behaviour of a non-blocking use: deletes or resets
    /// the referencing rows. Returns the number of rows affected.
    ///
    /// # Errors
    ///
    /// Returns the referencing table's error. A blocking
    /// ([`ForeignKeyUsage::Referenced`]) use is reported as
    /// [`Error::ForeignKeyInUse`] against `target_table`.
    pub fn release(
        &self,
        target_table: &str,
        reference: &ReferenceUse,
        value: &ColumnValue,
    ) -> Result<usize> {
        let Some(source) = self.lookup(&reference.using_table) else { return Ok(0) };
        match reference.usage {
            ForeignKeyUsage::None => Ok(0),
            ForeignKeyUsage::CascadeDelete => {
                source.delete_referencing(&reference.using_column, value)
            },
            ForeignKeyUsage::AllowDefault => {
                source.reset_referencing(&reference.using_column, value)
            },
            ForeignKeyUsage::Referenced => Err(Error::ForeignKeyInUse {
                table: target_table.to_string(),
                value: value.to_string(),
                using_table: reference.using_table.clone(),
                using_column: reference.using_column.clone(),
            }),
        }
    }

    fn lookup(&self, name: &str) -> Option<Arc<dyn ReferenceTarget>> {
        self.registry.lock().tables.get(name).and_then(Weak::upgrade)
    }
}

impl std::fmt::Debug for ForeignKeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.lock();
        let mut tables: Vec<_> = registry.tables.keys().collect();
        tables.sort();
        f.debug_struct("ForeignKeyManager")
            .field("tables", &tables)
            .field("relationships", &registry.relationships.len())
            .finish()
    }
}
