//! Row trait, seed-data providers and mutation hooks.

use serde::{Serialize, de::DeserializeOwned};

use crate::{schema::ID_COLUMN, types::ColumnValue};

/// A row type stored in one table.
///
/// Rows handed out by a [`Table`](crate::Table) are owned snapshots; changing
/// one has no effect until it is passed back to
/// [`Table::update`](crate::Table::update). The engine detects changed rows by
/// comparing them with the stored row carrying the same id.
pub trait Record:
    Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Returns the primary key.
    fn id(&self) -> i64;

    /// Sets the primary key. Called by the engine on insert.
    fn set_id(&mut self, id: i64);

    /// Returns a declared column's value, or `None` for unknown names.
    ///
    /// The engine reads the primary key through [`id`](Self::id), so
    /// implementations need not handle `"id"` here.
    fn column(&self, name: &str) -> Option<ColumnValue>;

    /// Overwrites a column's value.
    ///
    /// Only needed for columns referenced by an
    /// [`AllowDefaultValue`](crate::ForeignKeyAttributes::AllowDefaultValue)
    /// foreign key; deleting the referenced row resets them through this
    /// method. Returns `false` if the column cannot be written.
    fn set_column(&mut self, name: &str, value: ColumnValue) -> bool {
        let _ = (name, value);
        false
    }
}

/// Reads a column, answering the primary key column from [`Record::id`].
pub(crate) fn column_value<R: Record>(row: &R, name: &str) -> Option<ColumnValue> {
    if name == ID_COLUMN {
        return Some(ColumnValue::I64(row.id()));
    }
    row.column(name)
}

/// Supplies initial and incremental rows for a freshly created table.
///
/// Version 1 is the initial dataset. Each later version returns the rows added
/// by that version, or `None` once no more versions exist. The reached version
/// is persisted after every step, so a table only ever receives each version's
/// rows once.
pub trait SeedProvider<R: Record>: Send + Sync {
    /// Returns the rows for `version`, or `None` when `version` does not exist.
    fn seed(&self, version: u32) -> Option<Vec<R>>;
}

impl<R, F> SeedProvider<R> for F
where
    R: Record,
    F: Fn(u32) -> Option<Vec<R>> + Send + Sync,
{
    fn seed(&self, version: u32) -> Option<Vec<R>> {
        self(version)
    }
}

/// Callbacks around row mutations.
///
/// `before_*` hooks run before validation and index changes; `after_*` hooks
/// run once the change has been persisted and the table lock released.
/// `before_update` and `before_delete` run while the table lock is held and
/// must not call back into the same table.
pub trait TableHooks<R: Record>: Send + Sync {
    /// Called for every row about to be inserted.
    fn before_insert(&self, row: &R) {
        let _ = row;
    }

    /// Called for every inserted row, with its assigned id.
    fn after_insert(&self, row: &R) {
        let _ = row;
    }

    /// Called for every changed row about to be written.
    fn before_update(&self, old: &R, new: &R) {
        let _ = (old, new);
    }

    /// Called for every row that was updated.
    fn after_update(&self, old: &R, new: &R) {
        let _ = (old, new);
    }

    /// Called for every stored row about to be deleted.
    fn before_delete(&self, row: &R) {
        let _ = row;
    }

    /// Called for every deleted row.
    fn after_delete(&self, row: &R) {
        let _ = row;
    }
}
