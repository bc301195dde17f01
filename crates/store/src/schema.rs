//! Static table declarations.
//!
//! A [`TableSchema`] is plain data handed to the engine when a table opens:
//! typed columns, unique indexes and foreign keys. Nothing is discovered at
//! runtime; the engine validates the declaration once and resolves every
//! index column's kind before the first row is touched.
//!
//! ```
//! use simpledb_store::{ColumnDef, ColumnKind, IndexDef, TableSchema};
//!
//! let schema = TableSchema::builder()
//!     .name("countries")
//!     .columns(vec![
//!         ColumnDef::new("code", ColumnKind::Text),
//!         ColumnDef::new("name", ColumnKind::Text),
//!     ])
//!     .indexes(vec![IndexDef::unique("ix_code", ["code"])])
//!     .build();
//! assert!(schema.validate().is_ok());
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    types::{ColumnKind, SortOrder},
};

/// Name of the implicit primary key column present on every table.
pub const ID_COLUMN: &str = "id";

/// Name of the implicit unique index over [`ID_COLUMN`].
pub const PRIMARY_INDEX: &str = "primary";

/// A declared column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name as returned by [`Record::column`](crate::Record::column).
    pub name: String,
    /// Value kind.
    pub kind: ColumnKind,
}

impl ColumnDef {
    /// Declares a column.
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self { name: name.into(), kind }
    }
}

/// A declared unique index over one or more columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Index name, unique within the table.
    pub name: String,
    /// Source columns. Order is significant for composite keys.
    pub columns: Vec<String>,
    /// Key ordering.
    pub order: SortOrder,
}

impl IndexDef {
    /// Declares an ascending unique index.
    pub fn unique<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            order: SortOrder::Ascending,
        }
    }

    /// Switches the index to descending order.
    #[must_use]
    pub fn descending(mut self) -> Self {
        self.order = SortOrder::Descending;
        self
    }
}

/// What a foreign key tolerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ForeignKeyAttributes {
    /// Every value must reference an existing row; referenced rows cannot be deleted.
    #[default]
    None,
    /// The default (zero) value needs no target; deleting the target resets
    /// referencing columns to the default.
    AllowDefaultValue,
    /// Deleting the target deletes the referencing rows.
    CascadeDelete,
}

/// A declared foreign key from a column of this table to a column of another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyDef {
    /// Referencing column on this table.
    pub column: String,
    /// Referenced table.
    pub target_table: String,
    /// Referenced column, [`ID_COLUMN`] unless overridden.
    pub target_column: String,
    /// Delete and default-value behaviour.
    pub attributes: ForeignKeyAttributes,
}

impl ForeignKeyDef {
    /// Declares a foreign key referencing `target_table`'s primary key.
    pub fn new(column: impl Into<String>, target_table: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            target_table: target_table.into(),
            target_column: ID_COLUMN.to_string(),
            attributes: ForeignKeyAttributes::None,
        }
    }

    /// References a column other than the primary key.
    #[must_use]
    pub fn target_column(mut self, column: impl Into<String>) -> Self {
        self.target_column = column.into();
        self
    }

    /// Allows the default value without a referenced row.
    #[must_use]
    pub fn allow_default(mut self) -> Self {
        self.attributes = ForeignKeyAttributes::AllowDefaultValue;
        self
    }

    /// Deletes referencing rows when the target row is deleted.
    #[must_use]
    pub fn cascade_delete(mut self) -> Self {
        self.attributes = ForeignKeyAttributes::CascadeDelete;
        self
    }

    /// Whether the default value skips the existence check.
    #[inline]
    pub fn allows_default(&self) -> bool {
        self.attributes == ForeignKeyAttributes::AllowDefaultValue
    }
}

/// How multi-column index keys are formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompositeKeyStrategy {
    /// Columns are kept as a tuple and compared element-wise.
    #[default]
    Tuple,
    /// Column strings are concatenated into one text key. Kept for tables
    /// whose uniqueness was defined that way; distinct tuples may collide.
    Concatenated,
}

/// Logical declaration of a table.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder)]
pub struct TableSchema {
    /// Table name, also the default file stem.
    #[builder(into)]
    pub name: String,
    /// Declared columns, excluding the implicit [`ID_COLUMN`].
    #[builder(default)]
    pub columns: Vec<ColumnDef>,
    /// Unique indexes.
    #[builder(default)]
    pub indexes: Vec<IndexDef>,
    /// Foreign keys to other tables (or to this one).
    #[builder(default)]
    pub foreign_keys: Vec<ForeignKeyDef>,
    /// Composite index key formation.
    #[builder(default)]
    pub composite_keys: CompositeKeyStrategy,
}

impl TableSchema {
    /// Returns the kind of a column, including the implicit primary key.
    pub fn column_kind(&self, name: &str) -> Option<ColumnKind> {
        if name == ID_COLUMN {
            return Some(ColumnKind::I64);
        }
        self.columns.iter().find(|c| c.name == name).map(|c| c.kind)
    }

    /// Looks up an index declaration by name.
    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Validates the declaration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSchema`] for empty or duplicate names,
    /// [`Error::UnknownColumn`] when an index or foreign key names an
    /// undeclared column, and [`Error::UnsupportedIndexColumn`] when an index
    /// covers a column whose kind has no ordering.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Error::InvalidSchema { table: self.name.clone(), message };

        if self.name.trim().is_empty() {
            return Err(invalid("table name must not be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if column.name == ID_COLUMN {
                return Err(invalid(format!(
                    "column {ID_COLUMN} is implicit and cannot be declared"
                )));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(invalid(format!("duplicate column {}", column.name)));
            }
        }

        let mut index_names = HashSet::new();
        for index in &self.indexes {
            if index.name == PRIMARY_INDEX || !index_names.insert(index.name.as_str()) {
                return Err(invalid(format!("duplicate index name {}", index.name)));
            }
            if index.columns.is_empty() {
                return Err(invalid(format!("index {} has no columns", index.name)));
            }
            for column in &index.columns {
                let kind = self.column_kind(column).ok_or_else(|| Error::UnknownColumn {
                    table: self.name.clone(),
                    column: column.clone(),
                })?;
                if !kind.is_indexable() {
                    return Err(Error::UnsupportedIndexColumn {
                        table: self.name.clone(),
                        index: index.name.clone(),
                        column: column.clone(),
                        kind: kind.to_string(),
                    });
                }
            }
        }

        for fk in &self.foreign_keys {
            if self.column_kind(&fk.column).is_none() {
                return Err(Error::UnknownColumn {
                    table: self.name.clone(),
                    column: fk.column.clone(),
                });
            }
            if fk.target_table.trim().is_empty() {
                return Err(invalid(format!("foreign key {} has no target table", fk.column)));
            }
        }

        Ok(())
    }
}
