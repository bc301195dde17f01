//! Error types for the simpledb table store.
//!
//! Errors fall into four groups, and callers can ask which group an error
//! belongs to before deciding whether the table is still usable:
//!
//! | Group       | Table usable afterwards | Examples                                  |
//! |-------------|-------------------------|-------------------------------------------|
//! | Corruption  | no                      | bad magic, page out of sequence           |
//! | Constraint  | yes                     | unique index collision, dangling FK       |
//! | Usage       | yes                     | closed table, nested batch update         |
//! | Lock        | yes                     | lock wait exceeded the table's timeout    |

use std::{io, time::Duration};

use snafu::Snafu;

/// Result type alias for table store operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur during table store operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// I/O error from the underlying storage backend.
    #[snafu(display("I/O error: {source}"))]
    Io {
        /// The underlying I/O error.
        source: io::Error,
    },

    /// Row collection could not be serialized or deserialized.
    #[snafu(display("Codec error in {origin}: {source}"))]
    Codec {
        /// File path (or backend description) being encoded or decoded.
        origin: String,
        /// The underlying postcard error.
        source: postcard::Error,
    },

    /// Stored payload could not be decompressed.
    #[snafu(display("Decompression failed in {origin}: {source}"))]
    Decompression {
        /// File path (or backend description) being decoded.
        origin: String,
        /// The underlying decoder error.
        source: io::Error,
    },

    /// File does not start with the table file marker.
    #[snafu(display("Invalid magic bytes in {origin}: expected {expected:?}, found {found:?}"))]
    InvalidMagic {
        /// File path (or backend description).
        origin: String,
        /// The marker every table file carries.
        expected: [u8; 2],
        /// The bytes actually found at offset 2.
        found: [u8; 2],
    },

    /// File was written with a format version this build cannot read.
    #[snafu(display("Unsupported format version {version} in {origin} (supported: {supported})"))]
    UnsupportedVersion {
        /// File path (or backend description).
        origin: String,
        /// The version stored in the header.
        version: u16,
        /// Human-readable list of readable versions.
        supported: String,
    },

    /// A page entry carried an unexpected page number.
    #[snafu(display("Page out of sequence in {origin}: expected page {expected}, found {found}"))]
    PageOutOfSequence {
        /// File path (or backend description).
        origin: String,
        /// The 1-based position of the page.
        expected: i32,
        /// The page number stored in the entry.
        found: i32,
    },

    /// Header page count disagrees with the page entries present.
    #[snafu(display("Page count mismatch in {origin}: header declares {declared}, found {found}"))]
    PageCountMismatch {
        /// File path (or backend description).
        origin: String,
        /// Page count stored in the header.
        declared: i32,
        /// Number of page entries actually present.
        found: i32,
    },

    /// Sum of page payload lengths disagrees with the header's stored length.
    #[snafu(display(
        "Stored length mismatch in {origin}: header declares {declared}, pages hold {actual}"
    ))]
    StoredLengthMismatch {
        /// File path (or backend description).
        origin: String,
        /// Stored length from the header.
        declared: i32,
        /// Total payload bytes across all pages.
        actual: usize,
    },

    /// Decompressed payload length disagrees with the header.
    #[snafu(display("Decompressed length mismatch in {origin}: expected {expected}, got {actual}"))]
    DecompressedLengthMismatch {
        /// File path (or backend description).
        origin: String,
        /// Uncompressed length from the header.
        expected: i32,
        /// Length produced by the decompressor.
        actual: usize,
    },

    /// Header record count disagrees with the deserialized rows.
    #[snafu(display(
        "Record count mismatch in {origin}: header declares {declared}, decoded {actual}"
    ))]
    RecordCountMismatch {
        /// File path (or backend description).
        origin: String,
        /// Record count from the header.
        declared: i32,
        /// Number of rows actually decoded.
        actual: usize,
    },

    /// File structure is malformed in a way not covered by a dedicated variant.
    #[snafu(display("Corrupted table file {origin}: {reason}"))]
    Corrupted {
        /// File path (or backend description).
        origin: String,
        /// Description of what was corrupted.
        reason: String,
    },

    /// Serialized payload does not fit the header's 32-bit length fields.
    #[snafu(display("Payload of {size} bytes for table {table} exceeds the format limit"))]
    PayloadTooLarge {
        /// Table being written.
        table: String,
        /// Payload size in bytes.
        size: usize,
    },

    /// Two rows would share the same unique index key.
    #[snafu(display(
        "Unique index {index} on {table}({}) already contains {value}",
        columns.join(", ")
    ))]
    UniqueIndexViolation {
        /// Table name.
        table: String,
        /// Index name.
        index: String,
        /// Indexed columns in declared order.
        columns: Vec<String>,
        /// The colliding key, rendered for display.
        value: String,
    },

    /// A foreign key value references a row that does not exist.
    #[snafu(display(
        "Foreign key {table}.{column} = {value} has no match in {target_table}.{target_column}"
    ))]
    ForeignKeyMissing {
        /// Referencing table.
        table: String,
        /// Referencing column.
        column: String,
        /// Referenced table.
        target_table: String,
        /// Referenced column.
        target_column: String,
        /// The dangling value, rendered for display.
        value: String,
    },

    /// A row cannot be deleted because another table still references it.
    #[snafu(display("{table} value {value} is still referenced by {using_table}.{using_column}"))]
    ForeignKeyInUse {
        /// Table the row is deleted from.
        table: String,
        /// The referenced value, rendered for display.
        value: String,
        /// Table holding the reference.
        using_table: String,
        /// Column holding the reference.
        using_column: String,
    },

    /// The referenced table is not open, so the reference cannot be checked.
    #[snafu(display("Table {table} is not registered"))]
    TableNotRegistered {
        /// The missing table name.
        table: String,
    },

    /// A table with the same name is already open.
    #[snafu(display("Table {table} is already registered"))]
    TableAlreadyRegistered {
        /// The duplicate table name.
        table: String,
    },

    /// Operation attempted on a table that is not open.
    #[snafu(display("Table {table} is closed"))]
    TableClosed {
        /// Table name.
        table: String,
    },

    /// Update targeted a row id that is not stored.
    #[snafu(display("Table {table} has no row with id {id}"))]
    RecordNotFound {
        /// Table name.
        table: String,
        /// The missing primary key.
        id: i64,
    },

    /// `begin_update` called while a batch is already open.
    #[snafu(display("Batch update already in progress on {scope}"))]
    AlreadyUpdating {
        /// Index or index set the batch was opened on.
        scope: String,
    },

    /// `end_update` called without a matching `begin_update`.
    #[snafu(display("No batch update in progress on {scope}"))]
    NotUpdating {
        /// Index or index set the batch was closed on.
        scope: String,
    },

    /// An index was declared over a column whose kind has no ordering.
    #[snafu(display("Index {index} on {table} uses column {column} of unsupported kind {kind}"))]
    UnsupportedIndexColumn {
        /// Table name.
        table: String,
        /// Index name.
        index: String,
        /// Offending column.
        column: String,
        /// The column's declared kind.
        kind: String,
    },

    /// Schema refers to a column it does not declare.
    #[snafu(display("Table {table} has no column {column}"))]
    UnknownColumn {
        /// Table name.
        table: String,
        /// The undeclared column.
        column: String,
    },

    /// Lookup named an index the table does not declare.
    #[snafu(display("Table {table} has no index {index}"))]
    UnknownIndex {
        /// Table name.
        table: String,
        /// The undeclared index.
        index: String,
    },

    /// Schema declaration is inconsistent.
    #[snafu(display("Invalid schema for {table}: {message}"))]
    InvalidSchema {
        /// Table name.
        table: String,
        /// What is wrong with the declaration.
        message: String,
    },

    /// Table options failed validation.
    #[snafu(display("Invalid table options: {message}"))]
    InvalidOptions {
        /// What is wrong with the options.
        message: String,
    },

    /// Sequence increments must be positive.
    #[snafu(display("Sequence increment for {table} must be positive, got {increment}"))]
    InvalidIncrement {
        /// Table name.
        table: String,
        /// The rejected increment.
        increment: i64,
    },

    /// Waiting for the table lock exceeded the configured timeout.
    #[snafu(display("Timed out after {timeout:?} waiting for the lock on {table}"))]
    LockTimeout {
        /// Table name.
        table: String,
        /// The configured lock timeout.
        timeout: Duration,
    },

    /// The table file is locked by another handle or process.
    #[snafu(display("Table file {path} is locked by another process"))]
    FileLocked {
        /// Path of the locked file.
        path: String,
    },
}

impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Error::Io { source }
    }
}

impl Error {
    /// Returns `true` for faults that make the table file unreadable.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::InvalidMagic { .. }
                | Error::UnsupportedVersion { .. }
                | Error::PageOutOfSequence { .. }
                | Error::PageCountMismatch { .. }
                | Error::StoredLengthMismatch { .. }
                | Error::DecompressedLengthMismatch { .. }
                | Error::RecordCountMismatch { .. }
                | Error::Corrupted { .. }
                | Error::Codec { .. }
                | Error::Decompression { .. }
        )
    }

    /// Returns `true` for faults that abort one operation and leave the table intact.
    pub fn is_constraint(&self) -> bool {
        matches!(
            self,
            Error::UniqueIndexViolation { .. }
                | Error::ForeignKeyMissing { .. }
                | Error::ForeignKeyInUse { .. }
                | Error::RecordNotFound { .. }
        )
    }

    /// Returns `true` for faults caused by calling the API incorrectly.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Error::TableClosed { .. }
                | Error::AlreadyUpdating { .. }
                | Error::NotUpdating { .. }
                | Error::UnsupportedIndexColumn { .. }
                | Error::UnknownColumn { .. }
                | Error::UnknownIndex { .. }
                | Error::InvalidSchema { .. }
                | Error::InvalidOptions { .. }
                | Error::InvalidIncrement { .. }
                | Error::TableAlreadyRegistered { .. }
                | Error::TableNotRegistered { .. }
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_invalid_magic() {
        let err = Error::InvalidMagic {
            origin: "countries.dat".to_string(),
            expected: *b"PM",
            found: *b"XX",
        };
        assert_eq!(
            format!("{err}"),
            "Invalid magic bytes in countries.dat: expected [80, 77], found [88, 88]"
        );
    }

    #[test]
    fn test_error_display_unique_violation_lists_columns() {
        let err = Error::UniqueIndexViolation {
            table: "cities".to_string(),
            index: "ix_city".to_string(),
            columns: vec!["country".to_string(), "name".to_string()],
            value: "(GB, London)".to_string(),
        };
        assert_eq!(
            format!("{err}"),
            "Unique index ix_city on cities(country, name) already contains (GB, London)"
        );
    }

    #[test]
    fn test_error_display_foreign_key_in_use() {
        let err = Error::ForeignKeyInUse {
            table: "countries".to_string(),
            value: "3".to_string(),
            using_table: "cities".to_string(),
            using_column: "country_id".to_string(),
        };
        assert_eq!(format!("{err}"), "countries value 3 is still referenced by cities.country_id");
    }

    #[test]
    fn test_error_display_lock_timeout() {
        let err = Error::LockTimeout { table: "t".to_string(), timeout: Duration::from_millis(5) };
        assert_eq!(format!("{err}"), "Timed out after 5ms waiting for the lock on t");
    }

    #[test]
    fn test_classification_is_disjoint() {
        let corrupt = Error::PageOutOfSequence { origin: "f".into(), expected: 1, found: 2 };
        let constraint = Error::ForeignKeyMissing {
            table: "a".into(),
            column: "b".into(),
            target_table: "c".into(),
            target_column: "id".into(),
            value: "1".into(),
        };
        let usage = Error::TableClosed { table: "a".into() };

        assert!(corrupt.is_corruption() && !corrupt.is_constraint() && !corrupt.is_usage());
        assert!(constraint.is_constraint() && !constraint.is_corruption());
        assert!(usage.is_usage() && !usage.is_constraint());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        match err {
            Error::Io { source } => assert_eq!(source.kind(), io::ErrorKind::PermissionDenied),
            _ => panic!("Expected Io variant"),
        }
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error as StdError;

        let err = Error::from(io::Error::new(io::ErrorKind::NotFound, "file not found"));
        assert!(err.source().is_some(), "Error::Io should have a source");
    }
}
