//! Column values and comparable index keys.
//!
//! Rows expose their fields as [`ColumnValue`]s. Columns that take part in a
//! unique index are converted once per operation into an [`IndexKey`], a
//! closed set of totally ordered kinds. Floating point and byte columns have
//! no index key and are rejected when a schema declares an index over them.

use std::{cmp::Ordering, fmt};

use serde::{Deserialize, Serialize};

/// Declared kind of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnKind {
    /// Boolean flag.
    Bool,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
    /// 64-bit unsigned integer.
    U64,
    /// 64-bit float (not indexable).
    F64,
    /// UTF-8 text.
    Text,
    /// Raw bytes (not indexable).
    Bytes,
}

impl ColumnKind {
    /// Whether values of this kind can form an [`IndexKey`].
    #[inline]
    pub const fn is_indexable(self) -> bool {
        !matches!(self, Self::F64 | Self::Bytes)
    }

    /// Returns the human-readable name for this kind.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U64 => "u64",
            Self::F64 => "f64",
            Self::Text => "text",
            Self::Bytes => "bytes",
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single field value read from a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnValue {
    /// Absent value.
    Null,
    /// Boolean flag.
    Bool(bool),
    /// 32-bit signed integer.
    I32(i32),
    /// 64-bit signed integer.
    I64(i64),
    /// 64-bit unsigned integer.
    U64(u64),
    /// 64-bit float.
    F64(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl ColumnValue {
    /// Returns the default (zero) value for a column kind.
    pub fn default_for(kind: ColumnKind) -> Self {
        match kind {
            ColumnKind::Bool => Self::Bool(false),
            ColumnKind::I32 => Self::I32(0),
            ColumnKind::I64 => Self::I64(0),
            ColumnKind::U64 => Self::U64(0),
            ColumnKind::F64 => Self::F64(0.0),
            ColumnKind::Text => Self::Text(String::new()),
            ColumnKind::Bytes => Self::Bytes(Vec::new()),
        }
    }

    /// Whether this is `Null` or the zero value of its kind.
    pub fn is_default(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Bool(v) => !v,
            Self::I32(v) => *v == 0,
            Self::I64(v) => *v == 0,
            Self::U64(v) => *v == 0,
            Self::F64(v) => *v == 0.0,
            Self::Text(v) => v.is_empty(),
            Self::Bytes(v) => v.is_empty(),
        }
    }

    /// Returns the value as an `i64` when it is an integer that fits.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I32(v) => Some(i64::from(*v)),
            Self::I64(v) => Some(*v),
            Self::U64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Compares two values for reference matching.
    ///
    /// Integers compare numerically across widths so an `i32` foreign key
    /// column can reference an `i64` primary key.
    pub fn matches(&self, other: &ColumnValue) -> bool {
        match (self.as_i64(), other.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::Bytes(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl From<bool> for ColumnValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for ColumnValue {
    fn from(v: i32) -> Self {
        Self::I32(v)
    }
}

impl From<i64> for ColumnValue {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<u64> for ColumnValue {
    fn from(v: u64) -> Self {
        Self::U64(v)
    }
}

impl From<f64> for ColumnValue {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

impl From<String> for ColumnValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for ColumnValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<Vec<u8>> for ColumnValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<ColumnValue>> From<Option<T>> for ColumnValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Sort direction of a unique index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOrder {
    /// Smallest key first.
    #[default]
    Ascending,
    /// Largest key first.
    Descending,
}

impl SortOrder {
    /// Orders two keys according to this direction.
    #[inline]
    pub fn compare(self, a: &IndexKey, b: &IndexKey) -> Ordering {
        match self {
            Self::Ascending => a.cmp(b),
            Self::Descending => b.cmp(a),
        }
    }
}

/// Comparable key stored in a unique index.
///
/// Keys of one index always share a variant, since index columns are
/// type-checked when the table opens. `Composite` compares element-wise in
/// declared column order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexKey {
    /// Boolean key.
    Bool(bool),
    /// 32-bit signed key.
    I32(i32),
    /// 64-bit signed key.
    I64(i64),
    /// 64-bit unsigned key.
    U64(u64),
    /// Text key (also used for concatenated composite keys).
    Text(String),
    /// Multi-column key.
    Composite(Vec<IndexKey>),
}

impl IndexKey {
    /// Converts a column value into a key.
    ///
    /// Returns `None` for `Null` (absent values are not indexed) and for
    /// kinds without a total order.
    pub fn from_value(value: &ColumnValue) -> Option<Self> {
        match value {
            ColumnValue::Bool(v) => Some(Self::Bool(*v)),
            ColumnValue::I32(v) => Some(Self::I32(*v)),
            ColumnValue::I64(v) => Some(Self::I64(*v)),
            ColumnValue::U64(v) => Some(Self::U64(*v)),
            ColumnValue::Text(v) => Some(Self::Text(v.clone())),
            ColumnValue::Null | ColumnValue::F64(_) | ColumnValue::Bytes(_) => None,
        }
    }

    /// Joins the string form of each part with no separator.
    ///
    /// Distinct tuples can produce the same key (`"A","BC"` and `"AB","C"`).
    pub fn concatenated(parts: &[IndexKey]) -> Self {
        let mut buf = String::new();
        for part in parts {
            part.push_str(&mut buf);
        }
        Self::Text(buf)
    }

    fn push_str(&self, buf: &mut String) {
        use std::fmt::Write as _;
        match self {
            Self::Bool(v) => buf.push_str(if *v { "true" } else { "false" }),
            Self::I32(v) => {
                let _ = write!(buf, "{v}");
            },
            Self::I64(v) => {
                let _ = write!(buf, "{v}");
            },
            Self::U64(v) => {
                let _ = write!(buf, "{v}");
            },
            Self::Text(v) => buf.push_str(v),
            Self::Composite(parts) => {
                for part in parts {
                    part.push_str(buf);
                }
            },
        }
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::Composite(parts) => {
                f.write_str("(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{part}")?;
                }
                f.write_str(")")
            },
        }
    }
}

impl From<&str> for IndexKey {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for IndexKey {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<i64> for IndexKey {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<i32> for IndexKey {
    fn from(v: i32) -> Self {
        Self::I32(v)
    }
}
