//! Shared value types of the public API.

use crate::error::{Error, Result};
use idxdb_codec::{Key, KeyPath, KeyRange, Value};
use idxdb_storage::ScanDirection;
use std::fmt;

/// Transaction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Concurrent reads; overlapping read-only transactions may run
    /// together.
    ReadOnly,
    /// Reads and writes; serialised against every overlapping
    /// transaction.
    ReadWrite,
    /// Exclusive whole-database transaction; the only context in which
    /// schema changes are legal.
    VersionChange,
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransactionMode::ReadOnly => "readonly",
            TransactionMode::ReadWrite => "readwrite",
            TransactionMode::VersionChange => "versionchange",
        })
    }
}

/// Commit durability hint. Recorded and passed through; the SQL driver's
/// own journaling provides the actual guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Durability {
    /// Let the engine pick.
    #[default]
    Default,
    /// Flush through to disk on commit.
    Strict,
    /// Allow the OS to buffer.
    Relaxed,
}

/// Cursor iteration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Ascending key order.
    #[default]
    Forward,
    /// Ascending, one entry per distinct index key (the one with the
    /// smallest primary key).
    ForwardUnique,
    /// Descending key order.
    Reverse,
    /// Descending over distinct index keys; each lands on that key's
    /// smallest primary key.
    ReverseUnique,
}

impl Direction {
    pub(crate) fn scan(self) -> ScanDirection {
        match self {
            Direction::Forward | Direction::ForwardUnique => ScanDirection::Forward,
            Direction::Reverse | Direction::ReverseUnique => ScanDirection::Reverse,
        }
    }

    pub(crate) fn is_unique(self) -> bool {
        matches!(self, Direction::ForwardUnique | Direction::ReverseUnique)
    }

    pub(crate) fn is_reverse(self) -> bool {
        matches!(self, Direction::Reverse | Direction::ReverseUnique)
    }
}

/// A record as returned by `get_all_records`: for object stores the key
/// and primary key coincide; for indexes `key` is the index key.
#[derive(Debug, Clone)]
pub struct RecordEntry {
    /// Position key (index key for index sources).
    pub key: Key,
    /// The record's primary key.
    pub primary_key: Key,
    /// The record's value.
    pub value: Value,
}

/// A query argument: a single key or a key range.
#[derive(Debug, Clone)]
pub enum Query {
    /// Match exactly one key; the value is validated as a key.
    Key(Value),
    /// Match a range of keys.
    Range(KeyRange),
}

impl Query {
    /// Resolves this query to a key range.
    ///
    /// # Errors
    ///
    /// Returns `DataError` if a key query holds an invalid key.
    pub fn to_range(&self) -> Result<KeyRange> {
        match self {
            Query::Key(value) => {
                let key = Key::from_value(value)
                    .map_err(|_| Error::data("query is not a valid key"))?;
                Ok(KeyRange::only(key))
            }
            Query::Range(range) => Ok(range.clone()),
        }
    }
}

impl From<Value> for Query {
    fn from(value: Value) -> Self {
        Query::Key(value)
    }
}

impl From<&Value> for Query {
    fn from(value: &Value) -> Self {
        Query::Key(value.clone())
    }
}

impl From<Key> for Query {
    fn from(key: Key) -> Self {
        Query::Range(KeyRange::only(key))
    }
}

impl From<KeyRange> for Query {
    fn from(range: KeyRange) -> Self {
        Query::Range(range)
    }
}

impl From<f64> for Query {
    fn from(n: f64) -> Self {
        Query::Key(Value::Number(n))
    }
}

impl From<&str> for Query {
    fn from(s: &str) -> Self {
        Query::Key(Value::Text(s.to_string()))
    }
}

/// Options for `get_all_records`.
#[derive(Debug, Clone, Default)]
pub struct GetAllOptions {
    /// Restricting query; absent means everything.
    pub query: Option<Query>,
    /// Maximum number of records; 0 or absent means unbounded.
    pub count: Option<u32>,
    /// Iteration order.
    pub direction: Direction,
}

/// Converts a key range's encoded bounds into the driver's range type.
pub(crate) fn byte_range(range: &KeyRange) -> idxdb_storage::ByteRange {
    let bounds = range.to_byte_bounds();
    idxdb_storage::ByteRange {
        lower: bounds.lower,
        upper: bounds.upper,
        lower_open: bounds.lower_open,
        upper_open: bounds.upper_open,
    }
}

/// Serializes a key path into the opaque textual form the catalog
/// stores: a plain dotted string for single paths, a bracketed
/// comma-joined list for sequences. Path segments are identifiers, so
/// neither `[` nor `,` can occur inside them.
pub(crate) fn key_path_to_text(path: &KeyPath) -> Option<String> {
    match path {
        KeyPath::None => None,
        KeyPath::Single(s) => Some(s.clone()),
        KeyPath::Sequence(parts) => Some(format!("[{}]", parts.join(","))),
    }
}

/// Inverse of [`key_path_to_text`].
pub(crate) fn key_path_from_text(text: Option<&str>) -> Result<KeyPath> {
    match text {
        None => Ok(KeyPath::None),
        Some(s) => {
            if let Some(stripped) = s.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                let parts: Vec<String> = stripped.split(',').map(str::to_string).collect();
                Ok(KeyPath::parse_sequence(&parts)?)
            } else {
                Ok(KeyPath::parse_single(s)?)
            }
        }
    }
}
