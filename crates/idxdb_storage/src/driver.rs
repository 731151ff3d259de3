//! Storage driver trait definition.

use crate::error::DriverResult;

/// Stable identifier of an object store within a database.
pub type StoreId = i64;

/// Stable identifier of an index within a database.
pub type IndexId = i64;

/// Catalog row describing an object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreMeta {
    /// Stable id, assigned by the driver at creation.
    pub id: StoreId,
    /// Store name, unique within its database.
    pub name: String,
    /// Key path in textual form: `None` for out-of-line keys, a plain
    /// dotted string, or a bracketed comma-joined list for sequences.
    /// The driver stores this opaquely.
    pub key_path: Option<String>,
    /// Whether the store owns a key generator.
    pub auto_increment: bool,
    /// Current key generator value. Starts at 1, monotone.
    pub current_key: i64,
}

/// Catalog row describing an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMeta {
    /// Stable id, assigned by the driver at creation.
    pub id: IndexId,
    /// Owning object store.
    pub store_id: StoreId,
    /// Index name, unique within its store.
    pub name: String,
    /// Key path in the same textual form as [`StoreMeta::key_path`].
    pub key_path: String,
    /// Whether index keys must be unique across records.
    pub unique: bool,
    /// Whether array-valued key paths fan out to one entry per element.
    pub multi_entry: bool,
}

/// Encoded key bounds for a range operation. An absent bound is
/// unbounded on that side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteRange {
    /// Encoded lower bound.
    pub lower: Option<Vec<u8>>,
    /// Encoded upper bound.
    pub upper: Option<Vec<u8>>,
    /// Whether the lower bound is excluded.
    pub lower_open: bool,
    /// Whether the upper bound is excluded.
    pub upper_open: bool,
}

impl ByteRange {
    /// The unbounded range.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// A range matching exactly one encoded key.
    pub fn only(key: Vec<u8>) -> Self {
        Self {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_open: false,
            upper_open: false,
        }
    }
}

/// Scan order for range operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    /// Ascending encoded-key order.
    Forward,
    /// Descending encoded-key order.
    Reverse,
}

/// A record row: encoded primary key plus serialized value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Encoded primary key.
    pub key: Vec<u8>,
    /// Serialized value bytes.
    pub value: Vec<u8>,
}

/// An index entry: encoded index key plus encoded primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawIndexEntry {
    /// Encoded index key.
    pub key: Vec<u8>,
    /// Encoded primary key of the referenced record.
    pub primary_key: Vec<u8>,
}

/// An index entry joined with its record's value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawIndexRecord {
    /// Encoded index key.
    pub key: Vec<u8>,
    /// Encoded primary key.
    pub primary_key: Vec<u8>,
    /// Serialized value bytes of the referenced record.
    pub value: Vec<u8>,
}

/// The persistence interface of the engine.
///
/// All key and bound parameters are already in the order-preserving
/// encoding, so plain bytewise comparison (SQL `ORDER BY` on a BLOB
/// column, or a `BTreeMap` over byte vectors) yields key order. Drivers
/// interpret nothing beyond that.
///
/// Index scans order entries by the `(key, primary_key)` tuple. Savepoints
/// are named and nest per database; `rollback_savepoint` restores the
/// state at the savepoint's creation and keeps the savepoint alive,
/// `release_savepoint` discards it and keeps the changes.
pub trait StorageDriver: Send + Sync {
    // ── Database catalog ────────────────────────────────────────────

    /// Lists all databases as `(name, version)`, ordered by name.
    fn list_databases(&self) -> DriverResult<Vec<(String, u64)>>;

    /// Checks whether a database exists.
    fn db_exists(&self, db: &str) -> DriverResult<bool>;

    /// Returns a database's version, or `None` if it does not exist.
    fn db_version(&self, db: &str) -> DriverResult<Option<u64>>;

    /// Sets a database's version, creating the database if missing.
    fn set_db_version(&self, db: &str, version: u64) -> DriverResult<()>;

    /// Deletes a database and its backing file(s). Deleting a missing
    /// database is a no-op.
    fn delete_db(&self, db: &str) -> DriverResult<()>;

    // ── Object store catalog ────────────────────────────────────────

    /// Lists the object stores of a database, ordered by name.
    fn list_stores(&self, db: &str) -> DriverResult<Vec<StoreMeta>>;

    /// Creates an object store and returns its catalog row.
    fn create_store(
        &self,
        db: &str,
        name: &str,
        key_path: Option<&str>,
        auto_increment: bool,
    ) -> DriverResult<StoreMeta>;

    /// Deletes an object store, its records, its indexes, and their
    /// entries.
    fn delete_store(&self, db: &str, store: StoreId) -> DriverResult<()>;

    /// Renames an object store.
    fn rename_store(&self, db: &str, store: StoreId, new_name: &str) -> DriverResult<()>;

    /// Fetches one store's catalog row.
    fn get_store_meta(&self, db: &str, store: StoreId) -> DriverResult<StoreMeta>;

    /// Advances a store's key generator value.
    fn update_current_key(&self, db: &str, store: StoreId, value: i64) -> DriverResult<()>;

    // ── Index catalog ───────────────────────────────────────────────

    /// Lists the indexes of a store, ordered by name.
    fn list_indexes(&self, db: &str, store: StoreId) -> DriverResult<Vec<IndexMeta>>;

    /// Creates an index and returns its catalog row. Entries are not
    /// back-populated here; the engine does that.
    fn create_index(
        &self,
        db: &str,
        store: StoreId,
        name: &str,
        key_path: &str,
        unique: bool,
        multi_entry: bool,
    ) -> DriverResult<IndexMeta>;

    /// Deletes an index and its entries.
    fn delete_index(&self, db: &str, index: IndexId) -> DriverResult<()>;

    /// Renames an index.
    fn rename_index(&self, db: &str, index: IndexId, new_name: &str) -> DriverResult<()>;

    /// Fetches one index's catalog row.
    fn get_index_meta(&self, db: &str, index: IndexId) -> DriverResult<IndexMeta>;

    // ── Records ─────────────────────────────────────────────────────

    /// Writes a record, replacing any existing record with the same key.
    fn put_record(&self, db: &str, store: StoreId, key: &[u8], value: &[u8]) -> DriverResult<()>;

    /// Reads a record's value by key.
    fn get_record(&self, db: &str, store: StoreId, key: &[u8]) -> DriverResult<Option<Vec<u8>>>;

    /// Deletes a record by key. Returns whether a record existed.
    fn delete_record(&self, db: &str, store: StoreId, key: &[u8]) -> DriverResult<bool>;

    /// Deletes all records of a store and all entries of its indexes.
    fn clear_records(&self, db: &str, store: StoreId) -> DriverResult<()>;

    // ── Record ranges ───────────────────────────────────────────────

    /// Fetches up to `limit` records in a range, in `direction` order.
    fn get_in_range(
        &self,
        db: &str,
        store: StoreId,
        range: &ByteRange,
        direction: ScanDirection,
        limit: Option<u64>,
    ) -> DriverResult<Vec<RawRecord>>;

    /// Deletes every record in a range. Index entries referencing the
    /// deleted records are not touched; the engine removes those.
    fn delete_in_range(&self, db: &str, store: StoreId, range: &ByteRange) -> DriverResult<()>;

    /// Counts the records in a range.
    fn count_in_range(&self, db: &str, store: StoreId, range: &ByteRange) -> DriverResult<u64>;

    /// Cursor scan over records: identical contract to [`Self::get_in_range`],
    /// kept separate so drivers may stream rather than materialize.
    fn scan_in_range(
        &self,
        db: &str,
        store: StoreId,
        range: &ByteRange,
        direction: ScanDirection,
        limit: Option<u64>,
    ) -> DriverResult<Vec<RawRecord>>;

    // ── Index maintenance ───────────────────────────────────────────

    /// Adds an index entry. Duplicate `(key, primary_key)` pairs are
    /// ignored.
    fn add_index_entry(
        &self,
        db: &str,
        index: IndexId,
        key: &[u8],
        primary_key: &[u8],
    ) -> DriverResult<()>;

    /// Removes every entry of an index that references a primary key.
    fn delete_entries_for_primary(
        &self,
        db: &str,
        index: IndexId,
        primary_key: &[u8],
    ) -> DriverResult<()>;

    /// Checks whether an index key is already present, optionally
    /// ignoring entries that belong to `exclude_primary`. Returns `true`
    /// when a conflicting entry exists.
    fn check_unique(
        &self,
        db: &str,
        index: IndexId,
        key: &[u8],
        exclude_primary: Option<&[u8]>,
    ) -> DriverResult<bool>;

    // ── Index reads ─────────────────────────────────────────────────

    /// Fetches the first entry with an exact index key (smallest primary
    /// key), joined with its record value.
    fn get_by_index_key(
        &self,
        db: &str,
        store: StoreId,
        index: IndexId,
        key: &[u8],
    ) -> DriverResult<Option<RawIndexRecord>>;

    /// Fetches the first entry in an index key range, in `direction`
    /// order, joined with its record value.
    fn get_by_index_range(
        &self,
        db: &str,
        store: StoreId,
        index: IndexId,
        range: &ByteRange,
        direction: ScanDirection,
    ) -> DriverResult<Option<RawIndexRecord>>;

    /// Counts the entries in an index key range.
    fn count_index(&self, db: &str, index: IndexId, range: &ByteRange) -> DriverResult<u64>;

    /// Cursor scan over index entries in `(key, primary_key)` tuple
    /// order. `after` restricts the scan to entries strictly beyond that
    /// tuple in scan order, on top of the range bounds.
    fn scan_index(
        &self,
        db: &str,
        index: IndexId,
        range: &ByteRange,
        after: Option<(&[u8], &[u8])>,
        direction: ScanDirection,
        limit: Option<u64>,
    ) -> DriverResult<Vec<RawIndexEntry>>;

    /// Fetches up to `limit` entries in an index key range joined with
    /// their record values, in `(key, primary_key)` order.
    fn get_all_index(
        &self,
        db: &str,
        store: StoreId,
        index: IndexId,
        range: &ByteRange,
        direction: ScanDirection,
        limit: Option<u64>,
    ) -> DriverResult<Vec<RawIndexRecord>>;

    // ── Savepoints ──────────────────────────────────────────────────

    /// Begins a named savepoint on a database.
    fn begin_savepoint(&self, db: &str, name: &str) -> DriverResult<()>;

    /// Releases a savepoint, keeping its changes.
    fn release_savepoint(&self, db: &str, name: &str) -> DriverResult<()>;

    /// Rolls a database back to a savepoint's creation point.
    fn rollback_savepoint(&self, db: &str, name: &str) -> DriverResult<()>;
}
