//! # IdxDB Storage
//!
//! Storage driver trait and drivers for IdxDB.
//!
//! A [`StorageDriver`] is an opaque persistence layer: it stores encoded
//! keys and serialized values, runs range scans in bytewise key order, and
//! provides named nested savepoints. The engine owns all semantics above
//! that: key extraction, constraints, events, and transactions.
//!
//! ## Available drivers
//!
//! - [`SqliteDriver`]: one SQLite file per database, the production
//!   driver
//! - [`MemoryDriver`]: ordered in-memory maps with snapshot savepoints,
//!   for tests and ephemeral engines
//!
//! ## Example
//!
//! ```
//! use idxdb_storage::{MemoryDriver, StorageDriver};
//!
//! let driver = MemoryDriver::new();
//! driver.set_db_version("app", 1).unwrap();
//! let store = driver.create_store("app", "items", None, true).unwrap();
//! driver.put_record("app", store.id, b"k", b"v").unwrap();
//! assert_eq!(driver.get_record("app", store.id, b"k").unwrap(), Some(b"v".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod driver;
mod error;
mod memory;
mod sqlite;

pub use driver::{
    ByteRange, IndexId, IndexMeta, RawIndexEntry, RawIndexRecord, RawRecord, ScanDirection,
    StorageDriver, StoreId, StoreMeta,
};
pub use error::{DriverError, DriverResult};
pub use memory::MemoryDriver;
pub use sqlite::SqliteDriver;
