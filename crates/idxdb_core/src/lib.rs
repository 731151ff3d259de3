//! # IdxDB Core
//!
//! An IndexedDB-semantics storage engine over an embedded SQL store.
//!
//! The engine reproduces the IndexedDB behavioral contract: named,
//! versioned databases; object stores with key paths and key generators;
//! secondary indexes with unique and multi-entry modes; range cursors in
//! four directions; and transactions with savepoint-backed rollback,
//! auto-commit, and the event-based asynchrony model, all on top of a
//! pluggable [storage driver](idxdb_storage::StorageDriver).
//!
//! ## Model
//!
//! All asynchrony is explicit: operations queue events on the factory's
//! internal task queue, and the host drains it with
//! [`Factory::run_until_idle`] (or one task at a time with
//! [`Factory::run_one`]). Results are observed from request handles
//! after their success or error event has fired.
//!
//! ```no_run
//! use idxdb_core::{Config, Factory, RequestResult, StoreOptions, TransactionMode};
//! use idxdb_codec::{KeyPath, Value};
//!
//! # fn main() -> idxdb_core::Result<()> {
//! let factory = Factory::open(Config::new().storage_path("./data"))?;
//! let open = factory.open_database("app", Some(1))?;
//! let upgrade_request = open.clone();
//! open.on_upgrade_needed(move |_event| {
//!     let RequestResult::Database(db) = upgrade_request.result()? else { return Ok(()) };
//!     db.create_object_store(
//!         "items",
//!         StoreOptions::new().key_path(KeyPath::parse_single("id")?),
//!     )?;
//!     Ok(())
//! });
//! factory.run_until_idle();
//!
//! let RequestResult::Database(db) = open.result()? else { unreachable!() };
//! let tx = db.transaction(&["items"], TransactionMode::ReadWrite)?;
//! let store = tx.object_store("items")?;
//! store.put(
//!     &Value::map(vec![
//!         ("id".to_string(), Value::Number(1.0)),
//!         ("name".to_string(), Value::Text("widget".into())),
//!     ]),
//!     None,
//! )?;
//! factory.run_until_idle();
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod cursor;
mod database;
mod engine;
mod error;
mod event;
mod factory;
mod index;
mod request;
mod store;
mod task;
mod transaction;
mod types;

pub use config::Config;
pub use cursor::Cursor;
pub use database::{Database, StoreOptions};
pub use error::{Error, Result};
pub use event::{Event, EventKind};
pub use factory::Factory;
pub use index::Index;
pub use request::{ReadyState, Request, RequestResult, RequestSource};
pub use store::{IndexOptions, ObjectStore};
pub use transaction::{Transaction, TransactionState};
pub use types::{Direction, Durability, GetAllOptions, Query, RecordEntry, TransactionMode};

pub use idxdb_codec::{Key, KeyPath, KeyRange, Value};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
