//! # IdxDB Testkit
//!
//! Test utilities for IdxDB.
//!
//! This crate provides:
//! - Engine fixtures over the memory and SQLite drivers
//! - Open-and-upgrade helpers that pump the task queue to completion
//! - Property-based generators for keys and values using proptest
//!
//! ## Usage
//!
//! ```
//! use idxdb_testkit::prelude::*;
//! use idxdb_codec::KeyPath;
//! use idxdb_core::StoreOptions;
//!
//! with_engine(|engine| {
//!     let db = engine.open_at("app", 1, |db| {
//!         db.create_object_store(
//!             "items",
//!             StoreOptions::new().key_path(KeyPath::parse_single("id")?),
//!         )?;
//!         Ok(())
//!     });
//!     assert_eq!(db.object_store_names(), vec!["items".to_string()]);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
