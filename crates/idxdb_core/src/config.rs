//! Engine configuration.

use std::path::PathBuf;

/// Configuration for creating an engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the database files and the catalog.
    pub storage_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("./idxdb_data"),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the storage directory.
    #[must_use]
    pub fn storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = path.into();
        self
    }
}
