//! Engine fixtures and open helpers.

use idxdb_core::{Config, Database, Factory, RequestResult, Result};
use tempfile::TempDir;

/// A test engine with automatic cleanup.
pub struct TestEngine {
    /// The factory under test.
    pub factory: Factory,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestEngine {
    /// Creates an engine over the in-memory driver.
    #[must_use]
    pub fn memory() -> Self {
        Self {
            factory: Factory::memory(),
            _temp_dir: None,
        }
    }

    /// Creates an engine over a SQLite driver in a temporary directory.
    #[must_use]
    pub fn sqlite() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let factory = Factory::open(Config::new().storage_path(temp_dir.path()))
            .expect("failed to open SQLite factory");
        Self {
            factory,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Opens a database at `version`, running `upgrade` inside the
    /// version-change transaction, and pumps the queue until the open
    /// settles.
    ///
    /// # Panics
    ///
    /// Panics when the open fails; tests that expect failures should
    /// drive the factory directly.
    pub fn open_at(
        &self,
        name: &str,
        version: u64,
        mut upgrade: impl FnMut(&Database) -> Result<()> + Send + 'static,
    ) -> Database {
        let request = self
            .factory
            .open_database(name, Some(version))
            .expect("open_database rejected the version");
        let upgrade_request = request.clone();
        request.on_upgrade_needed(move |_event| {
            if let RequestResult::Database(db) = upgrade_request.result()? {
                upgrade(&db)?;
            }
            Ok(())
        });
        self.factory.run_until_idle();
        match request.result().expect("open request still pending") {
            RequestResult::Database(db) => db,
            other => panic!(
                "open produced {other:?}, error {:?}",
                request.error().expect("open request still pending")
            ),
        }
    }

    /// Drains the task queue.
    pub fn pump(&self) {
        self.factory.run_until_idle();
    }
}

/// Runs a test with a fresh in-memory engine.
pub fn with_engine<R>(f: impl FnOnce(&TestEngine) -> R) -> R {
    let engine = TestEngine::memory();
    f(&engine)
}

/// Runs a test with a fresh SQLite engine in a temporary directory.
pub fn with_sqlite_engine<R>(f: impl FnOnce(&TestEngine) -> R) -> R {
    let engine = TestEngine::sqlite();
    f(&engine)
}

/// Runs a test with an in-memory engine and a database named `name`
/// opened at version 1 through the caller-supplied upgrade closure,
/// pumping the queue to completion before the test body runs.
pub fn with_upgraded_db<R>(
    name: &str,
    upgrade: impl FnMut(&Database) -> Result<()> + Send + 'static,
    f: impl FnOnce(&TestEngine, &Database) -> R,
) -> R {
    let engine = TestEngine::memory();
    let db = engine.open_at(name, 1, upgrade);
    f(&engine, &db)
}
