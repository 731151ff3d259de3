//! The factory: opening, upgrading, and deleting databases.

use crate::config::Config;
use crate::database::{Database, DatabaseInner};
use crate::engine::EngineInner;
use crate::error::{Error, Result};
use crate::event::{dispatch, Event, EventKind};
use crate::request::{Request, RequestInner, RequestResult, RequestSource};
use crate::transaction::TransactionInner;
use crate::types::{Durability, TransactionMode};
use idxdb_codec::{Key, Value};
use idxdb_storage::{MemoryDriver, SqliteDriver, StorageDriver};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

/// A parked open or delete, waiting for incumbent connections to close.
pub(crate) struct PendingFactoryOp {
    pub(crate) name: String,
    pub(crate) request: Arc<RequestInner>,
    pub(crate) kind: PendingKind,
}

pub(crate) enum PendingKind {
    Upgrade { old_version: u64, new_version: u64 },
    Delete { old_version: u64 },
}

/// The entry point: owns the engine (driver, task queue, schedulers,
/// connection registry). Factories are independent of each other, so
/// several can coexist with separate storage directories.
#[derive(Clone)]
pub struct Factory {
    engine: Arc<EngineInner>,
}

impl Factory {
    /// Opens a factory over a SQLite storage directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage directory cannot be initialised.
    pub fn open(config: Config) -> Result<Self> {
        let driver = SqliteDriver::open(&config.storage_path)?;
        Ok(Self::with_driver(Arc::new(driver), config))
    }

    /// Creates a factory over an in-memory driver (tests, ephemeral
    /// engines).
    #[must_use]
    pub fn memory() -> Self {
        Self::with_driver(Arc::new(MemoryDriver::new()), Config::default())
    }

    /// Creates a factory over a caller-supplied driver.
    #[must_use]
    pub fn with_driver(driver: Arc<dyn StorageDriver>, config: Config) -> Self {
        Self {
            engine: EngineInner::new(driver, config),
        }
    }

    /// Requests a connection to a database, upgrading it when the
    /// requested version exceeds the stored one. With no version, the
    /// database opens at its stored version (or 1 when new).
    ///
    /// # Errors
    ///
    /// `TypeError` when an explicit version of 0 is requested.
    /// Asynchronous failures (`VersionError`, aborted upgrades) arrive
    /// through the request's error event.
    pub fn open_database(&self, name: &str, version: Option<u64>) -> Result<Request> {
        if version == Some(0) {
            return Err(Error::type_error("database version must be at least 1"));
        }
        let request = RequestInner::new(RequestSource::Factory, None);
        let engine = Arc::clone(&self.engine);
        let name = name.to_string();
        let task_request = Arc::clone(&request);
        self.engine.tasks.schedule_task(Box::new(move || {
            run_open(&engine, &name, version, task_request);
        }));
        Ok(Request::from_inner(request))
    }

    /// Requests deletion of a database. Live connections receive a
    /// version-change event first; the delete proceeds once they close.
    #[must_use]
    pub fn delete_database(&self, name: &str) -> Request {
        let request = RequestInner::new(RequestSource::Factory, None);
        let engine = Arc::clone(&self.engine);
        let name = name.to_string();
        let task_request = Arc::clone(&request);
        self.engine.tasks.schedule_task(Box::new(move || {
            run_delete(&engine, &name, task_request);
        }));
        Request::from_inner(request)
    }

    /// Lists the databases as `(name, version)` pairs, ordered by name.
    ///
    /// # Errors
    ///
    /// Surfaces driver failures.
    pub fn databases(&self) -> Result<Vec<(String, u64)>> {
        Ok(self.engine.driver.list_databases()?)
    }

    /// Compares two values under the key ordering.
    ///
    /// # Errors
    ///
    /// `DataError` when either value is not a valid key.
    pub fn cmp(a: &Value, b: &Value) -> Result<Ordering> {
        let a = Key::from_value(a).map_err(|_| Error::data("first value is not a valid key"))?;
        let b = Key::from_value(b).map_err(|_| Error::data("second value is not a valid key"))?;
        Ok(a.cmp_order(&b))
    }

    /// Runs queued tasks and microtasks until both queues drain.
    pub fn run_until_idle(&self) {
        self.engine.tasks.run_until_idle();
    }

    /// Runs one task (with its microtask checkpoints). Returns `false`
    /// when nothing was pending.
    pub fn run_one(&self) -> bool {
        self.engine.tasks.run_one()
    }

    /// Whether the task queues are empty.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.engine.tasks.is_idle()
    }
}

impl std::fmt::Debug for Factory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Factory")
            .field("storage_path", &self.engine.config.storage_path)
            .finish_non_exhaustive()
    }
}

/// Fires a factory-level event at a lone request.
fn fire_at_request(
    request: &Arc<RequestInner>,
    kind: EventKind,
    versions: Option<(u64, Option<u64>)>,
) {
    let bubbles_cancelable = kind == EventKind::Error;
    let mut event = Event::new(kind, bubbles_cancelable, bubbles_cancelable);
    if let Some((old, new)) = versions {
        event = event.with_versions(old, new);
    }
    dispatch(&mut event, &[&request.target]);
}

fn settle_and_fire_error(request: &Arc<RequestInner>, error: Error) {
    request.settle_error(error);
    fire_at_request(request, EventKind::Error, None);
}

fn run_open(engine: &Arc<EngineInner>, name: &str, version: Option<u64>, request: Arc<RequestInner>) {
    let stored = match engine.driver.db_version(name) {
        Ok(stored) => stored.unwrap_or(0),
        Err(e) => return settle_and_fire_error(&request, e.into()),
    };
    let requested = version.unwrap_or_else(|| stored.max(1));

    if requested < stored {
        return settle_and_fire_error(
            &request,
            Error::version(format!(
                "requested version {requested} is below the stored version {stored}"
            )),
        );
    }

    if requested == stored {
        match DatabaseInner::open(engine, name, stored) {
            Ok(connection) => {
                request.settle_success(RequestResult::Database(Database::from_inner(connection)));
                fire_at_request(&request, EventKind::Success, None);
            }
            Err(e) => settle_and_fire_error(&request, e),
        }
        return;
    }

    // Upgrade needed: notify incumbents, then either proceed or park.
    broadcast_version_change(engine, name, stored, Some(requested));
    if engine.blocking_connections(name, None).is_empty() {
        start_upgrade(engine, name, stored, requested, request);
    } else {
        tracing::debug!(db = name, from = stored, to = requested, "upgrade blocked");
        fire_at_request(&request, EventKind::Blocked, Some((stored, Some(requested))));
        engine.park_pending(PendingFactoryOp {
            name: name.to_string(),
            request,
            kind: PendingKind::Upgrade {
                old_version: stored,
                new_version: requested,
            },
        });
    }
}

fn run_delete(engine: &Arc<EngineInner>, name: &str, request: Arc<RequestInner>) {
    let stored = match engine.driver.db_version(name) {
        Ok(stored) => stored.unwrap_or(0),
        Err(e) => return settle_and_fire_error(&request, e.into()),
    };

    broadcast_version_change(engine, name, stored, None);
    if engine.blocking_connections(name, None).is_empty() {
        finish_delete(engine, name, stored, &request);
    } else {
        tracing::debug!(db = name, "delete blocked");
        fire_at_request(&request, EventKind::Blocked, Some((stored, None)));
        engine.park_pending(PendingFactoryOp {
            name: name.to_string(),
            request,
            kind: PendingKind::Delete {
                old_version: stored,
            },
        });
    }
}

/// Resumes a parked open or delete after a connection closed; re-parks
/// if other connections still block it.
pub(crate) fn resume_pending(engine: &Arc<EngineInner>, op: PendingFactoryOp) {
    if !engine.blocking_connections(&op.name, None).is_empty() {
        engine.park_pending(op);
        return;
    }
    match op.kind {
        PendingKind::Upgrade {
            old_version,
            new_version,
        } => start_upgrade(engine, &op.name, old_version, new_version, op.request),
        PendingKind::Delete { old_version } => {
            finish_delete(engine, &op.name, old_version, &op.request);
        }
    }
}

fn broadcast_version_change(
    engine: &Arc<EngineInner>,
    name: &str,
    old_version: u64,
    new_version: Option<u64>,
) {
    for connection in engine.blocking_connections(name, None) {
        let mut event =
            Event::new(EventKind::VersionChange, false, false).with_versions(old_version, new_version);
        dispatch(&mut event, &[&connection.target]);
    }
}

fn start_upgrade(
    engine: &Arc<EngineInner>,
    name: &str,
    old_version: u64,
    new_version: u64,
    request: Arc<RequestInner>,
) {
    tracing::debug!(db = name, from = old_version, to = new_version, "starting upgrade");
    if let Err(e) = engine.driver.set_db_version(name, new_version) {
        return settle_and_fire_error(&request, e.into());
    }
    let connection = match DatabaseInner::open(engine, name, new_version) {
        Ok(connection) => connection,
        Err(e) => return settle_and_fire_error(&request, e),
    };

    let scope: BTreeSet<String> = connection.store_names().into_iter().collect();
    let tx = TransactionInner::new(
        Arc::clone(&connection),
        TransactionMode::VersionChange,
        scope,
        Durability::Default,
        Some(old_version),
    );
    connection.set_upgrade_tx(&tx);
    request.set_transaction(&tx);

    // Success or error on the open request once the upgrade transaction
    // settles.
    let hook_request = Arc::clone(&request);
    let hook_connection = Arc::clone(&connection);
    let hook_tx = Arc::clone(&tx);
    tx.add_completion_hook(Box::new(move |aborted| {
        if aborted {
            let reason = hook_tx
                .stored_error()
                .map_or_else(|| "upgrade transaction aborted".to_string(), |e| e.to_string());
            hook_request.settle_error(Error::abort(reason));
            let mut event = Event::new(EventKind::Error, true, true);
            dispatch(
                &mut event,
                &[&hook_request.target, &hook_tx.target, &hook_connection.target],
            );
        } else {
            hook_request.settle_success(RequestResult::Database(Database::from_inner(
                Arc::clone(&hook_connection),
            )));
            fire_at_request(&hook_request, EventKind::Success, None);
        }
    }));

    engine.scheduler_for(name).add(Arc::clone(&tx));

    let upgrade_db = Database::from_inner(connection);
    tx.queue_op(
        Some(request),
        EventKind::UpgradeNeeded,
        Some((old_version, Some(new_version))),
        Box::new(move || Ok(RequestResult::Database(upgrade_db))),
    );
}

fn finish_delete(engine: &Arc<EngineInner>, name: &str, old_version: u64, request: &Arc<RequestInner>) {
    if let Err(e) = engine.driver.delete_db(name) {
        return settle_and_fire_error(request, e.into());
    }
    tracing::debug!(db = name, "database deleted");
    request.settle_success(RequestResult::None);
    fire_at_request(request, EventKind::Success, Some((old_version, None)));
}
