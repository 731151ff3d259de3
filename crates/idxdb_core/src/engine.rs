//! The engine: shared driver, task queue, scheduler map, and connection
//! registry.
//!
//! One engine value owns all cross-database state, so several engines
//! can coexist in a process, each with its own storage directory;
//! there is no global registry.

use crate::config::Config;
use crate::database::DatabaseInner;
use crate::factory::PendingFactoryOp;
use crate::task::TaskQueue;
use crate::transaction::TransactionScheduler;
use idxdb_storage::StorageDriver;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

pub(crate) struct EngineInner {
    pub(crate) driver: Arc<dyn StorageDriver>,
    pub(crate) tasks: TaskQueue,
    pub(crate) config: Config,
    ids: AtomicU64,
    state: Mutex<EngineState>,
}

#[derive(Default)]
struct EngineState {
    schedulers: HashMap<String, Arc<TransactionScheduler>>,
    connections: HashMap<String, Vec<Weak<DatabaseInner>>>,
    pending: Vec<PendingFactoryOp>,
}

impl EngineInner {
    pub(crate) fn new(driver: Arc<dyn StorageDriver>, config: Config) -> Arc<Self> {
        Arc::new(Self {
            driver,
            tasks: TaskQueue::new(),
            config,
            ids: AtomicU64::new(1),
            state: Mutex::new(EngineState::default()),
        })
    }

    /// Allocates a process-unique id (transactions, connections).
    pub(crate) fn next_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::Relaxed)
    }

    /// The scheduler for one database name, created on first use.
    pub(crate) fn scheduler_for(&self, db: &str) -> Arc<TransactionScheduler> {
        let mut state = self.state.lock();
        state
            .schedulers
            .entry(db.to_string())
            .or_insert_with(TransactionScheduler::new)
            .clone()
    }

    /// Records a live connection for version-change broadcasts.
    pub(crate) fn register_connection(&self, connection: &Arc<DatabaseInner>) {
        let mut state = self.state.lock();
        let list = state
            .connections
            .entry(connection.name.clone())
            .or_default();
        list.retain(|weak| weak.upgrade().is_some());
        list.push(Arc::downgrade(connection));
    }

    /// Live, not-yet-closed connections to a database, excluding one
    /// connection id.
    pub(crate) fn blocking_connections(
        &self,
        db: &str,
        exclude: Option<u64>,
    ) -> Vec<Arc<DatabaseInner>> {
        let mut state = self.state.lock();
        let Some(list) = state.connections.get_mut(db) else {
            return Vec::new();
        };
        list.retain(|weak| weak.upgrade().is_some());
        list.iter()
            .filter_map(Weak::upgrade)
            .filter(|conn| !conn.is_closed() && Some(conn.connection_id) != exclude)
            .collect()
    }

    /// Parks a blocked open or delete until connections drain.
    pub(crate) fn park_pending(&self, op: PendingFactoryOp) {
        self.state.lock().pending.push(op);
    }

    /// Called whenever a connection to `db` closes: resumes parked
    /// factory operations that are no longer blocked.
    pub(crate) fn connection_closed(self: &Arc<Self>, db: &str) {
        let runnable: Vec<PendingFactoryOp> = {
            let mut state = self.state.lock();
            let (ready, still_parked): (Vec<_>, Vec<_>) = std::mem::take(&mut state.pending)
                .into_iter()
                .partition(|op| op.name == db);
            state.pending = still_parked;
            ready
        };

        for op in runnable {
            let engine = Arc::clone(self);
            self.tasks.schedule_task(Box::new(move || {
                crate::factory::resume_pending(&engine, op);
            }));
        }
    }
}
