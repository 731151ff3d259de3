//! Per-database transaction scheduler.
//!
//! Transactions queue in creation order. A pending transaction may start
//! once every earlier unfinished entry either does not overlap its scope
//! or overlaps it with both sides read-only. Version-change transactions
//! have exclusive scope over the whole database. Starts are always
//! delivered on a deferred task, never re-entrantly.

use crate::transaction::TransactionInner;
use crate::types::TransactionMode;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
pub(crate) struct TransactionScheduler {
    state: Mutex<SchedulerState>,
}

#[derive(Default)]
struct SchedulerState {
    queue: Vec<Entry>,
}

struct Entry {
    tx: Arc<TransactionInner>,
    started: bool,
}

fn overlaps(a: &TransactionInner, b: &TransactionInner) -> bool {
    if a.mode == TransactionMode::VersionChange || b.mode == TransactionMode::VersionChange {
        return true;
    }
    a.scope.iter().any(|name| b.scope.contains(name))
}

fn blocks(earlier: &TransactionInner, candidate: &TransactionInner) -> bool {
    overlaps(earlier, candidate)
        && !(earlier.mode == TransactionMode::ReadOnly
            && candidate.mode == TransactionMode::ReadOnly)
}

impl TransactionScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Enqueues a transaction and starts whatever became startable.
    pub fn add(&self, tx: Arc<TransactionInner>) {
        self.state.lock().queue.push(Entry { tx, started: false });
        self.pump();
    }

    /// Removes a finished transaction and starts whatever became
    /// startable.
    pub fn finished(&self, tx_id: u64) {
        self.state.lock().queue.retain(|entry| entry.tx.id != tx_id);
        self.pump();
    }

    fn pump(&self) {
        let to_start: Vec<Arc<TransactionInner>> = {
            let mut state = self.state.lock();
            let mut started = Vec::new();
            for i in 0..state.queue.len() {
                if state.queue[i].started {
                    continue;
                }
                let candidate = Arc::clone(&state.queue[i].tx);
                let startable = state.queue[..i]
                    .iter()
                    .all(|earlier| !blocks(&earlier.tx, &candidate));
                if startable {
                    state.queue[i].started = true;
                    started.push(candidate);
                }
            }
            started
        };

        for tx in to_start {
            let Some(engine) = tx.db.engine.upgrade() else {
                continue;
            };
            tracing::debug!(tx = tx.id, db = %tx.db.name, "transaction scheduled to start");
            let starting = Arc::clone(&tx);
            engine
                .tasks
                .schedule_task(Box::new(move || starting.on_scheduler_start()));
        }
    }
}
