//! Transaction lifecycle, operation queueing, and event discipline.
//!
//! A transaction is **active** at creation and during each of its event
//! handlers; it goes **inactive** at the microtask checkpoint that
//! follows, **committing** once auto-commit or an explicit commit begins
//! finalisation, and **finished** terminally. Data operations are legal
//! only while active.
//!
//! Every request queues an operation closure (synchronous storage work)
//! paired with an event delivery. Until the scheduler starts the
//! transaction both are buffered; afterwards operations run in order at
//! queue time and their events fire on deferred tasks.

mod journal;
mod scheduler;

pub(crate) use journal::MetadataChange;
pub(crate) use scheduler::TransactionScheduler;

use crate::database::{Database, DatabaseInner};
use crate::engine::EngineInner;
use crate::error::{Error, Result};
use crate::event::{dispatch, Event, EventKind, EventTarget, Listener};
use crate::request::{RequestInner, RequestResult};
use crate::store::ObjectStore;
use crate::types::{Durability, TransactionMode};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Data operations are legal.
    Active,
    /// Between event handlers; operations raise
    /// `TransactionInactiveError`.
    Inactive,
    /// Finalisation has begun.
    Committing,
    /// Committed or aborted.
    Finished,
}

pub(crate) type Operation = Box<dyn FnOnce() -> Result<RequestResult> + Send>;

struct QueuedOp {
    request: Option<Arc<RequestInner>>,
    success_kind: EventKind,
    versions: Option<(u64, Option<u64>)>,
    operation: Operation,
}

type CompletionHook = Box<dyn FnOnce(bool) + Send>;

#[derive(Default)]
struct TxState {
    lifecycle: Lifecycle,
    started: bool,
    commit_requested: bool,
    error: Option<Error>,
    savepoint: Option<String>,
    buffered: VecDeque<QueuedOp>,
    pending_requests: usize,
    outstanding: Vec<Arc<RequestInner>>,
    journal: Vec<MetadataChange>,
    store_handles: HashMap<String, ObjectStore>,
    completion_hooks: Vec<CompletionHook>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Lifecycle {
    #[default]
    Active,
    Inactive,
    Committing,
    Finished,
}

impl Lifecycle {
    fn public(self) -> TransactionState {
        match self {
            Lifecycle::Active => TransactionState::Active,
            Lifecycle::Inactive => TransactionState::Inactive,
            Lifecycle::Committing => TransactionState::Committing,
            Lifecycle::Finished => TransactionState::Finished,
        }
    }
}

pub(crate) struct TransactionInner {
    pub(crate) id: u64,
    pub(crate) db: Arc<DatabaseInner>,
    pub(crate) mode: TransactionMode,
    pub(crate) scope: BTreeSet<String>,
    pub(crate) durability: Durability,
    /// Version before the upgrade, for version-change transactions.
    pub(crate) upgrade_from: Option<u64>,
    pub(crate) target: EventTarget,
    state: Mutex<TxState>,
}

impl TransactionInner {
    pub(crate) fn new(
        db: Arc<DatabaseInner>,
        mode: TransactionMode,
        scope: BTreeSet<String>,
        durability: Durability,
        upgrade_from: Option<u64>,
    ) -> Arc<Self> {
        let engine = db.engine.upgrade();
        let id = engine.as_ref().map_or(0, |e| e.next_id());
        let tx = Arc::new(Self {
            id,
            db,
            mode,
            scope,
            durability,
            upgrade_from,
            target: EventTarget::new(),
            state: Mutex::new(TxState::default()),
        });

        tx.db.transaction_started();

        // The transaction is active through the synchronous region that
        // created it, then deactivates at the next microtask checkpoint.
        if let Some(engine) = engine {
            let created = Arc::clone(&tx);
            engine.tasks.schedule_microtask(Box::new(move || {
                {
                    let mut st = created.state.lock();
                    if st.lifecycle == Lifecycle::Active {
                        st.lifecycle = Lifecycle::Inactive;
                    }
                }
                created.maybe_autocommit();
            }));
        }

        tx
    }

    pub(crate) fn engine(&self) -> Result<Arc<EngineInner>> {
        self.db
            .engine
            .upgrade()
            .ok_or_else(|| Error::invalid_state("engine has shut down"))
    }

    /// Current public lifecycle state.
    pub(crate) fn lifecycle(&self) -> TransactionState {
        self.state.lock().lifecycle.public()
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.state.lock().lifecycle == Lifecycle::Finished
    }

    pub(crate) fn stored_error(&self) -> Option<Error> {
        self.state.lock().error.clone()
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        if self.state.lock().lifecycle == Lifecycle::Active {
            Ok(())
        } else {
            Err(Error::transaction_inactive(
                "operation requires an active transaction",
            ))
        }
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.mode == TransactionMode::ReadOnly {
            Err(Error::read_only("transaction is read-only"))
        } else {
            Ok(())
        }
    }

    pub(crate) fn ensure_version_change(&self) -> Result<()> {
        if self.mode == TransactionMode::VersionChange {
            Ok(())
        } else {
            Err(Error::invalid_state(
                "schema changes require a version-change transaction",
            ))
        }
    }

    /// Runs `f` with the transaction momentarily non-active, so work
    /// happening inside it (value cloning) cannot issue nested
    /// operations.
    pub(crate) fn with_suspended_active<T>(&self, f: impl FnOnce() -> T) -> T {
        let was_active = {
            let mut st = self.state.lock();
            let was = st.lifecycle == Lifecycle::Active;
            if was {
                st.lifecycle = Lifecycle::Inactive;
            }
            was
        };
        let out = f();
        if was_active {
            let mut st = self.state.lock();
            if st.lifecycle == Lifecycle::Inactive {
                st.lifecycle = Lifecycle::Active;
            }
        }
        out
    }

    /// Begins the transaction's savepoint if it has not been begun yet.
    pub(crate) fn ensure_savepoint(&self) -> Result<()> {
        let name = {
            let mut st = self.state.lock();
            if st.savepoint.is_some() {
                return Ok(());
            }
            let name = format!("tx_{}", self.id);
            st.savepoint = Some(name.clone());
            name
        };
        let engine = self.engine()?;
        engine.driver.begin_savepoint(&self.db.name, &name)?;
        Ok(())
    }

    /// Records a metadata change for abort-time revert. Only meaningful
    /// for version-change transactions.
    pub(crate) fn journal(&self, change: MetadataChange) {
        self.state.lock().journal.push(change);
    }

    /// Returns the per-transaction handle for a store, creating and
    /// caching it on first use.
    pub(crate) fn store_handle(
        self: &Arc<Self>,
        name: &str,
        create: impl FnOnce() -> ObjectStore,
    ) -> ObjectStore {
        let mut st = self.state.lock();
        st.store_handles
            .entry(name.to_string())
            .or_insert_with(create)
            .clone()
    }

    pub(crate) fn rekey_store_handle(&self, old_name: &str, new_name: &str) {
        let mut st = self.state.lock();
        if let Some(handle) = st.store_handles.remove(old_name) {
            st.store_handles.insert(new_name.to_string(), handle);
        }
    }

    pub(crate) fn remove_store_handle(&self, name: &str) -> Option<ObjectStore> {
        self.state.lock().store_handles.remove(name)
    }

    /// Registers a callback invoked (on a deferred task) once the
    /// transaction finishes; the argument is `true` when it aborted.
    pub(crate) fn add_completion_hook(&self, hook: CompletionHook) {
        self.state.lock().completion_hooks.push(hook);
    }

    // ── Operation queueing ──────────────────────────────────────────

    /// Queues a request's operation with a plain success event.
    pub(crate) fn queue_request(
        self: &Arc<Self>,
        request: Arc<RequestInner>,
        operation: Operation,
    ) {
        self.queue_op(Some(request), EventKind::Success, None, operation);
    }

    /// Queues an internal operation with no request; a failure aborts
    /// the transaction asynchronously.
    pub(crate) fn queue_internal(self: &Arc<Self>, operation: Operation) {
        self.queue_op(None, EventKind::Success, None, operation);
    }

    pub(crate) fn queue_op(
        self: &Arc<Self>,
        request: Option<Arc<RequestInner>>,
        success_kind: EventKind,
        versions: Option<(u64, Option<u64>)>,
        operation: Operation,
    ) {
        let to_run = {
            let mut st = self.state.lock();
            if let Some(req) = &request {
                st.pending_requests += 1;
                st.outstanding.push(Arc::clone(req));
            }
            if st.started {
                Some((request, operation))
            } else {
                st.buffered.push_back(QueuedOp {
                    request,
                    success_kind,
                    versions,
                    operation,
                });
                None
            }
        };
        if let Some((request, operation)) = to_run {
            self.execute_op(request, success_kind, versions, operation);
        }
    }

    fn execute_op(
        self: &Arc<Self>,
        request: Option<Arc<RequestInner>>,
        success_kind: EventKind,
        versions: Option<(u64, Option<u64>)>,
        operation: Operation,
    ) {
        let outcome = operation();
        match request {
            Some(request) => self.schedule_request_event(request, outcome, success_kind, versions),
            None => {
                if let Err(error) = outcome {
                    // The abort must beat the auto-commit checkpoint, so
                    // it is a microtask, not a task.
                    let Ok(engine) = self.engine() else { return };
                    let tx = Arc::clone(self);
                    engine
                        .tasks
                        .schedule_microtask(Box::new(move || tx.abort_with(error)));
                }
            }
        }
    }

    fn schedule_request_event(
        self: &Arc<Self>,
        request: Arc<RequestInner>,
        outcome: Result<RequestResult>,
        success_kind: EventKind,
        versions: Option<(u64, Option<u64>)>,
    ) {
        let Ok(engine) = self.engine() else { return };
        let tx = Arc::clone(self);
        engine.tasks.schedule_task(Box::new(move || {
            tx.deliver_request_event(&request, outcome, success_kind, versions);
        }));
    }

    /// Delivers one request's event with the full activation discipline:
    /// re-activate, dispatch, abort on handler failure or an unprevented
    /// error event, then return to inactive after a double microtask
    /// checkpoint.
    fn deliver_request_event(
        self: &Arc<Self>,
        request: &Arc<RequestInner>,
        outcome: Result<RequestResult>,
        success_kind: EventKind,
        versions: Option<(u64, Option<u64>)>,
    ) {
        {
            let mut st = self.state.lock();
            if st.lifecycle == Lifecycle::Finished {
                return;
            }
            st.outstanding.retain(|r| !Arc::ptr_eq(r, request));
            if !st.commit_requested {
                st.lifecycle = Lifecycle::Active;
            }
        }

        let (kind, bubbles, cancelable) = match &outcome {
            Ok(_) => (success_kind, false, false),
            Err(_) => (EventKind::Error, true, true),
        };
        match outcome {
            Ok(result) => request.settle_success(result),
            Err(error) => request.settle_error(error),
        }

        let mut event = Event::new(kind, bubbles, cancelable);
        if let Some((old, new)) = versions {
            event = event.with_versions(old, new);
        }
        let dispatched = dispatch(
            &mut event,
            &[&request.target, &self.target, &self.db.target],
        );

        if let Some(error) = dispatched.handler_error {
            self.abort_with(error);
            return;
        }
        if kind == EventKind::Error && !dispatched.default_prevented {
            let error = request
                .stored_error()
                .unwrap_or_else(|| Error::abort("request failed"));
            self.abort_with(error);
            return;
        }

        // Two checkpoints keep the transaction active through the
        // microtasks the handler itself queued.
        let Ok(engine) = self.engine() else { return };
        let tx = Arc::clone(self);
        let inner_engine = Arc::clone(&engine);
        engine.tasks.schedule_microtask(Box::new(move || {
            let tx = Arc::clone(&tx);
            inner_engine
                .tasks
                .schedule_microtask(Box::new(move || tx.settle_after_event()));
        }));
    }

    fn settle_after_event(self: &Arc<Self>) {
        let should_commit = {
            let mut st = self.state.lock();
            if st.lifecycle == Lifecycle::Finished {
                return;
            }
            if st.lifecycle == Lifecycle::Active {
                st.lifecycle = Lifecycle::Inactive;
            }
            st.pending_requests = st.pending_requests.saturating_sub(1);
            st.pending_requests == 0
                && (st.lifecycle == Lifecycle::Inactive || st.commit_requested)
        };
        if should_commit {
            self.do_commit();
        }
    }

    fn maybe_autocommit(self: &Arc<Self>) {
        let (commit_now, remember) = {
            let mut st = self.state.lock();
            if st.lifecycle != Lifecycle::Inactive || st.pending_requests != 0 {
                (false, false)
            } else if st.started {
                (true, false)
            } else {
                st.commit_requested = true;
                (false, true)
            }
        };
        if remember {
            tracing::debug!(tx = self.id, "empty transaction will commit on start");
        }
        if commit_now {
            self.do_commit();
        }
    }

    /// Scheduler callback: run the buffered operations in order.
    pub(crate) fn on_scheduler_start(self: &Arc<Self>) {
        let (ops, commit_now) = {
            let mut st = self.state.lock();
            if st.lifecycle == Lifecycle::Finished {
                return;
            }
            st.started = true;
            let ops: Vec<QueuedOp> = st.buffered.drain(..).collect();
            let commit_now = ops.is_empty() && st.commit_requested && st.pending_requests == 0;
            (ops, commit_now)
        };
        tracing::debug!(tx = self.id, db = %self.db.name, ops = ops.len(), "transaction started");
        for op in ops {
            if self.is_finished() {
                return;
            }
            self.execute_op(op.request, op.success_kind, op.versions, op.operation);
        }
        if commit_now {
            self.do_commit();
        }
    }

    // ── Commit ──────────────────────────────────────────────────────

    /// Explicitly requests a commit without waiting for further events.
    pub(crate) fn request_commit(self: &Arc<Self>) -> Result<()> {
        let commit_now = {
            let mut st = self.state.lock();
            match st.lifecycle {
                Lifecycle::Finished | Lifecycle::Committing => {
                    return Err(Error::invalid_state("transaction is already finishing"));
                }
                _ => {}
            }
            st.commit_requested = true;
            st.lifecycle = Lifecycle::Committing;
            st.started && st.pending_requests == 0
        };
        if commit_now {
            self.do_commit();
        }
        Ok(())
    }

    fn do_commit(self: &Arc<Self>) {
        let savepoint = {
            let mut st = self.state.lock();
            if st.lifecycle == Lifecycle::Finished {
                return;
            }
            st.lifecycle = Lifecycle::Committing;
            st.savepoint.take()
        };

        if let Some(name) = savepoint {
            let release = self
                .engine()
                .and_then(|engine| {
                    engine
                        .driver
                        .release_savepoint(&self.db.name, &name)
                        .map_err(Error::from)
                });
            if let Err(error) = release {
                tracing::warn!(tx = self.id, %error, "commit failed, aborting");
                self.abort_with(Error::abort(format!("commit failed: {error}")));
                return;
            }
        }

        tracing::debug!(tx = self.id, db = %self.db.name, "transaction committed");
        self.finalize(false);
    }

    // ── Abort ───────────────────────────────────────────────────────

    /// Explicit abort.
    pub(crate) fn request_abort(self: &Arc<Self>) -> Result<()> {
        {
            let st = self.state.lock();
            if matches!(st.lifecycle, Lifecycle::Finished | Lifecycle::Committing) {
                return Err(Error::invalid_state("transaction is already finishing"));
            }
        }
        self.abort_with(Error::abort("transaction was aborted"));
        Ok(())
    }

    /// Aborts the transaction: cancels pending callbacks, fails still-
    /// pending requests with the transaction's error, rolls back the
    /// savepoint, reverts version-change metadata, then fires the error
    /// and abort events.
    pub(crate) fn abort_with(self: &Arc<Self>, error: Error) {
        let (requests, savepoint, journal) = {
            let mut st = self.state.lock();
            if st.lifecycle == Lifecycle::Finished {
                return;
            }
            st.lifecycle = Lifecycle::Finished;
            st.error = Some(error.clone());
            st.buffered.clear();
            st.pending_requests = 0;
            let requests = std::mem::take(&mut st.outstanding);
            let savepoint = st.savepoint.take();
            let journal = std::mem::take(&mut st.journal);
            (requests, savepoint, journal)
        };

        tracing::debug!(tx = self.id, db = %self.db.name, %error, "transaction aborting");

        let engine = self.engine().ok();
        if let (Some(engine), Some(name)) = (&engine, savepoint) {
            if let Err(e) = engine.driver.rollback_savepoint(&self.db.name, &name) {
                tracing::warn!(tx = self.id, error = %e, "savepoint rollback failed");
            } else if let Err(e) = engine.driver.release_savepoint(&self.db.name, &name) {
                tracing::warn!(tx = self.id, error = %e, "savepoint release failed");
            }
        }

        if self.mode == TransactionMode::VersionChange {
            if let (Some(engine), Some(old_version)) = (&engine, self.upgrade_from) {
                let revert = if old_version == 0 {
                    engine.driver.delete_db(&self.db.name)
                } else {
                    engine.driver.set_db_version(&self.db.name, old_version)
                };
                if let Err(e) = revert {
                    tracing::warn!(tx = self.id, error = %e, "version revert failed");
                }
                self.db.set_version(old_version);
                self.db.reload_metadata(engine.driver.as_ref());
            }
            journal::revert(journal);
        }

        for request in &requests {
            request.settle_error(error.clone());
        }
        if let Some(engine) = &engine {
            for request in requests {
                let tx = Arc::clone(self);
                engine.tasks.schedule_task(Box::new(move || {
                    let mut event = Event::new(EventKind::Error, true, true);
                    dispatch(&mut event, &[&request.target, &tx.target, &tx.db.target]);
                }));
            }
            let tx = Arc::clone(self);
            engine.tasks.schedule_task(Box::new(move || {
                let mut event = Event::new(EventKind::Abort, true, false);
                dispatch(&mut event, &[&tx.target, &tx.db.target]);
            }));
        }

        self.finalize(true);
    }

    /// Common exit path for commit and abort.
    fn finalize(self: &Arc<Self>, aborted: bool) {
        let hooks = {
            let mut st = self.state.lock();
            st.lifecycle = Lifecycle::Finished;
            st.buffered.clear();
            st.outstanding.clear();
            st.journal.clear();
            // Handle caches are reference cycles (handle → transaction →
            // handle); they end with the transaction.
            for handle in st.store_handles.values() {
                handle.clear_index_handles();
            }
            st.store_handles.clear();
            std::mem::take(&mut st.completion_hooks)
        };

        if let Ok(engine) = self.engine() {
            if !aborted {
                let tx = Arc::clone(self);
                engine.tasks.schedule_task(Box::new(move || {
                    let mut event = Event::new(EventKind::Complete, false, false);
                    dispatch(&mut event, &[&tx.target, &tx.db.target]);
                }));
            }
            for hook in hooks {
                engine.tasks.schedule_task(Box::new(move || hook(aborted)));
            }
            engine.scheduler_for(&self.db.name).finished(self.id);
        }
        self.db.transaction_finished();
    }
}

/// A transaction handle.
#[derive(Clone)]
pub struct Transaction {
    pub(crate) inner: Arc<TransactionInner>,
}

impl Transaction {
    pub(crate) fn from_inner(inner: Arc<TransactionInner>) -> Self {
        Self { inner }
    }

    /// The transaction mode.
    #[must_use]
    pub fn mode(&self) -> TransactionMode {
        self.inner.mode
    }

    /// The transaction's durability hint.
    #[must_use]
    pub fn durability(&self) -> Durability {
        self.inner.durability
    }

    /// Names of the stores in scope, sorted.
    #[must_use]
    pub fn object_store_names(&self) -> Vec<String> {
        self.inner.scope.iter().cloned().collect()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.inner.lifecycle()
    }

    /// The transaction's error, set once it aborts.
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        self.inner.stored_error()
    }

    /// The owning connection.
    #[must_use]
    pub fn database(&self) -> Database {
        Database::from_inner(Arc::clone(&self.inner.db))
    }

    /// Returns a handle to a store in this transaction's scope.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` if the transaction has finished,
    /// `NotFoundError` if the store is not in scope.
    pub fn object_store(&self, name: &str) -> Result<ObjectStore> {
        if self.inner.is_finished() {
            return Err(Error::invalid_state("transaction has finished"));
        }
        // A version-change transaction's scope is the whole database.
        if self.inner.mode != TransactionMode::VersionChange && !self.inner.scope.contains(name) {
            return Err(Error::not_found(format!(
                "object store \"{name}\" is not in this transaction's scope"
            )));
        }
        let cached = self.inner.db.cached_store(name).ok_or_else(|| {
            Error::not_found(format!("object store \"{name}\" does not exist"))
        })?;
        Ok(self
            .inner
            .store_handle(name, || ObjectStore::new(Arc::clone(&self.inner), &cached)))
    }

    /// Requests an early commit: no further requests may be queued, and
    /// the transaction commits as soon as already-queued work drains.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` if the transaction is already finishing.
    pub fn commit(&self) -> Result<()> {
        self.inner.request_commit()
    }

    /// Aborts the transaction, rolling back every change it made.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` if the transaction is already finishing.
    pub fn abort(&self) -> Result<()> {
        self.inner.request_abort()
    }

    /// Registers a complete listener.
    pub fn on_complete(
        &self,
        callback: impl FnMut(&mut Event) -> Result<()> + Send + 'static,
    ) -> u64 {
        self.add_listener(EventKind::Complete, callback)
    }

    /// Registers an abort listener.
    pub fn on_abort(&self, callback: impl FnMut(&mut Event) -> Result<()> + Send + 'static) -> u64 {
        self.add_listener(EventKind::Abort, callback)
    }

    /// Registers an error listener (fires when a request's error event
    /// bubbles through).
    pub fn on_error(&self, callback: impl FnMut(&mut Event) -> Result<()> + Send + 'static) -> u64 {
        self.add_listener(EventKind::Error, callback)
    }

    /// Registers a listener for an event kind; returns its id.
    pub fn add_listener(
        &self,
        kind: EventKind,
        callback: impl FnMut(&mut Event) -> Result<()> + Send + 'static,
    ) -> u64 {
        let listener: Listener = Box::new(callback);
        self.inner.target.add_listener(kind, false, false, listener)
    }

    /// Removes a listener by id.
    pub fn remove_listener(&self, id: u64) {
        self.inner.target.remove_listener(id);
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("mode", &self.inner.mode)
            .field("state", &self.state())
            .field("scope", &self.inner.scope)
            .finish()
    }
}
