//! Requests: the single-shot handles through which results arrive.

use crate::cursor::Cursor;
use crate::database::Database;
use crate::error::{Error, Result};
use crate::event::{EventKind, EventTarget, Listener};
use crate::types::RecordEntry;
use crate::transaction::{Transaction, TransactionInner};
use idxdb_codec::{Key, Value};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Ready state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// The operation has not completed yet.
    Pending,
    /// The result or error is available.
    Done,
}

/// What produced a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestSource {
    /// An object store, by name.
    ObjectStore(String),
    /// An index, by store and index name.
    Index {
        /// Owning store name.
        store: String,
        /// Index name.
        index: String,
    },
    /// A cursor (`update`/`delete` delegate requests are re-sourced to
    /// the cursor, and cursor iteration re-arms its own request).
    Cursor,
    /// The factory (`open` / `delete_database`).
    Factory,
}

/// The value a finished request carries.
#[derive(Debug, Clone, Default)]
pub enum RequestResult {
    /// No result (deletes, clears, aborted requests).
    #[default]
    None,
    /// An effective key (add/put).
    Key(Key),
    /// A possibly-absent key (`get_key`).
    OptionalKey(Option<Key>),
    /// A possibly-absent value (`get`).
    OptionalValue(Option<Value>),
    /// A list of keys (`get_all_keys`).
    Keys(Vec<Key>),
    /// A list of values (`get_all`).
    Values(Vec<Value>),
    /// A list of full records (`get_all_records`).
    Records(Vec<RecordEntry>),
    /// A count.
    Count(u64),
    /// A cursor positioned on a record, or `None` when iteration ended.
    Cursor(Option<Cursor>),
    /// An opened database connection.
    Database(Database),
}

pub(crate) struct RequestInner {
    source: Mutex<RequestSource>,
    transaction: Mutex<Option<Weak<TransactionInner>>>,
    state: Mutex<ReadyState>,
    result: Mutex<RequestResult>,
    error: Mutex<Option<Error>>,
    pub(crate) target: EventTarget,
}

impl RequestInner {
    pub(crate) fn new(source: RequestSource, transaction: Option<&Arc<TransactionInner>>) -> Arc<Self> {
        Arc::new(Self {
            source: Mutex::new(source),
            transaction: Mutex::new(transaction.map(Arc::downgrade)),
            state: Mutex::new(ReadyState::Pending),
            result: Mutex::new(RequestResult::None),
            error: Mutex::new(None),
            target: EventTarget::new(),
        })
    }

    pub(crate) fn settle_success(&self, result: RequestResult) {
        *self.result.lock() = result;
        *self.error.lock() = None;
        *self.state.lock() = ReadyState::Done;
    }

    pub(crate) fn settle_error(&self, error: Error) {
        *self.result.lock() = RequestResult::None;
        *self.error.lock() = Some(error);
        *self.state.lock() = ReadyState::Done;
    }

    /// Returns the request to pending for cursor re-iteration.
    pub(crate) fn rearm(&self) {
        *self.state.lock() = ReadyState::Pending;
        *self.result.lock() = RequestResult::None;
        *self.error.lock() = None;
    }

    pub(crate) fn is_pending(&self) -> bool {
        *self.state.lock() == ReadyState::Pending
    }

    pub(crate) fn set_transaction(&self, tx: &Arc<TransactionInner>) {
        *self.transaction.lock() = Some(Arc::downgrade(tx));
    }

    pub(crate) fn stored_error(&self) -> Option<Error> {
        self.error.lock().clone()
    }
}

/// A handle to an asynchronous operation.
///
/// A request is produced in a pending state; its result or error becomes
/// observable when the success or error event fires. Results are read
/// with [`Request::result`] after the ready state reaches
/// [`ReadyState::Done`].
#[derive(Clone)]
pub struct Request {
    pub(crate) inner: Arc<RequestInner>,
}

impl Request {
    pub(crate) fn from_inner(inner: Arc<RequestInner>) -> Self {
        Self { inner }
    }

    /// Current ready state.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        *self.inner.state.lock()
    }

    /// What produced this request.
    #[must_use]
    pub fn source(&self) -> RequestSource {
        self.inner.source.lock().clone()
    }

    /// The owning transaction, if the request has one and it is still
    /// alive.
    #[must_use]
    pub fn transaction(&self) -> Option<Transaction> {
        self.inner
            .transaction
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(Transaction::from_inner)
    }

    /// The request's result.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateError` while the request is still pending.
    pub fn result(&self) -> Result<RequestResult> {
        if self.inner.is_pending() {
            return Err(Error::invalid_state("request is still pending"));
        }
        Ok(self.inner.result.lock().clone())
    }

    /// The request's error, if it failed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateError` while the request is still pending.
    pub fn error(&self) -> Result<Option<Error>> {
        if self.inner.is_pending() {
            return Err(Error::invalid_state("request is still pending"));
        }
        Ok(self.inner.error.lock().clone())
    }

    /// Registers a success listener.
    pub fn on_success(&self, callback: impl FnMut(&mut crate::event::Event) -> Result<()> + Send + 'static) -> u64 {
        self.add_listener(EventKind::Success, callback)
    }

    /// Registers an error listener.
    pub fn on_error(&self, callback: impl FnMut(&mut crate::event::Event) -> Result<()> + Send + 'static) -> u64 {
        self.add_listener(EventKind::Error, callback)
    }

    /// Registers an upgrade-needed listener (open requests only).
    pub fn on_upgrade_needed(
        &self,
        callback: impl FnMut(&mut crate::event::Event) -> Result<()> + Send + 'static,
    ) -> u64 {
        self.add_listener(EventKind::UpgradeNeeded, callback)
    }

    /// Registers a blocked listener (open and delete requests).
    pub fn on_blocked(
        &self,
        callback: impl FnMut(&mut crate::event::Event) -> Result<()> + Send + 'static,
    ) -> u64 {
        self.add_listener(EventKind::Blocked, callback)
    }

    /// Registers a listener for an event kind; returns its id.
    pub fn add_listener(
        &self,
        kind: EventKind,
        callback: impl FnMut(&mut crate::event::Event) -> Result<()> + Send + 'static,
    ) -> u64 {
        let listener: Listener = Box::new(callback);
        self.inner.target.add_listener(kind, false, false, listener)
    }

    /// Removes a listener by id.
    pub fn remove_listener(&self, id: u64) {
        self.inner.target.remove_listener(id);
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("source", &self.source())
            .field("ready_state", &self.ready_state())
            .finish_non_exhaustive()
    }
}
