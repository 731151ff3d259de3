//! Database connections.

use crate::engine::EngineInner;
use crate::error::{Error, Result};
use crate::event::{Event, EventKind, EventTarget, Listener};
use crate::store::ObjectStore;
use crate::transaction::{MetadataChange, Transaction, TransactionInner};
use crate::types::{key_path_from_text, key_path_to_text, Durability, TransactionMode};
use idxdb_codec::KeyPath;
use idxdb_storage::{StorageDriver, StoreId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Cached catalog row for an object store, parsed for the engine's use.
#[derive(Debug, Clone)]
pub(crate) struct CachedStore {
    pub id: StoreId,
    pub name: String,
    pub key_path: KeyPath,
    pub auto_increment: bool,
}

#[derive(Default)]
struct ConnState {
    close_pending: bool,
    stores: BTreeMap<String, CachedStore>,
    upgrade_tx: Option<Weak<TransactionInner>>,
}

pub(crate) struct DatabaseInner {
    pub(crate) name: String,
    pub(crate) engine: Weak<EngineInner>,
    pub(crate) target: EventTarget,
    pub(crate) connection_id: u64,
    version: Mutex<u64>,
    live_transactions: AtomicUsize,
    state: Mutex<ConnState>,
}

impl DatabaseInner {
    pub(crate) fn open(engine: &Arc<EngineInner>, name: &str, version: u64) -> Result<Arc<Self>> {
        let inner = Arc::new(Self {
            name: name.to_string(),
            engine: Arc::downgrade(engine),
            target: EventTarget::new(),
            connection_id: engine.next_id(),
            version: Mutex::new(version),
            live_transactions: AtomicUsize::new(0),
            state: Mutex::new(ConnState::default()),
        });
        inner.reload_metadata_checked(engine.driver.as_ref())?;
        engine.register_connection(&inner);
        Ok(inner)
    }

    pub(crate) fn version(&self) -> u64 {
        *self.version.lock()
    }

    pub(crate) fn set_version(&self, version: u64) {
        *self.version.lock() = version;
    }

    /// Rebuilds the store metadata cache from the driver's catalog.
    pub(crate) fn reload_metadata(&self, driver: &dyn StorageDriver) {
        if let Err(error) = self.reload_metadata_checked(driver) {
            tracing::warn!(db = %self.name, %error, "metadata reload failed");
        }
    }

    fn reload_metadata_checked(&self, driver: &dyn StorageDriver) -> Result<()> {
        let mut stores = BTreeMap::new();
        for meta in driver.list_stores(&self.name)? {
            stores.insert(
                meta.name.clone(),
                CachedStore {
                    id: meta.id,
                    name: meta.name,
                    key_path: key_path_from_text(meta.key_path.as_deref())?,
                    auto_increment: meta.auto_increment,
                },
            );
        }
        self.state.lock().stores = stores;
        Ok(())
    }

    pub(crate) fn cached_store(&self, name: &str) -> Option<CachedStore> {
        self.state.lock().stores.get(name).cloned()
    }

    pub(crate) fn store_names(&self) -> Vec<String> {
        self.state.lock().stores.keys().cloned().collect()
    }

    pub(crate) fn insert_cached_store(&self, store: CachedStore) {
        self.state.lock().stores.insert(store.name.clone(), store);
    }

    pub(crate) fn remove_cached_store(&self, name: &str) {
        self.state.lock().stores.remove(name);
    }

    pub(crate) fn rename_cached_store(&self, old_name: &str, new_name: &str) {
        let mut state = self.state.lock();
        if let Some(mut cached) = state.stores.remove(old_name) {
            cached.name = new_name.to_string();
            state.stores.insert(new_name.to_string(), cached);
        }
    }

    pub(crate) fn set_upgrade_tx(&self, tx: &Arc<TransactionInner>) {
        self.state.lock().upgrade_tx = Some(Arc::downgrade(tx));
    }

    pub(crate) fn current_upgrade_tx(&self) -> Option<Arc<TransactionInner>> {
        self.state
            .lock()
            .upgrade_tx
            .as_ref()
            .and_then(Weak::upgrade)
            .filter(|tx| !tx.is_finished())
    }

    pub(crate) fn transaction_started(&self) {
        self.live_transactions.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn transaction_finished(&self) {
        self.live_transactions.fetch_sub(1, Ordering::SeqCst);
        let close_pending = self.state.lock().close_pending;
        if close_pending {
            if let Some(engine) = self.engine.upgrade() {
                engine.connection_closed(&self.name);
            }
        }
    }

    pub(crate) fn is_close_pending(&self) -> bool {
        self.state.lock().close_pending
    }

    /// Whether this connection no longer blocks upgrades or deletes.
    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().close_pending && self.live_transactions.load(Ordering::SeqCst) == 0
    }

    pub(crate) fn request_close(&self) {
        {
            let mut state = self.state.lock();
            if state.close_pending {
                return;
            }
            state.close_pending = true;
        }
        tracing::debug!(db = %self.name, connection = self.connection_id, "connection closing");
        if let Some(engine) = self.engine.upgrade() {
            engine.connection_closed(&self.name);
        }
    }
}

/// Options for creating an object store.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Key path; [`KeyPath::None`] means out-of-line keys.
    pub key_path: KeyPath,
    /// Whether the store owns a key generator.
    pub auto_increment: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            key_path: KeyPath::None,
            auto_increment: false,
        }
    }
}

impl StoreOptions {
    /// Creates default options (out-of-line keys, no generator).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the key path.
    #[must_use]
    pub fn key_path(mut self, path: KeyPath) -> Self {
        self.key_path = path;
        self
    }

    /// Enables the key generator.
    #[must_use]
    pub fn auto_increment(mut self, value: bool) -> Self {
        self.auto_increment = value;
        self
    }
}

/// A connection to a database.
#[derive(Clone)]
pub struct Database {
    pub(crate) inner: Arc<DatabaseInner>,
}

impl Database {
    pub(crate) fn from_inner(inner: Arc<DatabaseInner>) -> Self {
        Self { inner }
    }

    /// The database name.
    #[must_use]
    pub fn name(&self) -> String {
        self.inner.name.clone()
    }

    /// The database version this connection sees.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version()
    }

    /// Names of the object stores, sorted.
    #[must_use]
    pub fn object_store_names(&self) -> Vec<String> {
        self.inner.store_names()
    }

    /// Starts a transaction over the named stores.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` on a closing connection, `TypeError` for the
    /// version-change mode or an empty scope, `NotFoundError` for an
    /// unknown store name.
    pub fn transaction(&self, scope: &[&str], mode: TransactionMode) -> Result<Transaction> {
        self.transaction_with_durability(scope, mode, Durability::Default)
    }

    /// Starts a transaction with an explicit durability hint.
    ///
    /// # Errors
    ///
    /// As [`Database::transaction`].
    pub fn transaction_with_durability(
        &self,
        scope: &[&str],
        mode: TransactionMode,
        durability: Durability,
    ) -> Result<Transaction> {
        if self.inner.is_close_pending() {
            return Err(Error::invalid_state("connection is closing"));
        }
        if mode == TransactionMode::VersionChange {
            return Err(Error::type_error(
                "version-change transactions are started by open()",
            ));
        }
        if scope.is_empty() {
            return Err(Error::invalid_access("transaction scope is empty"));
        }
        let mut names = BTreeSet::new();
        for name in scope {
            if self.inner.cached_store(name).is_none() {
                return Err(Error::not_found(format!(
                    "object store \"{name}\" does not exist"
                )));
            }
            names.insert((*name).to_string());
        }

        let engine = self
            .inner
            .engine
            .upgrade()
            .ok_or_else(|| Error::invalid_state("engine has shut down"))?;
        let tx = TransactionInner::new(
            Arc::clone(&self.inner),
            mode,
            names,
            durability,
            None,
        );
        engine.scheduler_for(&self.inner.name).add(Arc::clone(&tx));
        Ok(Transaction::from_inner(tx))
    }

    /// Creates an object store. Legal only inside a version-change
    /// transaction.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` outside an upgrade, `TransactionInactiveError`
    /// when the upgrade transaction is not active, `ConstraintError` on a
    /// name clash, `InvalidAccessError` for a key generator combined with
    /// an empty or sequence key path.
    pub fn create_object_store(&self, name: &str, options: StoreOptions) -> Result<ObjectStore> {
        let tx = self.upgrade_transaction()?;
        tx.ensure_active()?;

        if options.auto_increment {
            match &options.key_path {
                KeyPath::Single(path) if path.is_empty() => {
                    return Err(Error::invalid_access(
                        "key generator cannot be combined with an empty key path",
                    ));
                }
                KeyPath::Sequence(_) => {
                    return Err(Error::invalid_access(
                        "key generator cannot be combined with a sequence key path",
                    ));
                }
                _ => {}
            }
        }
        if self.inner.cached_store(name).is_some() {
            return Err(Error::constraint(format!(
                "object store \"{name}\" already exists"
            )));
        }

        let engine = tx.engine()?;
        tx.ensure_savepoint()?;
        let meta = engine.driver.create_store(
            &self.inner.name,
            name,
            key_path_to_text(&options.key_path).as_deref(),
            options.auto_increment,
        )?;
        let cached = CachedStore {
            id: meta.id,
            name: name.to_string(),
            key_path: options.key_path,
            auto_increment: options.auto_increment,
        };
        self.inner.insert_cached_store(cached.clone());

        let handle = tx.store_handle(name, || ObjectStore::new(Arc::clone(&tx), &cached));
        tx.journal(MetadataChange::CreatedStore {
            handle: handle.clone(),
        });
        tracing::debug!(db = %self.inner.name, store = name, "object store created");
        Ok(handle)
    }

    /// Deletes an object store. Legal only inside a version-change
    /// transaction.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` outside an upgrade, `TransactionInactiveError`
    /// when the upgrade transaction is not active, `NotFoundError` for an
    /// unknown name.
    pub fn delete_object_store(&self, name: &str) -> Result<()> {
        let tx = self.upgrade_transaction()?;
        tx.ensure_active()?;

        let cached = self.inner.cached_store(name).ok_or_else(|| {
            Error::not_found(format!("object store \"{name}\" does not exist"))
        })?;

        let engine = tx.engine()?;
        tx.ensure_savepoint()?;
        engine.driver.delete_store(&self.inner.name, cached.id)?;
        self.inner.remove_cached_store(name);

        let handle = tx.remove_store_handle(name);
        if let Some(handle) = &handle {
            handle.mark_deleted();
        }
        tx.journal(MetadataChange::DeletedStore { handle });
        tracing::debug!(db = %self.inner.name, store = name, "object store deleted");
        Ok(())
    }

    /// Closes this connection. The close takes effect once running
    /// transactions finish; the connection immediately refuses new
    /// transactions.
    pub fn close(&self) {
        self.inner.request_close();
    }

    /// Registers a version-change listener (another connection wants to
    /// upgrade or delete this database).
    pub fn on_version_change(
        &self,
        callback: impl FnMut(&mut Event) -> Result<()> + Send + 'static,
    ) -> u64 {
        self.add_listener(EventKind::VersionChange, callback)
    }

    /// Registers an abort listener (transaction abort events bubble
    /// here).
    pub fn on_abort(&self, callback: impl FnMut(&mut Event) -> Result<()> + Send + 'static) -> u64 {
        self.add_listener(EventKind::Abort, callback)
    }

    /// Registers an error listener (request error events bubble here).
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

    fn upgrade_transaction(&self) -> Result<Arc<TransactionInner>> {
        self.inner.current_upgrade_tx().ok_or_else(|| {
            Error::invalid_state("schema changes require a version-change transaction")
        })
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.inner.name)
            .field("version", &self.version())
            .field("stores", &self.object_store_names())
            .finish()
    }
}
