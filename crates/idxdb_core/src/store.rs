//! Object stores: CRUD, key extraction, the key generator, and index
//! maintenance.

use crate::cursor::{Cursor, CursorSource};
use crate::database::CachedStore;
use crate::error::{Error, Result};
use crate::index::{Index, IndexHandleState};
use crate::request::{Request, RequestInner, RequestResult, RequestSource};
use crate::transaction::{MetadataChange, Transaction, TransactionInner};
use crate::types::{byte_range, Direction, GetAllOptions, Query, RecordEntry};
use idxdb_codec::{
    decode_key, deserialize_value, encode_key, serialize_value, Key, KeyPath, KeyRange, PathResult,
    Value,
};
use idxdb_storage::{IndexId, IndexMeta, ScanDirection, StoreId};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Highest value the key generator may hand out (2^53).
pub(crate) const MAX_KEY_GENERATOR: i64 = 1 << 53;

/// An index catalog row with its key path parsed.
#[derive(Debug, Clone)]
pub(crate) struct ParsedIndex {
    pub id: IndexId,
    pub name: String,
    pub key_path: KeyPath,
    pub unique: bool,
    pub multi_entry: bool,
}

pub(crate) fn parse_index_meta(meta: &IndexMeta) -> Result<ParsedIndex> {
    Ok(ParsedIndex {
        id: meta.id,
        name: meta.name.clone(),
        key_path: crate::types::key_path_from_text(Some(&meta.key_path))?,
        unique: meta.unique,
        multi_entry: meta.multi_entry,
    })
}

/// Extracts the encoded index keys a record contributes to one index.
///
/// Multi-entry indexes evaluate the path raw: an array fans out to one
/// entry per element that is itself a valid key, with duplicates within
/// the record collapsed. Everything else falls back to single-entry
/// extraction, where an unresolved or invalid key simply leaves the
/// record unindexed.
pub(crate) fn extract_index_keys(path: &KeyPath, multi_entry: bool, value: &Value) -> Vec<Vec<u8>> {
    if multi_entry {
        match path.evaluate_raw(value) {
            Some(resolved) => match resolved.as_ref() {
                Value::Array(items) => {
                    let mut keys = BTreeSet::new();
                    for item in items {
                        if let Ok(key) = Key::from_value(item) {
                            keys.insert(encode_key(&key));
                        }
                    }
                    keys.into_iter().collect()
                }
                other => Key::from_value(other)
                    .map(|key| vec![encode_key(&key)])
                    .unwrap_or_default(),
            },
            None => Vec::new(),
        }
    } else {
        match path.evaluate(value) {
            PathResult::Resolved(key) => vec![encode_key(&key)],
            PathResult::Unresolved | PathResult::NotAKey => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct StoreHandleState {
    pub id: StoreId,
    pub name: String,
    pub key_path: KeyPath,
    pub auto_increment: bool,
    pub deleted: bool,
}

pub(crate) struct StoreHandleInner {
    pub(crate) tx: Arc<TransactionInner>,
    pub(crate) state: Mutex<StoreHandleState>,
    index_handles: Mutex<HashMap<String, Index>>,
}

enum KeyPlan {
    Ready(Key),
    Generate { inject: bool },
}

/// Options for creating an index.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexOptions {
    /// Whether index keys must be unique across records.
    pub unique: bool,
    /// Whether array-valued key paths produce one entry per element.
    pub multi_entry: bool,
}

/// A handle to an object store, scoped to one transaction.
#[derive(Clone)]
pub struct ObjectStore {
    pub(crate) inner: Arc<StoreHandleInner>,
}

impl ObjectStore {
    pub(crate) fn new(tx: Arc<TransactionInner>, cached: &CachedStore) -> Self {
        Self {
            inner: Arc::new(StoreHandleInner {
                tx,
                state: Mutex::new(StoreHandleState {
                    id: cached.id,
                    name: cached.name.clone(),
                    key_path: cached.key_path.clone(),
                    auto_increment: cached.auto_increment,
                    deleted: false,
                }),
                index_handles: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub(crate) fn mark_deleted(&self) {
        self.inner.state.lock().deleted = true;
    }

    pub(crate) fn mark_undeleted(&self) {
        self.inner.state.lock().deleted = false;
    }

    pub(crate) fn set_cached_name(&self, name: String) {
        self.inner.state.lock().name = name;
    }

    fn snapshot(&self) -> StoreHandleState {
        self.inner.state.lock().clone()
    }

    /// The store name.
    #[must_use]
    pub fn name(&self) -> String {
        self.inner.state.lock().name.clone()
    }

    /// The store's key path.
    #[must_use]
    pub fn key_path(&self) -> KeyPath {
        self.inner.state.lock().key_path.clone()
    }

    /// Whether the store owns a key generator.
    #[must_use]
    pub fn auto_increment(&self) -> bool {
        self.inner.state.lock().auto_increment
    }

    /// The transaction this handle is scoped to.
    #[must_use]
    pub fn transaction(&self) -> Transaction {
        Transaction::from_inner(Arc::clone(&self.inner.tx))
    }

    /// Names of this store's indexes, sorted.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` on a deleted store handle.
    pub fn index_names(&self) -> Result<Vec<String>> {
        let state = self.ensure_alive()?;
        let tx = &self.inner.tx;
        let engine = tx.engine()?;
        let mut names: Vec<String> = engine
            .driver
            .list_indexes(&tx.db.name, state.id)?
            .into_iter()
            .map(|meta| meta.name)
            .collect();
        names.sort();
        Ok(names)
    }

    fn ensure_alive(&self) -> Result<StoreHandleState> {
        let state = self.snapshot();
        if state.deleted {
            return Err(Error::invalid_state("object store has been deleted"));
        }
        Ok(state)
    }

    fn check_read(&self) -> Result<StoreHandleState> {
        let state = self.ensure_alive()?;
        self.inner.tx.ensure_active()?;
        Ok(state)
    }

    fn check_write(&self) -> Result<StoreHandleState> {
        let state = self.ensure_alive()?;
        self.inner.tx.ensure_active()?;
        self.inner.tx.ensure_writable()?;
        Ok(state)
    }

    // ── add / put ───────────────────────────────────────────────────

    /// Stores a record, replacing any record with the same key.
    ///
    /// # Errors
    ///
    /// `TransactionInactiveError`, `ReadOnlyError`, or `DataError` per
    /// the key rules; constraint violations surface on the request.
    pub fn put(&self, value: &Value, key: Option<&Value>) -> Result<Request> {
        self.store_record(value, key, false, None)
    }

    /// Stores a record, failing if the key already exists.
    ///
    /// # Errors
    ///
    /// As [`ObjectStore::put`].
    pub fn add(&self, value: &Value, key: Option<&Value>) -> Result<Request> {
        self.store_record(value, key, true, None)
    }

    pub(crate) fn put_for_cursor(&self, value: &Value, primary: &Key) -> Result<Request> {
        let state = self.snapshot();
        if state.key_path.is_none() {
            self.store_record(value, Some(&primary.to_value()), false, Some(primary.clone()))
        } else {
            self.store_record(value, None, false, Some(primary.clone()))
        }
    }

    fn store_record(
        &self,
        value: &Value,
        key: Option<&Value>,
        is_add: bool,
        cursor_primary: Option<Key>,
    ) -> Result<Request> {
        let state = self.check_write()?;
        let tx = Arc::clone(&self.inner.tx);
        let engine = tx.engine()?;

        let explicit = match key {
            Some(v) => {
                Some(Key::from_value(v).map_err(|_| Error::data("key is not a valid key"))?)
            }
            None => None,
        };
        if explicit.is_some() && !state.key_path.is_none() && cursor_primary.is_none() {
            return Err(Error::data(
                "store uses in-line keys; a key argument is not allowed",
            ));
        }
        if explicit.is_none() && state.key_path.is_none() && !state.auto_increment {
            return Err(Error::data(
                "store uses out-of-line keys and has no generator; a key is required",
            ));
        }

        // Clone with the transaction momentarily non-active, so nothing
        // observing the clone can issue nested operations.
        let mut clone = tx.with_suspended_active(|| value.clone());

        let plan = if let Some(key) = explicit {
            KeyPlan::Ready(key)
        } else if state.key_path.is_none() {
            KeyPlan::Generate { inject: false }
        } else {
            match state.key_path.evaluate(&clone) {
                PathResult::Resolved(key) => {
                    if let Some(primary) = &cursor_primary {
                        if key.cmp_order(primary) != std::cmp::Ordering::Equal {
                            return Err(Error::data(
                                "record key does not match the cursor's position",
                            ));
                        }
                    }
                    KeyPlan::Ready(key)
                }
                PathResult::NotAKey => {
                    return Err(Error::data("key path evaluates to an invalid key"));
                }
                PathResult::Unresolved => {
                    if cursor_primary.is_some() {
                        return Err(Error::data(
                            "record key does not match the cursor's position",
                        ));
                    }
                    if !state.auto_increment {
                        return Err(Error::data("key path did not yield a key"));
                    }
                    if !state.key_path.can_inject(&clone) {
                        return Err(Error::data(
                            "generated key cannot be injected into the value",
                        ));
                    }
                    KeyPlan::Generate { inject: true }
                }
            }
        };

        let source = if cursor_primary.is_some() {
            RequestSource::Cursor
        } else {
            RequestSource::ObjectStore(state.name.clone())
        };
        let request = RequestInner::new(source, Some(&tx));

        let op_tx = Arc::clone(&tx);
        let db = tx.db.name.clone();
        let store_id = state.id;
        let key_path = state.key_path.clone();
        let auto_increment = state.auto_increment;
        tx.queue_request(
            Arc::clone(&request),
            Box::new(move || {
                op_tx.ensure_savepoint()?;
                let driver = engine.driver.as_ref();

                let key = match plan {
                    KeyPlan::Ready(key) => key,
                    KeyPlan::Generate { inject } => {
                        let meta = driver.get_store_meta(&db, store_id)?;
                        if meta.current_key > MAX_KEY_GENERATOR {
                            return Err(Error::constraint("key generator is exhausted"));
                        }
                        #[allow(clippy::cast_precision_loss)]
                        let key = Key::Number(meta.current_key as f64);
                        if inject {
                            key_path.inject(&mut clone, &key).map_err(|_| {
                                Error::data("generated key cannot be injected into the value")
                            })?;
                        }
                        key
                    }
                };
                let key_bytes = encode_key(&key);

                let exists = driver.get_record(&db, store_id, &key_bytes)?.is_some();
                if is_add && exists {
                    return Err(Error::constraint("a record with this key already exists"));
                }

                let indexes: Vec<ParsedIndex> = driver
                    .list_indexes(&db, store_id)?
                    .iter()
                    .map(parse_index_meta)
                    .collect::<Result<_>>()?;

                let mut new_entries: Vec<(IndexId, Vec<Vec<u8>>)> =
                    Vec::with_capacity(indexes.len());
                for index in &indexes {
                    let keys = extract_index_keys(&index.key_path, index.multi_entry, &clone);
                    if index.unique {
                        for index_key in &keys {
                            if driver.check_unique(&db, index.id, index_key, Some(&key_bytes))? {
                                return Err(Error::constraint(format!(
                                    "unique index \"{}\" already contains this key",
                                    index.name
                                )));
                            }
                        }
                    }
                    new_entries.push((index.id, keys));
                }

                if exists {
                    for index in &indexes {
                        driver.delete_entries_for_primary(&db, index.id, &key_bytes)?;
                    }
                }

                driver.put_record(&db, store_id, &key_bytes, &serialize_value(&clone))?;
                for (index_id, keys) in new_entries {
                    for index_key in keys {
                        driver.add_index_entry(&db, index_id, &index_key, &key_bytes)?;
                    }
                }

                if auto_increment {
                    let current = driver.get_store_meta(&db, store_id)?.current_key;
                    if let Some(next) = generator_advance(&key, current) {
                        driver.update_current_key(&db, store_id, next)?;
                    }
                }

                Ok(RequestResult::Key(key))
            }),
        );

        Ok(Request::from_inner(request))
    }

    // ── delete / clear ──────────────────────────────────────────────

    /// Deletes every record matched by the query.
    ///
    /// # Errors
    ///
    /// `TransactionInactiveError`, `ReadOnlyError`, or `DataError` for an
    /// invalid query key.
    pub fn delete(&self, query: impl Into<Query>) -> Result<Request> {
        let state = self.check_write()?;
        let range = query.into().to_range()?;
        self.delete_range(state, range, RequestSource::ObjectStore(self.name()))
    }

    pub(crate) fn delete_for_cursor(&self, primary: &Key) -> Result<Request> {
        let state = self.check_write()?;
        self.delete_range(state, KeyRange::only(primary.clone()), RequestSource::Cursor)
    }

    fn delete_range(
        &self,
        state: StoreHandleState,
        range: KeyRange,
        source: RequestSource,
    ) -> Result<Request> {
        let tx = Arc::clone(&self.inner.tx);
        let engine = tx.engine()?;
        let request = RequestInner::new(source, Some(&tx));

        let op_tx = Arc::clone(&tx);
        let db = tx.db.name.clone();
        let store_id = state.id;
        tx.queue_request(
            Arc::clone(&request),
            Box::new(move || {
                op_tx.ensure_savepoint()?;
                let driver = engine.driver.as_ref();
                let bounds = byte_range(&range);

                let index_ids: Vec<IndexId> = driver
                    .list_indexes(&db, store_id)?
                    .iter()
                    .map(|meta| meta.id)
                    .collect();
                if !index_ids.is_empty() {
                    let victims =
                        driver.get_in_range(&db, store_id, &bounds, ScanDirection::Forward, None)?;
                    for record in &victims {
                        for index_id in &index_ids {
                            driver.delete_entries_for_primary(&db, *index_id, &record.key)?;
                        }
                    }
                }
                driver.delete_in_range(&db, store_id, &bounds)?;
                Ok(RequestResult::None)
            }),
        );

        Ok(Request::from_inner(request))
    }

    /// Deletes every record in the store.
    ///
    /// # Errors
    ///
    /// `TransactionInactiveError` or `ReadOnlyError`.
    pub fn clear(&self) -> Result<Request> {
        let state = self.check_write()?;
        let tx = Arc::clone(&self.inner.tx);
        let engine = tx.engine()?;
        let request = RequestInner::new(
            RequestSource::ObjectStore(state.name.clone()),
            Some(&tx),
        );

        let op_tx = Arc::clone(&tx);
        let db = tx.db.name.clone();
        let store_id = state.id;
        tx.queue_request(
            Arc::clone(&request),
            Box::new(move || {
                op_tx.ensure_savepoint()?;
                engine.driver.clear_records(&db, store_id)?;
                Ok(RequestResult::None)
            }),
        );

        Ok(Request::from_inner(request))
    }

    // ── reads ───────────────────────────────────────────────────────

    /// Counts the records matched by the query (everything when absent).
    ///
    /// # Errors
    ///
    /// `TransactionInactiveError`, or `DataError` for an invalid query.
    pub fn count(&self, query: Option<Query>) -> Result<Request> {
        let state = self.check_read()?;
        let range = resolve_query(query)?;
        self.queue_read(state, move |driver, db, store_id| {
            let count = driver.count_in_range(db, store_id, &byte_range(&range))?;
            Ok(RequestResult::Count(count))
        })
    }

    /// Fetches the first value matched by the query.
    ///
    /// # Errors
    ///
    /// `TransactionInactiveError`, or `DataError` for an invalid query.
    pub fn get(&self, query: impl Into<Query>) -> Result<Request> {
        let state = self.check_read()?;
        let range = query.into().to_range()?;
        self.queue_read(state, move |driver, db, store_id| {
            let rows = driver.get_in_range(
                db,
                store_id,
                &byte_range(&range),
                ScanDirection::Forward,
                Some(1),
            )?;
            let value = rows
                .into_iter()
                .next()
                .map(|row| deserialize_value(&row.value))
                .transpose()?;
            Ok(RequestResult::OptionalValue(value))
        })
    }

    /// Fetches the first matching key.
    ///
    /// # Errors
    ///
    /// As [`ObjectStore::get`].
    pub fn get_key(&self, query: impl Into<Query>) -> Result<Request> {
        let state = self.check_read()?;
        let range = query.into().to_range()?;
        self.queue_read(state, move |driver, db, store_id| {
            let rows = driver.get_in_range(
                db,
                store_id,
                &byte_range(&range),
                ScanDirection::Forward,
                Some(1),
            )?;
            let key = rows
                .into_iter()
                .next()
                .map(|row| decode_key(&row.key))
                .transpose()?;
            Ok(RequestResult::OptionalKey(key))
        })
    }

    /// Fetches matching values in key order, up to `count` (0 or absent
    /// means unbounded).
    ///
    /// # Errors
    ///
    /// As [`ObjectStore::get`].
    pub fn get_all(&self, query: Option<Query>, count: Option<u32>) -> Result<Request> {
        let state = self.check_read()?;
        let range = resolve_query(query)?;
        let limit = normalize_count(count);
        self.queue_read(state, move |driver, db, store_id| {
            let rows = driver.get_in_range(
                db,
                store_id,
                &byte_range(&range),
                ScanDirection::Forward,
                limit,
            )?;
            let values = rows
                .into_iter()
                .map(|row| deserialize_value(&row.value))
                .collect::<idxdb_codec::CodecResult<Vec<Value>>>()?;
            Ok(RequestResult::Values(values))
        })
    }

    /// Fetches matching keys in key order, up to `count`.
    ///
    /// # Errors
    ///
    /// As [`ObjectStore::get`].
    pub fn get_all_keys(&self, query: Option<Query>, count: Option<u32>) -> Result<Request> {
        let state = self.check_read()?;
        let range = resolve_query(query)?;
        let limit = normalize_count(count);
        self.queue_read(state, move |driver, db, store_id| {
            let rows = driver.get_in_range(
                db,
                store_id,
                &byte_range(&range),
                ScanDirection::Forward,
                limit,
            )?;
            let keys = rows
                .into_iter()
                .map(|row| decode_key(&row.key))
                .collect::<idxdb_codec::CodecResult<Vec<Key>>>()?;
            Ok(RequestResult::Keys(keys))
        })
    }

    /// Fetches matching records (key and value) with an optional
    /// direction.
    ///
    /// # Errors
    ///
    /// As [`ObjectStore::get`].
    pub fn get_all_records(&self, options: GetAllOptions) -> Result<Request> {
        let state = self.check_read()?;
        let range = resolve_query(options.query)?;
        let limit = normalize_count(options.count);
        let scan = options.direction.scan();
        self.queue_read(state, move |driver, db, store_id| {
            let rows = driver.get_in_range(db, store_id, &byte_range(&range), scan, limit)?;
            let mut records = Vec::with_capacity(rows.len());
            for row in rows {
                let key = decode_key(&row.key)?;
                records.push(RecordEntry {
                    key: key.clone(),
                    primary_key: key,
                    value: deserialize_value(&row.value)?,
                });
            }
            Ok(RequestResult::Records(records))
        })
    }

    fn queue_read(
        &self,
        state: StoreHandleState,
        op: impl FnOnce(&dyn idxdb_storage::StorageDriver, &str, StoreId) -> Result<RequestResult>
            + Send
            + 'static,
    ) -> Result<Request> {
        let tx = Arc::clone(&self.inner.tx);
        let engine = tx.engine()?;
        let request = RequestInner::new(
            RequestSource::ObjectStore(state.name.clone()),
            Some(&tx),
        );
        let db = tx.db.name.clone();
        let store_id = state.id;
        tx.queue_request(
            Arc::clone(&request),
            Box::new(move || op(engine.driver.as_ref(), &db, store_id)),
        );
        Ok(Request::from_inner(request))
    }

    // ── cursors ─────────────────────────────────────────────────────

    /// Opens a cursor over the store's records.
    ///
    /// # Errors
    ///
    /// `TransactionInactiveError`, or `DataError` for an invalid query.
    pub fn open_cursor(&self, query: Option<Query>, direction: Direction) -> Result<Request> {
        self.open_cursor_impl(query, direction, false)
    }

    /// Opens a key-only cursor over the store's records.
    ///
    /// # Errors
    ///
    /// As [`ObjectStore::open_cursor`].
    pub fn open_key_cursor(&self, query: Option<Query>, direction: Direction) -> Result<Request> {
        self.open_cursor_impl(query, direction, true)
    }

    fn open_cursor_impl(
        &self,
        query: Option<Query>,
        direction: Direction,
        key_only: bool,
    ) -> Result<Request> {
        let state = self.check_read()?;
        let range = resolve_query(query)?;
        let tx = Arc::clone(&self.inner.tx);
        let request = RequestInner::new(
            RequestSource::ObjectStore(state.name.clone()),
            Some(&tx),
        );

        let cursor = Cursor::new(
            CursorSource::Store(self.clone()),
            direction,
            range,
            key_only,
        );
        cursor.attach_request(&request);
        let op = cursor.step_operation(1, None, None);
        tx.queue_request(Arc::clone(&request), op);
        Ok(Request::from_inner(request))
    }

    // ── indexes ─────────────────────────────────────────────────────

    /// Creates an index and back-populates it from existing records.
    /// Legal only in a version-change transaction. A unique-constraint
    /// violation found during back-population aborts the transaction
    /// asynchronously.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` outside a version-change transaction or on a
    /// deleted handle, `TransactionInactiveError`, `ConstraintError` on a
    /// name clash, `InvalidAccessError` for multi-entry with a sequence
    /// key path, `TypeError` for an absent key path.
    pub fn create_index(
        &self,
        name: &str,
        key_path: KeyPath,
        options: IndexOptions,
    ) -> Result<Index> {
        let state = self.ensure_alive()?;
        let tx = Arc::clone(&self.inner.tx);
        tx.ensure_version_change()?;
        tx.ensure_active()?;

        if key_path.is_none() {
            return Err(Error::type_error("an index requires a key path"));
        }
        if options.multi_entry && key_path.is_sequence() {
            return Err(Error::invalid_access(
                "multi-entry cannot be combined with a sequence key path",
            ));
        }

        let engine = tx.engine()?;
        let existing = engine.driver.list_indexes(&tx.db.name, state.id)?;
        if existing.iter().any(|meta| meta.name == name) {
            return Err(Error::constraint(format!(
                "index \"{name}\" already exists"
            )));
        }

        tx.ensure_savepoint()?;
        let key_path_text = crate::types::key_path_to_text(&key_path)
            .ok_or_else(|| Error::type_error("an index requires a key path"))?;
        let meta = engine.driver.create_index(
            &tx.db.name,
            state.id,
            name,
            &key_path_text,
            options.unique,
            options.multi_entry,
        )?;

        let handle = Index::new(
            self.clone(),
            IndexHandleState {
                id: meta.id,
                name: name.to_string(),
                key_path: key_path.clone(),
                unique: options.unique,
                multi_entry: options.multi_entry,
                deleted: false,
            },
        );
        self.inner
            .index_handles
            .lock()
            .insert(name.to_string(), handle.clone());
        tx.journal(MetadataChange::CreatedIndex {
            handle: handle.clone(),
        });

        // Back-populate inside the same savepoint.
        let db = tx.db.name.clone();
        let store_id = state.id;
        let index_id = meta.id;
        let index_name = name.to_string();
        let unique = options.unique;
        let multi_entry = options.multi_entry;
        tx.queue_internal(Box::new(move || {
            let driver = engine.driver.as_ref();
            let rows = driver.get_in_range(
                &db,
                store_id,
                &idxdb_storage::ByteRange::unbounded(),
                ScanDirection::Forward,
                None,
            )?;
            for row in rows {
                let value = deserialize_value(&row.value)?;
                for index_key in extract_index_keys(&key_path, multi_entry, &value) {
                    if unique && driver.check_unique(&db, index_id, &index_key, Some(&row.key))? {
                        return Err(Error::constraint(format!(
                            "unique index \"{index_name}\" cannot be built over existing records"
                        )));
                    }
                    driver.add_index_entry(&db, index_id, &index_key, &row.key)?;
                }
            }
            Ok(RequestResult::None)
        }));

        tracing::debug!(store = %state.name, index = name, "index created");
        Ok(handle)
    }

    /// Returns a handle to one of this store's indexes.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` if the transaction has finished or the store
    /// handle is deleted, `NotFoundError` for an unknown index name.
    pub fn index(&self, name: &str) -> Result<Index> {
        // Access after the transaction finished is InvalidStateError,
        // unlike data operations which report TransactionInactiveError.
        if self.inner.tx.is_finished() {
            return Err(Error::invalid_state("transaction has finished"));
        }
        let state = self.ensure_alive()?;

        if let Some(handle) = self.inner.index_handles.lock().get(name) {
            return Ok(handle.clone());
        }

        let engine = self.inner.tx.engine()?;
        let metas = engine.driver.list_indexes(&self.inner.tx.db.name, state.id)?;
        let meta = metas
            .iter()
            .find(|meta| meta.name == name)
            .ok_or_else(|| Error::not_found(format!("index \"{name}\" does not exist")))?;
        let parsed = parse_index_meta(meta)?;

        let handle = Index::new(
            self.clone(),
            IndexHandleState {
                id: parsed.id,
                name: parsed.name,
                key_path: parsed.key_path,
                unique: parsed.unique,
                multi_entry: parsed.multi_entry,
                deleted: false,
            },
        );
        self.inner
            .index_handles
            .lock()
            .insert(name.to_string(), handle.clone());
        Ok(handle)
    }

    /// Deletes an index. Legal only in a version-change transaction.
    ///
    /// # Errors
    ///
    /// `InvalidStateError`, `TransactionInactiveError`, or
    /// `NotFoundError`.
    pub fn delete_index(&self, name: &str) -> Result<()> {
        let state = self.ensure_alive()?;
        let tx = Arc::clone(&self.inner.tx);
        tx.ensure_version_change()?;
        tx.ensure_active()?;

        let engine = tx.engine()?;
        let metas = engine.driver.list_indexes(&tx.db.name, state.id)?;
        let meta = metas
            .iter()
            .find(|meta| meta.name == name)
            .ok_or_else(|| Error::not_found(format!("index \"{name}\" does not exist")))?;

        tx.ensure_savepoint()?;
        engine.driver.delete_index(&tx.db.name, meta.id)?;

        let handle = self.inner.index_handles.lock().remove(name);
        if let Some(handle) = &handle {
            handle.mark_deleted();
        }
        tx.journal(MetadataChange::DeletedIndex { handle });
        tracing::debug!(store = %state.name, index = name, "index deleted");
        Ok(())
    }

    /// Renames this store. Legal only in a version-change transaction;
    /// renaming to the current name is a no-op.
    ///
    /// # Errors
    ///
    /// `InvalidStateError`, `TransactionInactiveError`, or
    /// `ConstraintError` on a name clash.
    pub fn rename(&self, new_name: &str) -> Result<()> {
        let state = self.ensure_alive()?;
        let tx = Arc::clone(&self.inner.tx);
        tx.ensure_version_change()?;
        tx.ensure_active()?;

        if state.name == new_name {
            return Ok(());
        }
        if tx.db.cached_store(new_name).is_some() {
            return Err(Error::constraint(format!(
                "object store \"{new_name}\" already exists"
            )));
        }

        let engine = tx.engine()?;
        tx.ensure_savepoint()?;
        engine
            .driver
            .rename_store(&tx.db.name, state.id, new_name)?;
        tx.db.rename_cached_store(&state.name, new_name);
        tx.rekey_store_handle(&state.name, new_name);
        self.inner.state.lock().name = new_name.to_string();
        tx.journal(MetadataChange::RenamedStore {
            handle: self.clone(),
            old_name: state.name.clone(),
        });
        tracing::debug!(from = %state.name, to = new_name, "object store renamed");
        Ok(())
    }

    pub(crate) fn clear_index_handles(&self) {
        self.inner.index_handles.lock().clear();
    }

    pub(crate) fn rekey_index_handle(&self, old_name: &str, new_name: &str) {
        let mut handles = self.inner.index_handles.lock();
        if let Some(handle) = handles.remove(old_name) {
            handles.insert(new_name.to_string(), handle);
        }
    }
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.snapshot();
        f.debug_struct("ObjectStore")
            .field("name", &state.name)
            .field("key_path", &state.key_path)
            .field("auto_increment", &state.auto_increment)
            .field("deleted", &state.deleted)
            .finish()
    }
}

pub(crate) fn resolve_query(query: Option<Query>) -> Result<KeyRange> {
    match query {
        Some(query) => query.to_range(),
        None => Ok(KeyRange::unbounded()),
    }
}

pub(crate) fn normalize_count(count: Option<u32>) -> Option<u64> {
    match count {
        None | Some(0) => None,
        Some(n) => Some(u64::from(n)),
    }
}

/// Where the key generator lands after a record with `key` is stored:
/// `Some(next)` when the generator must advance to `next`, `None` when
/// the key leaves it alone.
///
/// Only number keys move the generator. The landing value is
/// `min(floor(key), 2^53)` computed before the comparison, so a
/// positive-infinite key clamps to the ceiling and pins the generator
/// (the next generation attempt fails); NaN and negative infinity never
/// advance it.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub(crate) fn generator_advance(key: &Key, current: i64) -> Option<i64> {
    let Key::Number(n) = key else { return None };
    let landing = if n.is_nan() {
        return None;
    } else if n.is_infinite() {
        if *n > 0.0 {
            MAX_KEY_GENERATOR
        } else {
            return None;
        }
    } else {
        // The saturating cast and the clamp keep the landing exact in
        // integer space; f64 cannot represent 2^53 + 1.
        (n.floor() as i64).min(MAX_KEY_GENERATOR)
    };
    if landing < current {
        return None;
    }
    Some(landing + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_advances_past_integer_keys() {
        assert_eq!(generator_advance(&Key::Number(5.0), 1), Some(6));
        assert_eq!(generator_advance(&Key::Number(2.5), 1), Some(3));
        assert_eq!(generator_advance(&Key::Number(1.0), 1), Some(2));
    }

    #[test]
    fn generator_ignores_keys_behind_it() {
        assert_eq!(generator_advance(&Key::Number(1.0), 5), None);
        assert_eq!(generator_advance(&Key::Number(0.5), 1), None);
        assert_eq!(generator_advance(&Key::Number(-7.0), 1), None);
    }

    #[test]
    fn generator_ignores_non_number_keys() {
        assert_eq!(generator_advance(&Key::Text("9".into()), 1), None);
        assert_eq!(generator_advance(&Key::Date(9.0), 1), None);
        assert_eq!(
            generator_advance(&Key::Array(vec![Key::Number(9.0)]), 1),
            None
        );
    }

    #[test]
    fn positive_infinity_pins_generator_at_ceiling() {
        assert_eq!(
            generator_advance(&Key::Number(f64::INFINITY), 1),
            Some(MAX_KEY_GENERATOR + 1)
        );
        assert_eq!(
            generator_advance(&Key::Number(f64::INFINITY), MAX_KEY_GENERATOR),
            Some(MAX_KEY_GENERATOR + 1)
        );
        // Already past the ceiling: the clamp lands behind the
        // generator, so nothing moves.
        assert_eq!(
            generator_advance(&Key::Number(f64::INFINITY), MAX_KEY_GENERATOR + 1),
            None
        );
    }

    #[test]
    fn nan_and_negative_infinity_are_silent() {
        assert_eq!(generator_advance(&Key::Number(f64::NAN), 1), None);
        assert_eq!(generator_advance(&Key::Number(f64::NEG_INFINITY), 1), None);
    }

    #[test]
    fn huge_finite_keys_saturate_at_ceiling() {
        assert_eq!(
            generator_advance(&Key::Number(1e300), 1),
            Some(MAX_KEY_GENERATOR + 1)
        );
    }
}
