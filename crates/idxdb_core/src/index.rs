//! Index handles: reads through a secondary index.

use crate::cursor::{Cursor, CursorSource};
use crate::error::{Error, Result};
use crate::request::{Request, RequestInner, RequestResult, RequestSource};
use crate::store::{normalize_count, resolve_query, ObjectStore};
use crate::transaction::MetadataChange;
use crate::types::{byte_range, Direction, GetAllOptions, Query, RecordEntry};
use idxdb_codec::{decode_key, deserialize_value, Key, KeyPath, Value};
use idxdb_storage::{IndexId, RawIndexRecord, ScanDirection, StoreId};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub(crate) struct IndexHandleState {
    pub id: IndexId,
    pub name: String,
    pub key_path: KeyPath,
    pub unique: bool,
    pub multi_entry: bool,
    pub deleted: bool,
}

pub(crate) struct IndexHandleInner {
    pub(crate) store: ObjectStore,
    pub(crate) state: Mutex<IndexHandleState>,
}

/// A handle to an index, scoped to its store handle's transaction.
#[derive(Clone)]
pub struct Index {
    pub(crate) inner: Arc<IndexHandleInner>,
}

impl Index {
    pub(crate) fn new(store: ObjectStore, state: IndexHandleState) -> Self {
        Self {
            inner: Arc::new(IndexHandleInner {
                store,
                state: Mutex::new(state),
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

    fn snapshot(&self) -> IndexHandleState {
        self.inner.state.lock().clone()
    }

    /// The index name.
    #[must_use]
    pub fn name(&self) -> String {
        self.inner.state.lock().name.clone()
    }

    /// The index's key path.
    #[must_use]
    pub fn key_path(&self) -> KeyPath {
        self.inner.state.lock().key_path.clone()
    }

    /// Whether index keys are unique across records.
    #[must_use]
    pub fn unique(&self) -> bool {
        self.inner.state.lock().unique
    }

    /// Whether array-valued key paths fan out to one entry per element.
    #[must_use]
    pub fn multi_entry(&self) -> bool {
        self.inner.state.lock().multi_entry
    }

    /// The owning object store handle.
    #[must_use]
    pub fn object_store(&self) -> ObjectStore {
        self.inner.store.clone()
    }

    fn check_read(&self) -> Result<(IndexHandleState, StoreId)> {
        let state = self.snapshot();
        if state.deleted {
            return Err(Error::invalid_state("index has been deleted"));
        }
        let store_state = self.inner.store.inner.state.lock().clone();
        if store_state.deleted {
            return Err(Error::invalid_state("object store has been deleted"));
        }
        self.inner.store.inner.tx.ensure_active()?;
        Ok((state, store_state.id))
    }

    fn source(&self, state: &IndexHandleState) -> RequestSource {
        RequestSource::Index {
            store: self.inner.store.name(),
            index: state.name.clone(),
        }
    }

    fn queue_read(
        &self,
        state: &IndexHandleState,
        store_id: StoreId,
        op: impl FnOnce(
                &dyn idxdb_storage::StorageDriver,
                &str,
                StoreId,
                IndexId,
            ) -> Result<RequestResult>
            + Send
            + 'static,
    ) -> Result<Request> {
        let tx = Arc::clone(&self.inner.store.inner.tx);
        let engine = tx.engine()?;
        let request = RequestInner::new(self.source(state), Some(&tx));
        let db = tx.db.name.clone();
        let index_id = state.id;
        tx.queue_request(
            Arc::clone(&request),
            Box::new(move || op(engine.driver.as_ref(), &db, store_id, index_id)),
        );
        Ok(Request::from_inner(request))
    }

    /// Fetches the first value whose index key matches the query.
    ///
    /// # Errors
    ///
    /// `TransactionInactiveError`, `InvalidStateError` on deleted
    /// handles, or `DataError` for an invalid query.
    pub fn get(&self, query: impl Into<Query>) -> Result<Request> {
        let (state, store_id) = self.check_read()?;
        let range = query.into().to_range()?;
        self.queue_read(&state, store_id, move |driver, db, store_id, index_id| {
            let hit = driver.get_by_index_range(
                db,
                store_id,
                index_id,
                &byte_range(&range),
                ScanDirection::Forward,
            )?;
            let value = hit
                .map(|record| deserialize_value(&record.value))
                .transpose()?;
            Ok(RequestResult::OptionalValue(value))
        })
    }

    /// Fetches the primary key of the first matching entry.
    ///
    /// # Errors
    ///
    /// As [`Index::get`].
    pub fn get_key(&self, query: impl Into<Query>) -> Result<Request> {
        let (state, store_id) = self.check_read()?;
        let range = query.into().to_range()?;
        self.queue_read(&state, store_id, move |driver, db, _store_id, index_id| {
            let entries = driver.scan_index(
                db,
                index_id,
                &byte_range(&range),
                None,
                ScanDirection::Forward,
                Some(1),
            )?;
            let key = entries
                .into_iter()
                .next()
                .map(|entry| decode_key(&entry.primary_key))
                .transpose()?;
            Ok(RequestResult::OptionalKey(key))
        })
    }

    /// Fetches matching values in `(index key, primary key)` order, up
    /// to `count` (0 or absent means unbounded).
    ///
    /// # Errors
    ///
    /// As [`Index::get`].
    pub fn get_all(&self, query: Option<Query>, count: Option<u32>) -> Result<Request> {
        let (state, store_id) = self.check_read()?;
        let range = resolve_query(query)?;
        let limit = normalize_count(count);
        self.queue_read(&state, store_id, move |driver, db, store_id, index_id| {
            let rows = driver.get_all_index(
                db,
                store_id,
                index_id,
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

    /// Fetches the primary keys of matching entries, up to `count`.
    ///
    /// # Errors
    ///
    /// As [`Index::get`].
    pub fn get_all_keys(&self, query: Option<Query>, count: Option<u32>) -> Result<Request> {
        let (state, store_id) = self.check_read()?;
        let range = resolve_query(query)?;
        let limit = normalize_count(count);
        self.queue_read(&state, store_id, move |driver, db, _store_id, index_id| {
            let entries = driver.scan_index(
                db,
                index_id,
                &byte_range(&range),
                None,
                ScanDirection::Forward,
                limit,
            )?;
            let keys = entries
                .into_iter()
                .map(|entry| decode_key(&entry.primary_key))
                .collect::<idxdb_codec::CodecResult<Vec<Key>>>()?;
            Ok(RequestResult::Keys(keys))
        })
    }

    /// Fetches matching records (index key, primary key, value) with an
    /// optional direction; unique directions collapse runs of equal
    /// index key.
    ///
    /// # Errors
    ///
    /// As [`Index::get`].
    pub fn get_all_records(&self, options: GetAllOptions) -> Result<Request> {
        let (state, store_id) = self.check_read()?;
        let range = resolve_query(options.query)?;
        let limit = normalize_count(options.count);
        let direction = options.direction;
        self.queue_read(&state, store_id, move |driver, db, store_id, index_id| {
            // Unique directions cannot push the limit into the driver:
            // collapsing happens on the full run.
            let scan_limit = if direction.is_unique() { None } else { limit };
            let rows = driver.get_all_index(
                db,
                store_id,
                index_id,
                &byte_range(&range),
                direction.scan(),
                scan_limit,
            )?;
            let rows = if direction.is_unique() {
                collapse_unique(rows, direction, limit)
            } else {
                rows
            };
            let mut records = Vec::with_capacity(rows.len());
            for row in rows {
                records.push(RecordEntry {
                    key: decode_key(&row.key)?,
                    primary_key: decode_key(&row.primary_key)?,
                    value: deserialize_value(&row.value)?,
                });
            }
            Ok(RequestResult::Records(records))
        })
    }

    /// Counts the entries matched by the query.
    ///
    /// # Errors
    ///
    /// As [`Index::get`].
    pub fn count(&self, query: Option<Query>) -> Result<Request> {
        let (state, store_id) = self.check_read()?;
        let range = resolve_query(query)?;
        self.queue_read(&state, store_id, move |driver, db, _store_id, index_id| {
            let count = driver.count_index(db, index_id, &byte_range(&range))?;
            Ok(RequestResult::Count(count))
        })
    }

    /// Opens a cursor over the index entries.
    ///
    /// # Errors
    ///
    /// As [`Index::get`].
    pub fn open_cursor(&self, query: Option<Query>, direction: Direction) -> Result<Request> {
        self.open_cursor_impl(query, direction, false)
    }

    /// Opens a key-only cursor over the index entries.
    ///
    /// # Errors
    ///
    /// As [`Index::get`].
    pub fn open_key_cursor(&self, query: Option<Query>, direction: Direction) -> Result<Request> {
        self.open_cursor_impl(query, direction, true)
    }

    fn open_cursor_impl(
        &self,
        query: Option<Query>,
        direction: Direction,
        key_only: bool,
    ) -> Result<Request> {
        let (state, _store_id) = self.check_read()?;
        let range = resolve_query(query)?;
        let tx = Arc::clone(&self.inner.store.inner.tx);
        let request = RequestInner::new(self.source(&state), Some(&tx));

        let cursor = Cursor::new(
            CursorSource::Index(self.clone()),
            direction,
            range,
            key_only,
        );
        cursor.attach_request(&request);
        let op = cursor.step_operation(1, None, None);
        tx.queue_request(Arc::clone(&request), op);
        Ok(Request::from_inner(request))
    }

    /// Renames this index. Legal only in a version-change transaction;
    /// renaming to the current name is a no-op.
    ///
    /// # Errors
    ///
    /// `InvalidStateError`, `TransactionInactiveError`, or
    /// `ConstraintError` on a name clash.
    pub fn rename(&self, new_name: &str) -> Result<()> {
        let state = self.snapshot();
        if state.deleted {
            return Err(Error::invalid_state("index has been deleted"));
        }
        let store_state = self.inner.store.inner.state.lock().clone();
        if store_state.deleted {
            return Err(Error::invalid_state("object store has been deleted"));
        }
        let tx = Arc::clone(&self.inner.store.inner.tx);
        tx.ensure_version_change()?;
        tx.ensure_active()?;

        if state.name == new_name {
            return Ok(());
        }

        let engine = tx.engine()?;
        let siblings = engine.driver.list_indexes(&tx.db.name, store_state.id)?;
        if siblings.iter().any(|meta| meta.name == new_name) {
            return Err(Error::constraint(format!(
                "index \"{new_name}\" already exists"
            )));
        }

        tx.ensure_savepoint()?;
        engine.driver.rename_index(&tx.db.name, state.id, new_name)?;
        self.inner.store.rekey_index_handle(&state.name, new_name);
        self.inner.state.lock().name = new_name.to_string();
        tx.journal(MetadataChange::RenamedIndex {
            handle: self.clone(),
            old_name: state.name.clone(),
        });
        tracing::debug!(from = %state.name, to = new_name, "index renamed");
        Ok(())
    }
}

/// Collapses runs of equal index key: forward keeps the first entry of
/// each run (smallest primary key); reverse keeps each run's smallest
/// primary key as well, which in a reverse scan is the run's last entry.
fn collapse_unique(
    rows: Vec<RawIndexRecord>,
    direction: Direction,
    limit: Option<u64>,
) -> Vec<RawIndexRecord> {
    let mut out: Vec<RawIndexRecord> = Vec::new();
    for row in rows {
        match out.last_mut() {
            Some(last) if last.key == row.key => {
                if direction.is_reverse() {
                    *last = row;
                }
            }
            _ => {
                if !direction.is_reverse() {
                    if let Some(limit) = limit {
                        if out.len() as u64 == limit {
                            break;
                        }
                    }
                }
                out.push(row);
            }
        }
    }
    if direction.is_reverse() {
        if let Some(limit) = limit {
            out.truncate(limit as usize);
        }
    }
    out
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.snapshot();
        f.debug_struct("Index")
            .field("name", &state.name)
            .field("key_path", &state.key_path)
            .field("unique", &state.unique)
            .field("multi_entry", &state.multi_entry)
            .field("deleted", &state.deleted)
            .finish()
    }
}
