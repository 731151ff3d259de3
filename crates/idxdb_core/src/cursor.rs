//! Cursors: positioned iteration over stores and indexes.
//!
//! A cursor is positioned by an encoded key (plus an encoded primary key
//! for index cursors) and re-seeks from that position on every step, so
//! mutations made between steps are observed. Stepping re-arms the
//! cursor's original request rather than creating a new one.

use crate::error::{Error, Result};
use crate::index::Index;
use crate::request::{Request, RequestInner, RequestResult};
use crate::store::ObjectStore;
use crate::transaction::{Operation, TransactionInner};
use crate::types::{byte_range, Direction};
use idxdb_codec::{decode_key, deserialize_value, encode_key, Key, KeyRange, Value};
use idxdb_storage::{ByteRange, RawIndexEntry, ScanDirection};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::sync::{Arc, Weak};

/// Batch size for index scans that must skip entries in the engine.
const SCAN_BATCH: u64 = 64;

pub(crate) enum CursorSource {
    Store(ObjectStore),
    Index(Index),
}

#[derive(Default)]
struct CursorState {
    key: Option<Key>,
    primary_key: Option<Key>,
    value: Option<Value>,
    got_value: bool,
    continue_called: bool,
    position: Option<Vec<u8>>,
    position_primary: Option<Vec<u8>>,
}

pub(crate) struct CursorInner {
    source: CursorSource,
    direction: Direction,
    key_only: bool,
    range: KeyRange,
    request: Mutex<Option<Weak<RequestInner>>>,
    state: Mutex<CursorState>,
}

/// A cursor over a store's records or an index's entries.
#[derive(Clone)]
pub struct Cursor {
    pub(crate) inner: Arc<CursorInner>,
}

impl Cursor {
    pub(crate) fn new(
        source: CursorSource,
        direction: Direction,
        range: KeyRange,
        key_only: bool,
    ) -> Self {
        Self {
            inner: Arc::new(CursorInner {
                source,
                direction,
                key_only,
                range,
                request: Mutex::new(None),
                state: Mutex::new(CursorState::default()),
            }),
        }
    }

    pub(crate) fn attach_request(&self, request: &Arc<RequestInner>) {
        *self.inner.request.lock() = Some(Arc::downgrade(request));
    }

    fn store(&self) -> &ObjectStore {
        match &self.inner.source {
            CursorSource::Store(store) => store,
            CursorSource::Index(index) => &index.inner.store,
        }
    }

    fn tx(&self) -> Arc<TransactionInner> {
        Arc::clone(&self.store().inner.tx)
    }

    fn ensure_alive(&self) -> Result<()> {
        if let CursorSource::Index(index) = &self.inner.source {
            if index.inner.state.lock().deleted {
                return Err(Error::invalid_state("index has been deleted"));
            }
        }
        if self.store().inner.state.lock().deleted {
            return Err(Error::invalid_state("object store has been deleted"));
        }
        Ok(())
    }

    /// The iteration direction.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    /// Whether this cursor exposes keys only.
    #[must_use]
    pub fn key_only(&self) -> bool {
        self.inner.key_only
    }

    /// The current position key (the index key for index cursors).
    #[must_use]
    pub fn key(&self) -> Option<Key> {
        self.inner.state.lock().key.clone()
    }

    /// The current record's primary key.
    #[must_use]
    pub fn primary_key(&self) -> Option<Key> {
        self.inner.state.lock().primary_key.clone()
    }

    /// The current record's value; `None` on key-only cursors and
    /// exhausted cursors.
    #[must_use]
    pub fn value(&self) -> Option<Value> {
        self.inner.state.lock().value.clone()
    }

    // ── stepping ────────────────────────────────────────────────────

    /// Moves to the next qualifying record, or to the first record at or
    /// beyond `key` when given.
    ///
    /// # Errors
    ///
    /// `TransactionInactiveError`, `InvalidStateError` when the cursor
    /// has no value or is mid-iteration, `DataError` when `key` is
    /// invalid or not ahead of the position in iteration order.
    pub fn continue_cursor(&self, key: Option<&Value>) -> Result<()> {
        self.tx().ensure_active()?;
        self.ensure_alive()?;
        self.check_steppable()?;

        let target = match key {
            Some(v) => {
                let target =
                    Key::from_value(v).map_err(|_| Error::data("key is not a valid key"))?;
                let current = self
                    .inner
                    .state
                    .lock()
                    .key
                    .clone()
                    .ok_or_else(|| Error::invalid_state("cursor has no value"))?;
                let ahead = match self.inner.direction.is_reverse() {
                    false => target.cmp_order(&current) == Ordering::Greater,
                    true => target.cmp_order(&current) == Ordering::Less,
                };
                if !ahead {
                    return Err(Error::data(
                        "key must be ahead of the cursor's position in iteration order",
                    ));
                }
                Some(target)
            }
            None => None,
        };

        self.begin_step();
        self.rearm_and_queue(1, target, None)
    }

    /// Skips exactly `count` qualifying records in iteration order.
    ///
    /// # Errors
    ///
    /// `TypeError` when `count` is zero; otherwise as
    /// [`Cursor::continue_cursor`].
    pub fn advance(&self, count: u32) -> Result<()> {
        if count == 0 {
            return Err(Error::type_error("advance count must be positive"));
        }
        self.tx().ensure_active()?;
        self.ensure_alive()?;
        self.check_steppable()?;

        self.begin_step();
        self.rearm_and_queue(count, None, None)
    }

    /// Moves to the first entry at or beyond `(key, primary_key)` in
    /// iteration order. Index cursors with non-unique directions only.
    ///
    /// # Errors
    ///
    /// `InvalidAccessError` on store cursors or unique directions,
    /// `DataError` for invalid keys or a position not strictly ahead;
    /// otherwise as [`Cursor::continue_cursor`].
    pub fn continue_primary_key(&self, key: &Value, primary_key: &Value) -> Result<()> {
        if matches!(self.inner.source, CursorSource::Store(_)) {
            return Err(Error::invalid_access(
                "continue_primary_key requires an index cursor",
            ));
        }
        if self.inner.direction.is_unique() {
            return Err(Error::invalid_access(
                "continue_primary_key is not defined for unique directions",
            ));
        }
        self.tx().ensure_active()?;
        self.ensure_alive()?;
        self.check_steppable()?;

        let target = Key::from_value(key).map_err(|_| Error::data("key is not a valid key"))?;
        let target_primary = Key::from_value(primary_key)
            .map_err(|_| Error::data("primary key is not a valid key"))?;

        let (current, current_primary) = {
            let st = self.inner.state.lock();
            (st.key.clone(), st.primary_key.clone())
        };
        let current = current.ok_or_else(|| Error::invalid_state("cursor has no value"))?;
        let current_primary =
            current_primary.ok_or_else(|| Error::invalid_state("cursor has no value"))?;

        let ord = match target.cmp_order(&current) {
            Ordering::Equal => target_primary.cmp_order(&current_primary),
            other => other,
        };
        let ahead = if self.inner.direction.is_reverse() {
            ord == Ordering::Less
        } else {
            ord == Ordering::Greater
        };
        if !ahead {
            return Err(Error::data(
                "position must be strictly ahead of the cursor in iteration order",
            ));
        }

        self.begin_step();
        self.rearm_and_queue(1, Some(target), Some(target_primary))
    }

    fn check_steppable(&self) -> Result<()> {
        let st = self.inner.state.lock();
        if st.continue_called {
            return Err(Error::invalid_state("cursor is already iterating"));
        }
        if !st.got_value {
            return Err(Error::invalid_state("cursor does not have a value"));
        }
        Ok(())
    }

    fn begin_step(&self) {
        let mut st = self.inner.state.lock();
        st.continue_called = true;
        st.got_value = false;
    }

    fn rearm_and_queue(
        &self,
        count: u32,
        target: Option<Key>,
        target_primary: Option<Key>,
    ) -> Result<()> {
        let request = self
            .inner
            .request
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| Error::invalid_state("cursor request no longer exists"))?;
        request.rearm();
        let tx = self.tx();
        tx.queue_request(request, self.step_operation(count, target, target_primary));
        Ok(())
    }

    /// Builds the operation that scans to the cursor's next position.
    pub(crate) fn step_operation(
        &self,
        count: u32,
        target: Option<Key>,
        target_primary: Option<Key>,
    ) -> Operation {
        let cursor = self.clone();
        Box::new(move || cursor.run_step(count, target, target_primary))
    }

    fn run_step(
        &self,
        count: u32,
        target: Option<Key>,
        target_primary: Option<Key>,
    ) -> Result<RequestResult> {
        match &self.inner.source {
            CursorSource::Store(store) => self.step_store(store, count, target),
            CursorSource::Index(index) => self.step_index(index, count, target, target_primary),
        }
    }

    fn step_store(&self, store: &ObjectStore, count: u32, target: Option<Key>) -> Result<RequestResult> {
        let tx = &store.inner.tx;
        let engine = tx.engine()?;
        let driver = engine.driver.as_ref();
        let db = tx.db.name.clone();
        let store_id = store.inner.state.lock().id;
        let reverse = self.inner.direction.is_reverse();

        let mut bounds = byte_range(&self.inner.range);
        if let Some(position) = self.inner.state.lock().position.clone() {
            if reverse {
                tighten_upper(&mut bounds, position, true);
            } else {
                tighten_lower(&mut bounds, position, true);
            }
        }
        if let Some(target) = &target {
            let bytes = encode_key(target);
            if reverse {
                tighten_upper(&mut bounds, bytes, false);
            } else {
                tighten_lower(&mut bounds, bytes, false);
            }
        }

        let rows = driver.scan_in_range(
            &db,
            store_id,
            &bounds,
            self.inner.direction.scan(),
            Some(u64::from(count)),
        )?;
        let Some(row) = rows.into_iter().nth(count as usize - 1) else {
            return Ok(self.finish_end());
        };

        let key = decode_key(&row.key)?;
        let value = if self.inner.key_only {
            None
        } else {
            Some(deserialize_value(&row.value)?)
        };

        let mut st = self.inner.state.lock();
        st.key = Some(key.clone());
        st.primary_key = Some(key);
        st.value = value;
        st.got_value = true;
        st.continue_called = false;
        st.position = Some(row.key);
        st.position_primary = None;
        drop(st);

        Ok(RequestResult::Cursor(Some(self.clone())))
    }

    fn step_index(
        &self,
        index: &Index,
        count: u32,
        target: Option<Key>,
        target_primary: Option<Key>,
    ) -> Result<RequestResult> {
        let store = &index.inner.store;
        let tx = &store.inner.tx;
        let engine = tx.engine()?;
        let driver = engine.driver.as_ref();
        let db = tx.db.name.clone();
        let store_id = store.inner.state.lock().id;
        let index_id = index.inner.state.lock().id;
        let direction = self.inner.direction;
        let reverse = direction.is_reverse();
        let unique = direction.is_unique();

        let mut bounds = byte_range(&self.inner.range);
        if let Some(target) = &target {
            let bytes = encode_key(target);
            if reverse {
                tighten_upper(&mut bounds, bytes, false);
            } else {
                tighten_lower(&mut bounds, bytes, false);
            }
        }
        let threshold: Option<(Vec<u8>, Vec<u8>)> = match (&target, &target_primary) {
            (Some(key), Some(primary)) => Some((encode_key(key), encode_key(primary))),
            _ => None,
        };

        let (mut after, mut last_key) = {
            let st = self.inner.state.lock();
            let after = match (&st.position, &st.position_primary) {
                (Some(key), Some(primary)) => Some((key.clone(), primary.clone())),
                _ => None,
            };
            (after, st.position.clone())
        };

        let mut remaining = count;
        let mut found: Option<RawIndexEntry> = None;
        'scan: loop {
            let after_ref = after
                .as_ref()
                .map(|(key, primary)| (key.as_slice(), primary.as_slice()));
            let batch = driver.scan_index(
                &db,
                index_id,
                &bounds,
                after_ref,
                direction.scan(),
                Some(SCAN_BATCH),
            )?;
            let exhausted = (batch.len() as u64) < SCAN_BATCH;

            for entry in batch {
                after = Some((entry.key.clone(), entry.primary_key.clone()));
                if unique && last_key.as_deref() == Some(entry.key.as_slice()) {
                    continue;
                }
                if let Some((t_key, t_primary)) = &threshold {
                    let ord = (entry.key.as_slice(), entry.primary_key.as_slice())
                        .cmp(&(t_key.as_slice(), t_primary.as_slice()));
                    let qualified = if reverse {
                        ord != Ordering::Greater
                    } else {
                        ord != Ordering::Less
                    };
                    if !qualified {
                        continue;
                    }
                }
                last_key = Some(entry.key.clone());
                remaining -= 1;
                if remaining == 0 {
                    found = Some(entry);
                    break 'scan;
                }
            }

            if exhausted {
                break;
            }
        }

        let Some(mut entry) = found else {
            return Ok(self.finish_end());
        };

        // Reverse-unique lands on the run's smallest primary key.
        if direction == Direction::ReverseUnique {
            let run = ByteRange::only(entry.key.clone());
            if let Some(first) = driver
                .scan_index(&db, index_id, &run, None, ScanDirection::Forward, Some(1))?
                .into_iter()
                .next()
            {
                entry = first;
            }
        }

        let key = decode_key(&entry.key)?;
        let primary = decode_key(&entry.primary_key)?;
        let value = if self.inner.key_only {
            None
        } else {
            let bytes = driver
                .get_record(&db, store_id, &entry.primary_key)?
                .ok_or_else(|| {
                    Error::Storage("index entry references a missing record".to_string())
                })?;
            Some(deserialize_value(&bytes)?)
        };

        let mut st = self.inner.state.lock();
        st.key = Some(key);
        st.primary_key = Some(primary);
        st.value = value;
        st.got_value = true;
        st.continue_called = false;
        st.position = Some(entry.key);
        st.position_primary = Some(entry.primary_key);
        drop(st);

        Ok(RequestResult::Cursor(Some(self.clone())))
    }

    fn finish_end(&self) -> RequestResult {
        let mut st = self.inner.state.lock();
        st.key = None;
        st.primary_key = None;
        st.value = None;
        st.got_value = false;
        st.continue_called = false;
        RequestResult::Cursor(None)
    }

    // ── update / delete ─────────────────────────────────────────────

    /// Replaces the record at the cursor's position. On stores with a
    /// key path, the new value's extracted key must equal the cursor's
    /// current primary key.
    ///
    /// # Errors
    ///
    /// `TransactionInactiveError`, `ReadOnlyError`, `InvalidStateError`
    /// on key-only or valueless cursors, `DataError` on a key mismatch.
    pub fn update(&self, value: &Value) -> Result<Request> {
        let primary = self.check_mutable()?;
        let request = self.store().put_for_cursor(value, &primary)?;
        Ok(request)
    }

    /// Deletes the record at the cursor's position.
    ///
    /// # Errors
    ///
    /// As [`Cursor::update`].
    pub fn delete(&self) -> Result<Request> {
        let primary = self.check_mutable()?;
        self.store().delete_for_cursor(&primary)
    }

    fn check_mutable(&self) -> Result<Key> {
        let tx = self.tx();
        tx.ensure_active()?;
        tx.ensure_writable()?;
        self.ensure_alive()?;
        if self.inner.key_only {
            return Err(Error::invalid_state(
                "key-only cursors cannot modify records",
            ));
        }
        let st = self.inner.state.lock();
        if st.continue_called || !st.got_value {
            return Err(Error::invalid_state("cursor does not have a value"));
        }
        st.primary_key
            .clone()
            .ok_or_else(|| Error::invalid_state("cursor does not have a value"))
    }
}

fn tighten_lower(range: &mut ByteRange, bytes: Vec<u8>, open: bool) {
    let replace = match &range.lower {
        None => true,
        Some(current) => match bytes.cmp(current) {
            Ordering::Greater => true,
            Ordering::Equal => open && !range.lower_open,
            Ordering::Less => false,
        },
    };
    if replace {
        range.lower = Some(bytes);
        range.lower_open = open;
    }
}

fn tighten_upper(range: &mut ByteRange, bytes: Vec<u8>, open: bool) {
    let replace = match &range.upper {
        None => true,
        Some(current) => match bytes.cmp(current) {
            Ordering::Less => true,
            Ordering::Equal => open && !range.upper_open,
            Ordering::Greater => false,
        },
    };
    if replace {
        range.upper = Some(bytes);
        range.upper_open = open;
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.inner.state.lock();
        f.debug_struct("Cursor")
            .field("direction", &self.inner.direction)
            .field("key_only", &self.inner.key_only)
            .field("key", &st.key)
            .field("primary_key", &st.primary_key)
            .field("got_value", &st.got_value)
            .finish()
    }
}
