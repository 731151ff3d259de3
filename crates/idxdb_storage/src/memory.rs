//! In-memory storage driver for testing.

use crate::driver::{
    ByteRange, IndexId, IndexMeta, RawIndexEntry, RawIndexRecord, RawRecord, ScanDirection,
    StorageDriver, StoreId, StoreMeta,
};
use crate::error::{DriverError, DriverResult};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// An in-memory storage driver.
///
/// Keeps every database as ordered maps over encoded keys and implements
/// savepoints as whole-state snapshots. Suitable for unit tests and
/// ephemeral engines; the on-disk twin is [`crate::SqliteDriver`], and the
/// two are exercised by the same contract tests.
#[derive(Debug, Default)]
pub struct MemoryDriver {
    state: RwLock<HashMap<String, DbState>>,
}

#[derive(Debug, Default, Clone)]
struct DbState {
    version: u64,
    next_store_id: StoreId,
    next_index_id: IndexId,
    stores: BTreeMap<StoreId, StoreMeta>,
    indexes: BTreeMap<IndexId, IndexMeta>,
    records: BTreeMap<(StoreId, Vec<u8>), Vec<u8>>,
    index_entries: BTreeSet<(IndexId, Vec<u8>, Vec<u8>)>,
    // Savepoint stack: (name, snapshot at creation). The snapshot
    // excludes the stack itself.
    #[allow(clippy::type_complexity)]
    savepoints: Vec<(String, Box<DbState>)>,
}

impl DbState {
    fn snapshot(&self) -> Box<DbState> {
        Box::new(DbState {
            version: self.version,
            next_store_id: self.next_store_id,
            next_index_id: self.next_index_id,
            stores: self.stores.clone(),
            indexes: self.indexes.clone(),
            records: self.records.clone(),
            index_entries: self.index_entries.clone(),
            savepoints: Vec::new(),
        })
    }

    fn restore(&mut self, snapshot: &DbState) {
        self.version = snapshot.version;
        self.next_store_id = snapshot.next_store_id;
        self.next_index_id = snapshot.next_index_id;
        self.stores = snapshot.stores.clone();
        self.indexes = snapshot.indexes.clone();
        self.records = snapshot.records.clone();
        self.index_entries = snapshot.index_entries.clone();
    }
}

impl MemoryDriver {
    /// Creates a new empty driver.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_db<T>(&self, db: &str, f: impl FnOnce(&DbState) -> DriverResult<T>) -> DriverResult<T> {
        let state = self.state.read();
        let db_state = state
            .get(db)
            .ok_or_else(|| DriverError::UnknownDatabase(db.to_string()))?;
        f(db_state)
    }

    fn with_db_mut<T>(
        &self,
        db: &str,
        f: impl FnOnce(&mut DbState) -> DriverResult<T>,
    ) -> DriverResult<T> {
        let mut state = self.state.write();
        let db_state = state
            .get_mut(db)
            .ok_or_else(|| DriverError::UnknownDatabase(db.to_string()))?;
        f(db_state)
    }
}

fn key_in_range(key: &[u8], range: &ByteRange) -> bool {
    if let Some(lower) = &range.lower {
        match key.cmp(lower.as_slice()) {
            std::cmp::Ordering::Less => return false,
            std::cmp::Ordering::Equal if range.lower_open => return false,
            _ => {}
        }
    }
    if let Some(upper) = &range.upper {
        match key.cmp(upper.as_slice()) {
            std::cmp::Ordering::Greater => return false,
            std::cmp::Ordering::Equal if range.upper_open => return false,
            _ => {}
        }
    }
    true
}

/// Collects matching `(key, payload)` pairs from an ordered iterator,
/// honoring direction and limit.
fn collect_directed<I, T>(iter: I, direction: ScanDirection, limit: Option<u64>) -> Vec<T>
where
    I: DoubleEndedIterator<Item = T>,
{
    let limit = limit.map_or(usize::MAX, |n| n as usize);
    match direction {
        ScanDirection::Forward => iter.take(limit).collect(),
        ScanDirection::Reverse => iter.rev().take(limit).collect(),
    }
}

impl StorageDriver for MemoryDriver {
    fn list_databases(&self) -> DriverResult<Vec<(String, u64)>> {
        let state = self.state.read();
        let mut out: Vec<(String, u64)> = state
            .iter()
            .map(|(name, db)| (name.clone(), db.version))
            .collect();
        out.sort();
        Ok(out)
    }

    fn db_exists(&self, db: &str) -> DriverResult<bool> {
        Ok(self.state.read().contains_key(db))
    }

    fn db_version(&self, db: &str) -> DriverResult<Option<u64>> {
        Ok(self.state.read().get(db).map(|s| s.version))
    }

    fn set_db_version(&self, db: &str, version: u64) -> DriverResult<()> {
        let mut state = self.state.write();
        let entry = state.entry(db.to_string()).or_insert_with(|| DbState {
            next_store_id: 1,
            next_index_id: 1,
            ..DbState::default()
        });
        entry.version = version;
        Ok(())
    }

    fn delete_db(&self, db: &str) -> DriverResult<()> {
        self.state.write().remove(db);
        Ok(())
    }

    fn list_stores(&self, db: &str) -> DriverResult<Vec<StoreMeta>> {
        self.with_db(db, |state| {
            let mut stores: Vec<StoreMeta> = state.stores.values().cloned().collect();
            stores.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(stores)
        })
    }

    fn create_store(
        &self,
        db: &str,
        name: &str,
        key_path: Option<&str>,
        auto_increment: bool,
    ) -> DriverResult<StoreMeta> {
        self.with_db_mut(db, |state| {
            if state.stores.values().any(|s| s.name == name) {
                return Err(DriverError::catalog(format!(
                    "object store \"{name}\" already exists"
                )));
            }
            let id = state.next_store_id;
            state.next_store_id += 1;
            let meta = StoreMeta {
                id,
                name: name.to_string(),
                key_path: key_path.map(str::to_string),
                auto_increment,
                current_key: 1,
            };
            state.stores.insert(id, meta.clone());
            Ok(meta)
        })
    }

    fn delete_store(&self, db: &str, store: StoreId) -> DriverResult<()> {
        self.with_db_mut(db, |state| {
            state
                .stores
                .remove(&store)
                .ok_or(DriverError::UnknownStore(store))?;
            let index_ids: Vec<IndexId> = state
                .indexes
                .iter()
                .filter(|(_, m)| m.store_id == store)
                .map(|(id, _)| *id)
                .collect();
            for id in index_ids {
                state.indexes.remove(&id);
                state.index_entries.retain(|(i, _, _)| *i != id);
            }
            state.records.retain(|(s, _), _| *s != store);
            Ok(())
        })
    }

    fn rename_store(&self, db: &str, store: StoreId, new_name: &str) -> DriverResult<()> {
        self.with_db_mut(db, |state| {
            if state
                .stores
                .values()
                .any(|s| s.name == new_name && s.id != store)
            {
                return Err(DriverError::catalog(format!(
                    "object store \"{new_name}\" already exists"
                )));
            }
            let meta = state
                .stores
                .get_mut(&store)
                .ok_or(DriverError::UnknownStore(store))?;
            meta.name = new_name.to_string();
            Ok(())
        })
    }

    fn get_store_meta(&self, db: &str, store: StoreId) -> DriverResult<StoreMeta> {
        self.with_db(db, |state| {
            state
                .stores
                .get(&store)
                .cloned()
                .ok_or(DriverError::UnknownStore(store))
        })
    }

    fn update_current_key(&self, db: &str, store: StoreId, value: i64) -> DriverResult<()> {
        self.with_db_mut(db, |state| {
            let meta = state
                .stores
                .get_mut(&store)
                .ok_or(DriverError::UnknownStore(store))?;
            meta.current_key = value;
            Ok(())
        })
    }

    fn list_indexes(&self, db: &str, store: StoreId) -> DriverResult<Vec<IndexMeta>> {
        self.with_db(db, |state| {
            let mut indexes: Vec<IndexMeta> = state
                .indexes
                .values()
                .filter(|m| m.store_id == store)
                .cloned()
                .collect();
            indexes.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(indexes)
        })
    }

    fn create_index(
        &self,
        db: &str,
        store: StoreId,
        name: &str,
        key_path: &str,
        unique: bool,
        multi_entry: bool,
    ) -> DriverResult<IndexMeta> {
        self.with_db_mut(db, |state| {
            if !state.stores.contains_key(&store) {
                return Err(DriverError::UnknownStore(store));
            }
            if state
                .indexes
                .values()
                .any(|m| m.store_id == store && m.name == name)
            {
                return Err(DriverError::catalog(format!(
                    "index \"{name}\" already exists"
                )));
            }
            let id = state.next_index_id;
            state.next_index_id += 1;
            let meta = IndexMeta {
                id,
                store_id: store,
                name: name.to_string(),
                key_path: key_path.to_string(),
                unique,
                multi_entry,
            };
            state.indexes.insert(id, meta.clone());
            Ok(meta)
        })
    }

    fn delete_index(&self, db: &str, index: IndexId) -> DriverResult<()> {
        self.with_db_mut(db, |state| {
            state
                .indexes
                .remove(&index)
                .ok_or(DriverError::UnknownIndex(index))?;
            state.index_entries.retain(|(i, _, _)| *i != index);
            Ok(())
        })
    }

    fn rename_index(&self, db: &str, index: IndexId, new_name: &str) -> DriverResult<()> {
        self.with_db_mut(db, |state| {
            let store_id = state
                .indexes
                .get(&index)
                .ok_or(DriverError::UnknownIndex(index))?
                .store_id;
            if state
                .indexes
                .values()
                .any(|m| m.store_id == store_id && m.name == new_name && m.id != index)
            {
                return Err(DriverError::catalog(format!(
                    "index \"{new_name}\" already exists"
                )));
            }
            let meta = state
                .indexes
                .get_mut(&index)
                .ok_or(DriverError::UnknownIndex(index))?;
            meta.name = new_name.to_string();
            Ok(())
        })
    }

    fn get_index_meta(&self, db: &str, index: IndexId) -> DriverResult<IndexMeta> {
        self.with_db(db, |state| {
            state
                .indexes
                .get(&index)
                .cloned()
                .ok_or(DriverError::UnknownIndex(index))
        })
    }

    fn put_record(&self, db: &str, store: StoreId, key: &[u8], value: &[u8]) -> DriverResult<()> {
        self.with_db_mut(db, |state| {
            state
                .records
                .insert((store, key.to_vec()), value.to_vec());
            Ok(())
        })
    }

    fn get_record(&self, db: &str, store: StoreId, key: &[u8]) -> DriverResult<Option<Vec<u8>>> {
        self.with_db(db, |state| {
            Ok(state.records.get(&(store, key.to_vec())).cloned())
        })
    }

    fn delete_record(&self, db: &str, store: StoreId, key: &[u8]) -> DriverResult<bool> {
        self.with_db_mut(db, |state| {
            Ok(state.records.remove(&(store, key.to_vec())).is_some())
        })
    }

    fn clear_records(&self, db: &str, store: StoreId) -> DriverResult<()> {
        self.with_db_mut(db, |state| {
            state.records.retain(|(s, _), _| *s != store);
            let index_ids: Vec<IndexId> = state
                .indexes
                .values()
                .filter(|m| m.store_id == store)
                .map(|m| m.id)
                .collect();
            state
                .index_entries
                .retain(|(i, _, _)| !index_ids.contains(i));
            Ok(())
        })
    }

    fn get_in_range(
        &self,
        db: &str,
        store: StoreId,
        range: &ByteRange,
        direction: ScanDirection,
        limit: Option<u64>,
    ) -> DriverResult<Vec<RawRecord>> {
        self.with_db(db, |state| {
            let iter = state
                .records
                .range((store, Vec::new())..(store + 1, Vec::new()))
                .filter(|((_, key), _)| key_in_range(key, range))
                .map(|((_, key), value)| RawRecord {
                    key: key.clone(),
                    value: value.clone(),
                });
            Ok(collect_directed(iter, direction, limit))
        })
    }

    fn delete_in_range(&self, db: &str, store: StoreId, range: &ByteRange) -> DriverResult<()> {
        self.with_db_mut(db, |state| {
            state
                .records
                .retain(|(s, key), _| *s != store || !key_in_range(key, range));
            Ok(())
        })
    }

    fn count_in_range(&self, db: &str, store: StoreId, range: &ByteRange) -> DriverResult<u64> {
        self.with_db(db, |state| {
            Ok(state
                .records
                .range((store, Vec::new())..(store + 1, Vec::new()))
                .filter(|((_, key), _)| key_in_range(key, range))
                .count() as u64)
        })
    }

    fn scan_in_range(
        &self,
        db: &str,
        store: StoreId,
        range: &ByteRange,
        direction: ScanDirection,
        limit: Option<u64>,
    ) -> DriverResult<Vec<RawRecord>> {
        self.get_in_range(db, store, range, direction, limit)
    }

    fn add_index_entry(
        &self,
        db: &str,
        index: IndexId,
        key: &[u8],
        primary_key: &[u8],
    ) -> DriverResult<()> {
        self.with_db_mut(db, |state| {
            state
                .index_entries
                .insert((index, key.to_vec(), primary_key.to_vec()));
            Ok(())
        })
    }

    fn delete_entries_for_primary(
        &self,
        db: &str,
        index: IndexId,
        primary_key: &[u8],
    ) -> DriverResult<()> {
        self.with_db_mut(db, |state| {
            state
                .index_entries
                .retain(|(i, _, primary)| *i != index || primary != primary_key);
            Ok(())
        })
    }

    fn check_unique(
        &self,
        db: &str,
        index: IndexId,
        key: &[u8],
        exclude_primary: Option<&[u8]>,
    ) -> DriverResult<bool> {
        self.with_db(db, |state| {
            let conflict = state
                .index_entries
                .range((index, key.to_vec(), Vec::new())..(index + 1, Vec::new(), Vec::new()))
                .take_while(|(_, k, _)| k == key)
                .any(|(_, _, primary)| exclude_primary != Some(primary.as_slice()));
            Ok(conflict)
        })
    }

    fn get_by_index_key(
        &self,
        db: &str,
        store: StoreId,
        index: IndexId,
        key: &[u8],
    ) -> DriverResult<Option<RawIndexRecord>> {
        let range = ByteRange::only(key.to_vec());
        self.get_by_index_range(db, store, index, &range, ScanDirection::Forward)
    }

    fn get_by_index_range(
        &self,
        db: &str,
        store: StoreId,
        index: IndexId,
        range: &ByteRange,
        direction: ScanDirection,
    ) -> DriverResult<Option<RawIndexRecord>> {
        Ok(self
            .get_all_index(db, store, index, range, direction, Some(1))?
            .into_iter()
            .next())
    }

    fn count_index(&self, db: &str, index: IndexId, range: &ByteRange) -> DriverResult<u64> {
        self.with_db(db, |state| {
            Ok(state
                .index_entries
                .range((index, Vec::new(), Vec::new())..(index + 1, Vec::new(), Vec::new()))
                .filter(|(_, key, _)| key_in_range(key, range))
                .count() as u64)
        })
    }

    fn scan_index(
        &self,
        db: &str,
        index: IndexId,
        range: &ByteRange,
        after: Option<(&[u8], &[u8])>,
        direction: ScanDirection,
        limit: Option<u64>,
    ) -> DriverResult<Vec<RawIndexEntry>> {
        self.with_db(db, |state| {
            let beyond = |key: &[u8], primary: &[u8]| -> bool {
                let Some((after_key, after_primary)) = after else {
                    return true;
                };
                let tuple = (key, primary);
                match direction {
                    ScanDirection::Forward => tuple > (after_key, after_primary),
                    ScanDirection::Reverse => tuple < (after_key, after_primary),
                }
            };
            let iter = state
                .index_entries
                .range((index, Vec::new(), Vec::new())..(index + 1, Vec::new(), Vec::new()))
                .filter(|(_, key, primary)| key_in_range(key, range) && beyond(key, primary))
                .map(|(_, key, primary)| RawIndexEntry {
                    key: key.clone(),
                    primary_key: primary.clone(),
                });
            Ok(collect_directed(iter, direction, limit))
        })
    }

    fn get_all_index(
        &self,
        db: &str,
        store: StoreId,
        index: IndexId,
        range: &ByteRange,
        direction: ScanDirection,
        limit: Option<u64>,
    ) -> DriverResult<Vec<RawIndexRecord>> {
        let entries = self.scan_index(db, index, range, None, direction, limit)?;
        self.with_db(db, |state| {
            let mut out = Vec::with_capacity(entries.len());
            for entry in entries {
                let value = state
                    .records
                    .get(&(store, entry.primary_key.clone()))
                    .cloned()
                    .ok_or_else(|| {
                        DriverError::corrupted("index entry references a missing record")
                    })?;
                out.push(RawIndexRecord {
                    key: entry.key,
                    primary_key: entry.primary_key,
                    value,
                });
            }
            Ok(out)
        })
    }

    fn begin_savepoint(&self, db: &str, name: &str) -> DriverResult<()> {
        self.with_db_mut(db, |state| {
            let snapshot = state.snapshot();
            state.savepoints.push((name.to_string(), snapshot));
            Ok(())
        })
    }

    fn release_savepoint(&self, db: &str, name: &str) -> DriverResult<()> {
        self.with_db_mut(db, |state| {
            let position = state
                .savepoints
                .iter()
                .rposition(|(n, _)| n == name)
                .ok_or_else(|| DriverError::InvalidSavepoint(name.to_string()))?;
            state.savepoints.truncate(position);
            Ok(())
        })
    }

    fn rollback_savepoint(&self, db: &str, name: &str) -> DriverResult<()> {
        self.with_db_mut(db, |state| {
            let position = state
                .savepoints
                .iter()
                .rposition(|(n, _)| n == name)
                .ok_or_else(|| DriverError::InvalidSavepoint(name.to_string()))?;
            let snapshot = std::mem::take(&mut state.savepoints[position].1);
            state.restore(&snapshot);
            state.savepoints[position].1 = snapshot;
            state.savepoints.truncate(position + 1);
            Ok(())
        })
    }
}
