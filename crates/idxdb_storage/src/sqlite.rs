//! SQLite storage driver.

use crate::driver::{
    ByteRange, IndexId, IndexMeta, RawIndexEntry, RawIndexRecord, RawRecord, ScanDirection,
    StorageDriver, StoreId, StoreMeta,
};
use crate::error::{DriverError, DriverResult};
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::hash_map::Entry as HashEntry;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// Name of the database catalog file inside the storage directory.
const CATALOG_FILE: &str = "databases.meta";
const CATALOG_TEMP: &str = "databases.meta.tmp";

/// SQLite-backed storage driver.
///
/// One `.sqlite` file per database under the storage directory, plus a
/// JSON catalog mapping database names to `(version, file)`. All BLOB
/// columns hold order-preserving encoded keys, so SQLite's bytewise BLOB
/// comparison gives key order directly.
pub struct SqliteDriver {
    root: PathBuf,
    catalog: Mutex<Catalog>,
    connections: Mutex<HashMap<String, Connection>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Catalog {
    databases: BTreeMap<String, CatalogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogEntry {
    version: u64,
    file: String,
}

/// Applies the per-database schema. Idempotent.
fn migrate(conn: &Connection) -> DriverResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS object_stores (
             id             INTEGER PRIMARY KEY AUTOINCREMENT,
             name           TEXT NOT NULL UNIQUE,
             key_path       TEXT,
             auto_increment INTEGER NOT NULL DEFAULT 0,
             current_key    INTEGER NOT NULL DEFAULT 1
         );
         CREATE TABLE IF NOT EXISTS indexes (
             id          INTEGER PRIMARY KEY AUTOINCREMENT,
             store_id    INTEGER NOT NULL REFERENCES object_stores(id),
             name        TEXT NOT NULL,
             key_path    TEXT NOT NULL,
             unique_flag INTEGER NOT NULL DEFAULT 0,
             multi_entry INTEGER NOT NULL DEFAULT 0,
             UNIQUE (store_id, name)
         );
         CREATE TABLE IF NOT EXISTS records (
             store_id INTEGER NOT NULL,
             key      BLOB NOT NULL,
             value    BLOB NOT NULL,
             PRIMARY KEY (store_id, key)
         ) WITHOUT ROWID;
         CREATE TABLE IF NOT EXISTS index_entries (
             index_id    INTEGER NOT NULL,
             key         BLOB NOT NULL,
             primary_key BLOB NOT NULL,
             PRIMARY KEY (index_id, key, primary_key)
         ) WITHOUT ROWID;",
    )?;
    Ok(())
}

/// Derives a file name from a database name: printable characters are
/// kept, the rest become `_`, and a hash of the raw name is appended so
/// that distinct names can never collide after sanitisation.
fn file_name_for(db: &str) -> String {
    let sanitized: String = db
        .chars()
        .take(48)
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    db.hash(&mut hasher);
    format!("{sanitized}-{:016x}.sqlite", hasher.finish())
}

/// Appends range conditions on `column` to a SQL fragment.
fn push_range_clause(
    sql: &mut String,
    sql_params: &mut Vec<SqlValue>,
    column: &str,
    range: &ByteRange,
) {
    if let Some(lower) = &range.lower {
        let op = if range.lower_open { ">" } else { ">=" };
        sql.push_str(&format!(" AND {column} {op} ?"));
        sql_params.push(SqlValue::Blob(lower.clone()));
    }
    if let Some(upper) = &range.upper {
        let op = if range.upper_open { "<" } else { "<=" };
        sql.push_str(&format!(" AND {column} {op} ?"));
        sql_params.push(SqlValue::Blob(upper.clone()));
    }
}

fn push_limit(sql: &mut String, sql_params: &mut Vec<SqlValue>, limit: Option<u64>) {
    if let Some(n) = limit {
        sql.push_str(" LIMIT ?");
        sql_params.push(SqlValue::Integer(n as i64));
    }
}

fn order_keyword(direction: ScanDirection) -> &'static str {
    match direction {
        ScanDirection::Forward => "ASC",
        ScanDirection::Reverse => "DESC",
    }
}

fn validate_savepoint_name(name: &str) -> DriverResult<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(DriverError::InvalidSavepoint(name.to_string()))
    }
}

impl SqliteDriver {
    /// Opens (or initialises) a driver rooted at a storage directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the catalog
    /// file cannot be read.
    pub fn open(root: impl AsRef<Path>) -> DriverResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let catalog_path = root.join(CATALOG_FILE);
        let catalog = if catalog_path.exists() {
            let data = fs::read(&catalog_path)?;
            serde_json::from_slice(&data)
                .map_err(|e| DriverError::catalog(format!("catalog parse failed: {e}")))?
        } else {
            Catalog::default()
        };

        Ok(Self {
            root,
            catalog: Mutex::new(catalog),
            connections: Mutex::new(HashMap::new()),
        })
    }

    /// Writes the catalog atomically (temp file + rename).
    fn save_catalog(&self, catalog: &Catalog) -> DriverResult<()> {
        let data = serde_json::to_vec_pretty(catalog)
            .map_err(|e| DriverError::catalog(format!("catalog serialize failed: {e}")))?;
        let temp = self.root.join(CATALOG_TEMP);
        fs::write(&temp, data)?;
        fs::rename(&temp, self.root.join(CATALOG_FILE))?;
        Ok(())
    }

    fn with_conn<T>(
        &self,
        db: &str,
        f: impl FnOnce(&Connection) -> DriverResult<T>,
    ) -> DriverResult<T> {
        let mut connections = self.connections.lock();
        let conn = match connections.entry(db.to_string()) {
            HashEntry::Occupied(entry) => entry.into_mut(),
            HashEntry::Vacant(entry) => {
                let file = {
                    let catalog = self.catalog.lock();
                    catalog
                        .databases
                        .get(db)
                        .map(|e| e.file.clone())
                        .ok_or_else(|| DriverError::UnknownDatabase(db.to_string()))?
                };
                let conn = Connection::open(self.root.join(file))?;
                migrate(&conn)?;
                entry.insert(conn)
            }
        };
        f(conn)
    }
}

impl StorageDriver for SqliteDriver {
    fn list_databases(&self) -> DriverResult<Vec<(String, u64)>> {
        let catalog = self.catalog.lock();
        Ok(catalog
            .databases
            .iter()
            .map(|(name, entry)| (name.clone(), entry.version))
            .collect())
    }

    fn db_exists(&self, db: &str) -> DriverResult<bool> {
        Ok(self.catalog.lock().databases.contains_key(db))
    }

    fn db_version(&self, db: &str) -> DriverResult<Option<u64>> {
        Ok(self.catalog.lock().databases.get(db).map(|e| e.version))
    }

    fn set_db_version(&self, db: &str, version: u64) -> DriverResult<()> {
        {
            let mut catalog = self.catalog.lock();
            match catalog.databases.entry(db.to_string()) {
                Entry::Occupied(mut entry) => entry.get_mut().version = version,
                Entry::Vacant(entry) => {
                    entry.insert(CatalogEntry {
                        version,
                        file: file_name_for(db),
                    });
                }
            }
            self.save_catalog(&catalog)?;
        }
        // Materialise the file and schema eagerly.
        self.with_conn(db, |_| Ok(()))
    }

    fn delete_db(&self, db: &str) -> DriverResult<()> {
        self.connections.lock().remove(db);
        let mut catalog = self.catalog.lock();
        if let Some(entry) = catalog.databases.remove(db) {
            self.save_catalog(&catalog)?;
            let path = self.root.join(entry.file);
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    fn list_stores(&self, db: &str) -> DriverResult<Vec<StoreMeta>> {
        self.with_conn(db, |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, key_path, auto_increment, current_key
                 FROM object_stores ORDER BY name",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(StoreMeta {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    key_path: row.get(2)?,
                    auto_increment: row.get::<_, i64>(3)? != 0,
                    current_key: row.get(4)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    fn create_store(
        &self,
        db: &str,
        name: &str,
        key_path: Option<&str>,
        auto_increment: bool,
    ) -> DriverResult<StoreMeta> {
        self.with_conn(db, |conn| {
            conn.execute(
                "INSERT INTO object_stores (name, key_path, auto_increment) VALUES (?, ?, ?)",
                params![name, key_path, auto_increment as i64],
            )?;
            Ok(StoreMeta {
                id: conn.last_insert_rowid(),
                name: name.to_string(),
                key_path: key_path.map(str::to_string),
                auto_increment,
                current_key: 1,
            })
        })
    }

    fn delete_store(&self, db: &str, store: StoreId) -> DriverResult<()> {
        self.with_conn(db, |conn| {
            conn.execute(
                "DELETE FROM index_entries WHERE index_id IN
                     (SELECT id FROM indexes WHERE store_id = ?)",
                params![store],
            )?;
            conn.execute("DELETE FROM indexes WHERE store_id = ?", params![store])?;
            conn.execute("DELETE FROM records WHERE store_id = ?", params![store])?;
            let affected =
                conn.execute("DELETE FROM object_stores WHERE id = ?", params![store])?;
            if affected == 0 {
                return Err(DriverError::UnknownStore(store));
            }
            Ok(())
        })
    }

    fn rename_store(&self, db: &str, store: StoreId, new_name: &str) -> DriverResult<()> {
        self.with_conn(db, |conn| {
            let affected = conn.execute(
                "UPDATE object_stores SET name = ? WHERE id = ?",
                params![new_name, store],
            )?;
            if affected == 0 {
                return Err(DriverError::UnknownStore(store));
            }
            Ok(())
        })
    }

    fn get_store_meta(&self, db: &str, store: StoreId) -> DriverResult<StoreMeta> {
        self.with_conn(db, |conn| {
            conn.query_row(
                "SELECT id, name, key_path, auto_increment, current_key
                 FROM object_stores WHERE id = ?",
                params![store],
                |row| {
                    Ok(StoreMeta {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        key_path: row.get(2)?,
                        auto_increment: row.get::<_, i64>(3)? != 0,
                        current_key: row.get(4)?,
                    })
                },
            )
            .optional()?
            .ok_or(DriverError::UnknownStore(store))
        })
    }

    fn update_current_key(&self, db: &str, store: StoreId, value: i64) -> DriverResult<()> {
        self.with_conn(db, |conn| {
            let affected = conn.execute(
                "UPDATE object_stores SET current_key = ? WHERE id = ?",
                params![value, store],
            )?;
            if affected == 0 {
                return Err(DriverError::UnknownStore(store));
            }
            Ok(())
        })
    }

    fn list_indexes(&self, db: &str, store: StoreId) -> DriverResult<Vec<IndexMeta>> {
        self.with_conn(db, |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, store_id, name, key_path, unique_flag, multi_entry
                 FROM indexes WHERE store_id = ? ORDER BY name",
            )?;
            let rows = stmt.query_map(params![store], |row| {
                Ok(IndexMeta {
                    id: row.get(0)?,
                    store_id: row.get(1)?,
                    name: row.get(2)?,
                    key_path: row.get(3)?,
                    unique: row.get::<_, i64>(4)? != 0,
                    multi_entry: row.get::<_, i64>(5)? != 0,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
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
        self.with_conn(db, |conn| {
            conn.execute(
                "INSERT INTO indexes (store_id, name, key_path, unique_flag, multi_entry)
                 VALUES (?, ?, ?, ?, ?)",
                params![store, name, key_path, unique as i64, multi_entry as i64],
            )?;
            Ok(IndexMeta {
                id: conn.last_insert_rowid(),
                store_id: store,
                name: name.to_string(),
                key_path: key_path.to_string(),
                unique,
                multi_entry,
            })
        })
    }

    fn delete_index(&self, db: &str, index: IndexId) -> DriverResult<()> {
        self.with_conn(db, |conn| {
            conn.execute(
                "DELETE FROM index_entries WHERE index_id = ?",
                params![index],
            )?;
            let affected = conn.execute("DELETE FROM indexes WHERE id = ?", params![index])?;
            if affected == 0 {
                return Err(DriverError::UnknownIndex(index));
            }
            Ok(())
        })
    }

    fn rename_index(&self, db: &str, index: IndexId, new_name: &str) -> DriverResult<()> {
        self.with_conn(db, |conn| {
            let affected = conn.execute(
                "UPDATE indexes SET name = ? WHERE id = ?",
                params![new_name, index],
            )?;
            if affected == 0 {
                return Err(DriverError::UnknownIndex(index));
            }
            Ok(())
        })
    }

    fn get_index_meta(&self, db: &str, index: IndexId) -> DriverResult<IndexMeta> {
        self.with_conn(db, |conn| {
            conn.query_row(
                "SELECT id, store_id, name, key_path, unique_flag, multi_entry
                 FROM indexes WHERE id = ?",
                params![index],
                |row| {
                    Ok(IndexMeta {
                        id: row.get(0)?,
                        store_id: row.get(1)?,
                        name: row.get(2)?,
                        key_path: row.get(3)?,
                        unique: row.get::<_, i64>(4)? != 0,
                        multi_entry: row.get::<_, i64>(5)? != 0,
                    })
                },
            )
            .optional()?
            .ok_or(DriverError::UnknownIndex(index))
        })
    }

    fn put_record(&self, db: &str, store: StoreId, key: &[u8], value: &[u8]) -> DriverResult<()> {
        self.with_conn(db, |conn| {
            conn.execute(
                "INSERT INTO records (store_id, key, value) VALUES (?, ?, ?)
                 ON CONFLICT (store_id, key) DO UPDATE SET value = excluded.value",
                params![store, key, value],
            )?;
            Ok(())
        })
    }

    fn get_record(&self, db: &str, store: StoreId, key: &[u8]) -> DriverResult<Option<Vec<u8>>> {
        self.with_conn(db, |conn| {
            Ok(conn
                .query_row(
                    "SELECT value FROM records WHERE store_id = ? AND key = ?",
                    params![store, key],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }

    fn delete_record(&self, db: &str, store: StoreId, key: &[u8]) -> DriverResult<bool> {
        self.with_conn(db, |conn| {
            let affected = conn.execute(
                "DELETE FROM records WHERE store_id = ? AND key = ?",
                params![store, key],
            )?;
            Ok(affected > 0)
        })
    }

    fn clear_records(&self, db: &str, store: StoreId) -> DriverResult<()> {
        self.with_conn(db, |conn| {
            conn.execute(
                "DELETE FROM index_entries WHERE index_id IN
                     (SELECT id FROM indexes WHERE store_id = ?)",
                params![store],
            )?;
            conn.execute("DELETE FROM records WHERE store_id = ?", params![store])?;
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
        self.with_conn(db, |conn| {
            let mut sql = String::from("SELECT key, value FROM records WHERE store_id = ?");
            let mut sql_params = vec![SqlValue::Integer(store)];
            push_range_clause(&mut sql, &mut sql_params, "key", range);
            sql.push_str(&format!(" ORDER BY key {}", order_keyword(direction)));
            push_limit(&mut sql, &mut sql_params, limit);

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(sql_params), |row| {
                Ok(RawRecord {
                    key: row.get(0)?,
                    value: row.get(1)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    fn delete_in_range(&self, db: &str, store: StoreId, range: &ByteRange) -> DriverResult<()> {
        self.with_conn(db, |conn| {
            let mut sql = String::from("DELETE FROM records WHERE store_id = ?");
            let mut sql_params = vec![SqlValue::Integer(store)];
            push_range_clause(&mut sql, &mut sql_params, "key", range);
            conn.execute(&sql, params_from_iter(sql_params))?;
            Ok(())
        })
    }

    fn count_in_range(&self, db: &str, store: StoreId, range: &ByteRange) -> DriverResult<u64> {
        self.with_conn(db, |conn| {
            let mut sql = String::from("SELECT COUNT(*) FROM records WHERE store_id = ?");
            let mut sql_params = vec![SqlValue::Integer(store)];
            push_range_clause(&mut sql, &mut sql_params, "key", range);
            let count: i64 =
                conn.query_row(&sql, params_from_iter(sql_params), |row| row.get(0))?;
            Ok(count as u64)
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
        self.with_conn(db, |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO index_entries (index_id, key, primary_key)
                 VALUES (?, ?, ?)",
                params![index, key, primary_key],
            )?;
            Ok(())
        })
    }

    fn delete_entries_for_primary(
        &self,
        db: &str,
        index: IndexId,
        primary_key: &[u8],
    ) -> DriverResult<()> {
        self.with_conn(db, |conn| {
            conn.execute(
                "DELETE FROM index_entries WHERE index_id = ? AND primary_key = ?",
                params![index, primary_key],
            )?;
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
        self.with_conn(db, |conn| {
            let found: Option<i64> = match exclude_primary {
                Some(primary) => conn
                    .query_row(
                        "SELECT 1 FROM index_entries
                         WHERE index_id = ? AND key = ? AND primary_key <> ? LIMIT 1",
                        params![index, key, primary],
                        |row| row.get(0),
                    )
                    .optional()?,
                None => conn
                    .query_row(
                        "SELECT 1 FROM index_entries
                         WHERE index_id = ? AND key = ? LIMIT 1",
                        params![index, key],
                        |row| row.get(0),
                    )
                    .optional()?,
            };
            Ok(found.is_some())
        })
    }

    fn get_by_index_key(
        &self,
        db: &str,
        store: StoreId,
        index: IndexId,
        key: &[u8],
    ) -> DriverResult<Option<RawIndexRecord>> {
        self.with_conn(db, |conn| {
            Ok(conn
                .query_row(
                    "SELECT e.key, e.primary_key, r.value
                     FROM index_entries e
                     JOIN records r ON r.store_id = ? AND r.key = e.primary_key
                     WHERE e.index_id = ? AND e.key = ?
                     ORDER BY e.primary_key ASC LIMIT 1",
                    params![store, index, key],
                    |row| {
                        Ok(RawIndexRecord {
                            key: row.get(0)?,
                            primary_key: row.get(1)?,
                            value: row.get(2)?,
                        })
                    },
                )
                .optional()?)
        })
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
        self.with_conn(db, |conn| {
            let mut sql = String::from("SELECT COUNT(*) FROM index_entries WHERE index_id = ?");
            let mut sql_params = vec![SqlValue::Integer(index)];
            push_range_clause(&mut sql, &mut sql_params, "key", range);
            let count: i64 =
                conn.query_row(&sql, params_from_iter(sql_params), |row| row.get(0))?;
            Ok(count as u64)
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
        self.with_conn(db, |conn| {
            let mut sql =
                String::from("SELECT key, primary_key FROM index_entries WHERE index_id = ?");
            let mut sql_params = vec![SqlValue::Integer(index)];
            push_range_clause(&mut sql, &mut sql_params, "key", range);

            if let Some((after_key, after_primary)) = after {
                let op = match direction {
                    ScanDirection::Forward => ">",
                    ScanDirection::Reverse => "<",
                };
                sql.push_str(&format!(
                    " AND (key {op} ? OR (key = ? AND primary_key {op} ?))"
                ));
                sql_params.push(SqlValue::Blob(after_key.to_vec()));
                sql_params.push(SqlValue::Blob(after_key.to_vec()));
                sql_params.push(SqlValue::Blob(after_primary.to_vec()));
            }

            let order = order_keyword(direction);
            sql.push_str(&format!(" ORDER BY key {order}, primary_key {order}"));
            push_limit(&mut sql, &mut sql_params, limit);

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(sql_params), |row| {
                Ok(RawIndexEntry {
                    key: row.get(0)?,
                    primary_key: row.get(1)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
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
        self.with_conn(db, |conn| {
            let mut sql = String::from(
                "SELECT e.key, e.primary_key, r.value
                 FROM index_entries e
                 JOIN records r ON r.store_id = ? AND r.key = e.primary_key
                 WHERE e.index_id = ?",
            );
            let mut sql_params = vec![SqlValue::Integer(store), SqlValue::Integer(index)];
            push_range_clause(&mut sql, &mut sql_params, "e.key", range);
            let order = order_keyword(direction);
            sql.push_str(&format!(" ORDER BY e.key {order}, e.primary_key {order}"));
            push_limit(&mut sql, &mut sql_params, limit);

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(sql_params), |row| {
                Ok(RawIndexRecord {
                    key: row.get(0)?,
                    primary_key: row.get(1)?,
                    value: row.get(2)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    fn begin_savepoint(&self, db: &str, name: &str) -> DriverResult<()> {
        validate_savepoint_name(name)?;
        self.with_conn(db, |conn| {
            conn.execute_batch(&format!("SAVEPOINT {name}"))?;
            Ok(())
        })
    }

    fn release_savepoint(&self, db: &str, name: &str) -> DriverResult<()> {
        validate_savepoint_name(name)?;
        self.with_conn(db, |conn| {
            conn.execute_batch(&format!("RELEASE SAVEPOINT {name}"))?;
            Ok(())
        })
    }

    fn rollback_savepoint(&self, db: &str, name: &str) -> DriverResult<()> {
        validate_savepoint_name(name)?;
        self.with_conn(db, |conn| {
            conn.execute_batch(&format!("ROLLBACK TO SAVEPOINT {name}"))?;
            Ok(())
        })
    }
}
