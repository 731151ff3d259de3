//! `stores` command: show a database's catalog.

use idxdb_storage::{ByteRange, SqliteDriver, StorageDriver};
use std::path::Path;

pub fn run(path: &Path, db: &str) -> Result<(), Box<dyn std::error::Error>> {
    let driver = SqliteDriver::open(path)?;
    let version = driver
        .db_version(db)?
        .ok_or_else(|| format!("database \"{db}\" does not exist"))?;

    println!("database {db:?} (version {version})");
    for store in driver.list_stores(db)? {
        let records = driver.count_in_range(db, store.id, &ByteRange::unbounded())?;
        let key_path = store.key_path.as_deref().unwrap_or("(out-of-line)");
        let generator = if store.auto_increment {
            format!(", generator at {}", store.current_key)
        } else {
            String::new()
        };
        println!("  store {:?}: key path {key_path}, {records} record(s){generator}", store.name);

        for index in driver.list_indexes(db, store.id)? {
            let entries = driver.count_index(db, index.id, &ByteRange::unbounded())?;
            let mut flags = Vec::new();
            if index.unique {
                flags.push("unique");
            }
            if index.multi_entry {
                flags.push("multi-entry");
            }
            let flags = if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            };
            println!(
                "    index {:?}: key path {}, {entries} entries{flags}",
                index.name, index.key_path
            );
        }
    }
    Ok(())
}
