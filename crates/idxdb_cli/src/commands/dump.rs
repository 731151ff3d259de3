//! `dump` command: decode and print a store's records.

use crate::commands::format_value;
use idxdb_codec::{decode_key, deserialize_value};
use idxdb_storage::{ByteRange, ScanDirection, SqliteDriver, StorageDriver};
use std::path::Path;

pub fn run(
    path: &Path,
    db: &str,
    store: &str,
    limit: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let driver = SqliteDriver::open(path)?;
    driver
        .db_version(db)?
        .ok_or_else(|| format!("database \"{db}\" does not exist"))?;

    let meta = driver
        .list_stores(db)?
        .into_iter()
        .find(|meta| meta.name == store)
        .ok_or_else(|| format!("object store \"{store}\" does not exist"))?;

    let records = driver.get_in_range(
        db,
        meta.id,
        &ByteRange::unbounded(),
        ScanDirection::Forward,
        limit,
    )?;

    for record in &records {
        let key = decode_key(&record.key)?;
        let value = deserialize_value(&record.value)?;
        println!("{key:?} => {}", format_value(&value));
    }
    println!("{} record(s)", records.len());
    Ok(())
}
