//! `databases` command: list databases and versions.

use idxdb_storage::{SqliteDriver, StorageDriver};
use std::path::Path;

pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let driver = SqliteDriver::open(path)?;
    let databases = driver.list_databases()?;

    if databases.is_empty() {
        println!("no databases in {}", path.display());
        return Ok(());
    }

    println!("{:<40} {:>10}", "NAME", "VERSION");
    for (name, version) in databases {
        println!("{name:<40} {version:>10}");
    }
    Ok(())
}
