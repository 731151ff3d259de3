//! IdxDB CLI
//!
//! Read-only inspection tools for an IdxDB storage directory.
//!
//! # Commands
//!
//! - `databases` - List databases and their versions
//! - `stores` - Show a database's object store and index catalog
//! - `dump` - Decode and print a store's records
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// IdxDB command-line inspection tools.
#[derive(Parser)]
#[command(name = "idxdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the storage directory
    #[arg(global = true, short, long, default_value = "./idxdb_data")]
    path: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List databases and their versions
    Databases,

    /// Show a database's object store and index catalog
    Stores {
        /// Database name
        #[arg(long)]
        db: String,
    },

    /// Decode and print a store's records
    Dump {
        /// Database name
        #[arg(long)]
        db: String,

        /// Object store name
        #[arg(long)]
        store: String,

        /// Maximum number of records to print
        #[arg(short, long)]
        limit: Option<u64>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Databases => commands::databases::run(&cli.path)?,
        Commands::Stores { db } => commands::stores::run(&cli.path, &db)?,
        Commands::Dump { db, store, limit } => {
            commands::dump::run(&cli.path, &db, &store, limit)?;
        }
        Commands::Version => {
            println!("IdxDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("IdxDB Core v{}", idxdb_core::VERSION);
        }
    }

    Ok(())
}
