//! StrataKV CLI
//!
//! Command-line interface for a local StrataKV store.

use clap::{Parser, Subcommand};
use stratakv::{Config, Engine};
use tracing_subscriber::{fmt, EnvFilter};

/// StrataKV CLI
#[derive(Parser, Debug)]
#[command(name = "strata-cli")]
#[command(about = "CLI for the StrataKV embedded key-value store")]
#[command(version)]
struct Args {
    /// Data directory of the store
    #[arg(short, long, default_value = "./stratakv_data")]
    data_dir: String,

    /// MemTable size limit in MB before flush
    #[arg(short = 'm', long, default_value = "4")]
    memtable_mb: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// List key-value pairs in key order
    Scan {
        /// Start key (inclusive)
        #[arg(short, long)]
        start: Option<String>,

        /// End key (exclusive)
        #[arg(short, long)]
        end: Option<String>,
    },

    /// Flush the memtable to disk
    Flush,

    /// Run compaction until every level is within its target
    Compact,

    /// Show the store's shape (memtable, levels, sequence)
    Stats,

    /// Delete the store's files from disk
    Destroy,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,stratakv=info"));
    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> stratakv::Result<()> {
    if let Commands::Destroy = args.command {
        Engine::destroy(std::path::Path::new(&args.data_dir))?;
        println!("destroyed {}", args.data_dir);
        return Ok(());
    }

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .memtable_size_limit(args.memtable_mb * 1024 * 1024)
        .build();
    let engine = Engine::open(config)?;

    match args.command {
        Commands::Get { key } => match engine.get(key.as_bytes())? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("(not found)"),
        },
        Commands::Set { key, value } => {
            engine.put(key, value)?;
            println!("OK");
        }
        Commands::Del { key } => {
            engine.delete(key)?;
            println!("OK");
        }
        Commands::Scan { start, end } => {
            let iter = engine.iter(start.as_deref().map(str::as_bytes), end.as_deref().map(str::as_bytes))?;
            let mut count = 0usize;
            for pair in iter {
                let (key, value) = pair?;
                println!(
                    "{} = {}",
                    String::from_utf8_lossy(&key),
                    String::from_utf8_lossy(&value)
                );
                count += 1;
            }
            println!("({} keys)", count);
        }
        Commands::Flush => {
            engine.flush()?;
            println!("OK");
        }
        Commands::Compact => {
            engine.compact()?;
            println!("OK");
        }
        Commands::Stats => {
            let stats = engine.stats();
            println!("memtable:      {} bytes", stats.memtable_bytes);
            println!("frozen:        {}", stats.frozen_memtable);
            println!("last sequence: {}", stats.last_sequence);
            for (level, l) in stats.levels.iter().enumerate() {
                println!("L{}: {:>3} tables, {:>12} bytes", level, l.tables, l.bytes);
            }
        }
        Commands::Destroy => unreachable!("handled before opening the engine"),
    }

    engine.close()
}
