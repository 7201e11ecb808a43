//! lstore CLI
//!
//! Operates on a file-backed log region, the same layout a device keeps in
//! its flash partition.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use lstore::config::{DEFAULT_FILE_SIZE, DEFAULT_PAGE_SIZE};
use lstore::{DeviceConfig, FileFlash, InitError, LogStore, ReclaimError, RecordId, Target};
use tracing_subscriber::{fmt, EnvFilter};

/// lstore CLI
#[derive(Parser, Debug)]
#[command(name = "lstore")]
#[command(about = "Inspect and modify a flash log region file")]
#[command(version)]
struct Args {
    /// Region file (provisioned fully erased if missing)
    #[arg(short, long, default_value = "./lstore.bin")]
    file: PathBuf,

    /// Region size in bytes
    #[arg(short, long, default_value_t = DEFAULT_FILE_SIZE)]
    size: u64,

    /// Page size in bytes
    #[arg(short, long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: usize,

    /// Maintain the fast-forward index
    #[arg(long)]
    fast_forward: bool,

    /// Device profile to run with
    #[arg(long, value_enum, default_value_t = TargetArg::Native)]
    target: TargetArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TargetArg {
    Native,
    Web,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Erase the whole region
    Format,

    /// Append one record per argument
    Append {
        /// Record payloads (UTF-8)
        #[arg(required = true)]
        records: Vec<String>,
    },

    /// Print a record by id
    Read {
        /// The record id
        id: u64,
    },

    /// Print every stored record in order
    Cat {
        /// Start at this id instead of the oldest record
        #[arg(long)]
        from: Option<u64>,
    },

    /// Erase full pages; with --through, only pages consumed up to that id
    Reclaim {
        /// Last consumed record id
        #[arg(long)]
        through: Option<u64>,
    },

    /// Print region statistics
    Stat,
}

fn main() {
    // Diagnostics go to stderr so record output stays clean
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,lstore=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> lstore::Result<()> {
    let target = match args.target {
        TargetArg::Native => Target::Native,
        TargetArg::Web => Target::WebSandbox,
    };

    let mut device = DeviceConfig::for_target(target);
    device.lstore.file_size = args.size;
    device.lstore.page_size = args.page_size;
    device.lstore.fast_forward = args.fast_forward;
    let config = device.store_config();

    // Don't provision a backing file for a build that has no store
    if !config.enabled {
        return Err(InitError::Disabled.into());
    }

    tracing::debug!(file = %args.file.display(), ?config, "Opening region");
    let mut flash = FileFlash::open(&args.file, config.file_size)?;

    match args.command {
        Commands::Format => {
            LogStore::format(&mut flash, &config)?;
            println!(
                "formatted {} ({} pages of {} bytes)",
                args.file.display(),
                config.file_size / config.page_size as u64,
                config.page_size
            );
            Ok(())
        }
        command => {
            let store = LogStore::open(flash, config)?;
            execute(&store, command)
        }
    }
}

fn execute(store: &LogStore<FileFlash>, command: Commands) -> lstore::Result<()> {
    match command {
        Commands::Format => unreachable!("format runs before the store is opened"),
        Commands::Append { records } => {
            for record in records {
                let id = store.append(record.as_bytes())?;
                println!("{}", id.seq());
            }
            Ok(())
        }
        Commands::Read { id } => {
            let payload = store.read(RecordId(id))?;
            println!("{}", String::from_utf8_lossy(&payload));
            Ok(())
        }
        Commands::Cat { from } => {
            let iter = match from {
                Some(id) => store.iterate_from(RecordId(id)),
                None => store.iterate(),
            };
            for item in iter {
                match item {
                    Ok((id, payload)) => {
                        println!("{}\t{}", id.seq(), String::from_utf8_lossy(&payload))
                    }
                    Err(e) => println!("!\t{}", e),
                }
            }
            Ok(())
        }
        Commands::Reclaim { through } => {
            let consumer = through.map(|id| {
                let consumer = store.register_consumer();
                consumer.consume(RecordId(id));
                consumer
            });

            match store.reclaim() {
                Ok(freed) => println!("freed {} pages", freed),
                Err(ReclaimError::NothingToReclaim) => println!("nothing to reclaim"),
                Err(e) => return Err(e.into()),
            }

            drop(consumer);
            Ok(())
        }
        Commands::Stat => {
            let stats = store.stats();
            let report = store.recovery_report();
            println!("page size:      {}", stats.page_size);
            println!("pages:          {}", stats.page_count);
            println!("  erased:       {}", stats.erased_pages);
            println!("  partial:      {}", stats.partial_pages);
            println!("  full:         {}", stats.full_pages);
            println!("records:        {}", stats.records);
            println!("bytes used:     {}", stats.bytes_used);
            println!("oldest id:      {}", stats.oldest_seq);
            println!("next id:        {}", stats.next_seq);
            println!("cursor:         page {} offset {}", stats.cursor.page, stats.cursor.offset);
            println!("corrupt:        {}", report.records_corrupt);
            println!("torn pages:     {}", report.torn_pages);
            if let Some(indexed) = stats.indexed_records {
                println!("indexed:        {}", indexed);
            }
            Ok(())
        }
    }
}
