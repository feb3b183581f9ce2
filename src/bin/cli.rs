//! nvstore CLI
//!
//! Inspect and modify an nvstore flash image kept in a file.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use nvstore::{Config, FileFlash, Nvs, NvsError, StorageParameters};
use tracing_subscriber::{fmt, EnvFilter};

/// nvstore CLI
#[derive(Parser, Debug)]
#[command(name = "nvstore-cli")]
#[command(about = "Operate on an nvstore flash image")]
#[command(version)]
struct Args {
    /// Flash image file, created erased when missing
    #[arg(short, long, default_value = "nvstore.img")]
    image: PathBuf,

    /// Sector size in bytes
    #[arg(long, default_value = "4096")]
    sector_size: u32,

    /// Number of sectors
    #[arg(long, default_value = "3")]
    sector_count: u16,

    /// Write block size of the emulated flash
    #[arg(long, default_value = "4")]
    write_block_size: usize,

    /// Erase value of the emulated flash
    #[arg(long, default_value = "255")]
    erase_value: u8,

    /// Erase page size of the emulated flash
    #[arg(long, default_value = "4096")]
    page_size: usize,

    /// Lookup cache slots (0 disables the cache)
    #[arg(long, default_value = "128")]
    cache: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Erase every sector
    Clear,

    /// Store a value
    Write {
        /// Entry id
        id: u16,

        /// The value to store
        value: String,
    },

    /// Print the newest value
    Read {
        /// Entry id
        id: u16,
    },

    /// Print an older value (0 = newest)
    History {
        /// Entry id
        id: u16,

        /// Versions to go back
        cnt: u16,
    },

    /// Delete a value
    Delete {
        /// Entry id
        id: u16,
    },

    /// Print the free space
    Free,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,nvstore=debug"));

    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => {}
        Err(NvsError::NotFound) => {
            println!("not found");
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    }
}

fn run(args: Args) -> nvstore::Result<()> {
    let config = Config::builder()
        .sector_size(args.sector_size)
        .sector_count(args.sector_count)
        .lookup_cache_size(args.cache)
        .build();
    let params = StorageParameters::new(args.write_block_size, args.erase_value, args.page_size);

    tracing::debug!("Image: {}", args.image.display());
    let flash = FileFlash::open_or_create(&args.image, config.region_size(), params)?;
    let nvs = Nvs::new(config, flash)?;

    if let Commands::Clear = args.command {
        return nvs.clear();
    }
    nvs.mount()?;

    match args.command {
        Commands::Clear => {}
        Commands::Write { id, value } => {
            let written = nvs.write(id, value.as_bytes())?;
            if written == 0 {
                println!("unchanged");
            } else {
                println!("wrote {} bytes", written);
            }
        }
        Commands::Read { id } => {
            let value = nvs.read_to_vec(id)?;
            println!("{}", String::from_utf8_lossy(&value));
        }
        Commands::History { id, cnt } => {
            let mut buf = vec![0u8; nvs.max_value_len()];
            let len = nvs.read_history(id, &mut buf, cnt)?;
            println!("{}", String::from_utf8_lossy(&buf[..len]));
        }
        Commands::Delete { id } => nvs.delete(id)?,
        Commands::Free => println!("{} bytes free", nvs.calc_free_space()?),
    }
    Ok(())
}
