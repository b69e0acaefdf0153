//! LSVD Volume Creation
//!
//! Writes the backend superblock object and formats the journal device.

use clap::Parser;
use lsvd::{Config, Volume};
use tracing_subscriber::{fmt, EnvFilter};

/// LSVD volume creation
#[derive(Parser, Debug)]
#[command(name = "lsvd-mkdisk")]
#[command(about = "Create a new LSVD volume")]
#[command(version)]
struct Args {
    /// Data directory (journal file and objects/)
    #[arg(short, long, default_value = "./lsvd_data")]
    data_dir: String,

    /// Journal device or file; defaults to <data-dir>/journal.img
    #[arg(short, long)]
    journal: Option<String>,

    /// Volume name, used as the object name prefix
    #[arg(short, long, default_value = "vol")]
    name: String,

    /// Volume size in MB
    #[arg(short, long, default_value = "10240")]
    size_mb: u64,

    /// Journal size in MB
    #[arg(long, default_value = "256")]
    journal_mb: u32,

    /// Minimum checkpoint slot size in 4 KiB blocks
    #[arg(long, default_value = "64")]
    checkpoint_blocks: u32,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lsvd=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("LSVD mkdisk v{}", lsvd::VERSION);
    tracing::info!("Data directory: {}", args.data_dir);

    let mut builder = Config::builder()
        .data_dir(&args.data_dir)
        .volume_name(&args.name)
        .volume_size(args.size_mb * 1024 * 1024)
        .journal_blocks(args.journal_mb * 256)
        .checkpoint_blocks(args.checkpoint_blocks)
        .background_flush(false);
    if let Some(journal) = &args.journal {
        builder = builder.journal_path(journal);
    }
    let config = builder.build();

    let volume = match Volume::create(config) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("Failed to create volume: {}", e);
            std::process::exit(1);
        }
    };

    let sb = volume.superblock();
    tracing::info!(
        "Created volume '{}': {} bytes, journal ring [{}, {})",
        args.name,
        volume.size(),
        sb.base,
        sb.limit
    );

    if let Err(e) = volume.close() {
        tracing::error!("Failed to close volume: {}", e);
        std::process::exit(1);
    }
}
