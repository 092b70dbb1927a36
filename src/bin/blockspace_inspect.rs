//! Blockspace inspector
//!
//! Recovers an allocator from a saved bitmap image and reports its state

use anyhow::Context;
use blockspace::{BlockAllocator, BlockSpaceConfig, DiskBitmap, FixedBlockAllocator};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "blockspace-inspect")]
#[command(about = "Recover a block allocator from a bitmap image and print its status")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short = 'c', long)]
    config: PathBuf,

    /// Path to the saved allocation bitmap image
    #[arg(short = 'b', long)]
    bitmap: PathBuf,

    /// Print statistics as JSON instead of the status line
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = BlockSpaceConfig::from_file(&args.config)
        .with_context(|| format!("loading config {:?}", args.config))?;
    info!(
        total_blocks = config.allocator.total_blocks,
        chunk = config.allocator.chunk_num,
        "Loaded configuration"
    );

    let bitmap = DiskBitmap::load(&args.bitmap)
        .with_context(|| format!("reading bitmap image {:?}", args.bitmap))?;
    info!(bits = bitmap.count_set(), "Bitmap image loaded");

    let allocator = FixedBlockAllocator::recover(config.allocator, Arc::new(bitmap))
        .context("recovering allocator")?;

    if args.json {
        println!("{}", allocator.stats().to_json()?);
    } else {
        println!("{}", allocator.status());
    }
    Ok(())
}
