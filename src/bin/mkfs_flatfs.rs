use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use flatfs::{Disk, FLATFS_NUM_BLOCKS, FLATFS_NUM_INODES};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let mut args = env::args().skip(1);
    let image = args
        .next()
        .map(PathBuf::from)
        .context("Usage: mkfs.flatfs <image>")?;

    if args.next().is_some() {
        return Err(anyhow!("Usage: mkfs.flatfs <image> (exactly one argument)"));
    }

    Disk::format(&image).with_context(|| format!("Could not create image {:?}", image))?;

    println!(
        "mkfs.flatfs: volume {} created with {} blocks, {} inode slots, {} data blocks.",
        image.display(),
        FLATFS_NUM_BLOCKS,
        FLATFS_NUM_INODES,
        FLATFS_NUM_BLOCKS - 1
    );

    Ok(())
}
