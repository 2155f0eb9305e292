use std::env;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use colored::*;
use flatfs::fsck::{self, Inconsistency};
use flatfs::FLATFS_BLOCK_SIZE;

fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let image = env::args()
        .nth(1)
        .map(PathBuf::from)
        .context("Usage: fsck.flatfs <image>")?;

    let mut raw = [0u8; FLATFS_BLOCK_SIZE];
    File::open(&image)
        .and_then(|mut f| f.read_exact(&mut raw))
        .with_context(|| format!("Could not read the superblock of {:?}", image))?;

    let rep = fsck::run_fsck(&raw);

    println!("\n{}", " FLATFS FILESYSTEM CHECK ".on_blue().bold());
    println!("{}", "──────────────────────────────────────────".blue());
    println!("  {}", image.display());

    println!("\n{}", "Blocks".bold().underline());
    if rep.blocks_ok {
        println!("  {} Blocks OK", "✓".green());
    } else {
        println!("  {} Block errors", "✗".red());
    }

    println!("\n{}", "Inodes".bold().underline());
    if rep.inodes_ok {
        println!("  {} Inodes OK", "✓".green());
    } else {
        println!("  {} Inode errors", "✗".red());
    }

    println!("\n{}", "Checks".bold().underline());
    for check in Inconsistency::ALL {
        let failed = rep.errors.iter().any(|f| f.check == check);
        let mark = if failed { "✗".red() } else { "✓".green() };
        println!("  {} {} {}", mark, check.code(), check);
    }

    println!("\n{}", "Findings".bold().underline());
    if rep.errors.is_empty() {
        println!("  {} None", "✓".green());
    } else {
        for err in &rep.errors {
            println!("  {} {}", "•".red(), err.to_string().red());
        }
    }

    println!("\n{}", "Summary".bold().underline());
    match rep.first_failure() {
        None => {
            println!("{} Volume is clean.\n", "✓ OK".green().bold());
            Ok(ExitCode::SUCCESS)
        }
        Some(first) => {
            println!(
                "{} {} findings; mount would fail with error code {}.\n",
                "✗ Inconsistent:".red().bold(),
                rep.errors.len().to_string().yellow(),
                first.code()
            );
            Ok(ExitCode::from(first.code()))
        }
    }
}
