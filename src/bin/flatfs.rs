// src/bin/flatfs.rs
use std::env;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use flatfs::{script, FlatFs};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let mut args = env::args().skip(1);
    let script_path = args
        .next()
        .map(PathBuf::from)
        .context("Usage: flatfs <script>")?;

    if args.next().is_some() {
        return Err(anyhow!("Usage: flatfs <script> (exactly one argument)"));
    }

    let file = File::open(&script_path)
        .with_context(|| format!("Could not open input file {:?}", script_path))?;

    let mut fs = FlatFs::new();
    let stdout = io::stdout();
    let stderr = io::stderr();
    script::run_script(
        &mut fs,
        &script_path.display().to_string(),
        BufReader::new(file),
        &mut stdout.lock(),
        &mut stderr.lock(),
    )
    .context("Failed while running the script")?;

    Ok(())
}
