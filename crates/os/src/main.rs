use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use kernel::Os;
use memory::MemoryManager;
use types::Config;

/// A tiny virtual operating system: loads each program file into its own
/// process and runs them all under a priority scheduler with demand-paged
/// virtual memory.
#[derive(Parser, Debug)]
#[command(name = "os", version, about, long_about = None)]
struct Args {
    /// Bytes of virtual memory for the whole system
    virtual_memory: u32,

    /// Program files; each becomes one process
    #[arg(required = true)]
    programs: Vec<PathBuf>,

    /// JSON configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    // Swap files live in the working directory; boot wipes stale ones.
    let swap_dir = std::env::current_dir().context("no working directory for swap files")?;
    let memory = MemoryManager::new(args.virtual_memory, &config, swap_dir);
    let mut os = Os::new(config, memory);

    for path in &args.programs {
        if !path.exists() {
            eprintln!("skipping missing program file {}", path.display());
            continue;
        }
        let program = loader::load_file(path)?;
        let pid = os
            .create_process(&program, os.config.process_memory)
            .with_context(|| format!("creating process for {}", program.name))?;
        println!("loaded {} as pid {}", program.name, pid);
    }

    os.run();
    Ok(())
}
