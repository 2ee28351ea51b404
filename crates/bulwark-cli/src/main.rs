use anyhow::{Context, Result};
use bulwark_core::{patch_map, MapPaths, PatchOptions};
use clap::{CommandFactory, Parser, ValueEnum};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "BSP Entity Encryption Tool",
    after_help = "Warning: this tool modifies the map file directly."
)]
struct Args {
    /// Map to patch in place, e.g. maps/ctf_2fort.bsp
    map: Option<PathBuf>,

    /// Copy the map to <MAP>.bak before modifying it
    #[arg(long)]
    backup: bool,

    /// Log verbosity, overridden by RUST_LOG
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

fn init_logging(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::from(level).as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();

    // No map is not an error: print usage and exit cleanly.
    let Some(map) = args.map else {
        Args::command().print_help()?;
        return Ok(());
    };

    init_logging(args.log_level);

    let paths = MapPaths::from_map_path(&map)?;
    let options = PatchOptions {
        backup: args.backup,
    };
    let report = patch_map(&paths, &options)
        .with_context(|| format!("Failed to patch {}", paths.container.display()))?;

    info!(
        worldspawn = report.boundary,
        moved = report.remainder_len,
        padding = report.padding_len,
        "patched {}",
        paths.container.display()
    );
    println!("Plaintext entities: {}", paths.plaintext.display());
    println!("Encrypted entities: {} ({} bytes)", paths.ciphertext.display(), report.ciphertext_len);
    if let Some(backup) = &report.backup {
        println!("Backup: {}", backup.display());
    }
    Ok(())
}
