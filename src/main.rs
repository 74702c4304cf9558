mod cli;

use std::{env, io, process};

use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use tlx::{config::Config, job::JobStore};

use cli::Cli;

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            process::exit(1);
        }
    };

    let (blobs, jobs) = match open_stores(&config) {
        Ok(stores) => stores,
        Err(e) => {
            eprintln!("Failed to initialize storage: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = cli::run(cli, &config, blobs.as_ref(), &jobs) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn open_stores(config: &Config) -> Result<(Box<dyn tlx::blob::BlobStore>, JobStore), String> {
    let blobs = config.open_blob_store()?;
    let root = config.storage_root()?;
    let jobs = JobStore::new(&root).map_err(|e| format!("{}: {e}", root.display()))?;
    Ok((blobs, jobs))
}

/// Logs go to stderr. `-v` flags win over `TLX_LOG`; the default is `warn`.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => env::var("TLX_LOG")
            .ok()
            .and_then(|v| v.parse::<Level>().ok())
            .unwrap_or(Level::WARN),
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install logger: {e}");
    }
}
