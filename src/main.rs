use anyhow::{Context as _, Result};
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use estate_sync::cli::args::Cli;
use estate_sync::cli::commands::{self, Context};
use estate_sync::config::{Config, Paths};

fn main() {
    if let Err(e) = run() {
        eprintln!("{}: {:#}", "error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    init_tracing(&config.logging.level);

    let db_path = match cli.db {
        Some(path) => path,
        None => {
            let paths = Paths::new()?;
            paths.ensure_dirs()?;
            paths.database
        }
    };

    let ctx = Context::open(config, &db_path, cli.output)
        .with_context(|| format!("cannot open queue at {}", db_path.display()))?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let output = runtime.block_on(commands::execute(&ctx, cli.command))?;

    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

/// Log to stderr; `RUST_LOG` overrides the configured level.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
