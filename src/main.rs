use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use ctgwatch::commands::{self, parse_time, Command};
use ctgwatch::Settings;

#[derive(Parser, Debug)]
#[command(name = "ctgwatch")]
#[command(about = "Fetal-monitoring signal-to-alert pipeline")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// State file (overrides `state_file` from the configuration)
    #[arg(short, long, global = true)]
    state: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Evaluate as of this time instead of the clock (RFC 3339 or YYYYMMDDhhmmss)
    #[arg(long, global = true, value_parser = parse_time)]
    now: Option<DateTime<Utc>>,

    #[command(subcommand)]
    command: Command,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::load(args.config.as_deref())?;
    let state_path = args.state.unwrap_or_else(|| settings.state_file.clone());
    let now = args.now.unwrap_or_else(Utc::now);
    debug!(state = %state_path.display(), now = %now, "Starting");

    commands::run(args.command, &settings, &state_path, now)
}
