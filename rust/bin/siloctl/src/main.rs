//! `siloctl`: inspect and edit the key-value silos of the youppi bot.
//!
//! Usage:
//!   siloctl --configuration <path> <command>
//!
//! The configuration file is the bot's own: the same storage settings pick
//! the same backend (local redb directory or Cloud Datastore), so operators
//! see exactly what the plugins see. Stop the bot before using an embedded
//! silo: its directory is locked while the bot runs.

mod commands;
mod config;

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{debug, warn};
use youppi_kv::Silos;

use config::Config;

/// Silo inspection tool.
#[derive(Parser, Debug)]
#[command(name = "siloctl", about = "Inspect and edit youppi silos", version)]
struct Cli {
    /// The path to the configuration file.
    #[arg(short = 'c', long = "configuration", env = "SILOCTL_CONFIGURATION")]
    configuration: PathBuf,

    /// Enable debug logging (also enabled by `debug = true` in the config).
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the value stored under a key.
    Get {
        /// Silo name (the plugin's namespace, e.g. karma).
        silo: String,
        key: String,
    },

    /// Store a value under a key.
    Set {
        silo: String,
        key: String,
        value: String,
    },

    /// Remove a key. Removing a missing key succeeds.
    Delete { silo: String, key: String },

    /// List entries, optionally only those whose key starts with a prefix.
    List {
        silo: String,
        #[arg(long, default_value = "")]
        prefix: String,
    },
}

impl Commands {
    fn silo(&self) -> &str {
        match self {
            Commands::Get { silo, .. }
            | Commands::Set { silo, .. }
            | Commands::Delete { silo, .. }
            | Commands::List { silo, .. } => silo,
        }
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .init();
}

/// Open the command's silo through `silos`, run the command, then close
/// every silo. Close failures are logged and leave the exit code alone.
fn run(command: &Commands, silos: &Silos, out: &mut dyn Write) -> anyhow::Result<ExitCode> {
    debug!(
        "Opening silo {} ({} backend)",
        command.silo(),
        silos.config().backend_kind()
    );
    let silo = silos.open(command.silo())?;

    let code = match command {
        Commands::Get { key, .. } => {
            if commands::get(&*silo, key, out)? {
                ExitCode::SUCCESS
            } else {
                eprintln!("{}: no such key {:?}", silo.name(), key);
                ExitCode::FAILURE
            }
        }
        Commands::Set { key, value, .. } => {
            commands::set(&*silo, key, value)?;
            ExitCode::SUCCESS
        }
        Commands::Delete { key, .. } => {
            commands::delete(&*silo, key)?;
            ExitCode::SUCCESS
        }
        Commands::List { prefix, .. } => {
            let n = commands::list(&*silo, prefix, out)?;
            debug!("{} entries in silo {}", n, silo.name());
            ExitCode::SUCCESS
        }
    };

    for (name, err) in silos.close_all() {
        warn!("Error closing silo {}: {}", name, err);
    }
    Ok(code)
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = Config::load(&cli.configuration)?;
    init_logging(cli.debug || config.debug);
    debug!("Loaded configuration from {}", cli.configuration.display());

    // Every silo opened here is closed when `silos` goes out of scope,
    // including on early returns.
    let silos = Silos::new(config.storage);
    run(&cli.command, &silos, &mut io::stdout().lock())
}
