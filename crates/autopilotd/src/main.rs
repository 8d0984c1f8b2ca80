//! autopilotd — the Autopilot daemon.
//!
//! Single binary that assembles the control loop:
//! - State store (redb)
//! - Controller with one worker per target
//! - REST API + Prometheus exposition
//!
//! # Usage
//!
//! ```text
//! autopilotd run --config autopilot.toml --port 8650 --data-dir /var/lib/autopilot
//! autopilotd check --config autopilot.toml
//! autopilotd init --target web > autopilot.toml
//! ```

mod daemon;
mod seed;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use autopilot_core::AutopilotConfig;

const DEFAULT_FILTER: &str = "info,autopilotd=debug,autopilot=debug";

#[derive(Parser)]
#[command(name = "autopilotd", about = "Autopilot control loop daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control loop and the API server.
    Run {
        /// Path to autopilot.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on. Overrides `server.port`.
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state. Overrides `server.data_dir`.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Validate a configuration file and exit.
    Check {
        #[arg(long, default_value = "autopilot.toml")]
        config: PathBuf,
    },
    /// Print a starter configuration.
    Init {
        /// Target the sample policy is bound to.
        #[arg(long, default_value = "web")]
        target: String,
    },
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Command::Run {
            config,
            port,
            data_dir,
        } => {
            let config = match &config {
                Some(path) => AutopilotConfig::from_file(path)?,
                None => AutopilotConfig::default(),
            };
            daemon::run(config, port, data_dir).await
        }
        Command::Check { config } => {
            let parsed = AutopilotConfig::from_file(&config)?;
            parsed.validate()?;
            println!(
                "{}: ok ({} targets, {} policies)",
                config.display(),
                parsed.targets.len(),
                parsed.policies.len()
            );
            Ok(())
        }
        Command::Init { target } => {
            print!("{}", AutopilotConfig::scaffold(&target).to_toml_string()?);
            Ok(())
        }
    }
}
