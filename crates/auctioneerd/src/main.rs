//! auctioneerd — the auctioneer daemon.
//!
//! Hosts the auction runner. With no production cell transport wired
//! in, the binary drives simulated clusters described in TOML:
//!
//! ```text
//! auctioneerd simulate scenario.toml --max-retries 5 > report.json
//! auctioneerd config --config auctioneer.toml
//! ```

mod simulate;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use auction_core::{AuctioneerConfig, Tunables, TunablesConfig};

const DEFAULT_LOG_FILTER: &str = "info,auctioneerd=debug,auction=debug";

#[derive(Parser)]
#[command(name = "auctioneerd", about = "Auctioneer daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Place a scenario's workloads on simulated cells and print a JSON report.
    Simulate {
        /// Scenario file with [[cells]], [[lrps]] and [[tasks]].
        scenario: PathBuf,

        /// Tunables file; overrides the scenario's [auctioneer] table.
        #[arg(long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        overrides: Overrides,

        /// Give up on unfinished auctions after this many seconds.
        #[arg(long, default_value = "30")]
        timeout_secs: u64,
    },

    /// Print the effective tunables as TOML.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        overrides: Overrides,
    },
}

#[derive(clap::Args)]
struct Overrides {
    /// Highest attempt count that is still retried.
    #[arg(long)]
    max_retries: Option<u32>,

    /// Parallelism of state fetches and commits.
    #[arg(long)]
    pool_width: Option<usize>,
}

impl Overrides {
    fn apply(&self, config: &mut TunablesConfig) {
        if let Some(max_retries) = self.max_retries {
            config.max_retries = Some(max_retries);
        }
        if let Some(width) = self.pool_width {
            config.worker_pool_width = Some(width);
        }
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>, base: AuctioneerConfig) -> anyhow::Result<AuctioneerConfig> {
    match path {
        Some(path) => AuctioneerConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display())),
        None => Ok(base),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Simulate {
            scenario,
            config,
            overrides,
            timeout_secs,
        } => {
            let scenario = simulate::Scenario::from_file(&scenario)?;
            let mut config = load_config(config.as_ref(), scenario.config.clone())?;
            overrides.apply(&mut config.auctioneer);
            let tunables = config.tunables()?;
            log_tunables(&tunables);

            let report =
                simulate::run(&scenario, &tunables, Duration::from_secs(timeout_secs)).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Config { config, overrides } => {
            let mut config = load_config(config.as_ref(), AuctioneerConfig::default())?;
            overrides.apply(&mut config.auctioneer);
            let tunables = config.tunables()?;

            // Print the resolved values, not just the ones that were set.
            let resolved = AuctioneerConfig {
                auctioneer: TunablesConfig {
                    max_retries: Some(tunables.max_retries),
                    worker_pool_width: Some(tunables.worker_pool_width),
                    fetch_cooldown_ms: Some(tunables.fetch_cooldown.as_millis() as u64),
                    state_fetch_retries: Some(tunables.state_fetch_retries),
                },
            };
            print!("{}", resolved.to_toml_string()?);
            Ok(())
        }
    }
}

fn log_tunables(tunables: &Tunables) {
    info!(
        max_retries = tunables.max_retries,
        worker_pool_width = tunables.worker_pool_width,
        fetch_cooldown_ms = tunables.fetch_cooldown.as_millis() as u64,
        state_fetch_retries = tunables.state_fetch_retries,
        "tunables resolved"
    );
}
