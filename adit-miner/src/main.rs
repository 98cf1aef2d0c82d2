use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use adit_miner::config::Config;
use adit_miner::daemon::Daemon;
use adit_miner::tracing::{self, prelude::*};

#[derive(Parser, Debug)]
#[command(name = "adit-miner", version, about = "Pool-managed mining daemon")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Pool endpoint URI; repeat for failover order (overrides the config
    /// file)
    #[arg(short = 'P', long = "pool")]
    pools: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing::init_journald_or_stdout();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    if !args.pools.is_empty() {
        config.pools = args.pools;
    }
    if config.pools.is_empty() {
        info!("No pools configured, using the built-in simulator");
        config.pools.push("sim://localhost".to_string());
    }

    Daemon::new().run(config).await
}
