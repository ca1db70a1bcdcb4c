// mediumkube host network daemon
// Keeps the VM bridge, its firewall rules and dnsmasq in place until signalled

mod config;
mod daemon;
mod network;
mod utils;

use clap::Parser;
use config::OverallConfig;
use daemon::DaemonOptions;
use std::path::PathBuf;
use std::time::Duration;
use utils::logger::Logger;

/// mediumkubed - bridge, firewall and DHCP reconciler for mediumkube VMs
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Cli {
    /// Path to the mediumkube configuration file
    #[clap(long, env = "MEDIUMKUBE_CONFIG", default_value = "./config.yaml")]
    config: PathBuf,

    /// Seconds between reconciliation passes
    #[clap(long, default_value_t = 5)]
    interval_secs: u64,

    /// dnsmasq executable to launch
    #[clap(long, default_value = "dnsmasq")]
    dnsmasq: String,

    /// Enable debug logging
    #[clap(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    Logger::init(cli.verbose);

    let config = match OverallConfig::load_from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load config {}: {}", cli.config.display(), e);
            return Err(e.into());
        }
    };

    let options = DaemonOptions {
        interval: Duration::from_secs(cli.interval_secs.max(1)),
        dnsmasq_binary: cli.dnsmasq,
    };

    daemon::run_daemon(config, options).await
}
