// DNS management module
// Runs dnsmasq on the bridge as the DHCP/DNS server for cluster nodes

use crate::config::{Bridge, OverallConfig};
use crate::utils::command::CommandExecutor;
use crate::utils::process::SupervisedService;
use std::path::PathBuf;
use tokio::process::Command;

pub const DNS_DOMAIN: &str = "mediumkube";

/// dnsmasq invocation derived from the bridge and the config's temp directory.
pub struct DnsManager {
    binary: String,
    bridge: Bridge,
    lease_file: PathBuf,
    hosts_file: PathBuf,
}

impl DnsManager {
    pub fn new(binary: impl Into<String>, config: &OverallConfig) -> Self {
        Self {
            binary: binary.into(),
            bridge: config.bridge.clone(),
            lease_file: config.lease_file(),
            hosts_file: config.hosts_file(),
        }
    }

    pub fn args(&self) -> Vec<String> {
        vec![
            "--keep-in-foreground".to_string(),
            "--strict-order".to_string(),
            "--bind-interfaces".to_string(),
            "--pid-file".to_string(),
            format!("--domain={}", DNS_DOMAIN),
            format!("--local=/{}/", DNS_DOMAIN),
            "--except-interface=lo".to_string(),
            "--interface".to_string(),
            self.bridge.name.clone(),
            format!("--listen-address={}", self.bridge.address()),
            "--dhcp-no-override".to_string(),
            "--dhcp-authoritative".to_string(),
            format!("--dhcp-leasefile={}", self.lease_file.display()),
            format!("--dhcp-hostsfile={}", self.hosts_file.display()),
            format!("--dhcp-range={}", self.bridge.dhcp_range()),
        ]
    }

    /// Launch dnsmasq. It runs in the foreground for the daemon's lifetime.
    pub fn start(&self) -> SupervisedService {
        let args = self.args();
        tracing::info!(
            "Starting dnsmasq with: {}",
            CommandExecutor::render(&self.binary, &args)
        );

        let mut command = Command::new(&self.binary);
        command.args(&args);
        SupervisedService::spawn("dnsmasq", command)
    }
}
