// Daemon lifecycle: start dnsmasq and the reconciliation loop, wait for a
// termination signal, then tear down in order.

use crate::config::OverallConfig;
use crate::daemon::reconciler::{Reconciler, DEFAULT_RECONCILE_INTERVAL};
use crate::network::{DnsManager, Iptables, NetlinkHandle};
use crate::utils::process::ServiceState;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, Signal, SignalKind};

const SERVICE_STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub interval: Duration,
    pub dnsmasq_binary: String,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RECONCILE_INTERVAL,
            dnsmasq_binary: "dnsmasq".to_string(),
        }
    }
}

pub async fn run_daemon(
    config: OverallConfig,
    options: DaemonOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(config);
    let links = Arc::new(NetlinkHandle::new()?);
    let filter = Arc::new(Iptables::new());

    if config.bridge.inet.prefix() != 24 {
        tracing::warn!(
            "Bridge network {} is not a /24; the DHCP range always covers {}.2-{}.254",
            config.bridge.inet,
            config.bridge.subnet_prefix(),
            config.bridge.subnet_prefix()
        );
    }

    tracing::info!(
        "Starting mediumkube daemon on bridge {} ({}), reconciling every {:?}",
        config.bridge.name,
        config.bridge.inet,
        options.interval
    );

    // Installed before anything is touched, so a failure here leaves no rules behind
    let mut signals = ShutdownSignals::install()?;

    let mut dnsmasq = DnsManager::new(&options.dnsmasq_binary, &config).start();

    let reconciler = Arc::new(Reconciler::new(
        config.clone(),
        links,
        filter,
        options.interval,
    ));
    let runner = reconciler.clone();
    let loop_handle = tokio::spawn(async move { runner.run().await });

    let mut watching_service = true;
    loop {
        tokio::select! {
            name = signals.recv() => {
                tracing::info!("Received {}, shutting down", name);
                break;
            }
            state = dnsmasq.wait_exit(), if watching_service => {
                // No restart; bridge and firewall reconciliation carry on without DHCP
                match state {
                    ServiceState::Failed(reason) => {
                        tracing::error!("{} failed: {}", dnsmasq.name(), reason)
                    }
                    other => {
                        tracing::error!("{} exited unexpectedly: {:?}", dnsmasq.name(), other)
                    }
                }
                watching_service = false;
            }
        }
    }

    let report = reconciler.shutdown().await;
    if report.failed > 0 {
        tracing::warn!("{} firewall rule(s) could not be removed", report.failed);
    }
    if let Err(e) = loop_handle.await {
        tracing::error!("Reconciliation task panicked: {}", e);
    }

    tracing::info!("Stopping {} ({:?})", dnsmasq.name(), dnsmasq.state());
    let final_state = dnsmasq.stop(SERVICE_STOP_GRACE).await;
    tracing::debug!("dnsmasq final state: {:?}", final_state);

    tracing::info!("Daemon exited");
    Ok(())
}

/// SIGINT and SIGTERM handlers, registered once for the daemon's lifetime.
struct ShutdownSignals {
    interrupt: Signal,
    terminate: Signal,
}

impl ShutdownSignals {
    fn install() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Resolves with the name of the first signal received. Cancel-safe.
    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}
