// Periodic reconciliation of bridge and firewall state
//
// One mutex guards both the run flag and the firewall rule registry. A tick
// holds it across its interval wait and its kernel calls, so ticks never
// overlap each other or the shutdown teardown.

use crate::config::OverallConfig;
use crate::network::bridge::{BridgeManager, BridgeOutcome};
use crate::network::firewall::{Firewall, RuleOutcome, TeardownReport};
use crate::network::iptables::PacketFilter;
use crate::network::netlink::LinkControl;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(5);

/// Result of one reconciliation pass. Failures are recorded here, never raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub bridge: BridgeOutcome,
    pub rules: Vec<RuleOutcome>,
}

impl TickReport {
    pub fn installed(&self) -> usize {
        self.rules
            .iter()
            .filter(|r| **r == RuleOutcome::Installed)
            .count()
    }

    pub fn failures(&self) -> usize {
        let bridge = matches!(self.bridge, BridgeOutcome::Failed(_)) as usize;
        bridge
            + self
                .rules
                .iter()
                .filter(|r| matches!(r, RuleOutcome::Failed(_)))
                .count()
    }
}

struct ReconcilerState<F> {
    enabled: bool,
    firewall: Firewall<F>,
}

pub struct Reconciler<L, F> {
    config: Arc<OverallConfig>,
    bridge: BridgeManager<L>,
    state: Mutex<ReconcilerState<F>>,
    interval: Duration,
    stop: watch::Sender<bool>,
}

impl<L: LinkControl, F: PacketFilter> Reconciler<L, F> {
    pub fn new(
        config: Arc<OverallConfig>,
        links: Arc<L>,
        filter: Arc<F>,
        interval: Duration,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            config,
            bridge: BridgeManager::new(links),
            state: Mutex::new(ReconcilerState {
                enabled: true,
                firewall: Firewall::new(filter),
            }),
            interval,
            stop,
        }
    }

    #[cfg(test)]
    pub async fn is_enabled(&self) -> bool {
        self.state.lock().await.enabled
    }

    /// Number of distinct rules installed so far by this process.
    #[cfg(test)]
    pub async fn registered_rules(&self) -> usize {
        self.state.lock().await.firewall.registry().len()
    }

    /// Run one pass immediately. `None` once the reconciler has been shut down.
    #[allow(dead_code)] // On-demand pass; the daemon itself drives `run`
    pub async fn tick(&self) -> Option<TickReport> {
        let mut state = self.state.lock().await;
        if !state.enabled {
            return None;
        }
        Some(self.reconcile(&mut state).await)
    }

    async fn reconcile(&self, state: &mut ReconcilerState<F>) -> TickReport {
        let bridge = &self.config.bridge;
        let bridge_outcome = self.bridge.reconcile(bridge).await;
        let rules = state.firewall.apply_bridge_rules(bridge).await;

        let report = TickReport {
            bridge: bridge_outcome,
            rules,
        };
        if report.failures() > 0 {
            tracing::warn!(
                "Reconciliation pass finished with {} failure(s); retrying in {:?}",
                report.failures(),
                self.interval
            );
        } else if report.bridge.mutated() || report.installed() > 0 {
            tracing::info!(
                "Reconciled {}: bridge {:?}, {} rule(s) installed",
                bridge.name,
                report.bridge,
                report.installed()
            );
        } else {
            tracing::debug!(
                "Reconciliation pass: bridge {:?}, {} rule(s) installed",
                report.bridge,
                report.installed()
            );
        }
        report
    }

    /// Reconcile every interval until `shutdown` is called. Returns the number of passes run.
    pub async fn run(&self) -> usize {
        let mut passes = 0;

        loop {
            let mut stop = self.stop.subscribe();
            let mut state = self.state.lock().await;
            if !state.enabled || *stop.borrow() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = stop.changed() => break,
            }

            self.reconcile(&mut state).await;
            passes += 1;
        }

        tracing::info!("Reconciliation loop stopped after {} pass(es)", passes);
        passes
    }

    /// Stop the loop and remove every rule this process installed.
    /// Waits for an in-flight pass to finish first.
    pub async fn shutdown(&self) -> TeardownReport {
        // Wakes a loop blocked in its interval wait so it releases the lock
        self.stop.send_replace(true);

        let mut state = self.state.lock().await;
        state.enabled = false;
        state.firewall.teardown().await
    }
}
