use crate::config::Bridge;
use crate::network::iptables::PacketFilter;
use std::sync::Arc;

/// All daemon rules live in the filter table.
pub const FILTER_TABLE: &str = "filter";

/// Marker appended to every rule so operators can spot them in `iptables -S`.
pub const RULE_COMMENT: &str = "Auto generated by mediumkubed";

/// Where a new rule goes in its chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleMode {
    /// Tail of the chain
    Append,
    /// Position 1, ahead of any default-deny rules
    Prepend,
}

/// Registry entry. Identity is (chain, tokens); the mode is deliberately not part of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredRule {
    pub chain: String,
    pub tokens: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    /// Rule was missing from the live table and has been installed
    Installed,
    /// Rule already present; no kernel call made
    Present,
    /// Existence query or install failed; logged and retried next tick
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub removed: usize,
    pub absent: usize,
    pub failed: usize,
}

/// iptables rule manager. Remembers every rule it ever tried to install
/// so `teardown` can remove exactly those and nothing else.
pub struct Firewall<F> {
    filter: Arc<F>,
    registry: Vec<RegisteredRule>,
}

impl<F: PacketFilter> Firewall<F> {
    pub fn new(filter: Arc<F>) -> Self {
        Self {
            filter,
            registry: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn registry(&self) -> &[RegisteredRule] {
        &self.registry
    }

    /// Install `rule` in `chain` unless the live table already has it.
    pub async fn ensure(&mut self, chain: &str, mode: RuleMode, rule: Vec<String>) -> RuleOutcome {
        let tokens = with_comment(rule);

        let known = self
            .registry
            .iter()
            .any(|r| r.chain == chain && r.tokens == tokens);
        if !known {
            self.registry.push(RegisteredRule {
                chain: chain.to_string(),
                tokens: tokens.clone(),
            });
        }

        let exists = match self.filter.exists(FILTER_TABLE, chain, &tokens).await {
            Ok(exists) => exists,
            Err(e) => {
                tracing::error!("Failed to check {} rule {:?}: {}", chain, tokens, e);
                return RuleOutcome::Failed(e.to_string());
            }
        };
        if exists {
            return RuleOutcome::Present;
        }

        let result = match mode {
            RuleMode::Append => {
                tracing::info!("Appending to {}: {:?}", chain, tokens);
                self.filter.append(FILTER_TABLE, chain, &tokens).await
            }
            RuleMode::Prepend => {
                tracing::info!("Inserting into {}: {:?}", chain, tokens);
                self.filter.insert(FILTER_TABLE, chain, 1, &tokens).await
            }
        };

        match result {
            Ok(()) => RuleOutcome::Installed,
            Err(e) => {
                tracing::error!("Failed to install {} rule {:?}: {}", chain, tokens, e);
                RuleOutcome::Failed(e.to_string())
            }
        }
    }

    /// Ensure the fixed bridge rule set, in order.
    pub async fn apply_bridge_rules(&mut self, bridge: &Bridge) -> Vec<RuleOutcome> {
        let mut outcomes = Vec::new();
        for (chain, mode, rule) in bridge_rules(bridge) {
            outcomes.push(self.ensure(chain, mode, rule).await);
        }
        outcomes
    }

    /// Remove every registered rule still present, in registration order.
    /// The registry itself is left intact.
    pub async fn teardown(&self) -> TeardownReport {
        let mut report = TeardownReport::default();

        for entry in &self.registry {
            match self
                .filter
                .exists(FILTER_TABLE, &entry.chain, &entry.tokens)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    report.absent += 1;
                    continue;
                }
                Err(e) => {
                    tracing::error!("Failed to check {} rule {:?}: {}", entry.chain, entry.tokens, e);
                    report.failed += 1;
                    continue;
                }
            }

            tracing::info!("Deleting from {}: {:?}", entry.chain, entry.tokens);
            match self
                .filter
                .delete(FILTER_TABLE, &entry.chain, &entry.tokens)
                .await
            {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    tracing::error!("Failed to delete {} rule {:?}: {}", entry.chain, entry.tokens, e);
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            "Firewall teardown: {} removed, {} already absent, {} failed",
            report.removed,
            report.absent,
            report.failed
        );
        report
    }
}

fn with_comment(mut rule: Vec<String>) -> Vec<String> {
    rule.extend(
        ["-m", "comment", "--comment", RULE_COMMENT]
            .iter()
            .map(|s| s.to_string()),
    );
    rule
}

fn tokens(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// The fixed rule set for one bridge. Prepended rules take precedence over a
/// default-deny posture; the REJECT catch-alls are appended as fallbacks.
pub fn bridge_rules(bridge: &Bridge) -> Vec<(&'static str, RuleMode, Vec<String>)> {
    let name = bridge.name.as_str();
    let cidr = bridge.inet.to_string();
    let inet = cidr.as_str();

    let mut rules = vec![
        // Return traffic for connections leaving the bridge
        (
            "FORWARD",
            RuleMode::Prepend,
            tokens(&[
                "-d", inet, "-o", name, "-m", "conntrack", "--ctstate",
                "RELATED,ESTABLISHED", "-j", "ACCEPT",
            ]),
        ),
        // Traffic entering from the bridge subnet
        (
            "FORWARD",
            RuleMode::Prepend,
            tokens(&["-s", inet, "-i", name, "-j", "ACCEPT"]),
        ),
        // Node to node
        (
            "FORWARD",
            RuleMode::Prepend,
            tokens(&["-i", name, "-o", name, "-j", "ACCEPT"]),
        ),
        (
            "FORWARD",
            RuleMode::Append,
            tokens(&["-i", name, "-j", "REJECT", "--reject-with", "icmp-port-unreachable"]),
        ),
        (
            "FORWARD",
            RuleMode::Append,
            tokens(&["-o", name, "-j", "REJECT", "--reject-with", "icmp-port-unreachable"]),
        ),
        // DHCP server
        (
            "INPUT",
            RuleMode::Prepend,
            tokens(&["-i", name, "-p", "udp", "-m", "udp", "--dport", "67", "-j", "ACCEPT"]),
        ),
    ];

    for proto in ["tcp", "udp"] {
        rules.push((
            "INPUT",
            RuleMode::Prepend,
            tokens(&["-i", name, "-p", proto, "-m", proto, "--dport", "53", "-j", "ACCEPT"]),
        ));
    }

    rules.push((
        "OUTPUT",
        RuleMode::Prepend,
        tokens(&["-o", name, "-p", "udp", "-m", "udp", "--sport", "67", "-j", "ACCEPT"]),
    ));

    for proto in ["tcp", "udp"] {
        rules.push((
            "OUTPUT",
            RuleMode::Prepend,
            tokens(&["-o", name, "-p", proto, "-m", proto, "--dport", "53", "-j", "ACCEPT"]),
        ));
    }

    rules
}
