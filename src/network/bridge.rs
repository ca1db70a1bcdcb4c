// Bridge management module
// Keeps the bridge interface present and carrying exactly the configured address

use crate::config::Bridge;
use crate::network::netlink::LinkControl;
use std::sync::Arc;

/// What one reconciliation pass did to the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// Interface was absent; it has been created and given the configured address
    Created,
    /// Interface had no IPv4 address and the configured one was added
    Assigned,
    /// Interface carried other addresses; they were replaced
    Reassigned,
    /// Interface already matched the configuration
    Unchanged,
    /// A kernel call failed; logged and retried on the next tick
    Failed(String),
}

impl BridgeOutcome {
    pub fn mutated(&self) -> bool {
        matches!(
            self,
            BridgeOutcome::Created | BridgeOutcome::Assigned | BridgeOutcome::Reassigned
        )
    }
}

pub struct BridgeManager<L> {
    links: Arc<L>,
}

impl<L: LinkControl> BridgeManager<L> {
    pub fn new(links: Arc<L>) -> Self {
        Self { links }
    }

    /// Best-effort: never returns an error, every failure becomes `BridgeOutcome::Failed`.
    pub async fn reconcile(&self, bridge: &Bridge) -> BridgeOutcome {
        let index = match self.links.link_index(&bridge.name).await {
            Ok(idx) => idx,
            Err(e) if e.is_not_found() => {
                tracing::info!("Creating bridge {}", bridge.name);
                let index = match self.links.create_bridge(bridge).await {
                    Ok(idx) => idx,
                    Err(e) => {
                        tracing::error!("Failed to create bridge {}: {}", bridge.name, e);
                        return BridgeOutcome::Failed(e.to_string());
                    }
                };
                return match self.reconcile_address(bridge, index).await {
                    BridgeOutcome::Failed(reason) => BridgeOutcome::Failed(reason),
                    _ => BridgeOutcome::Created,
                };
            }
            Err(e) => {
                tracing::error!("Failed to look up bridge {}: {}", bridge.name, e);
                return BridgeOutcome::Failed(e.to_string());
            }
        };

        self.reconcile_address(bridge, index).await
    }

    async fn reconcile_address(&self, bridge: &Bridge, index: u32) -> BridgeOutcome {
        let current = match self.links.ipv4_addresses(index).await {
            Ok(addrs) => addrs,
            Err(e) => {
                tracing::error!("Failed to list addresses on {}: {}", bridge.name, e);
                return BridgeOutcome::Failed(e.to_string());
            }
        };
        let desired = bridge.inet;

        if current.is_empty() {
            tracing::info!("Assigning address {} to {}", desired, bridge.name);
            return match self.links.add_address(index, desired).await {
                Ok(()) => BridgeOutcome::Assigned,
                Err(e) => {
                    tracing::warn!("Failed to assign {} to {}: {}", desired, bridge.name, e);
                    BridgeOutcome::Failed(e.to_string())
                }
            };
        }

        if current.contains(&desired) {
            return BridgeOutcome::Unchanged;
        }

        let rendered: Vec<String> = current.iter().map(|a| a.to_string()).collect();
        tracing::info!(
            "Re-assigning address on {}: {:?} -> {}",
            bridge.name,
            rendered,
            desired
        );

        let mut failure = None;
        for addr in current {
            if let Err(e) = self.links.del_address(index, addr).await {
                tracing::warn!("Failed to remove {} from {}: {}", addr, bridge.name, e);
                failure.get_or_insert(e.to_string());
            }
        }
        if let Err(e) = self.links.add_address(index, desired).await {
            tracing::warn!("Failed to assign {} to {}: {}", desired, bridge.name, e);
            failure.get_or_insert(e.to_string());
        }

        match failure {
            Some(reason) => BridgeOutcome::Failed(reason),
            None => BridgeOutcome::Reassigned,
        }
    }
}
