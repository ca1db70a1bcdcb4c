// Network management module
// Bridge addressing over netlink, iptables rule management, dnsmasq supervision

pub mod bridge;
pub mod dns_manager;
pub mod error;
pub mod firewall;
pub mod iptables;
pub mod netlink;

#[cfg(test)]
pub mod testing;

pub use dns_manager::DnsManager;
pub use iptables::Iptables;
pub use netlink::NetlinkHandle;
