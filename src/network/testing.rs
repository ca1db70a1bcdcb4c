// In-memory stand-ins for the kernel, used by unit tests

use crate::config::Bridge;
use crate::network::error::{NetworkError, NetworkResult};
use crate::network::iptables::PacketFilter;
use crate::network::netlink::LinkControl;
use async_trait::async_trait;
use ipnetwork::Ipv4Network;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

fn io_error(msg: &str) -> NetworkError {
    std::io::Error::new(std::io::ErrorKind::Other, msg.to_string()).into()
}

pub fn test_bridge() -> Bridge {
    Bridge {
        name: "mkbr0".to_string(),
        host: "eth0".to_string(),
        inet: "10.20.0.1/24".parse().unwrap(),
    }
}

#[derive(Default)]
pub struct FakeLinks {
    links: Mutex<HashMap<String, (u32, Vec<Ipv4Network>)>>,
    mutations: AtomicUsize,
    pub fail_lookup: AtomicBool,
    pub fail_add: AtomicBool,
    pub fail_del: AtomicBool,
}

impl FakeLinks {
    pub fn with_link(name: &str, addrs: &[&str]) -> Self {
        let fake = Self::default();
        let addrs = addrs.iter().map(|a| a.parse().unwrap()).collect();
        fake.links
            .lock()
            .unwrap()
            .insert(name.to_string(), (1, addrs));
        fake
    }

    pub fn addresses(&self, name: &str) -> Option<Vec<String>> {
        self.links
            .lock()
            .unwrap()
            .get(name)
            .map(|(_, addrs)| addrs.iter().map(|a| a.to_string()).collect())
    }

    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    fn by_index<T>(
        &self,
        index: u32,
        f: impl FnOnce(&mut Vec<Ipv4Network>) -> NetworkResult<T>,
    ) -> NetworkResult<T> {
        let mut links = self.links.lock().unwrap();
        let (_, addrs) = links
            .values_mut()
            .find(|(idx, _)| *idx == index)
            .ok_or_else(|| NetworkError::NotFound(format!("link index {}", index)))?;
        f(addrs)
    }
}

#[async_trait]
impl LinkControl for FakeLinks {
    async fn link_index(&self, name: &str) -> NetworkResult<u32> {
        if self.fail_lookup.load(Ordering::SeqCst) {
            return Err(io_error("netlink socket closed"));
        }
        self.links
            .lock()
            .unwrap()
            .get(name)
            .map(|(idx, _)| *idx)
            .ok_or_else(|| NetworkError::NotFound(format!("link {}", name)))
    }

    async fn create_bridge(&self, bridge: &Bridge) -> NetworkResult<u32> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let mut links = self.links.lock().unwrap();
        let next = links.len() as u32 + 1;
        let entry = links
            .entry(bridge.name.clone())
            .or_insert_with(|| (next, Vec::new()));
        Ok(entry.0)
    }

    async fn ipv4_addresses(&self, index: u32) -> NetworkResult<Vec<Ipv4Network>> {
        self.by_index(index, |addrs| Ok(addrs.clone()))
    }

    async fn add_address(&self, index: u32, addr: Ipv4Network) -> NetworkResult<()> {
        if self.fail_add.load(Ordering::SeqCst) {
            return Err(io_error("address add refused"));
        }
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.by_index(index, |addrs| {
            if !addrs.contains(&addr) {
                addrs.push(addr);
            }
            Ok(())
        })
    }

    async fn del_address(&self, index: u32, addr: Ipv4Network) -> NetworkResult<()> {
        if self.fail_del.load(Ordering::SeqCst) {
            return Err(io_error("address delete refused"));
        }
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.by_index(index, |addrs| {
            addrs.retain(|a| *a != addr);
            Ok(())
        })
    }
}

#[derive(Default)]
pub struct FakeFilter {
    chains: Mutex<HashMap<(String, String), Vec<Vec<String>>>>,
    mutations: AtomicUsize,
    pub fail_exists: AtomicBool,
    pub fail_delete: AtomicBool,
}

impl FakeFilter {
    pub fn chain(&self, table: &str, chain: &str) -> Vec<Vec<String>> {
        self.chains
            .lock()
            .unwrap()
            .get(&(table.to_string(), chain.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn total_rules(&self) -> usize {
        self.chains.lock().unwrap().values().map(Vec::len).sum()
    }

    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Install a rule behind the daemon's back.
    pub fn preload(&self, table: &str, chain: &str, rule: Vec<String>) {
        self.chains
            .lock()
            .unwrap()
            .entry((table.to_string(), chain.to_string()))
            .or_default()
            .push(rule);
    }
}

#[async_trait]
impl PacketFilter for FakeFilter {
    async fn exists(&self, table: &str, chain: &str, rule: &[String]) -> NetworkResult<bool> {
        if self.fail_exists.load(Ordering::SeqCst) {
            return Err(NetworkError::Command {
                cmd: format!("iptables -C {}", chain),
                stderr: "xtables lock held".to_string(),
            });
        }
        Ok(self.chain(table, chain).iter().any(|r| r == rule))
    }

    async fn append(&self, table: &str, chain: &str, rule: &[String]) -> NetworkResult<()> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.preload(table, chain, rule.to_vec());
        Ok(())
    }

    async fn insert(
        &self,
        table: &str,
        chain: &str,
        position: u32,
        rule: &[String],
    ) -> NetworkResult<()> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let mut chains = self.chains.lock().unwrap();
        let rules = chains
            .entry((table.to_string(), chain.to_string()))
            .or_default();
        let at = (position.saturating_sub(1) as usize).min(rules.len());
        rules.insert(at, rule.to_vec());
        Ok(())
    }

    async fn delete(&self, table: &str, chain: &str, rule: &[String]) -> NetworkResult<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(NetworkError::Command {
                cmd: format!("iptables -D {}", chain),
                stderr: "Bad rule".to_string(),
            });
        }
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let mut chains = self.chains.lock().unwrap();
        if let Some(rules) = chains.get_mut(&(table.to_string(), chain.to_string())) {
            if let Some(pos) = rules.iter().position(|r| r == rule) {
                rules.remove(pos);
            }
        }
        Ok(())
    }
}
