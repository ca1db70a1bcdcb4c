use crate::config::Bridge;
use crate::network::error::{NetworkError, NetworkResult};
use async_trait::async_trait;
use futures::TryStreamExt;
use ipnetwork::Ipv4Network;
use netlink_packet_route::address::nlas::Nla as AddressNla;
use netlink_packet_route::AddressMessage;
use std::net::{IpAddr, Ipv4Addr};

/// Kernel link and address operations the bridge manager depends on.
#[async_trait]
pub trait LinkControl: Send + Sync {
    /// ifindex of the named link, `NetworkError::NotFound` if absent.
    async fn link_index(&self, name: &str) -> NetworkResult<u32>;

    /// Create the bridge device and bring it up. Returns its ifindex.
    async fn create_bridge(&self, bridge: &Bridge) -> NetworkResult<u32>;

    /// IPv4 addresses bound to the link, each with its prefix length.
    async fn ipv4_addresses(&self, index: u32) -> NetworkResult<Vec<Ipv4Network>>;

    async fn add_address(&self, index: u32, addr: Ipv4Network) -> NetworkResult<()>;

    async fn del_address(&self, index: u32, addr: Ipv4Network) -> NetworkResult<()>;
}

/// Persistent netlink handle wrapping rtnetlink.
/// One handle per process, reused by every reconciliation tick.
pub struct NetlinkHandle {
    handle: rtnetlink::Handle,
    // Keep the connection task alive
    _conn_task: tokio::task::JoinHandle<()>,
}

impl NetlinkHandle {
    /// Create a new netlink handle with a persistent connection.
    /// Must be called from within a tokio runtime.
    pub fn new() -> NetworkResult<Self> {
        let (conn, handle, _) = rtnetlink::new_connection()?;
        let conn_task = tokio::spawn(conn);
        Ok(Self {
            handle,
            _conn_task: conn_task,
        })
    }

    async fn set_link_up(&self, index: u32) -> NetworkResult<()> {
        self.handle
            .link()
            .set(index)
            .up()
            .execute()
            .await
            .map_err(NetworkError::Netlink)
    }

    async fn address_messages(&self, index: u32) -> NetworkResult<Vec<AddressMessage>> {
        let mut stream = self
            .handle
            .address()
            .get()
            .set_link_index_filter(index)
            .execute();

        let mut messages = Vec::new();
        while let Some(msg) = stream.try_next().await.map_err(NetworkError::Netlink)? {
            if msg.header.index == index {
                messages.push(msg);
            }
        }
        Ok(messages)
    }
}

/// IPv4 address carried by an address message, if any.
/// IFA_LOCAL is the interface's own address; IFA_ADDRESS is the fallback.
fn ipv4_of(msg: &AddressMessage) -> Option<Ipv4Network> {
    let mut local = None;
    let mut address = None;
    for nla in &msg.nlas {
        match nla {
            AddressNla::Local(bytes) if bytes.len() == 4 => local = Some(bytes.clone()),
            AddressNla::Address(bytes) if bytes.len() == 4 => address = Some(bytes.clone()),
            _ => {}
        }
    }
    let bytes = local.or(address)?;
    let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
    Ipv4Network::new(ip, msg.header.prefix_len).ok()
}

#[async_trait]
impl LinkControl for NetlinkHandle {
    async fn link_index(&self, name: &str) -> NetworkResult<u32> {
        let mut links = self
            .handle
            .link()
            .get()
            .match_name(name.to_string())
            .execute();
        match links.try_next().await {
            Ok(Some(msg)) => Ok(msg.header.index),
            Ok(None) => Err(NetworkError::NotFound(format!("link {}", name))),
            Err(e) => {
                // rtnetlink returns an error for "not found" on some kernels
                if e.to_string().contains("No such device") {
                    Err(NetworkError::NotFound(format!("link {}", name)))
                } else {
                    Err(NetworkError::Netlink(e))
                }
            }
        }
    }

    async fn create_bridge(&self, bridge: &Bridge) -> NetworkResult<u32> {
        let result = self
            .handle
            .link()
            .add()
            .bridge(bridge.name.clone())
            .execute()
            .await;

        match result {
            Ok(()) => {}
            // Lost a race with another creator; the link is there either way
            Err(e) if e.to_string().contains("File exists") => {}
            Err(e) => return Err(NetworkError::Netlink(e)),
        }

        let index = self.link_index(&bridge.name).await?;
        self.set_link_up(index).await?;
        Ok(index)
    }

    async fn ipv4_addresses(&self, index: u32) -> NetworkResult<Vec<Ipv4Network>> {
        let messages = self.address_messages(index).await?;
        Ok(messages.iter().filter_map(ipv4_of).collect())
    }

    async fn add_address(&self, index: u32, addr: Ipv4Network) -> NetworkResult<()> {
        let result = self
            .handle
            .address()
            .add(index, IpAddr::V4(addr.ip()), addr.prefix())
            .execute()
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("File exists") => Ok(()), // already assigned
            Err(e) => Err(NetworkError::Netlink(e)),
        }
    }

    async fn del_address(&self, index: u32, addr: Ipv4Network) -> NetworkResult<()> {
        let messages = self.address_messages(index).await?;
        let msg = messages
            .into_iter()
            .find(|m| ipv4_of(m) == Some(addr))
            .ok_or_else(|| NetworkError::NotFound(format!("address {} on link {}", addr, index)))?;

        self.handle
            .address()
            .del(msg)
            .execute()
            .await
            .map_err(NetworkError::Netlink)
    }
}
