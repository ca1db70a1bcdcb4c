// Daemon configuration loaded from the cluster YAML file

use ipnetwork::Ipv4Network;
use serde::{de, Deserialize, Deserializer};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

/// Linux limits interface names to IFNAMSIZ (16) bytes including the NUL.
const MAX_IFNAME_LEN: usize = 15;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// One virtual network: the kernel bridge, the host uplink and the bridge CIDR.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Bridge {
    pub name: String,
    #[serde(default)]
    pub host: String,
    /// Bridge address with its prefix, e.g. `10.20.0.1/24`. Host bits are kept.
    #[serde(deserialize_with = "deserialize_cidr")]
    pub inet: Ipv4Network,
}

/// A bare address would parse as a /32 and put dnsmasq's range off-link,
/// so the prefix length must be spelled out.
fn deserialize_cidr<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Ipv4Network, D::Error> {
    let raw = String::deserialize(deserializer)?;
    if !raw.contains('/') {
        return Err(de::Error::custom(format!(
            "inet '{}' has no prefix length (expected e.g. {}/24)",
            raw, raw
        )));
    }
    raw.parse()
        .map_err(|e| de::Error::custom(format!("inet '{}' is not an IPv4 CIDR: {}", raw, e)))
}

impl Bridge {
    /// Address the bridge itself carries (host part of `inet`).
    pub fn address(&self) -> Ipv4Addr {
        self.inet.ip()
    }

    /// First three octets of the bridge address, e.g. `10.20.0`.
    /// The DHCP range is always built on top of this regardless of prefix length.
    pub fn subnet_prefix(&self) -> String {
        let [a, b, c, _] = self.inet.ip().octets();
        format!("{}.{}.{}", a, b, c)
    }

    /// `<subnet>.2,<subnet>.254,infinite`
    pub fn dhcp_range(&self) -> String {
        let subnet = self.subnet_prefix();
        format!("{}.2,{}.254,infinite", subnet, subnet)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub cpu: String,
    #[serde(default)]
    pub mem: String,
    #[serde(default)]
    pub disk: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Arg {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct KubeInit {
    #[serde(default)]
    pub args: Vec<Arg>,
}

/// Read-only snapshot of the cluster configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OverallConfig {
    pub bridge: Bridge,
    pub tmp_dir: PathBuf,
    #[serde(default, rename = "node")]
    pub node_config: NodeConfig,
    #[serde(default)]
    pub node_num: u32,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub cloud_init: String,
    #[serde(default)]
    pub kube_init: KubeInit,
}

impl OverallConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&content)?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> ConfigResult<Self> {
        let config: OverallConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ConfigResult<()> {
        let name = &self.bridge.name;
        if name.is_empty() {
            return Err(ConfigError::Validation("bridge.name is empty".to_string()));
        }
        if name.len() > MAX_IFNAME_LEN {
            return Err(ConfigError::Validation(format!(
                "bridge.name '{}' exceeds {} bytes",
                name, MAX_IFNAME_LEN
            )));
        }
        if name.contains('/') || name.chars().any(char::is_whitespace) {
            return Err(ConfigError::Validation(format!(
                "bridge.name '{}' is not a valid interface name",
                name
            )));
        }
        if self.tmp_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation("tmp-dir is empty".to_string()));
        }
        Ok(())
    }

    pub fn lease_file(&self) -> PathBuf {
        self.tmp_dir.join("dnsmasq.lease")
    }

    pub fn hosts_file(&self) -> PathBuf {
        self.tmp_dir.join("dnsmasq.hosts")
    }
}
