// Packet-filter control surface backed by the iptables binary

use crate::network::error::{NetworkError, NetworkResult};
use crate::utils::command::CommandExecutor;
use async_trait::async_trait;

/// Rule operations keyed by (table, chain, ordered token sequence).
#[async_trait]
pub trait PacketFilter: Send + Sync {
    async fn exists(&self, table: &str, chain: &str, rule: &[String]) -> NetworkResult<bool>;

    /// Add the rule at the tail of the chain.
    async fn append(&self, table: &str, chain: &str, rule: &[String]) -> NetworkResult<()>;

    /// Insert the rule at 1-based `position` in the chain.
    async fn insert(
        &self,
        table: &str,
        chain: &str,
        position: u32,
        rule: &[String],
    ) -> NetworkResult<()>;

    async fn delete(&self, table: &str, chain: &str, rule: &[String]) -> NetworkResult<()>;
}

/// Drives `iptables`, waiting on the xtables lock so concurrent
/// invocations from other tools do not fail spuriously.
pub struct Iptables {
    binary: String,
}

impl Iptables {
    pub fn new() -> Self {
        Self::with_binary("iptables")
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn args(table: &str, op: &str, chain: &str, position: Option<u32>, rule: &[String]) -> Vec<String> {
        let mut args = vec![
            "-w".to_string(),
            "-t".to_string(),
            table.to_string(),
            op.to_string(),
            chain.to_string(),
        ];
        if let Some(pos) = position {
            args.push(pos.to_string());
        }
        args.extend(rule.iter().cloned());
        args
    }

    async fn run(&self, args: Vec<String>) -> NetworkResult<()> {
        let result = CommandExecutor::execute(&self.binary, &args).await?;
        if !result.success {
            return Err(NetworkError::Command {
                cmd: CommandExecutor::render(&self.binary, &args),
                stderr: result.stderr,
            });
        }
        Ok(())
    }
}

impl Default for Iptables {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PacketFilter for Iptables {
    async fn exists(&self, table: &str, chain: &str, rule: &[String]) -> NetworkResult<bool> {
        let args = Self::args(table, "-C", chain, None, rule);
        let result = CommandExecutor::execute(&self.binary, &args).await?;
        match result.exit_code {
            Some(0) => Ok(true),
            // iptables -C exits 1 when no matching rule is present
            Some(1) => Ok(false),
            _ => Err(NetworkError::Command {
                cmd: CommandExecutor::render(&self.binary, &args),
                stderr: result.stderr,
            }),
        }
    }

    async fn append(&self, table: &str, chain: &str, rule: &[String]) -> NetworkResult<()> {
        self.run(Self::args(table, "-A", chain, None, rule)).await
    }

    async fn insert(
        &self,
        table: &str,
        chain: &str,
        position: u32,
        rule: &[String],
    ) -> NetworkResult<()> {
        self.run(Self::args(table, "-I", chain, Some(position), rule))
            .await
    }

    async fn delete(&self, table: &str, chain: &str, rule: &[String]) -> NetworkResult<()> {
        self.run(Self::args(table, "-D", chain, None, rule)).await
    }
}
