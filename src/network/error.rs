/// Network-specific error type for all kernel-facing operations
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Netlink operation failed
    #[error("netlink error: {0}")]
    Netlink(#[from] rtnetlink::Error),

    /// System I/O error (socket setup, process spawn)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// External command exited with an unexpected status
    #[error("command '{cmd}' failed: {stderr}")]
    Command { cmd: String, stderr: String },

    /// Resource not found (interface, address)
    #[error("not found: {0}")]
    NotFound(String),
}

impl NetworkError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, NetworkError::NotFound(_))
    }
}

pub type NetworkResult<T> = Result<T, NetworkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_carries_stderr() {
        let err = NetworkError::Command {
            cmd: "iptables -w -t filter -A FORWARD".to_string(),
            stderr: "Permission denied (you must be root)".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "command 'iptables -w -t filter -A FORWARD' failed: Permission denied (you must be root)"
        );
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_not_found_classification() {
        assert!(NetworkError::NotFound("link mkbr0".to_string()).is_not_found());
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "netlink socket closed");
        assert!(!NetworkError::from(io).is_not_found());
    }
}
