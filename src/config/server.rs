//! Listener configuration types
//!
//! Defines where the proxy listens and how its TCP sockets are tuned.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// Default listen address: loopback only
fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

/// Default keepalive seconds
fn default_keepalive_secs() -> u64 {
    20
}

/// Default keepalive interval
fn default_keepalive_interval() -> u64 {
    8
}

fn default_nodelay() -> bool {
    true
}

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,
}

/// SOCKS5 listener configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Interface to listen on
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,

    /// Port to listen on; 0 lets the OS pick one
    #[serde(default)]
    pub port: u16,

    /// Listen on this local stream socket instead of TCP (Unix only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_socket: Option<PathBuf>,

    /// Options applied to outbound TCP sockets
    #[serde(default)]
    pub tcp: TcpConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: default_bind_addr(),
            port: 0,
            local_socket: None,
            tcp: TcpConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Full listen address
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.tcp.keepalive_interval == 0 {
            return Err("tcp.keepalive_interval must be greater than zero".to_string());
        }
        if let Some(path) = &self.local_socket {
            if path.as_os_str().is_empty() {
                return Err("local_socket must not be empty".to_string());
            }
            if cfg!(not(unix)) {
                return Err("local_socket is only supported on Unix".to_string());
            }
        }
        Ok(())
    }
}

/// Outbound TCP socket configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TcpConfig {
    /// Enable TCP_NODELAY
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,

    /// TCP keepalive timeout in seconds
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// TCP keepalive interval in seconds
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        TcpConfig {
            nodelay: default_nodelay(),
            keepalive_secs: default_keepalive_secs(),
            keepalive_interval: default_keepalive_interval(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.port, 0);
        assert_eq!(config.listen_addr(), "127.0.0.1:0".parse().unwrap());
    }

    #[test]
    fn test_tcp_config_default() {
        let config = TcpConfig::default();
        assert!(config.nodelay);
        assert_eq!(config.keepalive_secs, 20);
        assert_eq!(config.keepalive_interval, 8);
    }

    #[test]
    fn test_server_config_validate() {
        let mut config = ServerConfig::default();
        assert!(config.validate().is_ok());

        config.tcp.keepalive_interval = 0;
        assert!(config.validate().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_server_config_local_socket() {
        let mut config = ServerConfig::default();
        assert_eq!(config.local_socket, None);

        config.local_socket = Some(PathBuf::from("/tmp/loophole.sock"));
        assert!(config.validate().is_ok());

        config.local_socket = Some(PathBuf::new());
        assert!(config.validate().is_err());
    }
}
