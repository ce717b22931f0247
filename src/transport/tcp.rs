//! Plain TCP connector
//!
//! Domain targets are resolved with the system resolver and every returned
//! address is tried in order; the first successful connect wins.

use super::{Connector, SocketOpts};
use crate::error::ConnectError;
use crate::socks::TargetAddr;
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::{lookup_host, TcpStream};
use tracing::{debug, warn};

/// Connector that opens real TCP connections
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    /// Socket options to apply to connections
    socket_opts: SocketOpts,
}

impl TcpConnector {
    /// Create a connector with default socket options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set socket options
    pub fn with_socket_opts(mut self, opts: SocketOpts) -> Self {
        self.socket_opts = opts;
        self
    }

    /// Socket options applied to every outbound stream
    pub fn socket_opts(&self) -> &SocketOpts {
        &self.socket_opts
    }

    async fn resolve(&self, target: &TargetAddr) -> Result<Vec<SocketAddr>, ConnectError> {
        match target {
            TargetAddr::Ip(addr) => Ok(vec![*addr]),
            TargetAddr::Domain(host, port) => {
                let addrs: Vec<SocketAddr> = lookup_host((host.as_str(), *port))
                    .await
                    .map_err(|e| {
                        debug!("Failed to resolve {}: {}", host, e);
                        ConnectError::HostNotFound(host.clone())
                    })?
                    .collect();
                if addrs.is_empty() {
                    return Err(ConnectError::HostNotFound(host.clone()));
                }
                Ok(addrs)
            }
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, target: &TargetAddr) -> Result<TcpStream, ConnectError> {
        let addrs = self.resolve(target).await?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    if let Err(e) = self.socket_opts.apply(&stream) {
                        warn!("Failed to apply socket options: {}", e);
                    }
                    debug!("TCP connection established to {}", addr);
                    return Ok(stream);
                }
                Err(e) => {
                    debug!("Connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        Err(match last_err {
            Some(e) => ConnectError::from(e),
            None => ConnectError::HostNotFound(target.to_string()),
        })
    }
}
