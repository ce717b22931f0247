//! # Loophole - Local SOCKS5 Proxy Engine
//!
//! Loophole listens on a local TCP port (or a Unix local socket) and speaks
//! the server side of SOCKS5 (RFC 1928), limited to the "no authentication"
//! method and the CONNECT command. Every accepted client gets its own session that negotiates,
//! opens an outbound TCP connection and then relays bytes in both directions
//! until either side closes.
//!
//! ## Features
//!
//! - **IPv4, IPv6 and domain targets**: domains are resolved on the proxy side
//! - **Bounded concurrency**: at most [`server::MAX_CLIENTS`] live sessions;
//!   further clients wait in the listen backlog
//! - **Observable**: lifecycle and traffic events go to an injected
//!   [`server::EventSink`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use loophole::config::ServerConfig;
//! use loophole::server::{NoopSink, Socks5Server};
//! use std::sync::Arc;
//! use tokio::sync::broadcast;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = Socks5Server::bind(&ServerConfig::default(), Arc::new(NoopSink)).await?;
//!     println!("listening on port {}", server.port());
//!
//!     let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
//!     server.run(shutdown_rx).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! SOCKS5 Client -> Socks5Server -> ClientSession -> Connector -> Target
//!                        |               |
//!                 SessionRegistry      Relay ---> EventSink
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod server;
pub mod socks;
pub mod stats;
pub mod transport;

// Re-export commonly used items
pub use config::{load_config, Config, ServerConfig};
pub use error::{ConnectError, LoopholeError, Socks5Error, Socks5ReplyCode};
pub use server::{EventSink, Socks5Server};

/// Version of the Loophole library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name() {
        assert_eq!(NAME, "loophole");
    }
}
