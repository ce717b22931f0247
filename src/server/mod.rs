//! SOCKS5 listener
//!
//! Binds one TCP socket (or, on Unix, a local stream socket), accepts clients
//! while the [`SessionRegistry`] has room and runs each session on its own
//! task.
//!
//! ```text
//! wait_for_capacity -> accept -> on_incoming_connection -> register -> spawn
//!        ^                                                               |
//!        +------------------- slot dropped when session ends <-----------+
//! ```

mod events;
mod listener;
mod registry;

pub use events::{ChannelSink, EventSink, EventStream, NoopSink, ProxyEvent};
#[cfg(unix)]
pub use listener::LocalListener;
pub use listener::{Listener, LOCAL_PEER_NAME};
pub use registry::{Capacity, SessionRegistry, SessionSlot, MAX_CLIENTS};

use crate::config::ServerConfig;
use crate::error::LoopholeError;
use crate::socks::serve_session;
use crate::transport::{Connector, SocketOpts, TcpConnector};
use std::io;
use std::net::SocketAddr;
#[cfg(unix)]
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Pause after a failed `accept()` before trying again
const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(100);

/// A bound SOCKS5 listener
#[derive(Debug)]
pub struct Socks5Server<C: Connector = TcpConnector, L: Listener = TcpListener> {
    listener: L,
    connector: Arc<C>,
    registry: Arc<SessionRegistry>,
    sink: Arc<dyn EventSink>,
}

impl Socks5Server<TcpConnector> {
    /// Bind the listen socket described by `config`.
    ///
    /// A bind failure is logged once and returned; nothing is retried.
    pub async fn bind(
        config: &ServerConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, LoopholeError> {
        let connector =
            TcpConnector::new().with_socket_opts(SocketOpts::from_tcp_config(&config.tcp));
        Self::bind_with_connector(config, connector, sink).await
    }
}

#[cfg(unix)]
impl Socks5Server<TcpConnector, LocalListener> {
    /// Listen on the local stream socket at `path` instead of TCP.
    ///
    /// Outbound sockets still take their options from `config`. Success
    /// replies carry port 0.
    pub async fn bind_local(
        path: impl AsRef<Path>,
        config: &ServerConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, LoopholeError> {
        let connector =
            TcpConnector::new().with_socket_opts(SocketOpts::from_tcp_config(&config.tcp));
        Self::bind_local_with_connector(path, connector, sink).await
    }
}

#[cfg(unix)]
impl<C: Connector> Socks5Server<C, LocalListener> {
    /// Listen on a local stream socket with a custom outbound connector
    pub async fn bind_local_with_connector(
        path: impl AsRef<Path>,
        connector: C,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, LoopholeError> {
        let path = path.as_ref();
        let listener = match LocalListener::bind(path).await {
            Ok(listener) => listener,
            Err(source) => {
                error!(
                    "Failed to listen on local socket {}: {}",
                    path.display(),
                    source
                );
                return Err(LoopholeError::BindLocal {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        info!("SOCKS5 proxy listening on local socket {}", path.display());

        Ok(Self::with_listener(listener, connector, sink))
    }
}

impl<C: Connector> Socks5Server<C, TcpListener> {
    /// Bind with a custom outbound connector
    pub async fn bind_with_connector(
        config: &ServerConfig,
        connector: C,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, LoopholeError> {
        let addr = config.listen_addr();
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(source) => {
                error!("Failed to bind SOCKS5 listener on {}: {}", addr, source);
                return Err(LoopholeError::Bind { addr, source });
            }
        };

        info!("SOCKS5 proxy listening on {}", listener.local_addr()?);

        Ok(Self::with_listener(listener, connector, sink))
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl<C: Connector, L: Listener> Socks5Server<C, L> {
    /// Serve clients of an already bound listener
    pub fn with_listener(listener: L, connector: C, sink: Arc<dyn EventSink>) -> Self {
        Socks5Server {
            listener,
            connector: Arc::new(connector),
            registry: Arc::new(SessionRegistry::new(sink.clone())),
            sink,
        }
    }

    /// Port reported in success replies: the bound TCP port, useful when
    /// port 0 was requested, or 0 on a local socket
    pub fn port(&self) -> u16 {
        self.listener.relay_port()
    }

    /// Number of live sessions
    pub fn live_count(&self) -> usize {
        self.registry.live_count()
    }

    /// Shared handle on the session registry
    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    /// Accept clients until `shutdown_rx` fires.
    ///
    /// Sessions already running are left to finish on their own.
    pub async fn run(
        self,
        mut shutdown_rx: broadcast::Receiver<bool>,
    ) -> Result<(), LoopholeError> {
        loop {
            let capacity = tokio::select! {
                capacity = self.registry.wait_for_capacity() => match capacity {
                    Some(capacity) => capacity,
                    None => break,
                },
                _ = shutdown_rx.recv() => break,
            };

            let (stream, peer) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        drop(capacity);
                        tokio::time::sleep(ACCEPT_ERROR_DELAY).await;
                        continue;
                    }
                },
                _ = shutdown_rx.recv() => break,
            };

            self.spawn_session(stream, peer, capacity);
        }

        info!("SOCKS5 proxy on {} shutting down", self.listener.describe());
        self.registry.close();
        Ok(())
    }

    fn spawn_session(&self, stream: L::Stream, peer: String, capacity: Capacity) {
        debug!("Accepted connection from {}", peer);
        self.sink.on_incoming_connection(&peer);
        let slot = self.registry.register(capacity);

        let connector = self.connector.clone();
        let sink = self.sink.clone();
        let relay_port = self.port();

        tokio::spawn(async move {
            let _slot = slot;
            match serve_session(stream, connector.as_ref(), relay_port, sink.as_ref()).await {
                Ok(stats) => debug!(
                    "Session from {} finished: sent {} received {}",
                    peer, stats.sent, stats.received
                ),
                Err(e) => debug!("Session from {} ended: {}", peer, e),
            }
        });
    }
}
