//! Accept sources for the SOCKS5 server
//!
//! Clients reach the proxy either over TCP or, on Unix, over a local stream
//! socket. Both hand out streams the session code drives the same way.

use async_trait::async_trait;
use std::fmt::Debug;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

#[cfg(unix)]
use std::path::{Path, PathBuf};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
#[cfg(unix)]
use tracing::{debug, warn};

/// Peer name reported for clients of a local socket
pub const LOCAL_PEER_NAME: &str = "local";

/// Something the server can accept client streams from
#[async_trait]
pub trait Listener: Debug + Send + Sync + 'static {
    /// Accepted client stream
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Wait for the next client. The string names the peer in events.
    async fn accept(&self) -> io::Result<(Self::Stream, String)>;

    /// Port carried in success replies, 0 when not listening on TCP
    fn relay_port(&self) -> u16;

    /// Listen address for log lines
    fn describe(&self) -> String;
}

#[async_trait]
impl Listener for TcpListener {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(TcpStream, String)> {
        let (stream, peer) = TcpListener::accept(self).await?;
        Ok((stream, peer.ip().to_string()))
    }

    fn relay_port(&self) -> u16 {
        self.local_addr().map(|addr| addr.port()).unwrap_or(0)
    }

    fn describe(&self) -> String {
        match self.local_addr() {
            Ok(addr) => addr.to_string(),
            Err(_) => "tcp".to_string(),
        }
    }
}

/// Unix stream socket listener that owns its socket file
///
/// The file is removed again when the listener is dropped.
#[cfg(unix)]
#[derive(Debug)]
pub struct LocalListener {
    inner: UnixListener,
    path: PathBuf,
}

#[cfg(unix)]
impl LocalListener {
    /// Listen on `path`.
    ///
    /// When the path is already taken the old socket file is removed and the
    /// bind is tried once more.
    pub async fn bind(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let inner = match UnixListener::bind(&path) {
            Ok(inner) => inner,
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                debug!("Replacing stale local socket {}", path.display());
                tokio::fs::remove_file(&path).await?;
                UnixListener::bind(&path)?
            }
            Err(e) => return Err(e),
        };
        Ok(LocalListener { inner, path })
    }

    /// Socket file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
#[async_trait]
impl Listener for LocalListener {
    type Stream = UnixStream;

    async fn accept(&self) -> io::Result<(UnixStream, String)> {
        let (stream, _) = self.inner.accept().await?;
        Ok((stream, LOCAL_PEER_NAME.to_string()))
    }

    fn relay_port(&self) -> u16 {
        0
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(unix)]
impl Drop for LocalListener {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove local socket {}: {}", self.path.display(), e);
            }
        }
    }
}
