//! Proxy lifecycle events
//!
//! The proxy core never aggregates or retains statistics itself. It calls an
//! injected [`EventSink`] synchronously whenever something observable
//! happens, and the sink decides what to keep.

use std::fmt::Debug;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Observer for proxy lifecycle events
///
/// Implementations are called from session tasks and must not block.
pub trait EventSink: Send + Sync + Debug {
    /// A new client connection was accepted from `peer`
    fn on_incoming_connection(&self, peer: &str);

    /// The number of live sessions changed
    fn on_connections_changed(&self, live: usize);

    /// Bytes were relayed; `sent` is client to target, `received` is target
    /// to client
    fn on_bytes_transferred(&self, sent: u64, received: u64);
}

/// Sink that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn on_incoming_connection(&self, _peer: &str) {}

    fn on_connections_changed(&self, _live: usize) {}

    fn on_bytes_transferred(&self, _sent: u64, _received: u64) {}
}

/// A single proxy event as delivered by [`ChannelSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyEvent {
    /// A client connected from the given address
    IncomingConnection(String),
    /// Live session count after a session started or ended
    ConnectionsChanged(usize),
    /// One relayed chunk
    BytesTransferred {
        /// Client to target
        sent: u64,
        /// Target to client
        received: u64,
    },
}

/// Stream of events produced by a [`ChannelSink`]
pub type EventStream = UnboundedReceiverStream<ProxyEvent>;

/// Sink that forwards every event into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProxyEvent>,
}

impl ChannelSink {
    /// Create a sink and the stream its events arrive on
    pub fn new() -> (Self, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelSink { tx }, UnboundedReceiverStream::new(rx))
    }

    fn emit(&self, event: ProxyEvent) {
        // A dropped receiver just means nobody is listening anymore
        let _ = self.tx.send(event);
    }
}

impl EventSink for ChannelSink {
    fn on_incoming_connection(&self, peer: &str) {
        self.emit(ProxyEvent::IncomingConnection(peer.to_string()));
    }

    fn on_connections_changed(&self, live: usize) {
        self.emit(ProxyEvent::ConnectionsChanged(live));
    }

    fn on_bytes_transferred(&self, sent: u64, received: u64) {
        self.emit(ProxyEvent::BytesTransferred { sent, received });
    }
}
