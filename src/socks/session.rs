//! Per-connection SOCKS5 session
//!
//! [`Handshake`] is the negotiation state machine. It never touches a socket:
//! it is fed whatever bytes have arrived so far and writes its replies into
//! an output buffer. Every state first checks that its whole frame is
//! buffered and consumes nothing otherwise, so calling
//! [`Handshake::advance`] again after a spurious wake-up is a no-op.
//!
//! [`ClientSession`] drives a handshake over a real stream, opens the
//! outbound connection through a [`Connector`] and finally hands both
//! streams to the [`Relay`].
//!
//! # Protocol Flow
//!
//! ```text
//! Greeting -> AuthMethods -> ConnectionRequest -> ConnectionAddress -> Proxy
//!     \___________\________________\___________________\________\-> Closed
//! ```

use super::codec::{
    looks_like_socks, peek_address, ClientGreeting, ConnectionRequest, ServerChoice,
    ServerResponse,
};
use super::consts::*;
use super::relay::{Relay, RelayStats};
use super::types::TargetAddr;
use crate::error::{ConnectError, LoopholeError, Socks5Error, Socks5ReplyCode};
use crate::server::EventSink;
use crate::transport::Connector;
use bytes::{Buf, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Client bytes buffered while the outbound connect is pending
const MAX_PENDING_BYTES: usize = 64 * 1024;

/// Negotiation state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for version and method count
    Greeting,
    /// Waiting for the offered method bytes
    AuthMethods,
    /// Waiting for the request header
    ConnectionRequest,
    /// Waiting for the destination, then for the outbound connect
    ConnectionAddress,
    /// Relaying bytes
    Proxy,
    /// Terminal
    Closed,
}

/// Result of one [`Handshake::advance`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Not enough bytes buffered for the current state
    NeedMore,
    /// Destination parsed; the caller must start connecting to it
    Connect(TargetAddr),
    /// A connect was already requested and has not resolved yet
    AwaitingConnect,
    /// Negotiation finished, the session relays
    Proxy,
    /// The session is closed
    Closed,
}

/// SOCKS5 negotiation state machine
#[derive(Debug, Clone)]
pub struct Handshake {
    state: SessionState,
    auth_method_count: u8,
    address_type: u8,
    target: Option<TargetAddr>,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    /// Start in [`SessionState::Greeting`]
    pub fn new() -> Self {
        Handshake {
            state: SessionState::Greeting,
            auth_method_count: 0,
            address_type: 0,
            target: None,
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Destination, once parsed
    pub fn target(&self) -> Option<&TargetAddr> {
        self.target.as_ref()
    }

    /// Consume as much of `input` as the current state allows.
    ///
    /// Replies are appended to `output`. On a protocol violation the
    /// matching error reply (if any) is appended as well, the handshake moves
    /// to [`SessionState::Closed`] and the violation is returned.
    pub fn advance(
        &mut self,
        input: &mut BytesMut,
        output: &mut BytesMut,
    ) -> Result<Progress, Socks5Error> {
        loop {
            match self.state {
                SessionState::Greeting => {
                    let Some(greeting) = ClientGreeting::peek(input) else {
                        return Ok(Progress::NeedMore);
                    };
                    if greeting.version != SOCKS5_VERSION {
                        if looks_like_socks(input) {
                            debug!("Rejecting SOCKS{} client", greeting.version);
                        } else {
                            debug!(
                                "Peer does not speak SOCKS, first byte {:#04x}",
                                greeting.version
                            );
                        }
                        let err = Socks5Error::UnsupportedVersion(greeting.version);
                        return Err(self.fail(err, output));
                    }
                    input.advance(GREETING_LEN);
                    self.auth_method_count = greeting.method_count;
                    self.state = SessionState::AuthMethods;
                }

                SessionState::AuthMethods => {
                    // The offered methods are irrelevant, "no auth" is always chosen
                    let count = self.auth_method_count as usize;
                    if input.len() < count {
                        return Ok(Progress::NeedMore);
                    }
                    input.advance(count);
                    ServerChoice::NO_AUTH.encode(output);
                    self.state = SessionState::ConnectionRequest;
                }

                SessionState::ConnectionRequest => {
                    let Some(request) = ConnectionRequest::peek(input) else {
                        return Ok(Progress::NeedMore);
                    };
                    if let Err(e) = request.validate() {
                        return Err(self.fail(e, output));
                    }
                    input.advance(REQUEST_HEADER_LEN);
                    self.address_type = request.address_type;
                    self.state = SessionState::ConnectionAddress;
                }

                SessionState::ConnectionAddress => {
                    if self.target.is_some() {
                        return Ok(Progress::AwaitingConnect);
                    }
                    return match peek_address(self.address_type, input) {
                        Ok(None) => Ok(Progress::NeedMore),
                        Ok(Some((target, used))) => {
                            input.advance(used);
                            self.target = Some(target.clone());
                            Ok(Progress::Connect(target))
                        }
                        Err(e) => Err(self.fail(e, output)),
                    };
                }

                SessionState::Proxy => return Ok(Progress::Proxy),
                SessionState::Closed => return Ok(Progress::Closed),
            }
        }
    }

    /// The outbound connection is up: reply success and enter the relay phase.
    ///
    /// Returns false (and writes nothing) unless a connect was pending.
    pub fn connected(&mut self, relay_port: u16, output: &mut BytesMut) -> bool {
        if self.state != SessionState::ConnectionAddress || self.target.is_none() {
            return false;
        }
        ServerResponse::success(relay_port).encode(output);
        self.state = SessionState::Proxy;
        true
    }

    /// The outbound connection failed: reply with the mapped code unless the
    /// client was already told the tunnel is up, then close.
    pub fn connect_failed(&mut self, err: &ConnectError, output: &mut BytesMut) {
        if self.state == SessionState::ConnectionAddress {
            ServerResponse::failure(Socks5ReplyCode::from(err)).encode(output);
        }
        self.state = SessionState::Closed;
    }

    /// Record a transport failure or disconnect
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    fn fail(&mut self, err: Socks5Error, output: &mut BytesMut) -> Socks5Error {
        match self.state {
            // A peer that does not even speak SOCKS5 gets no reply
            SessionState::Greeting | SessionState::Proxy | SessionState::Closed => {}
            _ => ServerResponse::failure(err.reply_code()).encode(output),
        }
        self.state = SessionState::Closed;
        err
    }
}

/// One accepted client connection, from greeting to teardown
#[derive(Debug)]
pub struct ClientSession<S> {
    inbound: S,
    handshake: Handshake,
    input: BytesMut,
    output: BytesMut,
    relay_port: u16,
}

impl<S> ClientSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an accepted stream. `relay_port` is reported in the success reply.
    pub fn new(inbound: S, relay_port: u16) -> Self {
        ClientSession {
            inbound,
            handshake: Handshake::new(),
            input: BytesMut::with_capacity(512),
            output: BytesMut::with_capacity(SERVER_RESPONSE_LEN),
            relay_port,
        }
    }

    /// Run the session to completion.
    ///
    /// Both streams are closed when this returns, whatever the outcome.
    pub async fn run<C: Connector>(
        mut self,
        connector: &C,
        sink: &dyn EventSink,
    ) -> Result<RelayStats, LoopholeError> {
        let target = match self.negotiate().await {
            Ok(target) => target,
            Err(e) => return Err(self.abort(e).await),
        };

        debug!("SOCKS5 CONNECT request to {}", target);

        let mut outbound = match self.open_outbound(connector, &target).await {
            Ok(stream) => stream,
            Err(e) => return Err(self.abort(e).await),
        };

        self.handshake.connected(self.relay_port, &mut self.output);
        if let Err(e) = self.flush().await {
            return Err(self.abort(e.into()).await);
        }

        debug!("SOCKS5 tunnel established to {}", target);

        let mut relay = Relay::new(sink);
        let result = relay
            .run(&mut self.inbound, &mut outbound, &mut self.input)
            .await;
        self.handshake.close();

        let stats = relay.stats();
        debug!(
            "Session to {} closed: sent {} received {}",
            target, stats.sent, stats.received
        );

        let _ = outbound.shutdown().await;
        let _ = self.inbound.shutdown().await;
        result.map(|_| stats).map_err(LoopholeError::from)
    }

    /// Current negotiation state
    pub fn state(&self) -> SessionState {
        self.handshake.state()
    }

    async fn negotiate(&mut self) -> Result<TargetAddr, LoopholeError> {
        loop {
            let progress = self.handshake.advance(&mut self.input, &mut self.output);
            match progress {
                Ok(Progress::Connect(target)) => {
                    self.flush().await?;
                    return Ok(target);
                }
                Ok(Progress::NeedMore) => self.flush().await?,
                Ok(other) => {
                    return Err(LoopholeError::Io(io::Error::new(
                        io::ErrorKind::Other,
                        format!("unexpected handshake progress: {:?}", other),
                    )));
                }
                Err(e) => return Err(e.into()),
            }

            let n = self.inbound.read_buf(&mut self.input).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "client closed during negotiation",
                )
                .into());
            }
        }
    }

    async fn open_outbound<C: Connector>(
        &mut self,
        connector: &C,
        target: &TargetAddr,
    ) -> Result<C::Stream, LoopholeError> {
        let connect = connector.connect(target);
        tokio::pin!(connect);

        // Keep watching the client so a disconnect cancels the connect
        let result = loop {
            tokio::select! {
                result = &mut connect => break result,
                read = self.inbound.read_buf(&mut self.input), if self.input.len() < MAX_PENDING_BYTES => {
                    if read? == 0 {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "client closed while connecting",
                        )
                        .into());
                    }
                }
            }
        };

        match result {
            Ok(stream) => Ok(stream),
            Err(e) => {
                debug!("Failed to connect to {}: {}", target, e);
                self.handshake.connect_failed(&e, &mut self.output);
                Err(e.into())
            }
        }
    }

    async fn flush(&mut self) -> io::Result<()> {
        if self.output.is_empty() {
            return Ok(());
        }
        self.inbound.write_all(&self.output).await?;
        self.output.clear();
        self.inbound.flush().await
    }

    /// Best-effort delivery of any pending error reply, then close
    async fn abort(&mut self, err: LoopholeError) -> LoopholeError {
        self.handshake.close();
        let _ = self.flush().await;
        let _ = self.inbound.shutdown().await;
        err
    }
}

/// Serve one accepted client connection to completion
pub async fn serve_session<S, C>(
    inbound: S,
    connector: &C,
    relay_port: u16,
    sink: &dyn EventSink,
) -> Result<RelayStats, LoopholeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    C: Connector,
{
    ClientSession::new(inbound, relay_port).run(connector, sink).await
}
