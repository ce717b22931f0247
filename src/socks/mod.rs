//! SOCKS5 protocol engine
//!
//! This module implements the server side of SOCKS5 (RFC 1928) restricted to
//! the "no authentication" method and the CONNECT command. The wire codec and
//! handshake state machine are pure; [`ClientSession`] and [`Relay`] do the
//! socket I/O.

pub mod codec;
mod consts;
pub mod relay;
pub mod session;
mod types;

pub use codec::{
    encode_request, looks_like_socks, peek_address, ClientGreeting, ConnectionRequest,
    ServerChoice, ServerResponse,
};
pub use consts::*;
pub use relay::{pump, Relay, RelayStats};
pub use session::{serve_session, ClientSession, Handshake, Progress, SessionState};
pub use types::{SocksCommand, TargetAddr};
