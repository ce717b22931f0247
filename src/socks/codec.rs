//! SOCKS5 wire codec
//!
//! Byte-exact encoders and decoders for the fixed SOCKS5 frames. Decoders
//! only ever look at a borrowed slice: they report how many bytes a complete
//! frame occupies and leave consumption to the caller, so re-running a decode
//! on a buffer that is still filling up is always harmless.
//!
//! ```text
//! greeting      +----+----------+----------+
//!               |VER | NMETHODS | METHODS  |
//!               | 1  |    1     | 1 to 255 |
//!               +----+----------+----------+
//!
//! request       +----+-----+-------+------+----------+----------+
//!               |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
//!               | 1  |  1  | X'00' |  1   | Variable |    2     |
//!               +----+-----+-------+------+----------+----------+
//!
//! reply         +----+-----+-------+------+----------+----------+
//!               |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
//!               | 1  |  1  | X'00' | X'01'|    4     |    2     |
//!               +----+-----+-------+------+----------+----------+
//! ```

use super::consts::*;
use super::types::{SocksCommand, TargetAddr};
use crate::error::{Socks5Error, Socks5ReplyCode};
use bytes::BufMut;
use std::net::{Ipv4Addr, Ipv6Addr};

/// First message sent by a client: version and number of auth methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientGreeting {
    /// Protocol version, must be 5
    pub version: u8,
    /// Number of method bytes that follow
    pub method_count: u8,
}

impl ClientGreeting {
    /// Decode a greeting if enough bytes are buffered
    pub fn peek(src: &[u8]) -> Option<Self> {
        if src.len() < GREETING_LEN {
            return None;
        }
        Some(ClientGreeting {
            version: src[0],
            method_count: src[1],
        })
    }

    /// Encode the greeting (without the method list)
    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_u8(self.version);
        dst.put_u8(self.method_count);
    }
}

/// Method selected by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerChoice {
    /// Selected authentication method
    pub method: u8,
}

impl ServerChoice {
    /// The only choice this proxy ever makes
    pub const NO_AUTH: ServerChoice = ServerChoice {
        method: SOCKS5_AUTH_METHOD_NONE,
    };

    /// Encode the two-byte choice
    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_u8(SOCKS5_VERSION);
        dst.put_u8(self.method);
    }
}

/// Fixed four-byte header of a connection request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionRequest {
    /// Protocol version, must be 5
    pub version: u8,
    /// Requested command
    pub command: u8,
    /// Reserved, must be 0
    pub reserved: u8,
    /// Type of the address payload that follows
    pub address_type: u8,
}

impl ConnectionRequest {
    /// Header for a CONNECT to the given target
    pub fn connect(target: &TargetAddr) -> Self {
        ConnectionRequest {
            version: SOCKS5_VERSION,
            command: SOCKS5_CMD_TCP_CONNECT,
            reserved: SOCKS5_RESERVED,
            address_type: target.addr_type(),
        }
    }

    /// Decode a request header if enough bytes are buffered
    pub fn peek(src: &[u8]) -> Option<Self> {
        if src.len() < REQUEST_HEADER_LEN {
            return None;
        }
        Some(ConnectionRequest {
            version: src[0],
            command: src[1],
            reserved: src[2],
            address_type: src[3],
        })
    }

    /// Check version, reserved byte and command, in that order
    pub fn validate(&self) -> Result<SocksCommand, Socks5Error> {
        if self.version != SOCKS5_VERSION {
            return Err(Socks5Error::UnsupportedVersion(self.version));
        }
        if self.reserved != SOCKS5_RESERVED {
            return Err(Socks5Error::InvalidReserved(self.reserved));
        }
        match SocksCommand::from_byte(self.command) {
            Some(SocksCommand::Connect) => Ok(SocksCommand::Connect),
            _ => Err(Socks5Error::CommandNotSupported(self.command)),
        }
    }

    /// Encode the header
    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_u8(self.version);
        dst.put_u8(self.command);
        dst.put_u8(self.reserved);
        dst.put_u8(self.address_type);
    }
}

/// Encode a full request: header followed by the address payload
pub fn encode_request<B: BufMut>(command: SocksCommand, target: &TargetAddr, dst: &mut B) {
    dst.put_u8(SOCKS5_VERSION);
    dst.put_u8(command.to_byte());
    dst.put_u8(SOCKS5_RESERVED);
    target.encode(dst);
}

/// Decode the address payload that follows a request header.
///
/// Returns `Ok(None)` while the payload is incomplete, otherwise the target
/// and the number of bytes it occupies.
pub fn peek_address(
    address_type: u8,
    src: &[u8],
) -> Result<Option<(TargetAddr, usize)>, Socks5Error> {
    match address_type {
        SOCKS5_ADDR_TYPE_IPV4 => {
            if src.len() < IPV4_PAYLOAD_LEN {
                return Ok(None);
            }
            let ip = Ipv4Addr::new(src[0], src[1], src[2], src[3]);
            let port = u16::from_be_bytes([src[4], src[5]]);
            Ok(Some((TargetAddr::ipv4(ip, port), IPV4_PAYLOAD_LEN)))
        }

        SOCKS5_ADDR_TYPE_DOMAIN => {
            let Some(&len) = src.first() else {
                return Ok(None);
            };
            let len = len as usize;
            if len == 0 {
                return Err(Socks5Error::InvalidDomain("empty domain name".to_string()));
            }
            let total = 1 + len + 2;
            if src.len() < total {
                return Ok(None);
            }
            let raw = &src[1..1 + len];
            let domain = std::str::from_utf8(raw).map_err(|_| {
                Socks5Error::InvalidDomain(String::from_utf8_lossy(raw).into_owned())
            })?;
            let port = u16::from_be_bytes([src[1 + len], src[2 + len]]);
            Ok(Some((TargetAddr::try_domain(domain, port)?, total)))
        }

        SOCKS5_ADDR_TYPE_IPV6 => {
            if src.len() < IPV6_PAYLOAD_LEN {
                return Ok(None);
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&src[..16]);
            let port = u16::from_be_bytes([src[16], src[17]]);
            Ok(Some((TargetAddr::ipv6(Ipv6Addr::from(octets), port), IPV6_PAYLOAD_LEN)))
        }

        other => Err(Socks5Error::AddressTypeNotSupported(other)),
    }
}

/// Reply to a connection request
///
/// The bound address is always reported as IPv4 `0.0.0.0`; only the port
/// carries information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerResponse {
    /// Reply code
    pub reply: Socks5ReplyCode,
    /// Port reported in BND.PORT
    pub port: u16,
}

impl ServerResponse {
    /// Successful reply carrying the relay port
    pub fn success(port: u16) -> Self {
        ServerResponse {
            reply: Socks5ReplyCode::Succeeded,
            port,
        }
    }

    /// Failure reply, port zero
    pub fn failure(reply: Socks5ReplyCode) -> Self {
        ServerResponse { reply, port: 0 }
    }

    /// Encode the ten-byte reply
    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_u8(SOCKS5_VERSION);
        dst.put_u8(self.reply.into());
        dst.put_u8(SOCKS5_RESERVED);
        dst.put_u8(SOCKS5_ADDR_TYPE_IPV4);
        dst.put_u32(0);
        dst.put_u16(self.port);
    }

    /// Decode a reply if enough bytes are buffered
    pub fn peek(src: &[u8]) -> Result<Option<Self>, Socks5Error> {
        if src.len() < SERVER_RESPONSE_LEN {
            return Ok(None);
        }
        if src[0] != SOCKS5_VERSION {
            return Err(Socks5Error::UnsupportedVersion(src[0]));
        }
        if src[3] != SOCKS5_ADDR_TYPE_IPV4 {
            return Err(Socks5Error::AddressTypeNotSupported(src[3]));
        }
        let reply = Socks5ReplyCode::try_from(src[1])?;
        let port = u16::from_be_bytes([src[8], src[9]]);
        Ok(Some(ServerResponse { reply, port }))
    }
}

/// Guess from the first buffered bytes whether a peer speaks SOCKS at all
pub fn looks_like_socks(src: &[u8]) -> bool {
    if src.len() < GREETING_LEN {
        return false;
    }
    src[0] == SOCKS5_VERSION || src[0] == SOCKS4_VERSION
}
