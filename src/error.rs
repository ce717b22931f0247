//! Error types for Loophole
//!
//! This module defines all custom error types used throughout the proxy.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Loophole operations
#[derive(Error, Debug)]
pub enum LoopholeError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The listen socket could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested
        addr: SocketAddr,
        /// Underlying socket error
        source: io::Error,
    },

    /// The local socket could not be bound
    #[error("Failed to listen on {}: {source}", .path.display())]
    BindLocal {
        /// Socket path that was requested
        path: PathBuf,
        /// Underlying socket error
        source: io::Error,
    },

    /// SOCKS5 protocol error
    #[error("SOCKS5 error: {0}")]
    Socks5(#[from] Socks5Error),

    /// Outbound connection error
    #[error("Connect error: {0}")]
    Connect(#[from] ConnectError),
}

/// SOCKS5 protocol violations
///
/// Every variant is fatal to the session that produced it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Socks5Error {
    /// Unsupported SOCKS version
    #[error("Unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    /// Reserved byte of a request was not zero
    #[error("Malformed connection request: reserved byte {0:#04x}")]
    InvalidReserved(u8),

    /// Command not supported
    #[error("Command not supported: {0}")]
    CommandNotSupported(u8),

    /// Address type not supported
    #[error("Address type not supported: {0}")]
    AddressTypeNotSupported(u8),

    /// Invalid domain name
    #[error("Invalid domain name: {0}")]
    InvalidDomain(String),

    /// Unknown reply code
    #[error("Unknown reply code: {0}")]
    UnknownReply(u8),
}

/// Reasons an outbound connection attempt can fail
///
/// This is deliberately a closed set: everything the reply mapping cannot
/// distinguish ends up in [`ConnectError::Other`].
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The destination name did not resolve, or the host or its network
    /// cannot be reached
    #[error("Host unreachable: {0}")]
    HostNotFound(String),

    /// The destination actively refused the connection
    #[error("Connection refused")]
    ConnectionRefused,

    /// Any other socket failure
    #[error("Connection failed: {0}")]
    Other(#[source] io::Error),
}

impl From<io::Error> for ConnectError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => ConnectError::ConnectionRefused,
            io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => {
                ConnectError::HostNotFound(err.to_string())
            }
            _ => ConnectError::Other(err),
        }
    }
}

/// Reply codes for SOCKS5 protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Socks5ReplyCode {
    /// Command succeeded
    Succeeded = 0x00,
    /// General SOCKS server failure
    GeneralFailure = 0x01,
    /// Connection not allowed by ruleset
    ConnectionNotAllowed = 0x02,
    /// Network unreachable
    NetworkUnreachable = 0x03,
    /// Host unreachable
    HostUnreachable = 0x04,
    /// Connection refused
    ConnectionRefused = 0x05,
    /// TTL expired
    TtlExpired = 0x06,
    /// Command not supported
    CommandNotSupported = 0x07,
    /// Address type not supported
    AddressTypeNotSupported = 0x08,
}

impl From<Socks5ReplyCode> for u8 {
    fn from(code: Socks5ReplyCode) -> Self {
        code as u8
    }
}

impl TryFrom<u8> for Socks5ReplyCode {
    type Error = Socks5Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Socks5ReplyCode::Succeeded),
            0x01 => Ok(Socks5ReplyCode::GeneralFailure),
            0x02 => Ok(Socks5ReplyCode::ConnectionNotAllowed),
            0x03 => Ok(Socks5ReplyCode::NetworkUnreachable),
            0x04 => Ok(Socks5ReplyCode::HostUnreachable),
            0x05 => Ok(Socks5ReplyCode::ConnectionRefused),
            0x06 => Ok(Socks5ReplyCode::TtlExpired),
            0x07 => Ok(Socks5ReplyCode::CommandNotSupported),
            0x08 => Ok(Socks5ReplyCode::AddressTypeNotSupported),
            other => Err(Socks5Error::UnknownReply(other)),
        }
    }
}

impl From<&ConnectError> for Socks5ReplyCode {
    fn from(err: &ConnectError) -> Self {
        match err {
            ConnectError::HostNotFound(_) => Socks5ReplyCode::HostUnreachable,
            ConnectError::ConnectionRefused => Socks5ReplyCode::ConnectionRefused,
            ConnectError::Other(_) => Socks5ReplyCode::GeneralFailure,
        }
    }
}

impl Socks5Error {
    /// Reply code that describes this violation to the client
    pub fn reply_code(&self) -> Socks5ReplyCode {
        match self {
            Socks5Error::CommandNotSupported(_) => Socks5ReplyCode::CommandNotSupported,
            Socks5Error::AddressTypeNotSupported(_) => Socks5ReplyCode::AddressTypeNotSupported,
            Socks5Error::UnsupportedVersion(_)
            | Socks5Error::InvalidReserved(_)
            | Socks5Error::InvalidDomain(_)
            | Socks5Error::UnknownReply(_) => Socks5ReplyCode::GeneralFailure,
        }
    }
}
