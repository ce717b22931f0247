//! SOCKS5 protocol constants
//!
//! Defines all constants used in the SOCKS5 protocol implementation.

/// SOCKS5 protocol version
pub const SOCKS5_VERSION: u8 = 0x05;

/// SOCKS4 protocol version (only recognised, never served)
pub const SOCKS4_VERSION: u8 = 0x04;

// Authentication methods
/// No authentication required
pub const SOCKS5_AUTH_METHOD_NONE: u8 = 0x00;

// Commands
/// TCP CONNECT command
pub const SOCKS5_CMD_TCP_CONNECT: u8 = 0x01;
/// TCP BIND command (not implemented)
pub const SOCKS5_CMD_TCP_BIND: u8 = 0x02;
/// UDP ASSOCIATE command (not implemented)
pub const SOCKS5_CMD_UDP_ASSOCIATE: u8 = 0x03;

// Address types
/// IPv4 address
pub const SOCKS5_ADDR_TYPE_IPV4: u8 = 0x01;
/// Domain name
pub const SOCKS5_ADDR_TYPE_DOMAIN: u8 = 0x03;
/// IPv6 address
pub const SOCKS5_ADDR_TYPE_IPV6: u8 = 0x04;

// Reserved byte
/// Reserved byte value (always 0x00)
pub const SOCKS5_RESERVED: u8 = 0x00;

// Fixed frame sizes
/// VER + NMETHODS
pub const GREETING_LEN: usize = 2;
/// VER + CMD + RSV + ATYP
pub const REQUEST_HEADER_LEN: usize = 4;
/// VER + REP + RSV + ATYP + 4-byte address + port
pub const SERVER_RESPONSE_LEN: usize = 10;
/// IPv4 address + port
pub const IPV4_PAYLOAD_LEN: usize = 4 + 2;
/// IPv6 address + port
pub const IPV6_PAYLOAD_LEN: usize = 16 + 2;

/// Maximum domain name length
pub const MAX_DOMAIN_LEN: usize = 255;

/// Largest chunk moved per read during the relay phase
pub const RELAY_CHUNK_SIZE: usize = 4096;
