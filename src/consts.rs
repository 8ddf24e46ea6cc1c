//! Wire-level constants for the SOCKS4/4a and SOCKS5 protocols.

/// SOCKS4 protocol version byte.
pub const SOCKS4_VERSION: u8 = 0x04;

/// SOCKS5 protocol version byte.
pub const SOCKS5_VERSION: u8 = 0x05;

/// Version byte of a SOCKS4 reply (always zero).
pub const SOCKS4_REPLY_VERSION: u8 = 0x00;

/// SOCKS5 username/password sub-negotiation version.
pub const SOCKS5_AUTH_VERSION: u8 = 0x01;

// Authentication methods
/// No authentication required.
pub const SOCKS5_AUTH_METHOD_NONE: u8 = 0x00;
/// Username/password authentication (RFC 1929).
pub const SOCKS5_AUTH_METHOD_PASSWORD: u8 = 0x02;
/// No acceptable methods; only ever sent in replies.
pub const SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE: u8 = 0xFF;

/// Username/password sub-negotiation success status.
pub const SOCKS5_AUTH_SUCCESS: u8 = 0x00;
/// Username/password sub-negotiation failure status.
pub const SOCKS5_AUTH_FAILURE: u8 = 0x01;

// Commands (shared numbering between v4 and v5)
/// TCP CONNECT command.
pub const SOCKS_CMD_CONNECT: u8 = 0x01;
/// TCP BIND command.
pub const SOCKS_CMD_BIND: u8 = 0x02;
/// UDP ASSOCIATE command (v5 only).
pub const SOCKS_CMD_UDP_ASSOCIATE: u8 = 0x03;

// Address types (v5)
/// IPv4 address.
pub const SOCKS5_ADDR_TYPE_IPV4: u8 = 0x01;
/// Fully qualified domain name.
pub const SOCKS5_ADDR_TYPE_DOMAIN: u8 = 0x03;
/// IPv6 address.
pub const SOCKS5_ADDR_TYPE_IPV6: u8 = 0x04;

// SOCKS5 reply codes
/// Succeeded.
pub const SOCKS5_REPLY_SUCCEEDED: u8 = 0x00;
/// General SOCKS server failure.
pub const SOCKS5_REPLY_GENERAL_FAILURE: u8 = 0x01;
/// Connection not allowed by ruleset.
pub const SOCKS5_REPLY_CONNECTION_NOT_ALLOWED: u8 = 0x02;
/// Network unreachable.
pub const SOCKS5_REPLY_NETWORK_UNREACHABLE: u8 = 0x03;
/// Host unreachable.
pub const SOCKS5_REPLY_HOST_UNREACHABLE: u8 = 0x04;
/// Connection refused.
pub const SOCKS5_REPLY_CONNECTION_REFUSED: u8 = 0x05;
/// TTL expired.
pub const SOCKS5_REPLY_TTL_EXPIRED: u8 = 0x06;
/// Command not supported.
pub const SOCKS5_REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
/// Address type not supported.
pub const SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

// SOCKS4 result codes
/// Request granted.
pub const SOCKS4_REPLY_GRANTED: u8 = 90;
/// Request rejected or failed.
pub const SOCKS4_REPLY_REJECTED: u8 = 91;
/// Request rejected: server cannot connect to identd on the client.
pub const SOCKS4_REPLY_NO_IDENTD: u8 = 92;
/// Request rejected: client program and identd report different user-ids.
pub const SOCKS4_REPLY_IDENTD_MISMATCH: u8 = 93;

/// Reserved byte value in v5 requests and replies.
pub const SOCKS5_RESERVED: u8 = 0x00;

/// Maximum domain name length in a v5 request.
pub const MAX_DOMAIN_LEN: usize = 255;

/// Maximum IPv4 UDP payload: 65,535 minus 20-byte IP and 8-byte UDP headers.
pub const MAX_UDP_PAYLOAD: usize = 65_507;
