//! Error types for socksd.

use std::io;
use thiserror::Error;

/// Errors produced while negotiating or serving a SOCKS session.
#[derive(Error, Debug)]
pub enum SocksError {
    /// Client sent a version byte that is neither 0x04 nor 0x05.
    #[error("unacceptable socks version ({0})")]
    UnsupportedVersion(u8),

    /// None of the methods the client offered has a registered authenticator.
    #[error("no acceptable authentication method")]
    NoAcceptableAuth,

    /// Username/password exchange did not match the credential store.
    #[error("authentication failed for user {0:?}")]
    AuthFailed(String),

    /// Sub-negotiation carried an unexpected version byte.
    #[error("invalid auth sub-negotiation version ({0})")]
    InvalidAuthVersion(u8),

    /// Request carried an ATYP outside {IPv4, FQDN, IPv6}.
    #[error("address type not supported ({0})")]
    AddressTypeNotSupported(u8),

    /// Request carried a command this server does not serve.
    #[error("command not supported ({0})")]
    CommandNotSupported(u8),

    /// Malformed request or datagram framing.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// DNS resolution failed.
    #[error("resolution failed for {0:?}")]
    Resolution(String),

    /// BIND accepted a connection from the wrong peer.
    #[error("bind: connected peer {got} does not match requested {want}")]
    BindPeerMismatch {
        /// The address that actually connected to the bind listener.
        got: std::net::IpAddr,
        /// The destination address the client asked to bind for.
        want: String,
    },

    /// Underlying socket failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
