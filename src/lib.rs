//! # socksd - dual-version SOCKS proxy server
//!
//! A SOCKS server speaking both SOCKS4/4a and SOCKS5 on one listener.
//! The first byte of each connection selects the protocol engine:
//! SOCKS4a requests go straight to command dispatch, SOCKS5 connections
//! run method negotiation (NoAuth or username/password per RFC 1929)
//! first. CONNECT is relayed full-duplex; SOCKS4 BIND accepts one
//! inbound connection on behalf of the client; SOCKS5 UDP ASSOCIATE
//! opens an IPv4 relay socket whose lifetime is tied to the TCP control
//! connection.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use socksd::{Config, SocksServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = SocksServer::new(Config::new());
//!     server.listen_and_serve("0.0.0.0:1080").await
//! }
//! ```
//!
//! Destination names resolve through a pluggable [`Resolver`]; upstream
//! connections open through the configurable dial function, so tests can
//! swap in in-memory endpoints.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod auth;
pub mod config;
pub mod consts;
pub mod error;
pub mod relay;
pub mod resolver;
pub mod server;
pub mod types;
pub mod udp;

mod socks4;
mod socks5;
#[cfg(test)]
mod testutil;

// Re-export commonly used items
pub use auth::{AuthContext, Authenticator};
pub use config::{Config, CredentialStore};
pub use error::SocksError;
pub use resolver::{CustomResolver, DefaultResolver, Resolver};
pub use server::SocksServer;
pub use types::{SocksCommand, TargetAddr};
