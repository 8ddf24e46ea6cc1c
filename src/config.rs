//! Server configuration: authenticators, credentials, resolver, and the
//! injected dial function.

use crate::auth::Authenticator;
use crate::resolver::{DefaultResolver, Resolver};
use anyhow::{bail, Result};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Timeout applied by the default dial function.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// A connected byte-stream endpoint returned by a dial function.
///
/// `local_addr` is needed by the reply paths, which report the bound
/// address of the upstream socket back to the client.
pub trait ProxyStream: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug {
    /// Local address of this endpoint.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl ProxyStream for TcpStream {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::local_addr(self)
    }
}

/// Boxed stream produced by [`DialFn`].
pub type BoxedStream = Box<dyn ProxyStream>;

/// Dial function: given a network name (`"tcp"`) and a `host:port`
/// authority, produce a connected endpoint.
pub type DialFn =
    Arc<dyn Fn(String, String) -> BoxFuture<'static, io::Result<BoxedStream>> + Send + Sync>;

/// Default dial: TCP connect with a 5 second timeout.
pub fn default_dial() -> DialFn {
    Arc::new(|network: String, authority: String| {
        Box::pin(async move {
            if network != "tcp" {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unsupported network {:?}", network),
                ));
            }
            let stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&authority))
                .await
                .map_err(|_| {
                    io::Error::new(io::ErrorKind::TimedOut, format!("dial {} timed out", authority))
                })??;
            Ok(Box::new(stream) as BoxedStream)
        })
    })
}

/// Plaintext username to password mapping.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    users: Arc<HashMap<String, String>>,
}

impl CredentialStore {
    /// Build from an existing map.
    pub fn new(users: HashMap<String, String>) -> Self {
        CredentialStore {
            users: Arc::new(users),
        }
    }

    /// Build from comma-separated parallel user and password lists, as
    /// carried by `SOCKS_USERS` / `SOCKS_PASSWORDS`.
    ///
    /// Both lists must be non-empty and the same length.
    pub fn from_lists(users: &str, passwords: &str) -> Result<Self> {
        if users.is_empty() || passwords.is_empty() {
            bail!("SOCKS_USERS and SOCKS_PASSWORDS must both be non-empty");
        }
        let users: Vec<&str> = users.split(',').collect();
        let passwords: Vec<&str> = passwords.split(',').collect();
        if users.len() != passwords.len() {
            bail!(
                "SOCKS_USERS has {} entries but SOCKS_PASSWORDS has {}",
                users.len(),
                passwords.len()
            );
        }
        let map = users
            .into_iter()
            .zip(passwords)
            .map(|(u, p)| (u.to_string(), p.to_string()))
            .collect();
        Ok(CredentialStore::new(map))
    }

    /// Plaintext comparison of a credential pair against the store.
    pub fn valid(&self, username: &str, password: &str) -> bool {
        self.users.get(username).map(String::as_str) == Some(password)
    }

    /// Number of stored credential pairs.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether the store holds no credentials.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Aggregated server configuration. Immutable after startup.
#[derive(Clone)]
pub struct Config {
    /// Authenticators in preference order. When empty,
    /// [`SocksServer::new`](crate::server::SocksServer::new) fills in the
    /// default set derived from `credentials`.
    pub authenticators: Vec<Authenticator>,
    /// Optional credential store backing username/password auth.
    pub credentials: Option<CredentialStore>,
    /// Name resolution for FQDN destinations.
    pub resolver: Arc<dyn Resolver>,
    /// Opens the upstream connection for CONNECT requests.
    pub dial: DialFn,
}

impl Config {
    /// Configuration with all defaults: system resolver, 5 second TCP
    /// dial, authenticators derived at server construction.
    pub fn new() -> Self {
        Config {
            authenticators: Vec::new(),
            credentials: None,
            resolver: Arc::new(DefaultResolver),
            dial: default_dial(),
        }
    }

    /// Replace the resolver.
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Install a credential store.
    pub fn with_credentials(mut self, credentials: CredentialStore) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Replace the dial function.
    pub fn with_dial(mut self, dial: DialFn) -> Self {
        self.dial = dial;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("authenticators", &self.authenticators)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}
