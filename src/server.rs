//! TCP listener and per-connection dispatch.
//!
//! One byte of version sniffing routes each accepted connection to the
//! SOCKS4a or SOCKS5 engine; v5 connections run method negotiation first.

use crate::auth::{negotiate, Authenticator};
use crate::config::Config;
use crate::consts::*;
use crate::error::SocksError;
use crate::{socks4, socks5};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

/// The SOCKS server: immutable configuration plus the method-code map
/// built once at construction.
#[derive(Debug, Clone)]
pub struct SocksServer {
    config: Arc<Config>,
    auth_methods: Arc<HashMap<u8, Authenticator>>,
}

impl SocksServer {
    /// Build a server, filling in configuration defaults.
    ///
    /// With no authenticators configured, the default set is UserPass when
    /// credentials are present and NoAuth otherwise.
    pub fn new(mut config: Config) -> Self {
        if config.authenticators.is_empty() {
            config.authenticators = match &config.credentials {
                Some(store) => vec![Authenticator::UserPass(store.clone())],
                None => vec![Authenticator::NoAuth],
            };
        }

        let auth_methods = config
            .authenticators
            .iter()
            .map(|a| (a.method_code(), a.clone()))
            .collect();

        SocksServer {
            config: Arc::new(config),
            auth_methods: Arc::new(auth_methods),
        }
    }

    /// Bind a TCP listener on `bind_addr` and serve until a fatal error.
    pub async fn listen_and_serve(&self, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("failed to bind {}", bind_addr))?;
        info!("Serving on {}", bind_addr);
        self.serve(listener).await
    }

    /// Accept loop. Each connection runs in its own task; accept errors
    /// are fatal.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener.accept().await.context("accept failed")?;
            info!("Received connection from {}", peer);

            let config = self.config.clone();
            let auth_methods = self.auth_methods.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer, &config, &auth_methods).await {
                    debug!("connection from {} ended with error: {:#}", peer, e);
                }
            });
        }
    }

    /// The configuration this server was built with, defaults applied.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    config: &Config,
    auth_methods: &HashMap<u8, Authenticator>,
) -> Result<()> {
    let mut version = [0u8; 1];
    stream
        .read_exact(&mut version)
        .await
        .context("failed to read socks version")?;

    match version[0] {
        SOCKS4_VERSION => socks4::handle(stream, config).await,
        SOCKS5_VERSION => {
            let ctx = negotiate(&mut stream, auth_methods).await?;
            debug!("{} authenticated with method {}", peer, ctx.method);
            socks5::handle(stream, config).await
        }
        other => Err(SocksError::UnsupportedVersion(other).into()),
    }
}
