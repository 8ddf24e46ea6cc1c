//! socksd - dual-version SOCKS proxy server.
//!
//! Binds a TCP listener and serves SOCKS4/4a and SOCKS5 clients.
//! Credentials come from `SOCKS_USERS` / `SOCKS_PASSWORDS` (optionally
//! via a `.env` file in the working directory).

use anyhow::{Context, Result};
use clap::Parser;
use socksd::config::CredentialStore;
use socksd::resolver::{CustomResolver, DefaultResolver, Resolver};
use socksd::{Config, SocksServer};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Default port for the unauthenticated server.
const DEFAULT_PORT: u16 = 1080;
/// Default port when credentials are configured.
const DEFAULT_AUTH_PORT: u16 = 1081;

/// Dual-version SOCKS4a/SOCKS5 proxy server
#[derive(Parser, Debug)]
#[command(name = "socksd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Bind address
    #[arg(long, default_value = "0.0.0.0")]
    addr: String,

    /// Bind port (default 1080, or 1081 when credentials are set)
    #[arg(long)]
    port: Option<u16>,

    /// DNS server (ip:port) used for resolving destination domains
    #[arg(long)]
    dns: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A .env file in the working directory supplements the environment.
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    setup_logging(&args.log_level)?;

    let credentials = credentials_from_env()?;
    let resolver = resolver_from_args(args.dns.as_deref())?;

    let port = args.port.unwrap_or(if credentials.is_some() {
        DEFAULT_AUTH_PORT
    } else {
        DEFAULT_PORT
    });

    let mut config = Config::new().with_resolver(resolver);
    if let Some(store) = credentials {
        info!("username/password authentication enabled ({} users)", store.len());
        config = config.with_credentials(store);
    }

    let server = SocksServer::new(config);
    let bind_addr = format!("{}:{}", args.addr, port);

    tokio::select! {
        result = server.listen_and_serve(&bind_addr) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    }
}

/// Build the credential store from `SOCKS_USERS` / `SOCKS_PASSWORDS`.
///
/// With neither variable set the server runs unauthenticated; with
/// either one set, both must be non-empty parallel lists.
fn credentials_from_env() -> Result<Option<CredentialStore>> {
    let users = std::env::var("SOCKS_USERS").unwrap_or_default();
    let passwords = std::env::var("SOCKS_PASSWORDS").unwrap_or_default();

    if users.is_empty() && passwords.is_empty() {
        return Ok(None);
    }
    CredentialStore::from_lists(&users, &passwords).map(Some)
}

fn resolver_from_args(dns: Option<&str>) -> Result<Arc<dyn Resolver>> {
    match dns {
        None => Ok(Arc::new(DefaultResolver)),
        Some(value) => {
            let addr: SocketAddr = value
                .parse()
                .context("DNS server should be in this format 'ip:port'")?;
            info!("DNS server {}", addr);
            Ok(Arc::new(CustomResolver::new(addr)))
        }
    }
}

fn setup_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
