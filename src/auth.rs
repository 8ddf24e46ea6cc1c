//! SOCKS5 authentication: method negotiation and the concrete methods.
//!
//! The method set is closed (NoAuth and UserPass), so authenticators are a
//! tagged enum rather than a trait object; `0xFF` exists only as the
//! no-acceptable-method reply.

use crate::config::CredentialStore;
use crate::consts::*;
use crate::error::SocksError;
use anyhow::{Context, Result};
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Outcome of a successful method exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// Method code that authenticated this session.
    pub method: u8,
    /// Username presented by the client, when the method carries one.
    pub username: Option<String>,
}

/// A SOCKS5 authentication method.
#[derive(Debug, Clone)]
pub enum Authenticator {
    /// No authentication required (method 0x00).
    NoAuth,
    /// Username/password per RFC 1929 (method 0x02), checked against a
    /// credential store.
    UserPass(CredentialStore),
}

impl Authenticator {
    /// Wire code identifying this method during negotiation.
    pub fn method_code(&self) -> u8 {
        match self {
            Authenticator::NoAuth => SOCKS5_AUTH_METHOD_NONE,
            Authenticator::UserPass(_) => SOCKS5_AUTH_METHOD_PASSWORD,
        }
    }

    /// Run the method-specific exchange on the stream.
    ///
    /// Writes the method-selection reply, performs any sub-negotiation, and
    /// yields an [`AuthContext`] on success. Failure closes the session.
    pub async fn authenticate<S>(&self, stream: &mut S) -> Result<AuthContext>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match self {
            Authenticator::NoAuth => {
                stream
                    .write_all(&[SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NONE])
                    .await?;
                stream.flush().await?;
                Ok(AuthContext {
                    method: SOCKS5_AUTH_METHOD_NONE,
                    username: None,
                })
            }
            Authenticator::UserPass(store) => {
                stream
                    .write_all(&[SOCKS5_VERSION, SOCKS5_AUTH_METHOD_PASSWORD])
                    .await?;
                stream.flush().await?;
                authenticate_userpass(stream, store).await
            }
        }
    }
}

/// RFC 1929 username/password sub-negotiation.
///
/// ```text
/// +----+------+----------+------+----------+
/// |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
/// +----+------+----------+------+----------+
/// | 1  |  1   | 0 to 255 |  1   | 0 to 255 |
/// +----+------+----------+------+----------+
/// ```
///
/// A zero ULEN is an empty username, looked up against the empty key.
async fn authenticate_userpass<S>(stream: &mut S, store: &CredentialStore) -> Result<AuthContext>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 2];
    stream
        .read_exact(&mut header)
        .await
        .context("failed to read auth sub-negotiation header")?;

    let version = header[0];
    if version != SOCKS5_AUTH_VERSION {
        return Err(SocksError::InvalidAuthVersion(version).into());
    }

    let mut username = vec![0u8; header[1] as usize];
    stream
        .read_exact(&mut username)
        .await
        .context("failed to read username")?;
    let username = String::from_utf8(username).context("invalid UTF-8 in username")?;

    let mut len = [0u8; 1];
    stream
        .read_exact(&mut len)
        .await
        .context("failed to read password length")?;
    let mut password = vec![0u8; len[0] as usize];
    stream
        .read_exact(&mut password)
        .await
        .context("failed to read password")?;
    let password = String::from_utf8(password).context("invalid UTF-8 in password")?;

    if store.valid(&username, &password) {
        stream
            .write_all(&[SOCKS5_AUTH_VERSION, SOCKS5_AUTH_SUCCESS])
            .await?;
        stream.flush().await?;
        debug!("authenticated user {:?}", username);
        Ok(AuthContext {
            method: SOCKS5_AUTH_METHOD_PASSWORD,
            username: Some(username),
        })
    } else {
        stream
            .write_all(&[SOCKS5_AUTH_VERSION, SOCKS5_AUTH_FAILURE])
            .await?;
        stream.flush().await?;
        Err(SocksError::AuthFailed(username).into())
    }
}

/// SOCKS5 method negotiation.
///
/// Reads the client's method list (the version byte is already consumed by
/// the dispatcher), picks the first offered method with a registered
/// authenticator, and runs its exchange. With no usable method, writes
/// `05 FF` and fails.
pub async fn negotiate<S>(
    stream: &mut S,
    methods: &HashMap<u8, Authenticator>,
) -> Result<AuthContext>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut nmethods = [0u8; 1];
    stream
        .read_exact(&mut nmethods)
        .await
        .context("failed to read method count")?;

    let mut offered = vec![0u8; nmethods[0] as usize];
    stream
        .read_exact(&mut offered)
        .await
        .context("failed to read method list")?;

    for code in &offered {
        if let Some(authenticator) = methods.get(code) {
            return authenticator.authenticate(stream).await;
        }
    }

    stream
        .write_all(&[SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE])
        .await?;
    stream.flush().await?;
    Err(SocksError::NoAcceptableAuth.into())
}
