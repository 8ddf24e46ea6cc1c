//! SOCKS5 protocol engine: request parsing, replies, CONNECT dispatch.
//!
//! Method negotiation runs in the dispatcher before this engine sees the
//! stream; UDP ASSOCIATE is delegated to [`crate::udp`].

use crate::config::Config;
use crate::consts::*;
use crate::error::SocksError;
use crate::relay::relay;
use crate::types::{SocksCommand, TargetAddr};
use crate::udp;
use anyhow::{Context, Result};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::info;

/// Parsed SOCKS5 request.
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Request {
    /// Raw command byte; kept for error reporting on unknown commands.
    pub cmd_byte: u8,
    /// Destination address.
    pub addr: TargetAddr,
}

impl Request {
    /// Command as an enum, when the byte is a known command.
    pub fn command(&self) -> Option<SocksCommand> {
        SocksCommand::from_byte(self.cmd_byte)
    }

    /// Serialize back to wire form.
    #[cfg(test)]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![SOCKS5_VERSION, self.cmd_byte, SOCKS5_RESERVED];
        bytes.extend_from_slice(&self.addr.to_bytes());
        bytes
    }
}

/// Parse a v5 request from the stream.
pub(crate) async fn parse_request<R>(reader: &mut R) -> Result<Request>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    reader
        .read_exact(&mut header)
        .await
        .context("failed to read socks5 request header")?;

    let version = header[0];
    if version != SOCKS5_VERSION {
        return Err(SocksError::UnsupportedVersion(version).into());
    }
    let cmd_byte = header[1];
    let addr = parse_address(reader, header[3]).await?;

    Ok(Request { cmd_byte, addr })
}

/// Parse the ATYP + DST.ADDR + DST.PORT portion of a request.
async fn parse_address<R>(reader: &mut R, addr_type: u8) -> Result<TargetAddr>
where
    R: AsyncRead + Unpin,
{
    match addr_type {
        SOCKS5_ADDR_TYPE_IPV4 => {
            let mut addr = [0u8; 4];
            reader.read_exact(&mut addr).await?;
            let mut port = [0u8; 2];
            reader.read_exact(&mut port).await?;
            Ok(TargetAddr::ipv4(
                Ipv4Addr::from(addr),
                u16::from_be_bytes(port),
            ))
        }

        SOCKS5_ADDR_TYPE_DOMAIN => {
            let mut len = [0u8; 1];
            reader.read_exact(&mut len).await?;
            let domain_len = len[0] as usize;
            if domain_len == 0 {
                return Err(SocksError::Protocol("empty domain name".to_string()).into());
            }

            let mut domain = vec![0u8; domain_len];
            reader.read_exact(&mut domain).await?;
            let domain = String::from_utf8(domain).context("invalid UTF-8 in domain name")?;

            let mut port = [0u8; 2];
            reader.read_exact(&mut port).await?;
            Ok(TargetAddr::domain(domain, u16::from_be_bytes(port)))
        }

        SOCKS5_ADDR_TYPE_IPV6 => {
            let mut addr = [0u8; 16];
            reader.read_exact(&mut addr).await?;
            let mut port = [0u8; 2];
            reader.read_exact(&mut port).await?;
            Ok(TargetAddr::ipv6(
                Ipv6Addr::from(addr),
                u16::from_be_bytes(port),
            ))
        }

        other => Err(SocksError::AddressTypeNotSupported(other).into()),
    }
}

/// SOCKS5 reply.
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
/// +----+-----+-------+------+----------+----------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Reply {
    pub code: u8,
    pub bind: TargetAddr,
}

impl Reply {
    /// Success reply carrying the bound endpoint.
    pub fn succeeded(bound: SocketAddr) -> Self {
        Reply {
            code: SOCKS5_REPLY_SUCCEEDED,
            bind: TargetAddr::Ip(bound),
        }
    }

    /// Failure reply; the bound field is ATYP=IPv4 `0.0.0.0:0`.
    pub fn failure(code: u8) -> Self {
        Reply {
            code,
            bind: TargetAddr::ipv4(Ipv4Addr::UNSPECIFIED, 0),
        }
    }

    /// Serialize to wire form.
    pub fn marshal(&self) -> Vec<u8> {
        let mut bytes = vec![SOCKS5_VERSION, self.code, SOCKS5_RESERVED];
        bytes.extend_from_slice(&self.bind.to_bytes());
        bytes
    }

    /// Parse a reply from its wire form.
    #[cfg(test)]
    pub async fn parse<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; 4];
        reader.read_exact(&mut header).await?;
        let bind = parse_address(reader, header[3]).await?;
        Ok(Reply {
            code: header[1],
            bind,
        })
    }
}

async fn send_reply<W>(writer: &mut W, reply: Reply) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&reply.marshal()).await?;
    writer.flush().await?;
    Ok(())
}

/// Map a dial error to the closest reply code.
fn io_error_to_reply_code(error: &std::io::Error) -> u8 {
    match error.kind() {
        std::io::ErrorKind::ConnectionRefused => SOCKS5_REPLY_CONNECTION_REFUSED,
        std::io::ErrorKind::TimedOut => SOCKS5_REPLY_HOST_UNREACHABLE,
        std::io::ErrorKind::AddrNotAvailable => SOCKS5_REPLY_HOST_UNREACHABLE,
        std::io::ErrorKind::PermissionDenied => SOCKS5_REPLY_CONNECTION_NOT_ALLOWED,
        _ => SOCKS5_REPLY_GENERAL_FAILURE,
    }
}

/// Serve one SOCKS5 session after method negotiation.
pub(crate) async fn handle(mut stream: TcpStream, config: &Config) -> Result<()> {
    let mut request = match parse_request(&mut stream).await {
        Ok(request) => request,
        Err(e) => {
            let code = match e.downcast_ref::<SocksError>() {
                Some(SocksError::AddressTypeNotSupported(_)) => {
                    SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED
                }
                _ => SOCKS5_REPLY_GENERAL_FAILURE,
            };
            let _ = send_reply(&mut stream, Reply::failure(code)).await;
            return Err(e);
        }
    };

    if let TargetAddr::Domain(domain, port) = &request.addr {
        let (domain, port) = (domain.clone(), *port);
        match config.resolver.resolve(&domain).await {
            Ok(ip) => request.addr = TargetAddr::Ip(SocketAddr::new(ip, port)),
            Err(e) => {
                send_reply(&mut stream, Reply::failure(SOCKS5_REPLY_GENERAL_FAILURE)).await?;
                return Err(e.context(SocksError::Resolution(domain)));
            }
        }
    }

    match request.command() {
        Some(SocksCommand::Connect) => handle_connect(stream, &request, config).await,
        Some(SocksCommand::UdpAssociate) => udp::handle_associate(stream, config).await,
        _ => {
            send_reply(
                &mut stream,
                Reply::failure(SOCKS5_REPLY_COMMAND_NOT_SUPPORTED),
            )
            .await?;
            Err(SocksError::CommandNotSupported(request.cmd_byte).into())
        }
    }
}

async fn handle_connect(mut stream: TcpStream, request: &Request, config: &Config) -> Result<()> {
    let upstream = match (config.dial)("tcp".to_string(), request.addr.authority()).await {
        Ok(upstream) => upstream,
        Err(e) => {
            send_reply(&mut stream, Reply::failure(io_error_to_reply_code(&e))).await?;
            return Err(anyhow::Error::from(e).context("dial failed"));
        }
    };

    let bound = upstream.local_addr()?;
    send_reply(&mut stream, Reply::succeeded(bound)).await?;

    info!("socks5 CONNECT {} established", request.addr);
    relay(stream, upstream).await?;
    Ok(())
}
