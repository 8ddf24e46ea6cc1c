//! SOCKS5 UDP ASSOCIATE: datagram encapsulation and the relay loop.
//!
//! The relay socket lives exactly as long as the TCP control connection.
//! Client datagrams arrive SOCKS-encapsulated and are forwarded bare to
//! their destination; remote datagrams are wrapped in a reply header and
//! sent back to the client's UDP endpoint.

use crate::config::Config;
use crate::consts::*;
use crate::error::SocksError;
use crate::socks5::Reply;
use crate::types::TargetAddr;
use anyhow::{bail, Context, Result};
use bytes::{Buf, Bytes};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, info, warn};

/// A SOCKS5-encapsulated UDP datagram.
///
/// ```text
/// +----+------+------+----------+----------+----------+
/// |RSV | FRAG | ATYP | DST.ADDR | DST.PORT |   DATA   |
/// +----+------+------+----------+----------+----------+
/// | 2  |  1   |  1   | Variable |    2     | Variable |
/// +----+------+------+----------+----------+----------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpPacket {
    /// Fragment number; only 0 (standalone) is supported.
    pub frag: u8,
    /// Destination (request direction) or source (reply direction).
    pub addr: TargetAddr,
    /// Raw payload.
    pub data: Bytes,
}

impl UdpPacket {
    /// Wrap a payload for the reply direction.
    pub fn new(addr: TargetAddr, data: Bytes) -> Self {
        UdpPacket { frag: 0, addr, data }
    }

    /// Parse an encapsulated datagram.
    pub fn parse(data: &[u8]) -> Result<UdpPacket> {
        if data.len() < 4 {
            bail!("udp packet too short: {} bytes", data.len());
        }

        let mut buf = data;
        let rsv = buf.get_u16();
        if rsv != 0 {
            bail!("invalid RSV field: {}", rsv);
        }
        let frag = buf.get_u8();
        let atyp = buf.get_u8();

        let (addr, payload) = parse_address_from_buf(atyp, buf)?;
        Ok(UdpPacket {
            frag,
            addr,
            data: Bytes::copy_from_slice(payload),
        })
    }

    /// Serialize to the wire form: header followed by the payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = vec![0, 0, self.frag];
        bytes.extend_from_slice(&self.addr.to_bytes());
        bytes.extend_from_slice(&self.data);
        bytes
    }

    /// Whether this datagram is part of a fragment train.
    pub fn is_fragmented(&self) -> bool {
        self.frag != 0
    }
}

fn parse_address_from_buf(atyp: u8, mut buf: &[u8]) -> Result<(TargetAddr, &[u8])> {
    match atyp {
        SOCKS5_ADDR_TYPE_IPV4 => {
            if buf.len() < 6 {
                bail!("truncated IPv4 address");
            }
            let ip = Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
            buf = &buf[4..];
            let port = buf.get_u16();
            Ok((TargetAddr::ipv4(ip, port), buf))
        }

        SOCKS5_ADDR_TYPE_DOMAIN => {
            if buf.is_empty() {
                bail!("truncated domain length");
            }
            let len = buf[0] as usize;
            buf = &buf[1..];
            if buf.len() < len + 2 {
                bail!("truncated domain name");
            }
            let domain =
                String::from_utf8(buf[..len].to_vec()).context("invalid UTF-8 in domain")?;
            buf = &buf[len..];
            let port = buf.get_u16();
            Ok((TargetAddr::domain(domain, port), buf))
        }

        SOCKS5_ADDR_TYPE_IPV6 => {
            if buf.len() < 18 {
                bail!("truncated IPv6 address");
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[..16]);
            buf = &buf[16..];
            let port = buf.get_u16();
            Ok((TargetAddr::ipv6(Ipv6Addr::from(octets), port), buf))
        }

        other => Err(SocksError::AddressTypeNotSupported(other).into()),
    }
}

/// Serve a UDP ASSOCIATE session on an authenticated control connection.
///
/// Binds an IPv4 relay socket, replies with its endpoint, and runs the
/// relay until the control connection closes. Dropping the relay future
/// closes the socket, so teardown follows the TCP side immediately.
pub(crate) async fn handle_associate(mut stream: TcpStream, _config: &Config) -> Result<()> {
    let control_ip = stream.peer_addr()?.ip().to_canonical();

    let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
        Ok(socket) => socket,
        Err(e) => {
            let reply = Reply::failure(SOCKS5_REPLY_GENERAL_FAILURE).marshal();
            stream.write_all(&reply).await?;
            return Err(anyhow::Error::from(e).context("failed to bind udp relay socket"));
        }
    };
    let bound = socket.local_addr()?;

    stream.write_all(&Reply::succeeded(bound).marshal()).await?;
    stream.flush().await?;
    info!("udp associate for {} relaying on {}", control_ip, bound);

    let mut control_buf = [0u8; 1];
    let result = tokio::select! {
        _ = async {
            // The control connection carries no further requests; it is
            // read only to observe EOF or error.
            loop {
                match stream.read(&mut control_buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        } => {
            debug!("udp associate control connection closed");
            Ok(())
        }
        result = relay_datagrams(&socket, control_ip) => result,
    };

    info!("udp associate for {} ended", control_ip);
    result
}

/// The datagram pump. Runs until a socket error or cancellation.
///
/// The client's UDP endpoint is unknown until its first datagram arrives;
/// until then only sources sharing the control connection's IP are
/// considered, everything else is discarded. Once pinned, datagrams from
/// that exact endpoint are requests and all other traffic is a reply
/// headed back to it.
async fn relay_datagrams(socket: &UdpSocket, control_ip: IpAddr) -> Result<()> {
    let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
    let mut client_endpoint: Option<SocketAddr> = None;

    loop {
        let (len, src) = socket.recv_from(&mut buf).await?;

        match client_endpoint {
            Some(client) if src == client => {
                forward_request(socket, &buf[..len], src).await?;
            }
            Some(client) => {
                let packet = UdpPacket::new(src.into(), Bytes::copy_from_slice(&buf[..len]));
                socket.send_to(&packet.encode(), client).await?;
            }
            None if src.ip().to_canonical() == control_ip => {
                client_endpoint = Some(src);
                debug!("udp associate client endpoint fixed at {}", src);
                forward_request(socket, &buf[..len], src).await?;
            }
            None => {
                debug!("discarding udp datagram from unassociated {}", src);
            }
        }
    }
}

/// Decapsulate one client datagram and forward its payload.
///
/// Malformed or fragmented datagrams are dropped; only socket errors
/// propagate.
async fn forward_request(socket: &UdpSocket, datagram: &[u8], src: SocketAddr) -> Result<()> {
    let packet = match UdpPacket::parse(datagram) {
        Ok(packet) => packet,
        Err(e) => {
            warn!("dropping malformed udp datagram from {}: {}", src, e);
            return Ok(());
        }
    };
    if packet.is_fragmented() {
        warn!("dropping fragmented udp datagram from {}", src);
        return Ok(());
    }

    let dest = match packet.addr.resolve_addr().await {
        Ok(dest) => dest,
        Err(e) => {
            warn!("dropping udp datagram with unresolvable target: {}", e);
            return Ok(());
        }
    };
    socket.send_to(&packet.data, dest).await?;
    Ok(())
}
