//! SOCKS4 and SOCKS4a protocol engine.
//!
//! Handles CONNECT and BIND. The 4a extension signals an FQDN destination
//! with a `0.0.0.X` (X != 0) DSTIP followed by a null-terminated domain
//! after the USERID field.

use crate::config::Config;
use crate::consts::*;
use crate::error::SocksError;
use crate::relay::relay;
use crate::types::{SocksCommand, TargetAddr};
use anyhow::{Context, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

/// Deadline for the inbound connection a BIND waits for.
const BIND_ACCEPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Parsed SOCKS4/4a request (version byte already consumed).
///
/// ```text
/// +----+----+----+----+----+----+----+----+----+----+....+----+
/// | VN | CD | DSTPORT |      DSTIP        | USERID       |NULL|
/// +----+----+----+----+----+----+----+----+----+----+....+----+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Request {
    /// Raw command byte; kept for error reporting on unknown commands.
    pub cmd_byte: u8,
    /// Destination address (IPv4 or 4a domain).
    pub addr: TargetAddr,
}

impl Request {
    /// Command as an enum, when the byte is a known command.
    pub fn command(&self) -> Option<SocksCommand> {
        SocksCommand::from_byte(self.cmd_byte)
    }
}

/// The 4a sentinel: an address of the form `0.0.0.X` with X != 0.
fn is_4a_sentinel(ip: &[u8; 4]) -> bool {
    ip[0] == 0 && ip[1] == 0 && ip[2] == 0 && ip[3] != 0
}

/// Read a null-terminated field, discarding the terminator.
async fn read_until_nul<R>(reader: &mut R, field: &str) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut out = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        reader
            .read_exact(&mut byte)
            .await
            .with_context(|| format!("failed to read {}", field))?;
        if byte[0] == 0 {
            return Ok(out);
        }
        out.push(byte[0]);
    }
}

/// Parse a v4/4a request from the stream.
pub(crate) async fn parse_request<R>(reader: &mut R) -> Result<Request>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 7];
    reader
        .read_exact(&mut header)
        .await
        .context("failed to read socks4 request header")?;

    let cmd_byte = header[0];
    let port = u16::from_be_bytes([header[1], header[2]]);
    let dst_ip = [header[3], header[4], header[5], header[6]];

    // USERID is not verified (no identd); skip it.
    read_until_nul(reader, "userid").await?;

    let addr = if is_4a_sentinel(&dst_ip) {
        let domain = read_until_nul(reader, "domain name").await?;
        let domain = String::from_utf8(domain).context("invalid UTF-8 in domain name")?;
        TargetAddr::domain(domain, port)
    } else {
        TargetAddr::ipv4(Ipv4Addr::from(dst_ip), port)
    };

    Ok(Request { cmd_byte, addr })
}

/// SOCKS4 reply: `VN CD DSTPORT DSTIP`, 8 bytes, VN always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Reply {
    pub code: u8,
    pub addr: Ipv4Addr,
    pub port: u16,
}

impl Reply {
    /// Success reply carrying a bound endpoint. An IPv6 endpoint cannot be
    /// encoded in the v4 wire format and degrades to `0.0.0.0`.
    pub fn granted(bound: SocketAddr) -> Self {
        Reply {
            code: SOCKS4_REPLY_GRANTED,
            addr: ipv4_or_unspecified(bound.ip()),
            port: bound.port(),
        }
    }

    /// Failure reply with a zeroed endpoint.
    pub fn rejected() -> Self {
        Reply {
            code: SOCKS4_REPLY_REJECTED,
            addr: Ipv4Addr::UNSPECIFIED,
            port: 0,
        }
    }

    /// Serialize to the 8-byte wire form.
    pub fn marshal(&self) -> [u8; 8] {
        let port = self.port.to_be_bytes();
        let ip = self.addr.octets();
        [
            SOCKS4_REPLY_VERSION,
            self.code,
            port[0],
            port[1],
            ip[0],
            ip[1],
            ip[2],
            ip[3],
        ]
    }
}

fn ipv4_or_unspecified(ip: IpAddr) -> Ipv4Addr {
    match ip {
        IpAddr::V4(v4) => v4,
        IpAddr::V6(v6) => v6.to_ipv4().unwrap_or(Ipv4Addr::UNSPECIFIED),
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

/// Serve one SOCKS4/4a session. The version byte is already consumed.
pub(crate) async fn handle(mut stream: TcpStream, config: &Config) -> Result<()> {
    let mut request = parse_request(&mut stream).await?;

    if let TargetAddr::Domain(domain, port) = &request.addr {
        let (domain, port) = (domain.clone(), *port);
        match config.resolver.resolve(&domain).await {
            Ok(ip) => request.addr = TargetAddr::Ip(SocketAddr::new(ip, port)),
            Err(e) => {
                send_reply(&mut stream, Reply::rejected()).await?;
                return Err(e.context(SocksError::Resolution(domain)));
            }
        }
    }

    match request.command() {
        Some(SocksCommand::Connect) => handle_connect(stream, &request, config).await,
        Some(SocksCommand::Bind) => handle_bind(stream, &request).await,
        _ => {
            send_reply(&mut stream, Reply::rejected()).await?;
            Err(SocksError::CommandNotSupported(request.cmd_byte).into())
        }
    }
}

async fn handle_connect(mut stream: TcpStream, request: &Request, config: &Config) -> Result<()> {
    let upstream = match (config.dial)("tcp".to_string(), request.addr.authority()).await {
        Ok(upstream) => upstream,
        Err(e) => {
            send_reply(&mut stream, Reply::rejected()).await?;
            return Err(anyhow::Error::from(e).context("dial failed"));
        }
    };

    let bound = upstream.local_addr()?;
    send_reply(&mut stream, Reply::granted(bound)).await?;

    info!("socks4 CONNECT {} established", request.addr);
    relay(stream, upstream).await?;
    Ok(())
}

async fn handle_bind(mut stream: TcpStream, request: &Request) -> Result<()> {
    let listener = match TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
        Ok(listener) => listener,
        Err(e) => {
            send_reply(&mut stream, Reply::rejected()).await?;
            return Err(anyhow::Error::from(e).context("failed to open bind listener"));
        }
    };
    let listen_port = listener.local_addr()?.port();

    // First reply: the client-facing local IP plus the listener port.
    let client_side = stream.local_addr()?;
    let reply = Reply {
        code: SOCKS4_REPLY_GRANTED,
        addr: ipv4_or_unspecified(client_side.ip()),
        port: listen_port,
    };
    send_reply(&mut stream, reply).await?;
    debug!("socks4 BIND waiting on port {}", listen_port);

    let (bound_conn, peer) =
        match tokio::time::timeout(BIND_ACCEPT_TIMEOUT, listener.accept()).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                send_reply(&mut stream, Reply::rejected()).await?;
                return Err(anyhow::Error::from(e).context("bind accept failed"));
            }
            Err(_) => {
                send_reply(&mut stream, Reply::rejected()).await?;
                return Err(SocksError::Protocol("bind accept timed out".to_string()).into());
            }
        };
    drop(listener);

    let peer_ip = peer.ip().to_canonical();
    let wanted = match &request.addr {
        TargetAddr::Ip(addr) => Some(addr.ip().to_canonical()),
        TargetAddr::Domain(_, _) => None,
    };
    if !peer_ip.is_unspecified() && wanted != Some(peer_ip) {
        send_reply(&mut stream, Reply::rejected()).await?;
        return Err(SocksError::BindPeerMismatch {
            got: peer_ip,
            want: request.addr.host(),
        }
        .into());
    }

    // Second reply, identical bytes.
    send_reply(&mut stream, reply).await?;

    info!("socks4 BIND {} connected from {}", request.addr, peer);
    relay(stream, bound_conn).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fake_dial, failing_dial, CountingResolver, StubResolver};
    use std::io::Cursor;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn v4_request_bytes(cmd: u8, port: u16, ip: [u8; 4], userid: &[u8]) -> Vec<u8> {
        let mut bytes = vec![cmd];
        bytes.extend_from_slice(&port.to_be_bytes());
        bytes.extend_from_slice(&ip);
        bytes.extend_from_slice(userid);
        bytes.push(0);
        bytes
    }

    fn v4a_request_bytes(cmd: u8, port: u16, userid: &[u8], domain: &str) -> Vec<u8> {
        let mut bytes = v4_request_bytes(cmd, port, [0, 0, 0, 1], userid);
        bytes.extend_from_slice(domain.as_bytes());
        bytes.push(0);
        bytes
    }

    #[tokio::test]
    async fn test_parse_request_ipv4() {
        let bytes = v4_request_bytes(SOCKS_CMD_CONNECT, 80, [93, 184, 216, 34], b"fred");
        let mut cursor = Cursor::new(bytes);

        let request = parse_request(&mut cursor).await.unwrap();
        assert_eq!(request.command(), Some(SocksCommand::Connect));
        assert_eq!(request.addr, TargetAddr::ipv4(Ipv4Addr::new(93, 184, 216, 34), 80));
    }

    #[tokio::test]
    async fn test_parse_request_4a_domain() {
        let bytes = v4a_request_bytes(SOCKS_CMD_CONNECT, 80, b"", "example.com");
        let mut cursor = Cursor::new(bytes);

        let request = parse_request(&mut cursor).await.unwrap();
        assert_eq!(
            request.addr,
            TargetAddr::domain("example.com".to_string(), 80)
        );
    }

    #[tokio::test]
    async fn test_parse_request_zero_ip_is_plain_ipv4() {
        // 0.0.0.0 is NOT the 4a sentinel; no domain follows.
        let bytes = v4_request_bytes(SOCKS_CMD_CONNECT, 80, [0, 0, 0, 0], b"u");
        let mut cursor = Cursor::new(bytes);

        let request = parse_request(&mut cursor).await.unwrap();
        assert_eq!(request.addr, TargetAddr::ipv4(Ipv4Addr::UNSPECIFIED, 80));
    }

    #[tokio::test]
    async fn test_parse_request_sentinel_boundary() {
        for last in [1u8, 7, 255] {
            assert!(is_4a_sentinel(&[0, 0, 0, last]));
        }
        assert!(!is_4a_sentinel(&[0, 0, 0, 0]));
        assert!(!is_4a_sentinel(&[0, 0, 1, 1]));
        assert!(!is_4a_sentinel(&[10, 0, 0, 1]));
    }

    #[tokio::test]
    async fn test_parse_request_short_read() {
        let mut cursor = Cursor::new(vec![SOCKS_CMD_CONNECT, 0x00]);
        assert!(parse_request(&mut cursor).await.is_err());
    }

    #[test]
    fn test_reply_marshal_layout() {
        let reply = Reply {
            code: SOCKS4_REPLY_GRANTED,
            addr: Ipv4Addr::new(10, 1, 2, 3),
            port: 0x1F90,
        };
        assert_eq!(reply.marshal(), [0x00, 90, 0x1F, 0x90, 10, 1, 2, 3]);
    }

    #[test]
    fn test_reply_rejected_is_zeroed() {
        assert_eq!(Reply::rejected().marshal(), [0, 91, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_reply_granted_ipv6_degrades() {
        let bound: SocketAddr = "[2001:db8::1]:4242".parse().unwrap();
        let reply = Reply::granted(bound);
        assert_eq!(reply.addr, Ipv4Addr::UNSPECIFIED);
        assert_eq!(reply.port, 4242);
    }

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_connect_with_fqdn_resolves_once_then_dials() {
        let resolver = Arc::new(CountingResolver::new("93.184.216.34".parse().unwrap()));
        let (dial, mut dialed) = fake_dial("127.0.0.1:34567".parse().unwrap());
        let config = Config::new()
            .with_resolver(resolver.clone())
            .with_dial(dial);

        let (mut client, server) = connected_pair().await;
        let session = tokio::spawn(async move { handle(server, &config).await });

        client
            .write_all(&v4a_request_bytes(SOCKS_CMD_CONNECT, 80, b"fred", "example.com"))
            .await
            .unwrap();

        let (authority, mut upstream) = dialed.recv().await.unwrap();
        assert_eq!(authority, "93.184.216.34:80");
        assert_eq!(resolver.calls(), 1);

        let mut reply = [0u8; 8];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[0], 0x00);
        assert_eq!(reply[1], SOCKS4_REPLY_GRANTED);

        // Relay carries bytes both ways.
        client.write_all(b"GET /").await.unwrap();
        let mut got = [0u8; 5];
        upstream.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"GET /");

        upstream.write_all(b"HI").await.unwrap();
        let mut got = [0u8; 2];
        client.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"HI");

        drop(client);
        drop(upstream);
        let _ = session.await;
    }

    #[tokio::test]
    async fn test_connect_ipv4_skips_resolver() {
        let resolver = Arc::new(CountingResolver::new("10.0.0.1".parse().unwrap()));
        let (dial, mut dialed) = fake_dial("127.0.0.1:2000".parse().unwrap());
        let config = Config::new()
            .with_resolver(resolver.clone())
            .with_dial(dial);

        let (mut client, server) = connected_pair().await;
        let session = tokio::spawn(async move { handle(server, &config).await });

        client
            .write_all(&v4_request_bytes(SOCKS_CMD_CONNECT, 443, [1, 2, 3, 4], b""))
            .await
            .unwrap();

        let (authority, _upstream) = dialed.recv().await.unwrap();
        assert_eq!(authority, "1.2.3.4:443");
        assert_eq!(resolver.calls(), 0);

        drop(client);
        let _ = session.await;
    }

    #[tokio::test]
    async fn test_connect_dial_failure_replies_91() {
        let config = Config::new().with_dial(failing_dial(std::io::ErrorKind::ConnectionRefused));

        let (mut client, server) = connected_pair().await;
        let session = tokio::spawn(async move { handle(server, &config).await });

        client
            .write_all(&v4_request_bytes(SOCKS_CMD_CONNECT, 80, [127, 0, 0, 1], b""))
            .await
            .unwrap();

        let mut reply = [0u8; 8];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0, 91, 0, 0, 0, 0, 0, 0]);

        assert!(session.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_resolution_failure_replies_91() {
        let resolver = Arc::new(StubResolver::new(
            "known.test",
            "10.0.0.1".parse().unwrap(),
        ));
        let config = Config::new().with_resolver(resolver);

        let (mut client, server) = connected_pair().await;
        let session = tokio::spawn(async move { handle(server, &config).await });

        client
            .write_all(&v4a_request_bytes(SOCKS_CMD_CONNECT, 80, b"", "other.test"))
            .await
            .unwrap();

        let mut reply = [0u8; 8];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], SOCKS4_REPLY_REJECTED);
        assert!(session.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_unknown_command_replies_91() {
        let config = Config::new();

        let (mut client, server) = connected_pair().await;
        let session = tokio::spawn(async move { handle(server, &config).await });

        client
            .write_all(&v4_request_bytes(0x09, 80, [127, 0, 0, 1], b""))
            .await
            .unwrap();

        let mut reply = [0u8; 8];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], SOCKS4_REPLY_REJECTED);
        assert!(session.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_bind_accepts_expected_peer() {
        let config = Config::new();

        let (mut client, server) = connected_pair().await;
        let session = tokio::spawn(async move { handle(server, &config).await });

        // BIND for destination 127.0.0.1:9 (the IP matters, the port does not).
        client
            .write_all(&v4_request_bytes(SOCKS_CMD_BIND, 9, [127, 0, 0, 1], b""))
            .await
            .unwrap();

        let mut first = [0u8; 8];
        client.read_exact(&mut first).await.unwrap();
        assert_eq!(first[1], SOCKS4_REPLY_GRANTED);
        let bind_port = u16::from_be_bytes([first[2], first[3]]);
        assert_ne!(bind_port, 0);

        // The "destination" connects back from loopback, matching 127.0.0.1.
        let mut inbound = TcpStream::connect(("127.0.0.1", bind_port)).await.unwrap();

        let mut second = [0u8; 8];
        client.read_exact(&mut second).await.unwrap();
        assert_eq!(second, first);

        inbound.write_all(b"DATA").await.unwrap();
        let mut got = [0u8; 4];
        client.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"DATA");

        drop(inbound);
        drop(client);
        let _ = session.await;
    }

    #[tokio::test]
    async fn test_bind_rejects_mismatched_peer() {
        let config = Config::new();

        let (mut client, server) = connected_pair().await;
        let session = tokio::spawn(async move { handle(server, &config).await });

        // Requested destination 10.9.9.9 can never match a loopback peer.
        client
            .write_all(&v4_request_bytes(SOCKS_CMD_BIND, 9, [10, 9, 9, 9], b""))
            .await
            .unwrap();

        let mut first = [0u8; 8];
        client.read_exact(&mut first).await.unwrap();
        let bind_port = u16::from_be_bytes([first[2], first[3]]);

        let _inbound = TcpStream::connect(("127.0.0.1", bind_port)).await.unwrap();

        let mut second = [0u8; 8];
        client.read_exact(&mut second).await.unwrap();
        assert_eq!(second[1], SOCKS4_REPLY_REJECTED);

        let err = session.await.unwrap().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SocksError>(),
            Some(SocksError::BindPeerMismatch { .. })
        ));
    }
}
