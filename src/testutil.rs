//! Shared test doubles: in-memory dial functions and scripted resolvers.

use crate::config::{BoxedStream, DialFn, ProxyStream};
use crate::resolver::Resolver;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{duplex, AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::mpsc::{self, UnboundedReceiver};

/// In-memory upstream endpoint with a scripted local address.
#[derive(Debug)]
pub(crate) struct FakeUpstream {
    io: DuplexStream,
    local: SocketAddr,
}

impl AsyncRead for FakeUpstream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for FakeUpstream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}

impl ProxyStream for FakeUpstream {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }
}

/// Dial function backed by in-memory pipes.
///
/// Every dial yields a fresh duplex pair; the far end and the dialed
/// authority are delivered on the returned channel so the test can play
/// the upstream.
pub(crate) fn fake_dial(local: SocketAddr) -> (DialFn, UnboundedReceiver<(String, DuplexStream)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let dial: DialFn = Arc::new(move |_network, authority| {
        let tx = tx.clone();
        Box::pin(async move {
            let (near, far) = duplex(64 * 1024);
            tx.send((authority, far))
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "test receiver gone"))?;
            Ok(Box::new(FakeUpstream { io: near, local }) as BoxedStream)
        })
    });
    (dial, rx)
}

/// Dial function that always fails with the given error kind.
pub(crate) fn failing_dial(kind: io::ErrorKind) -> DialFn {
    Arc::new(move |_network, authority| {
        Box::pin(async move { Err(io::Error::new(kind, format!("cannot dial {}", authority))) })
    })
}

/// Resolver that answers every name with one fixed address and counts
/// how often it was asked.
pub(crate) struct CountingResolver {
    answer: IpAddr,
    calls: AtomicUsize,
}

impl CountingResolver {
    pub(crate) fn new(answer: IpAddr) -> Self {
        CountingResolver {
            answer,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for CountingResolver {
    async fn resolve(&self, _name: &str) -> Result<IpAddr> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer)
    }
}

/// Resolver that knows exactly one name.
pub(crate) struct StubResolver {
    name: String,
    answer: IpAddr,
}

impl StubResolver {
    pub(crate) fn new(name: &str, answer: IpAddr) -> Self {
        StubResolver {
            name: name.to_string(),
            answer,
        }
    }
}

#[async_trait]
impl Resolver for StubResolver {
    async fn resolve(&self, name: &str) -> Result<IpAddr> {
        if name == self.name {
            Ok(self.answer)
        } else {
            bail!("unknown name {:?}", name)
        }
    }
}
