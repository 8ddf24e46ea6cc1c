//! Bidirectional byte relay between two full-duplex streams.

use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Pump bytes between `a` and `b` in both directions concurrently.
///
/// Returns as soon as either direction completes, with that direction's
/// result; the other copy is dropped, which closes its endpoints. Bytes are
/// passed through verbatim, and per-direction ordering is preserved.
pub async fn relay<A, B>(a: A, b: B) -> io::Result<()>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let a_to_b = tokio::io::copy(&mut a_read, &mut b_write);
    let b_to_a = tokio::io::copy(&mut b_read, &mut a_write);

    tokio::select! {
        result = a_to_b => {
            match &result {
                Ok(bytes) => debug!("client->upstream finished: {} bytes", bytes),
                Err(e) => debug!("client->upstream error: {}", e),
            }
            result.map(|_| ())
        }
        result = b_to_a => {
            match &result {
                Ok(bytes) => debug!("upstream->client finished: {} bytes", bytes),
                Err(e) => debug!("upstream->client error: {}", e),
            }
            result.map(|_| ())
        }
    }
}
