//! In-memory duplex stream for driving the connection handler without sockets.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};

use crate::network::ProxyStream;

/// One end of an in-memory pipe that reports a fixed peer address.
#[derive(Debug)]
pub struct PipeStream {
    inner: DuplexStream,
    peer: SocketAddr,
}

impl PipeStream {
    /// Create a connected pair. The first element is the test's end, the
    /// second is handed to the code under test.
    #[must_use]
    pub fn pair(peer: SocketAddr) -> (DuplexStream, Self) {
        let (local, inner) = tokio::io::duplex(64 * 1024);
        (local, Self { inner, peer })
    }
}

impl ProxyStream for PipeStream {
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.peer)
    }
}

impl AsyncRead for PipeStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for PipeStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
