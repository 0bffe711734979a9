//! Stream abstraction for proxied connections.
//!
//! The handler and relay only need a duplex byte stream that can report its
//! peer. Deadlines are applied by the caller around each operation and a
//! stream is closed by dropping it, so plain TCP sockets and in-memory pipes
//! are interchangeable.

use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// A duplex byte stream with a known remote address.
pub trait ProxyStream: AsyncRead + AsyncWrite + Unpin + Send {
    /// Address of the remote end of the stream.
    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

impl ProxyStream for TcpStream {
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_stream_peer_addr() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let client = client.unwrap();
        let (_server, client_addr) = accepted.unwrap();

        assert_eq!(ProxyStream::peer_addr(&client).unwrap(), addr);
        assert_eq!(client.local_addr().unwrap(), client_addr);
    }
}
