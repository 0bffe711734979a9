//! SOCKS4 client.
//!
//! [`Socks4Client`] negotiates a CONNECT or BIND through a proxy and then
//! behaves as the proxied byte stream.

use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr, SocketAddrV4};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tracing::{debug, instrument};

use crate::error::{ProxyError, Result};
use crate::protocol::{consts, Command, Reply, ReplyCode, Request};

/// Client side of a SOCKS4 session.
///
/// Reading or writing before a successful [`connect`](Self::connect) or
/// [`bind`](Self::bind) fails with [`io::ErrorKind::NotConnected`].
#[derive(Debug)]
pub struct Socks4Client {
    server_address: String,
    user_id: String,
    stream: Option<TcpStream>,
}

impl Socks4Client {
    #[must_use]
    pub fn new(server_address: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            server_address: server_address.into(),
            user_id: user_id.into(),
            stream: None,
        }
    }

    #[must_use]
    pub fn server_address(&self) -> &str {
        &self.server_address
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Ask the proxy to open a connection to `remote` (`ip:port`).
    ///
    /// Returns the address carried by the proxy's success reply.
    ///
    /// # Errors
    ///
    /// Fails if `remote` is not an IPv4 `ip:port`, the proxy cannot be
    /// reached, or the proxy does not answer with a version 4 Success reply.
    #[instrument(skip(self), fields(server = %self.server_address))]
    pub async fn connect(&mut self, remote: &str) -> Result<SocketAddrV4> {
        let request = Request::from_address(Command::Connect, remote, &self.user_id)?;

        let mut stream = self.dial_server().await?;
        let reply = exchange(&mut stream, &request).await?;
        debug!(bound = %reply.address(), "connect granted");

        self.stream = Some(stream);
        Ok(reply.socket_addr())
    }

    /// Ask the proxy to accept one inbound connection from `remote`.
    ///
    /// `on_bound` receives the address the proxy is listening on, so the
    /// caller can arrange for the remote to dial it. When the proxy
    /// announces the wildcard address, the proxy's own IP is substituted.
    /// Returns the remote peer's address from the second reply.
    ///
    /// # Errors
    ///
    /// Fails like [`connect`](Self::connect), with
    /// [`ProxyError::BoundCallback`] if `on_bound` fails, or with
    /// [`ProxyError::Rejected`] if the proxy refuses the inbound peer.
    #[instrument(skip(self, on_bound), fields(server = %self.server_address))]
    pub async fn bind<F, Fut>(&mut self, remote: &str, on_bound: F) -> Result<SocketAddrV4>
    where
        F: FnOnce(SocketAddrV4) -> Fut,
        Fut: Future<Output = io::Result<()>>,
    {
        let request = Request::from_address(Command::Bind, remote, &self.user_id)?;

        let mut stream = self.dial_server().await?;
        let first = exchange(&mut stream, &request).await?;

        let mut bound = first.socket_addr();
        if bound.ip().is_unspecified() {
            if let IpAddr::V4(server_ip) = stream.peer_addr()?.ip() {
                bound.set_ip(server_ip);
            }
        }
        debug!(bound = %bound, "bind listening");

        on_bound(bound).await.map_err(ProxyError::BoundCallback)?;

        let second = read_reply(&mut stream).await?;
        debug!(peer = %second.address(), "bind peer accepted");

        self.stream = Some(stream);
        Ok(second.socket_addr())
    }

    /// Address of the proxy, once negotiated.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::NotConnected`] before negotiation.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream()?.peer_addr()?)
    }

    /// Local address of the connection to the proxy.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::NotConnected`] before negotiation.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream()?.local_addr()?)
    }

    /// Take the negotiated stream.
    #[must_use]
    pub fn into_inner(self) -> Option<TcpStream> {
        self.stream
    }

    fn stream(&self) -> Result<&TcpStream> {
        self.stream.as_ref().ok_or(ProxyError::NotConnected)
    }

    async fn dial_server(&self) -> Result<TcpStream> {
        TcpStream::connect(&self.server_address)
            .await
            .map_err(|source| ProxyError::Dial {
                address: self.server_address.clone(),
                source,
            })
    }
}

async fn exchange(stream: &mut TcpStream, request: &Request) -> Result<Reply> {
    stream.write_all(&request.to_bytes()).await?;
    read_reply(stream).await
}

async fn read_reply(stream: &mut TcpStream) -> Result<Reply> {
    let reply = Reply::read_from(stream).await?;
    if reply.version() != consts::VERSION {
        return Err(ProxyError::VersionMismatch {
            expected: consts::VERSION,
            actual: reply.version(),
        });
    }
    match reply.code() {
        ReplyCode::Success => Ok(reply),
        code => Err(ProxyError::Rejected(code)),
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, ProxyError::NotConnected)
}

impl AsyncRead for Socks4Client {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().stream.as_mut() {
            Some(stream) => Pin::new(stream).poll_read(cx, buf),
            None => Poll::Ready(Err(not_connected())),
        }
    }
}

impl AsyncWrite for Socks4Client {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().stream.as_mut() {
            Some(stream) => Pin::new(stream).poll_write(cx, buf),
            None => Poll::Ready(Err(not_connected())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().stream.as_mut() {
            Some(stream) => Pin::new(stream).poll_flush(cx),
            None => Poll::Ready(Err(not_connected())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().stream.as_mut() {
            Some(stream) => Pin::new(stream).poll_shutdown(cx),
            None => Poll::Ready(Err(not_connected())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// One-shot fake proxy that reads a request and answers with `replies`.
    async fn fake_proxy(replies: Vec<Vec<u8>>) -> (String, tokio::task::JoinHandle<Request>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = Request::read_from(&mut socket).await.unwrap();
            for reply in replies {
                socket.write_all(&reply).await.unwrap();
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
            // Hold the socket until the client is done reading
            let mut sink = [0u8; 1];
            let _ = socket.read(&mut sink).await;
            request
        });

        (address, task)
    }

    #[tokio::test]
    async fn test_io_before_negotiation() {
        let mut client = Socks4Client::new("127.0.0.1:1", "");
        assert!(!client.is_connected());

        let err = client.write_all(b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        let mut buf = [0u8; 1];
        let err = client.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        assert!(matches!(client.peer_addr(), Err(ProxyError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_sends_request() {
        let reply = Reply::success(SocketAddrV4::new(Ipv4Addr::new(10, 1, 2, 3), 8080));
        let (address, proxy) = fake_proxy(vec![reply.to_bytes().to_vec()]).await;

        let mut client = Socks4Client::new(address, "bob");
        let bound = client.connect("10.1.2.3:8080").await.unwrap();
        assert_eq!(bound, SocketAddrV4::new(Ipv4Addr::new(10, 1, 2, 3), 8080));
        assert!(client.is_connected());
        drop(client);

        let request = proxy.await.unwrap();
        assert_eq!(request.command(), Command::Connect);
        assert_eq!(request.address(), "10.1.2.3:8080");
        assert_eq!(request.user_id(), b"bob");
    }

    #[tokio::test]
    async fn test_connect_rejected() {
        let reply = Reply::error(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 80));
        let (address, _proxy) = fake_proxy(vec![reply.to_bytes().to_vec()]).await;

        let mut client = Socks4Client::new(address, "");
        let result = client.connect("127.0.0.1:80").await;
        assert!(matches!(result, Err(ProxyError::Rejected(ReplyCode::Error))));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_connect_version_mismatch() {
        let (address, _proxy) = fake_proxy(vec![vec![0, 90, 0, 80, 127, 0, 0, 1]]).await;

        let mut client = Socks4Client::new(address, "");
        let result = client.connect("127.0.0.1:80").await;
        assert!(matches!(
            result,
            Err(ProxyError::VersionMismatch {
                expected: 4,
                actual: 0
            })
        ));
    }

    #[tokio::test]
    async fn test_connect_invalid_remote() {
        let mut client = Socks4Client::new("127.0.0.1:1", "");
        assert!(matches!(
            client.connect("example.com:80").await,
            Err(ProxyError::Codec(_))
        ));
    }

    #[tokio::test]
    async fn test_bind_substitutes_server_ip() {
        let first = Reply::success(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 5555));
        let second = Reply::success(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 6666));
        let (address, proxy) =
            fake_proxy(vec![first.to_bytes().to_vec(), second.to_bytes().to_vec()]).await;

        let mut client = Socks4Client::new(address, "");
        let (tx, rx) = tokio::sync::oneshot::channel();
        let peer = client
            .bind("127.0.0.1:0", |bound| async move {
                let _ = tx.send(bound);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(rx.await.unwrap(), SocketAddrV4::new(Ipv4Addr::LOCALHOST, 5555));
        assert_eq!(peer, SocketAddrV4::new(Ipv4Addr::LOCALHOST, 6666));
        drop(client);
        assert_eq!(proxy.await.unwrap().command(), Command::Bind);
    }

    #[tokio::test]
    async fn test_bind_callback_error() {
        let first = Reply::success(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 5555));
        let (address, _proxy) = fake_proxy(vec![first.to_bytes().to_vec()]).await;

        let mut client = Socks4Client::new(address, "");
        let result = client
            .bind("127.0.0.1:0", |_| async {
                Err(io::Error::new(io::ErrorKind::Other, "no thanks"))
            })
            .await;
        assert!(matches!(result, Err(ProxyError::BoundCallback(_))));
        assert!(!client.is_connected());
    }
}
