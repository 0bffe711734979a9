use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{CodecError, CodecResult};

use super::consts;

/// Request command.
///
/// Unknown command bytes are kept verbatim in [`Request`] and only surface
/// as [`Command::Invalid`] through [`Request::command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Anything other than CONNECT or BIND.
    Invalid,
    /// Open an outbound connection.
    Connect,
    /// Accept one inbound connection from the requested address.
    Bind,
}

impl Command {
    /// Normalize a raw command byte.
    #[must_use]
    pub fn from_u8(code: u8) -> Self {
        match code {
            consts::COMMAND_CONNECT => Self::Connect,
            consts::COMMAND_BIND => Self::Bind,
            _ => Self::Invalid,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Connect => "connect",
            Self::Bind => "bind",
        }
    }
}

impl From<Command> for u8 {
    fn from(command: Command) -> u8 {
        match command {
            Command::Invalid => 0,
            Command::Connect => consts::COMMAND_CONNECT,
            Command::Bind => consts::COMMAND_BIND,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client to proxy request.
///
/// ```text
/// +----+----+----+----+----+----+----+----+----+....+----+
/// | VN | CD | DSTPORT |      DSTIP        | USERID  |NULL|
/// +----+----+----+----+----+----+----+----+----+....+----+
///   1    1      2              4           0..=63     1
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    version: u8,
    command: u8,
    port: u16,
    ip: Ipv4Addr,
    user_id: Vec<u8>,
}

impl Request {
    /// Build a request for `destination`.
    ///
    /// `command` may be a [`Command`] or a raw byte.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UserIdTooLong`] if `user_id` exceeds 63 bytes.
    pub fn new(
        command: impl Into<u8>,
        destination: SocketAddrV4,
        user_id: impl Into<Vec<u8>>,
    ) -> CodecResult<Self> {
        let user_id = user_id.into();
        if user_id.len() > consts::MAX_USER_ID_LEN {
            return Err(CodecError::UserIdTooLong(user_id.len()));
        }

        Ok(Self {
            version: consts::VERSION,
            command: command.into(),
            port: destination.port(),
            ip: *destination.ip(),
            user_id,
        })
    }

    /// Build a request from a textual `ip:port` destination.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidAddress`] if `remote` is not an IPv4
    /// `host:port` pair, or [`CodecError::UserIdTooLong`].
    pub fn from_address(command: impl Into<u8>, remote: &str, user_id: &str) -> CodecResult<Self> {
        if user_id.len() > consts::MAX_USER_ID_LEN {
            return Err(CodecError::UserIdTooLong(user_id.len()));
        }
        let destination = parse_destination(remote)?;
        Self::new(command, destination, user_id.as_bytes())
    }

    /// Parse a request from a buffer holding exactly one read's worth of bytes.
    ///
    /// Everything after the 8 byte header is the user id field; its last
    /// byte is taken as the terminator without checking it is NULL.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::RequestTooShort`] below 9 bytes and
    /// [`CodecError::RequestTooLong`] above 72.
    pub fn decode(buf: &[u8]) -> CodecResult<Self> {
        if buf.len() < consts::MIN_REQUEST_LEN {
            return Err(CodecError::RequestTooShort(buf.len()));
        }
        if buf.len() > consts::MAX_REQUEST_LEN {
            return Err(CodecError::RequestTooLong);
        }

        Ok(Self {
            version: buf[0],
            command: buf[1],
            port: u16::from_be_bytes([buf[2], buf[3]]),
            ip: Ipv4Addr::new(buf[4], buf[5], buf[6], buf[7]),
            user_id: buf[consts::REQUEST_HEADER_LEN..buf.len() - 1].to_vec(),
        })
    }

    /// Read a request with a single read of at most 73 bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Io`] if the read fails, otherwise the
    /// framing errors of [`Request::decode`].
    pub async fn read_from<R>(r: &mut R) -> CodecResult<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = [0u8; consts::MAX_REQUEST_LEN + 1];
        let n = r.read(&mut buf).await?;
        Self::decode(&buf[..n])
    }

    /// Write the serialized request.
    pub async fn write_to<W>(&self, w: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        w.write_all(&self.to_bytes()).await
    }

    /// Serialize into `buf`.
    pub fn write_to_buf<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.version);
        buf.put_u8(self.command);
        buf.put_u16(self.port);
        buf.put_slice(&self.ip.octets());
        buf.put_slice(&self.user_id);
        buf.put_u8(0);
    }

    /// Serialize into a fresh buffer of `9 + user_id.len()` bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.serialized_len());
        self.write_to_buf(&mut buf);
        buf.freeze()
    }

    #[inline]
    #[must_use]
    pub fn serialized_len(&self) -> usize {
        consts::MIN_REQUEST_LEN + self.user_id.len()
    }

    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    #[must_use]
    pub fn command(&self) -> Command {
        Command::from_u8(self.command)
    }

    /// The command byte as received.
    #[must_use]
    pub fn raw_command(&self) -> u8 {
        self.command
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    /// Destination as a socket address.
    #[must_use]
    pub fn destination(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.ip, self.port)
    }

    /// Destination formatted as `ip:port`.
    #[must_use]
    pub fn address(&self) -> String {
        self.destination().to_string()
    }

    #[must_use]
    pub fn user_id(&self) -> &[u8] {
        &self.user_id
    }
}

/// Split `remote` into an IPv4 address and port.
///
/// # Errors
///
/// Returns [`CodecError::InvalidAddress`] if either half is missing or
/// does not parse.
pub fn parse_destination(remote: &str) -> CodecResult<SocketAddrV4> {
    let invalid = || CodecError::InvalidAddress(remote.to_string());

    let (host, port) = remote.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || port.is_empty() {
        return Err(invalid());
    }

    let ip: Ipv4Addr = host.parse().map_err(|_| invalid())?;
    let port: u16 = port.parse().map_err(|_| invalid())?;
    Ok(SocketAddrV4::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn localhost(port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
    }

    async fn read(packet: &[u8]) -> CodecResult<Request> {
        let mut src = packet;
        Request::read_from(&mut src).await
    }

    #[test]
    fn test_from_address_rejects_bad_destinations() {
        for remote in [
            "something bad",
            ":5",
            "localhost:",
            "localhost:80",
            "localhost:num",
            "1.1.1.1:tmp",
            "1.1.1.1:70000",
            "::1:80",
        ] {
            let result = Request::from_address(Command::Connect, remote, "");
            assert!(
                matches!(result, Err(CodecError::InvalidAddress(_))),
                "{remote} should be rejected"
            );
        }

        assert!(Request::from_address(Command::Invalid, "1.1.1.1:1", "").is_ok());
    }

    #[test]
    fn test_user_id_boundary() {
        let ok = Request::new(Command::Connect, localhost(80), "a".repeat(63));
        assert_eq!(ok.unwrap().serialized_len(), 72);

        let too_long = Request::new(Command::Connect, localhost(80), "a".repeat(64));
        assert!(matches!(too_long, Err(CodecError::UserIdTooLong(64))));

        let too_long = Request::from_address(Command::Bind, "1.1.1.1:80", &"A".repeat(64));
        assert!(matches!(too_long, Err(CodecError::UserIdTooLong(64))));
    }

    #[test]
    fn test_serialize() {
        let req = Request::from_address(Command::Connect, "127.0.0.1:80", "").unwrap();
        assert_eq!(
            req.to_bytes().as_ref(),
            &[consts::VERSION, consts::COMMAND_CONNECT, 0, 80, 127, 0, 0, 1, 0]
        );

        let req = Request::new(Command::Bind, SocketAddrV4::new([10, 1, 2, 3].into(), 0x1F90), "mcr")
            .unwrap();
        assert_eq!(
            req.to_bytes().as_ref(),
            &[4, 2, 0x1F, 0x90, 10, 1, 2, 3, b'm', b'c', b'r', 0]
        );
    }

    #[test]
    fn test_accessors() {
        let req = Request::from_address(Command::Connect, "127.0.0.1:80", "mcr").unwrap();
        assert_eq!(req.version(), consts::VERSION);
        assert_eq!(req.command(), Command::Connect);
        assert_eq!(req.port(), 80);
        assert_eq!(req.ip(), Ipv4Addr::LOCALHOST);
        assert_eq!(req.address(), "127.0.0.1:80");
        assert_eq!(req.user_id(), b"mcr");
    }

    #[test]
    fn test_unknown_command_is_invalid() {
        for raw in [0u8, 3, 4, 90, 255] {
            let req = Request::new(raw, localhost(80), "").unwrap();
            assert_eq!(req.command(), Command::Invalid);
            assert_eq!(req.raw_command(), raw);
        }
        assert_eq!(Command::from_u8(1), Command::Connect);
        assert_eq!(Command::from_u8(2), Command::Bind);
    }

    #[test]
    fn test_decode_keeps_raw_command_byte() {
        let req = Request::decode(&[4, 7, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(req.command(), Command::Invalid);
        assert_eq!(req.raw_command(), 7);
        assert_eq!(req.to_bytes().as_ref(), &[4, 7, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_read_boundaries() {
        assert!(matches!(read(&[]).await, Err(CodecError::RequestTooShort(0))));
        assert!(matches!(read(&[0; 8]).await, Err(CodecError::RequestTooShort(8))));
        assert!(read(&[4, 0, 0, 0, 0, 0, 0, 0, 0]).await.is_ok());
        assert!(read(&[0; 72]).await.is_ok());
        assert!(matches!(read(&[0; 73]).await, Err(CodecError::RequestTooLong)));
    }

    #[tokio::test]
    async fn test_read_round_trip() {
        let original = Request::new(
            Command::Bind,
            SocketAddrV4::new(Ipv4Addr::new(192, 168, 7, 9), 65535),
            "user-42",
        )
        .unwrap();

        let decoded = read(&original.to_bytes()).await.unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.command(), Command::Bind);
        assert_eq!(decoded.destination().port(), 65535);
        assert_eq!(decoded.user_id(), b"user-42");
    }

    #[tokio::test]
    async fn test_read_io_error() {
        let (mut client, server) = tokio::io::duplex(64);
        drop(server);
        // A closed pipe reads as end of stream, which is a short request.
        assert!(matches!(
            Request::read_from(&mut client).await,
            Err(CodecError::RequestTooShort(0))
        ));
    }
}
