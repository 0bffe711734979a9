use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{CodecError, CodecResult};

use super::consts;

/// Reply result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyCode {
    /// Anything other than 90 or 91.
    Invalid,
    /// 90: request granted.
    Success,
    /// 91: request rejected or failed.
    Error,
}

impl ReplyCode {
    /// Normalize a raw code byte.
    #[must_use]
    pub fn from_u8(code: u8) -> Self {
        match code {
            consts::REPLY_SUCCESS => Self::Success,
            consts::REPLY_ERROR => Self::Error,
            _ => Self::Invalid,
        }
    }
}

impl From<ReplyCode> for u8 {
    fn from(code: ReplyCode) -> u8 {
        match code {
            ReplyCode::Invalid => 0,
            ReplyCode::Success => consts::REPLY_SUCCESS,
            ReplyCode::Error => consts::REPLY_ERROR,
        }
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => f.write_str("invalid"),
            Self::Success => f.write_str("success"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// Proxy to client reply.
///
/// ```text
/// +----+----+----+----+----+----+----+----+
/// | VN | CD | DSTPORT |      DSTIP        |
/// +----+----+----+----+----+----+----+----+
///   1    1      2              4
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    version: u8,
    code: u8,
    port: u16,
    ip: Ipv4Addr,
}

impl Reply {
    /// Build a reply. `code` may be a [`ReplyCode`] or a raw byte.
    #[must_use]
    pub fn new(code: impl Into<u8>, address: SocketAddrV4) -> Self {
        Self {
            version: consts::VERSION,
            code: code.into(),
            port: address.port(),
            ip: *address.ip(),
        }
    }

    #[must_use]
    pub fn success(address: SocketAddrV4) -> Self {
        Self::new(ReplyCode::Success, address)
    }

    #[must_use]
    pub fn error(address: SocketAddrV4) -> Self {
        Self::new(ReplyCode::Error, address)
    }

    /// Parse a reply from a buffer holding exactly one read's worth of bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::ReplyTooShort`] below 8 bytes and
    /// [`CodecError::ReplyTooLong`] above.
    pub fn decode(buf: &[u8]) -> CodecResult<Self> {
        if buf.len() < consts::REPLY_LEN {
            return Err(CodecError::ReplyTooShort(buf.len()));
        }
        if buf.len() > consts::REPLY_LEN {
            return Err(CodecError::ReplyTooLong);
        }

        Ok(Self {
            version: buf[0],
            code: buf[1],
            port: u16::from_be_bytes([buf[2], buf[3]]),
            ip: Ipv4Addr::new(buf[4], buf[5], buf[6], buf[7]),
        })
    }

    /// Read a reply with a single read of at most 9 bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Io`] if the read fails, otherwise the
    /// framing errors of [`Reply::decode`].
    pub async fn read_from<R>(r: &mut R) -> CodecResult<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = [0u8; consts::REPLY_LEN + 1];
        let n = r.read(&mut buf).await?;
        Self::decode(&buf[..n])
    }

    /// Serialize into `buf`.
    pub fn write_to_buf<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.version);
        buf.put_u8(self.code);
        buf.put_u16(self.port);
        buf.put_slice(&self.ip.octets());
    }

    /// Serialize into a fresh 8 byte buffer.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(consts::REPLY_LEN);
        self.write_to_buf(&mut buf);
        buf.freeze()
    }

    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    #[must_use]
    pub fn code(&self) -> ReplyCode {
        ReplyCode::from_u8(self.code)
    }

    #[must_use]
    pub fn raw_code(&self) -> u8 {
        self.code
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    #[must_use]
    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.ip, self.port)
    }

    /// Bound address formatted as `ip:port`.
    #[must_use]
    pub fn address(&self) -> String {
        self.socket_addr().to_string()
    }
}
