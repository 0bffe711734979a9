//! Bidirectional byte relay.
//!
//! Two pumps run concurrently, client to remote and remote to client. Each
//! pump renews its own idle deadline before every read, and the write of
//! what was read must finish before that same deadline. The relay ends as
//! soon as either pump ends; the other is dropped mid-flight. Closing the
//! streams is left to the caller.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};
use tracing::trace;

use crate::config::SessionConfig;
use crate::error::{ProxyError, Result};

/// Direction of a relay pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Bytes read from the client and written to the remote.
    ClientToRemote,
    /// Bytes read from the remote and written to the client.
    RemoteToClient,
}

impl Direction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientToRemote => "client_to_remote",
            Self::RemoteToClient => "remote_to_client",
        }
    }
}

/// Byte counts of a finished relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    /// The pump whose termination ended the relay.
    pub closed_by: Direction,
    pub client_to_remote: u64,
    pub remote_to_client: u64,
}

/// Relay engine settings.
#[derive(Debug, Clone, Copy)]
pub struct Relay {
    idle_timeout: Duration,
    buffer_size: usize,
}

impl Relay {
    #[must_use]
    pub fn new(idle_timeout: Duration, buffer_size: usize) -> Self {
        Self {
            idle_timeout,
            buffer_size: buffer_size.max(1),
        }
    }

    #[must_use]
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.relay_idle_timeout(), config.relay_buffer_size)
    }

    /// Pump bytes between `client` and `remote` until either direction ends.
    ///
    /// A clean end of stream on the first direction to finish is a success.
    /// Any other termination (I/O error, idle timeout) is returned as the
    /// relay's failure. Byte counts are reported either way.
    pub async fn run<C, R>(&self, client: &mut C, remote: &mut R) -> (RelayStats, Result<()>)
    where
        C: AsyncRead + AsyncWrite + Unpin,
        R: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut client_rd, mut client_wr) = tokio::io::split(client);
        let (mut remote_rd, mut remote_wr) = tokio::io::split(remote);

        let mut client_to_remote = 0u64;
        let mut remote_to_client = 0u64;

        let (closed_by, result) = {
            let upstream = self.pump(
                Direction::ClientToRemote,
                &mut client_rd,
                &mut remote_wr,
                &mut client_to_remote,
            );
            let downstream = self.pump(
                Direction::RemoteToClient,
                &mut remote_rd,
                &mut client_wr,
                &mut remote_to_client,
            );

            tokio::select! {
                result = upstream => (Direction::ClientToRemote, result),
                result = downstream => (Direction::RemoteToClient, result),
            }
        };

        let stats = RelayStats {
            closed_by,
            client_to_remote,
            remote_to_client,
        };
        (stats, result)
    }

    async fn pump<Rd, Wr>(
        &self,
        direction: Direction,
        reader: &mut Rd,
        writer: &mut Wr,
        transferred: &mut u64,
    ) -> Result<()>
    where
        Rd: AsyncRead + Unpin,
        Wr: AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; self.buffer_size];

        loop {
            let deadline = Instant::now() + self.idle_timeout;

            let n = match timeout_at(deadline, reader.read(&mut buf)).await {
                Ok(Ok(0)) => {
                    trace!(direction = direction.as_str(), "end of stream");
                    return Ok(());
                }
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(relay_error(direction, e)),
                Err(_) => return Err(self.idle_error(direction)),
            };

            let write = async {
                writer.write_all(&buf[..n]).await?;
                writer.flush().await
            };
            match timeout_at(deadline, write).await {
                Ok(Ok(())) => *transferred += n as u64,
                Ok(Err(e)) => return Err(relay_error(direction, e)),
                Err(_) => return Err(self.idle_error(direction)),
            }
        }
    }

    fn idle_error(&self, direction: Direction) -> ProxyError {
        ProxyError::IdleTimeout {
            direction: direction.as_str(),
            idle_ms: u64::try_from(self.idle_timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

fn relay_error(direction: Direction, source: std::io::Error) -> ProxyError {
    ProxyError::Relay {
        direction: direction.as_str(),
        source,
    }
}
