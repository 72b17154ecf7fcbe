// Byte-level transport seam for stream-oriented protocols.
//
// NETCONF and CLI sessions speak to a `Link` rather than to SSH
// directly, so tests can drive them over in-memory duplex pipes while
// production uses the russh channel in `ssh.rs`.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Error;

const READ_CHUNK: usize = 8192;

/// Bidirectional, unframed byte transport. Framing lives above this.
#[async_trait]
pub trait Link: Send {
    /// Write the whole buffer to the peer.
    async fn send(&mut self, data: &[u8]) -> Result<(), Error>;

    /// Next chunk of bytes from the peer; `Ok(None)` is orderly EOF.
    /// Chunk boundaries carry no meaning.
    async fn recv(&mut self) -> Result<Option<Bytes>, Error>;

    /// Tear the transport down. Idempotent.
    async fn shutdown(&mut self) -> Result<(), Error>;
}

/// [`Link`] over any async byte stream (TCP, `tokio::io::duplex`).
pub struct IoLink<S> {
    stream: S,
    closed: bool,
}

impl<S> IoLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self { stream, closed: false }
    }
}

#[async_trait]
impl<S> Link for IoLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Bytes>, Error> {
        if self.closed {
            return Ok(None);
        }
        let mut buf = vec![0u8; READ_CHUNK];
        let n = self.stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(Bytes::from(buf)))
    }

    async fn shutdown(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // The peer may already be gone; that is not a teardown failure.
        let _ = self.stream.shutdown().await;
        Ok(())
    }
}
