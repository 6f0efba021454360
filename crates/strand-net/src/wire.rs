//! Message framing over raw byte streams.
//!
//! Two framings are used: varint-delimited records for the version handshake and
//! identify, and fixed 4-byte big-endian length prefixes for secure-channel messages.

use async_trait::async_trait;
use std::io;
use strand_core::varint::MAX_VARINT_LEN;
use strand_core::{ParseError, varint};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Write `<varint len><record>` and flush.
pub(crate) async fn write_delimited<W>(w: &mut W, record: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    w.write_all(&strand_core::record::encode_delimited(record)).await?;
    w.flush().await
}

/// Read one unsigned varint, a byte at a time.
pub(crate) async fn read_varint<R>(r: &mut R) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut prefix = Vec::with_capacity(MAX_VARINT_LEN);
    loop {
        let byte = r.read_u8().await?;
        prefix.push(byte);
        if byte & 0x80 == 0 {
            break;
        }
        if prefix.len() >= MAX_VARINT_LEN {
            return Err(invalid(ParseError::InvalidVarint));
        }
    }
    let (value, _) = varint::decode(&prefix).map_err(invalid)?;
    Ok(value)
}

/// Read one varint-delimited record of at most `max` bytes.
pub(crate) async fn read_delimited<R>(r: &mut R, max: usize) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = read_varint(r).await?;
    let len = usize::try_from(len)
        .ok()
        .filter(|&l| l <= max)
        .ok_or_else(|| invalid(format!("record of {len} bytes exceeds {max}")))?;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write `<u32 be len><msg>` and flush.
pub(crate) async fn write_prefixed<W>(w: &mut W, msg: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let len = u32::try_from(msg.len()).map_err(|_| invalid("message too large"))?;
    let mut buf = Vec::with_capacity(4 + msg.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(msg);
    w.write_all(&buf).await?;
    w.flush().await
}

/// Read one `<u32 be len><msg>` message of at most `max` bytes.
pub(crate) async fn read_prefixed<R>(r: &mut R, max: usize) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = r.read_u32().await? as usize;
    if len > max {
        return Err(invalid(format!("message of {len} bytes exceeds {max}")));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Receiving half of a message-oriented channel.
#[async_trait]
pub trait MessageReader: Send + 'static {
    /// Next whole message. `UnexpectedEof` once the peer has gone.
    async fn read_msg(&mut self) -> io::Result<Vec<u8>>;
}

/// Sending half of a message-oriented channel.
#[async_trait]
pub trait MessageWriter: Send + 'static {
    /// Send one whole message.
    async fn write_msg(&mut self, msg: &[u8]) -> io::Result<()>;

    /// Flush and close the sending direction.
    async fn shutdown(&mut self) -> io::Result<()>;
}

/// Unencrypted length-prefixed messages over any byte stream.
#[derive(Debug)]
pub struct PlainMessages<T> {
    io: T,
    max: usize,
}

impl<T> PlainMessages<T> {
    /// Frame `io`, refusing messages above `max` bytes.
    pub fn new(io: T, max: usize) -> Self {
        Self { io, max }
    }
}

#[async_trait]
impl<T: AsyncRead + Unpin + Send + 'static> MessageReader for PlainMessages<T> {
    async fn read_msg(&mut self) -> io::Result<Vec<u8>> {
        read_prefixed(&mut self.io, self.max).await
    }
}

#[async_trait]
impl<T: AsyncWrite + Unpin + Send + 'static> MessageWriter for PlainMessages<T> {
    async fn write_msg(&mut self, msg: &[u8]) -> io::Result<()> {
        write_prefixed(&mut self.io, msg).await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.io.shutdown().await
    }
}

pub(crate) fn invalid<E>(err: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidData, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delimited_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_delimited(&mut a, b"hello").await.unwrap();
        write_delimited(&mut a, &[7u8; 300]).await.unwrap();

        assert_eq!(read_delimited(&mut b, 1024).await.unwrap(), b"hello");
        assert_eq!(read_delimited(&mut b, 1024).await.unwrap(), vec![7u8; 300]);
    }

    #[tokio::test]
    async fn test_delimited_limit() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_delimited(&mut a, &[0u8; 100]).await.unwrap();
        let err = read_delimited(&mut b, 10).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_prefixed_roundtrip_and_eof() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_prefixed(&mut a, b"sealed").await.unwrap();
        drop(a);

        assert_eq!(read_prefixed(&mut b, 64).await.unwrap(), b"sealed");
        let err = read_prefixed(&mut b, 64).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
