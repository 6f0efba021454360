//! Relay service.
//!
//! Forwards a stream through one intermediate peer. After the `/ipfs/relay` protocol
//! header, the opener writes the source and destination peer ids as raw multihashes:
//!
//! ```text
//! ┌───────────────────┬───────────────────┬──────────────────────────────
//! │ src multihash     │ dst multihash     │ inner protocol header + data
//! └───────────────────┴───────────────────┴──────────────────────────────
//! ```
//!
//! The relay (`B` in `A -> B -> C`) opens its own relay stream to `dst`, repeats the
//! header and then copies bytes both ways until both directions end. The destination
//! sees `dst == local` and hands the rest of the stream to its protocol mux.
//!
//! Relay is not routing: `dst` must already be directly connected to the relay.

use crate::conn::Stream;
use crate::error::{NetError, Result, RoutingError};
use crate::network::{Network, WeakNetwork};
use crate::protocol::{self, StreamHandler, handler_fn};
use crate::wire;
use strand_core::multihash::MAX_DIGEST_LEN;
use strand_core::{Multihash, PeerId};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

/// Protocol tag of relay streams.
pub const RELAY_PROTOCOL: &str = "/ipfs/relay";

/// Bytes piped by one relayed stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Source to destination
    pub forward: u64,
    /// Destination to source
    pub backward: u64,
}

/// Encode the relay header.
#[must_use]
pub fn encode_header(src: &PeerId, dst: &PeerId) -> Vec<u8> {
    let mut header = Vec::with_capacity(src.as_bytes().len() + dst.as_bytes().len());
    header.extend_from_slice(src.as_bytes());
    header.extend_from_slice(dst.as_bytes());
    header
}

/// Read one multihash-encoded peer id off a stream.
async fn read_peer<R>(r: &mut R) -> Result<PeerId>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let code = wire::read_varint(r).await?;
    let len = wire::read_varint(r).await?;
    let len = usize::try_from(len)
        .ok()
        .filter(|&l| l <= MAX_DIGEST_LEN)
        .ok_or_else(|| wire::invalid(format!("relay peer digest of {len} bytes")))?;
    let mut digest = vec![0u8; len];
    r.read_exact(&mut digest).await?;
    Ok(PeerId::from_multihash(Multihash::wrap(code, &digest)?))
}

/// Read the relay header: `(src, dst)`.
///
/// # Errors
///
/// I/O errors or a malformed multihash.
pub async fn read_header<R>(r: &mut R) -> Result<(PeerId, PeerId)>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let src = read_peer(r).await?;
    let dst = read_peer(r).await?;
    Ok((src, dst))
}

/// Serve one inbound relay stream. Returns the pipe totals, or `None` when the stream
/// was addressed to us and went to the local protocol mux.
async fn serve(net: &Network, mut stream: Stream) -> Result<Option<RelayStats>> {
    let (src, dst) = read_header(&mut stream).await?;
    let local = net.local_peer();
    if &src == local {
        return Err(RoutingError::RelayingFromSelf.into());
    }
    if &dst == local {
        tracing::debug!(src = %src.short(), via = %stream.remote_peer().short(), "relayed stream arrived");
        net.inner.mux.handle(stream).await?;
        return Ok(None);
    }

    let group = net
        .group(&dst)
        .ok_or_else(|| RoutingError::NoRoute(dst.clone()))?;
    let mut onward = group.new_stream_with_protocol(Some(RELAY_PROTOCOL)).await?;
    onward.write_all(&encode_header(&src, &dst)).await?;
    onward.flush().await?;

    tracing::debug!(src = %src.short(), dst = %dst.short(), "relaying stream");
    let (forward, backward) = tokio::io::copy_bidirectional(&mut stream, &mut onward).await?;
    let stats = RelayStats { forward, backward };
    tracing::debug!(
        src = %src.short(),
        dst = %dst.short(),
        forward = stats.forward,
        backward = stats.backward,
        "relay finished"
    );
    Ok(Some(stats))
}

/// Responder registered under [`RELAY_PROTOCOL`].
pub(crate) fn handler(net: WeakNetwork) -> StreamHandler {
    handler_fn(move |stream: Stream| {
        let net = net.clone();
        async move {
            let Some(net) = net.upgrade() else { return };
            let peer = stream.remote_peer().short();
            if let Err(e) = serve(&net, stream).await {
                tracing::debug!(%peer, error = %e, "relay stream failed");
            }
        }
    })
}

/// Client side of the relay service.
#[derive(Debug, Clone, Copy)]
pub struct Relay<'a> {
    net: &'a Network,
}

impl<'a> Relay<'a> {
    /// Relay client for `net`.
    #[must_use]
    pub fn new(net: &'a Network) -> Self {
        Self { net }
    }

    /// Open a stream to `dst` for `protocol`, relayed through `via`.
    ///
    /// `via` is dialed if needed; `dst` must be connected to `via`. A relay that cannot
    /// reach `dst` closes the stream, which surfaces on the first read.
    ///
    /// # Errors
    ///
    /// Dial errors for `via`, `HeaderTooLong`, or write errors.
    pub async fn open_relayed(&self, via: &PeerId, dst: &PeerId, protocol: &str) -> Result<Stream> {
        if via == dst {
            return self.net.new_stream(protocol, dst).await;
        }
        let mut stream = self.net.new_stream(RELAY_PROTOCOL, via).await?;
        stream
            .write_all(&encode_header(self.net.local_peer(), dst))
            .await
            .map_err(NetError::from)?;
        protocol::write_header(&mut stream, Some(protocol)).await?;
        stream.set_protocol(Some(protocol.to_owned()));
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_crypto::KeyType;

    #[tokio::test]
    async fn test_header_roundtrip() {
        let (_, _, a) = strand_core::peer::generate(KeyType::Ed25519);
        let (_, _, c) = strand_core::peer::generate(KeyType::Ed25519);
        let mut bytes = encode_header(&a, &c);
        bytes.extend_from_slice(b"rest");

        let mut reader = bytes.as_slice();
        let (src, dst) = read_header(&mut reader).await.unwrap();
        assert_eq!(src, a);
        assert_eq!(dst, c);
        assert_eq!(reader, b"rest");
    }

    #[tokio::test]
    async fn test_header_rejects_oversized_digest() {
        // code 0x1e, length 200
        let bytes = [0x1e, 0xc8, 0x01, 0x00];
        let mut reader = &bytes[..];
        assert!(read_header(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn test_header_truncated() {
        let (_, _, a) = strand_core::peer::generate(KeyType::Ed25519);
        let bytes = a.as_bytes().to_vec();
        let mut reader = bytes.as_slice();
        assert!(read_header(&mut reader).await.is_err());
    }
}
