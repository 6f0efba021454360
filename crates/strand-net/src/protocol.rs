//! Protocol dispatch.
//!
//! Every new stream starts with a protocol header naming the handler it is for:
//!
//! ```text
//! ┌──────────┬─────────────────────┬──────────────────
//! │ len (u8) │ protocol tag (len)  │ protocol bytes ...
//! └──────────┴─────────────────────┴──────────────────
//! ```
//!
//! A zero length means "no tag"; such streams go to the default handler. Lookup is an
//! exact string match. Handlers run on their own task so a panicking handler only loses
//! its own stream.

use crate::conn::Stream;
use crate::error::{MuxError, NetError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::{Arc, PoisonError, RwLock};
use strand_core::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Longest representable protocol tag.
pub const MAX_PROTOCOL_LEN: usize = u8::MAX as usize;

/// A registered stream handler.
pub type StreamHandler = Arc<dyn Fn(Stream) -> BoxFuture<()> + Send + Sync>;

/// Box an async closure as a [`StreamHandler`].
pub fn handler_fn<F, Fut>(f: F) -> StreamHandler
where
    F: Fn(Stream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |stream| -> BoxFuture<()> { Box::pin(f(stream)) })
}

/// Write the protocol header. `None` writes the empty header.
///
/// # Errors
///
/// `HeaderTooLong` for tags above 255 bytes, or the write error.
pub async fn write_header<W>(w: &mut W, protocol: Option<&str>) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let tag = protocol.unwrap_or("").as_bytes();
    let len = u8::try_from(tag.len()).map_err(|_| MuxError::HeaderTooLong(tag.len()))?;
    let mut buf = Vec::with_capacity(1 + tag.len());
    buf.push(len);
    buf.extend_from_slice(tag);
    w.write_all(&buf).await?;
    w.flush().await?;
    Ok(())
}

/// Read the protocol header. `None` for the empty header.
///
/// # Errors
///
/// I/O errors, or `InvalidData` if the tag is not UTF-8.
pub async fn read_header<R>(r: &mut R) -> io::Result<Option<String>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = r.read_u8().await? as usize;
    if len == 0 {
        return Ok(None);
    }
    let mut tag = vec![0u8; len];
    r.read_exact(&mut tag).await?;
    String::from_utf8(tag)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Thread-safe map from protocol tag to handler.
#[derive(Default)]
pub struct ProtocolMux {
    handlers: RwLock<HashMap<String, StreamHandler>>,
    default_handler: RwLock<Option<StreamHandler>>,
}

impl ProtocolMux {
    /// Create an empty mux.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `protocol`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// `HeaderTooLong` if the tag cannot be written in a header.
    pub fn set_handler(&self, protocol: impl Into<String>, handler: StreamHandler) -> Result<()> {
        let protocol = protocol.into();
        if protocol.len() > MAX_PROTOCOL_LEN {
            return Err(MuxError::HeaderTooLong(protocol.len()).into());
        }
        tracing::debug!(%protocol, "registered protocol handler");
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(protocol, handler);
        Ok(())
    }

    /// Remove the handler for `protocol`. Returns whether one was registered.
    pub fn remove_handler(&self, protocol: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(protocol)
            .is_some()
    }

    /// Set or clear the handler for streams with no or an unknown tag.
    pub fn set_default_handler(&self, handler: Option<StreamHandler>) {
        *self
            .default_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = handler;
    }

    /// Registered tags, sorted.
    #[must_use]
    pub fn protocols(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        tags.sort();
        tags
    }

    /// Handler for `protocol`, falling back to the default handler.
    #[must_use]
    pub fn lookup(&self, protocol: Option<&str>) -> Option<StreamHandler> {
        if let Some(tag) = protocol {
            let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(h) = handlers.get(tag) {
                return Some(Arc::clone(h));
            }
        }
        self.default_handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Read the header from `stream` and run the matching handler to completion.
    ///
    /// The handler runs on its own task; if it panics the panic is logged and the
    /// stream is dropped. Dropping the returned future aborts the handler task.
    ///
    /// # Errors
    ///
    /// Header read failures, or `UnknownProtocol` (after closing the stream) when no
    /// handler matches.
    pub async fn handle(&self, mut stream: Stream) -> Result<()> {
        let tag = read_header(&mut stream).await?;
        let Some(handler) = self.lookup(tag.as_deref()) else {
            let _ = stream.shutdown().await;
            let tag = tag.unwrap_or_default();
            tracing::debug!(
                peer = %stream.remote_peer().short(),
                protocol = %tag,
                "no handler for protocol"
            );
            return Err(NetError::Mux(MuxError::UnknownProtocol(tag)));
        };
        stream.set_protocol(tag);
        let protocol = stream.protocol().map(str::to_owned);
        let peer = stream.remote_peer().short();

        let task = tokio::spawn(handler(stream));
        let _abort = AbortOnDrop(task.abort_handle());
        if let Err(e) = task.await {
            if e.is_panic() {
                tracing::error!(%peer, ?protocol, "stream handler panicked");
            } else {
                tracing::debug!(%peer, ?protocol, "stream handler cancelled");
            }
        }
        Ok(())
    }
}

/// Aborts a spawned handler when the dispatching future goes away.
struct AbortOnDrop(tokio::task::AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl std::fmt::Debug for ProtocolMux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolMux")
            .field("protocols", &self.protocols())
            .finish_non_exhaustive()
    }
}
