//! The single outbound path every request serializes through (spec §4.3).
//!
//! One `FramedWrite` half, one `Mutex` around it — grounded on the same
//! single-writer-handle shape the teacher crate keeps around its socket,
//! generalized from a raw socket write to a `Sink` of length-delimited
//! frames so a request's bytes can never interleave with another's.

use bytes::{Bytes, BytesMut};
use futures_util::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tokio_util::codec::FramedWrite;

use crate::error::{Error, Result};

pub struct Writer<W> {
    framed: Mutex<FramedWrite<W, tokio_util::codec::LengthDelimitedCodec>>,
}

impl<W: AsyncWrite + Unpin> Writer<W> {
    pub fn new(sink: W, codec: tokio_util::codec::LengthDelimitedCodec) -> Self {
        Self {
            framed: Mutex::new(FramedWrite::new(sink, codec)),
        }
    }

    /// Serializes and sends one complete packet body (the caller has
    /// already written the packet type byte and request id, if any, into
    /// `body`). Holds the writer lock only for the duration of the send so
    /// concurrent callers queue rather than race.
    pub async fn transmit(&self, body: BytesMut) -> Result<()> {
        let mut framed = self.framed.lock().await;
        framed
            .send(Bytes::from(body))
            .await
            .map_err(Error::transport)
    }

    /// Flushes and shuts down the underlying stream (spec §4.6 `close()`).
    pub async fn close(&self) -> Result<()> {
        let mut framed = self.framed.lock().await;
        futures_util::SinkExt::<Bytes>::close(&mut *framed)
            .await
            .map_err(Error::transport)
    }
}
