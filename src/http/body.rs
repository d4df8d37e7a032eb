//! Streaming body copy with per-chunk flushing.
//!
//! # Responsibilities
//! - Copy a body to its destination chunk by chunk
//! - Push every chunk to the peer immediately (SSE, chunked responses)
//! - Bridge hyper bodies to `AsyncRead` and back
//!
//! # Design Decisions
//! - Flushing is an optional capability of the sink; sinks without it flush
//!   as a no-op
//! - Copy failures end the copy but are not reported: the copier manages the
//!   stream's lifetime only

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, TryStreamExt};
use http_body_util::BodyExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;

/// Size of one copied chunk.
pub const COPY_BUF: usize = 128 * 1024;

/// Destination of a streamed body.
pub trait BodySink: Send {
    /// Accept one chunk. The sink may keep it buffered until flushed.
    fn write_chunk(&mut self, chunk: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Push buffered data to the peer.
    ///
    /// Sinks without an explicit flush keep this default, which does nothing.
    fn flush(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        std::future::ready(Ok(()))
    }
}

impl<W> BodySink for W
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.write_all(chunk).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        AsyncWriteExt::flush(self).await
    }
}

/// Copy `body` into `sink`, flushing after every chunk that carried data.
///
/// Stops at end of stream, at the first read error or at the first write
/// error. Returns the number of bytes handed to the sink.
pub async fn copy_body<S, R>(sink: &mut S, body: &mut R) -> u64
where
    S: BodySink,
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; COPY_BUF];
    let mut copied: u64 = 0;

    loop {
        let n = match body.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::trace!(error = %e, bytes = copied, "Body read ended");
                break;
            }
        };

        if let Err(e) = sink.write_chunk(&buf[..n]).await {
            tracing::trace!(error = %e, bytes = copied, "Body write ended");
            break;
        }
        copied += n as u64;

        if let Err(e) = sink.flush().await {
            tracing::trace!(error = %e, "Body flush failed");
        }
    }

    copied
}

/// Adapt an HTTP body into an `AsyncRead` over its data frames.
///
/// Trailers are dropped; body errors surface as `io::Error`.
pub fn body_reader<B>(body: B) -> impl AsyncRead + Unpin + Send
where
    B: hyper::body::Body<Data = Bytes> + Unpin + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    StreamReader::new(body.into_data_stream().map_err(io::Error::other))
}

/// Sink that feeds a response body through a channel.
///
/// Written chunks accumulate in a local buffer; `flush` hands the buffer to
/// the receiving [`ChunkStream`] at once. Without flushes, data only leaves
/// once `high_water` bytes are pending.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
    pending: BytesMut,
    high_water: usize,
}

/// Receiving half of a [`ChannelSink`], usable as a response body stream.
#[derive(Debug)]
pub struct ChunkStream {
    rx: mpsc::Receiver<Bytes>,
}

/// Create a connected sink/stream pair.
///
/// `depth` bounds how many flushed chunks may wait for the reader.
pub fn channel_body(depth: usize) -> (ChannelSink, ChunkStream) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    (
        ChannelSink {
            tx,
            pending: BytesMut::new(),
            high_water: COPY_BUF,
        },
        ChunkStream { rx },
    )
}

impl ChannelSink {
    /// Bytes written but not yet handed to the reader.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    async fn send_pending(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let chunk = self.pending.split().freeze();
        self.tx
            .send(chunk)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "body receiver dropped"))
    }
}

impl BodySink for ChannelSink {
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        if self.tx.is_closed() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "body receiver dropped",
            ));
        }
        self.pending.extend_from_slice(chunk);
        if self.pending.len() >= self.high_water {
            self.send_pending().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.send_pending().await
    }
}

impl Stream for ChunkStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|chunk| chunk.map(Ok))
    }
}
