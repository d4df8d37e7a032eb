//! Taking over the raw connection beneath an HTTP exchange.
//!
//! # Flow
//! ```text
//! handler: Hijacker::from_request(&mut req)   (fails: NotHijackable)
//!          return 200 to the client
//! task:    hijacker.hijack::<ClientStream>()  (waits for hyper to release the IO)
//!          → clear idle deadline             (fails: DeadlineClearFailed, conn closed)
//!          → Hijacked { conn, read_buf }
//! ```

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::http::Request;
use bytes::{Buf, Bytes};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::net::deadline::Deadline;

/// Errors while taking over a connection.
#[derive(Debug, Error)]
pub enum HijackError {
    /// The exchange offers no connection takeover, or the connection is not
    /// of the requested type.
    #[error("connection doesn't support hijacking")]
    NotHijackable,

    /// The HTTP layer failed to hand over the connection.
    #[error("connection upgrade failed: {0}")]
    Upgrade(#[source] hyper::Error),

    /// The connection's deadline could not be cleared. The connection has
    /// been closed.
    #[error("failed to clear connection deadline: {0}")]
    DeadlineClearFailed(#[source] io::Error),
}

/// Pending takeover of the connection that carried a request.
#[derive(Debug)]
pub struct Hijacker {
    on_upgrade: OnUpgrade,
}

impl Hijacker {
    /// Claim the takeover capability of `req`.
    ///
    /// Only requests that asked for an upgrade (CONNECT, `Upgrade:`) on a
    /// connection served with upgrades enabled carry one.
    pub fn from_request<B>(req: &mut Request<B>) -> Result<Self, HijackError> {
        req.extensions_mut()
            .remove::<OnUpgrade>()
            .map(|on_upgrade| Self { on_upgrade })
            .ok_or(HijackError::NotHijackable)
    }

    /// Wait until the response has been sent and take the connection.
    ///
    /// `T` is the stream type the connection was served with.
    pub async fn hijack<T>(self) -> Result<Hijacked<T>, HijackError>
    where
        T: AsyncRead + AsyncWrite + Deadline + Unpin + Send + 'static,
    {
        let upgraded = self.on_upgrade.await.map_err(HijackError::Upgrade)?;
        let parts = upgraded
            .downcast::<TokioIo<T>>()
            .map_err(|_| HijackError::NotHijackable)?;
        take_over(parts.io.into_inner(), parts.read_buf).await
    }
}

async fn take_over<T>(mut conn: T, read_buf: Bytes) -> Result<Hijacked<T>, HijackError>
where
    T: AsyncWrite + Deadline + Unpin,
{
    if let Err(e) = conn.clear_deadline() {
        let _ = conn.shutdown().await;
        return Err(HijackError::DeadlineClearFailed(e));
    }
    Ok(Hijacked { conn, read_buf })
}

/// A taken-over connection plus the bytes the HTTP layer read ahead.
///
/// Reading yields the buffered bytes first, then continues on the
/// connection. Writes go straight to the connection.
#[derive(Debug)]
pub struct Hijacked<T> {
    conn: T,
    read_buf: Bytes,
}

impl<T> Hijacked<T> {
    /// Bytes received but not yet consumed.
    pub fn buffered(&self) -> &[u8] {
        &self.read_buf
    }

    pub fn get_ref(&self) -> &T {
        &self.conn
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.conn
    }

    /// Split into the raw connection and the unconsumed bytes.
    pub fn into_parts(self) -> (T, Bytes) {
        (self.conn, self.read_buf)
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for Hijacked<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        if this.read_buf.has_remaining() {
            let n = this.read_buf.len().min(buf.remaining());
            buf.put_slice(&this.read_buf[..n]);
            this.read_buf.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.conn).poll_read(cx, buf)
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for Hijacked<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().conn).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().conn).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().conn).poll_shutdown(cx)
    }
}
