//! Accepted client connection, plain or TLS.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;

use crate::net::deadline::{Deadline, DeadlineStream};

/// A client connection as handed to the HTTP layer.
///
/// Both variants sit on top of the same deadline-guarded TCP stream, so the
/// deadline can be cleared regardless of whether TLS was negotiated.
pub enum ClientStream {
    Plain(DeadlineStream<TcpStream>),
    Tls(Box<TlsStream<DeadlineStream<TcpStream>>>),
}

impl ClientStream {
    pub fn is_tls(&self) -> bool {
        matches!(self, ClientStream::Tls(_))
    }

    /// Number of certificates the client presented during the handshake.
    pub fn peer_certificate_count(&self) -> usize {
        match self {
            ClientStream::Plain(_) => 0,
            ClientStream::Tls(stream) => stream
                .get_ref()
                .1
                .peer_certificates()
                .map_or(0, |certs| certs.len()),
        }
    }
}

impl Deadline for ClientStream {
    fn set_deadline(&mut self, idle: Option<Duration>) -> io::Result<()> {
        match self {
            ClientStream::Plain(stream) => stream.set_deadline(idle),
            ClientStream::Tls(stream) => stream.get_mut().0.set_deadline(idle),
        }
    }
}

impl AsyncRead for ClientStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClientStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            ClientStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ClientStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ClientStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            ClientStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClientStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            ClientStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClientStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            ClientStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}
