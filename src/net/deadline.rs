//! Idle deadlines for client connections.
//!
//! # Responsibilities
//! - Bound how long a client connection may sit idle during the TLS
//!   handshake and the HTTP exchange
//! - Let the tunnel path lift the bound once the connection is hijacked
//!
//! # Design Decisions
//! - The deadline is an idle timer: every successful read or write re-arms it
//! - Expiry surfaces as `io::ErrorKind::TimedOut` from the pending operation
//! - The timer keeps one waker, so a stream is expected to be driven from a
//!   single task while a deadline is set (true for hyper connections)

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Instant, Sleep};

/// A connection whose idle deadline can be changed after it was accepted.
pub trait Deadline {
    /// Set the idle deadline, or remove it with `None`.
    ///
    /// Fails with `NotConnected` when the connection is already shut down.
    fn set_deadline(&mut self, idle: Option<Duration>) -> io::Result<()>;

    fn clear_deadline(&mut self) -> io::Result<()> {
        self.set_deadline(None)
    }
}

/// Stream wrapper enforcing an optional idle deadline.
#[derive(Debug)]
pub struct DeadlineStream<S> {
    inner: S,
    idle: Option<Duration>,
    timer: Option<Pin<Box<Sleep>>>,
    shut_down: bool,
}

impl<S> DeadlineStream<S> {
    /// Wrap `inner` without any deadline.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            idle: None,
            timer: None,
            shut_down: false,
        }
    }

    /// Wrap `inner` with an idle deadline already armed.
    pub fn with_deadline(inner: S, idle: Duration) -> Self {
        Self {
            inner,
            idle: Some(idle),
            timer: Some(Box::pin(tokio::time::sleep(idle))),
            shut_down: false,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Currently configured idle deadline.
    pub fn deadline(&self) -> Option<Duration> {
        self.idle
    }

    fn rearm(&mut self) {
        if let (Some(idle), Some(timer)) = (self.idle, self.timer.as_mut()) {
            timer.as_mut().reset(Instant::now() + idle);
        }
    }

    fn poll_expired(&mut self, cx: &mut Context<'_>) -> bool {
        match self.timer.as_mut() {
            Some(timer) => timer.as_mut().poll(cx).is_ready(),
            None => false,
        }
    }
}

impl<S> Deadline for DeadlineStream<S> {
    fn set_deadline(&mut self, idle: Option<Duration>) -> io::Result<()> {
        if self.shut_down {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "cannot set deadline on a closed connection",
            ));
        }
        self.idle = idle;
        self.timer = idle.map(|idle| Box::pin(tokio::time::sleep(idle)));
        Ok(())
    }
}

fn deadline_exceeded() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "connection idle deadline exceeded")
}

impl<S: AsyncRead + Unpin> AsyncRead for DeadlineStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(res) => {
                if res.is_ok() {
                    this.rearm();
                }
                Poll::Ready(res)
            }
            Poll::Pending if this.poll_expired(cx) => Poll::Ready(Err(deadline_exceeded())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for DeadlineStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(res) => {
                if res.is_ok() {
                    this.rearm();
                }
                Poll::Ready(res)
            }
            Poll::Pending if this.poll_expired(cx) => Poll::Ready(Err(deadline_exceeded())),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_flush(cx) {
            Poll::Pending if this.poll_expired(cx) => Poll::Ready(Err(deadline_exceeded())),
            other => other,
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.shut_down = true;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test(start_paused = true)]
    async fn idle_read_times_out() {
        let (client, _peer) = duplex(64);
        let mut stream = DeadlineStream::with_deadline(client, Duration::from_secs(5));

        let mut buf = [0u8; 8];
        let err = stream.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn activity_rearms_deadline() {
        let (client, mut peer) = duplex(64);
        let mut stream = DeadlineStream::with_deadline(client, Duration::from_secs(5));

        tokio::spawn(async move {
            for _ in 0..3 {
                tokio::time::sleep(Duration::from_secs(3)).await;
                peer.write_all(b"x").await.unwrap();
            }
            // Keep the peer open so the reader can only stop on the deadline.
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let mut buf = [0u8; 1];
        for _ in 0..3 {
            stream.read_exact(&mut buf).await.unwrap();
        }
        let err = stream.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn cleared_deadline_never_fires() {
        let (client, mut peer) = duplex(64);
        let mut stream = DeadlineStream::with_deadline(client, Duration::from_secs(1));
        stream.clear_deadline().unwrap();
        assert_eq!(stream.deadline(), None);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            peer.write_all(b"late").await.unwrap();
        });

        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"late");
    }

    #[tokio::test]
    async fn set_deadline_after_shutdown_fails() {
        let (client, _peer) = duplex(64);
        let mut stream = DeadlineStream::new(client);
        stream.shutdown().await.unwrap();

        let err = stream.clear_deadline().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
