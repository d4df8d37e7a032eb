//! Bidirectional relay between two established duplex connections.
//!
//! # Flow
//! ```text
//! left.read  ──copy──▶ right.write     (task 1, closes right when done)
//! right.read ──copy──▶ left.write      (task 2, closes left when done)
//! join(task 1, task 2) ──▶ both-done   (task 3)
//!
//! caller: select { cancel => close both, then wait both-done
//!                  both-done => return }
//! ```
//!
//! Transport errors end a direction but are never returned: the relay only
//! manages stream lifetime. Both connections are dropped before `relay`
//! returns, whichever branch ended it.

use std::future::Future;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;

use crate::net::connection::CloseHandle;
use crate::observability::metrics;

/// Per-read buffer for one relay direction.
const RELAY_BUF: usize = 32 * 1024;

/// How the relay terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Both directions stopped on their own.
    Completed,
    /// The cancellation signal fired first and both connections were closed.
    Cancelled,
}

/// Summary of a finished relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayReport {
    pub outcome: RelayOutcome,
    /// Bytes written to the right connection.
    pub left_to_right: u64,
    /// Bytes written to the left connection.
    pub right_to_left: u64,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    LeftToRight,
    RightToLeft,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::LeftToRight => "left_to_right",
            Direction::RightToLeft => "right_to_left",
        }
    }
}

/// Relay bytes between `left` and `right` until both directions finish or
/// `cancel` resolves.
///
/// Spawns exactly three tasks: one copier per direction and an aggregator
/// that joins them. When `cancel` wins the race both connections are closed
/// and the call still waits for the aggregator, so no copier outlives it.
pub async fn relay<L, R, C>(left: L, right: R, cancel: C) -> RelayReport
where
    L: AsyncRead + AsyncWrite + Send + 'static,
    R: AsyncRead + AsyncWrite + Send + 'static,
    C: Future<Output = ()>,
{
    let left_close = CloseHandle::new();
    let right_close = CloseHandle::new();

    let (left_read, left_write) = tokio::io::split(left);
    let (right_read, right_write) = tokio::io::split(right);

    let to_right = tokio::spawn(copy_direction(
        Direction::LeftToRight,
        left_read,
        right_write,
        left_close.clone(),
        right_close.clone(),
    ));
    let to_left = tokio::spawn(copy_direction(
        Direction::RightToLeft,
        right_read,
        left_write,
        right_close.clone(),
        left_close.clone(),
    ));

    let (done_tx, mut done_rx) = oneshot::channel();
    tokio::spawn(async move {
        let left_to_right = to_right.await.unwrap_or(0);
        let right_to_left = to_left.await.unwrap_or(0);
        let _ = done_tx.send((left_to_right, right_to_left));
    });

    tokio::pin!(cancel);
    let outcome = tokio::select! {
        _ = &mut cancel => {
            tracing::debug!("Relay cancelled, closing both connections");
            left_close.close();
            right_close.close();
            RelayOutcome::Cancelled
        }
        done = &mut done_rx => {
            let (left_to_right, right_to_left) = done.unwrap_or((0, 0));
            return RelayReport {
                outcome: RelayOutcome::Completed,
                left_to_right,
                right_to_left,
            };
        }
    };

    // Closing only unblocks the copiers; wait until they have actually exited.
    let (left_to_right, right_to_left) = done_rx.await.unwrap_or((0, 0));
    RelayReport {
        outcome,
        left_to_right,
        right_to_left,
    }
}

/// Copy `src` into `dst` until EOF, an error, or either side is closed.
///
/// Every chunk is flushed so buffering writers (TLS) hand data to the peer
/// right away. On exit the destination is closed, which stops the opposite
/// direction from reading it.
async fn copy_direction<S, D>(
    direction: Direction,
    mut src: S,
    mut dst: D,
    src_close: CloseHandle,
    dst_close: CloseHandle,
) -> u64
where
    S: AsyncRead + Unpin,
    D: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUF];
    let mut copied: u64 = 0;

    loop {
        let n = tokio::select! {
            res = src.read(&mut buf) => match res {
                Ok(0) => {
                    // Natural end: pass the EOF on before closing.
                    tokio::select! {
                        _ = dst.shutdown() => {}
                        _ = dst_close.closed() => {}
                    }
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::trace!(direction = direction.as_str(), error = %e, "Relay read failed");
                    break;
                }
            },
            _ = src_close.closed() => break,
            _ = dst_close.closed() => break,
        };

        let written = tokio::select! {
            res = write_chunk(&mut dst, &buf[..n]) => res,
            _ = dst_close.closed() => break,
        };
        if let Err(e) = written {
            tracing::trace!(direction = direction.as_str(), error = %e, "Relay write failed");
            break;
        }
        copied += n as u64;
    }

    dst_close.close();
    tracing::trace!(direction = direction.as_str(), bytes = copied, "Relay direction finished");
    metrics::record_relay_bytes(direction.as_str(), copied);
    copied
}

async fn write_chunk<D: AsyncWrite + Unpin>(dst: &mut D, chunk: &[u8]) -> std::io::Result<()> {
    dst.write_all(chunk).await?;
    dst.flush().await
}
