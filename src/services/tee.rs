//! Stream tee
//!
//! Wraps the upstream body so that every chunk handed to the caller is also
//! offered, without waiting, to a bounded channel read by the usage collector.
//! The caller side never sees backpressure from the observation side: a full
//! channel drops the copy, a closed one stops further copies.

use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use std::fmt::Display;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// How the upstream body ended from the caller's point of view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// Upstream reached EOF and the caller read all of it
    Completed,
    /// Upstream connection failed mid-body
    Failed(String),
    /// Caller went away before the body finished
    Aborted,
}

#[derive(Debug, Clone)]
pub struct TeeOutcome {
    pub end: StreamEnd,
    /// Bytes relayed to the caller
    pub bytes: u64,
    /// Chunks the observation side missed because its channel was full
    pub dropped_chunks: u64,
    pub finished_at: Instant,
}

impl TeeOutcome {
    /// Whether the observation side saw every byte of a finished body
    pub fn is_complete(&self) -> bool {
        self.end == StreamEnd::Completed && self.dropped_chunks == 0
    }
}

pin_project! {
    /// Caller-facing half of the tee
    pub struct UsageTee<S> {
        #[pin]
        inner: S,
        chunk_tx: Option<mpsc::Sender<Bytes>>,
        outcome_tx: Option<oneshot::Sender<TeeOutcome>>,
        // Declared Content-Length; the server drops a sized body without polling its end
        expected_len: Option<u64>,
        bytes: u64,
        dropped_chunks: u64,
    }

    impl<S> PinnedDrop for UsageTee<S> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            this.chunk_tx.take();
            if let Some(tx) = this.outcome_tx.take() {
                debug!("Response body dropped after {} bytes", this.bytes);
                let _ = tx.send(TeeOutcome {
                    end: StreamEnd::Aborted,
                    bytes: *this.bytes,
                    dropped_chunks: *this.dropped_chunks,
                    finished_at: Instant::now(),
                });
            }
        }
    }
}

/// Observation-side half of the tee
#[derive(Debug)]
pub struct TeeReceiver {
    chunks: mpsc::Receiver<Bytes>,
    outcome: oneshot::Receiver<TeeOutcome>,
}

/// Split `inner` into a caller-facing stream and a receiver for the copies
///
/// With `expected_len` set, the body counts as completed once that many bytes
/// were relayed, whether or not the end of the stream is ever polled.
pub fn tee<S>(inner: S, capacity: usize, expected_len: Option<u64>) -> (UsageTee<S>, TeeReceiver) {
    let (chunk_tx, chunks) = mpsc::channel(capacity.max(1));
    let (outcome_tx, outcome) = oneshot::channel();

    let mut relay = UsageTee {
        inner,
        chunk_tx: Some(chunk_tx),
        outcome_tx: Some(outcome_tx),
        expected_len,
        bytes: 0,
        dropped_chunks: 0,
    };

    if expected_len == Some(0) {
        relay.chunk_tx.take();
        if let Some(tx) = relay.outcome_tx.take() {
            let _ = tx.send(TeeOutcome {
                end: StreamEnd::Completed,
                bytes: 0,
                dropped_chunks: 0,
                finished_at: Instant::now(),
            });
        }
    }

    (relay, TeeReceiver { chunks, outcome })
}

impl<S> UsageTee<S> {
    fn finish(self: Pin<&mut Self>, end: StreamEnd) {
        let this = self.project();
        // Closing the chunk channel lets the receiver run to completion
        this.chunk_tx.take();
        if let Some(tx) = this.outcome_tx.take() {
            let _ = tx.send(TeeOutcome {
                end,
                bytes: *this.bytes,
                dropped_chunks: *this.dropped_chunks,
                finished_at: Instant::now(),
            });
        }
    }
}

impl<S, E> Stream for UsageTee<S>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.as_mut().project();

        match ready!(this.inner.poll_next(cx)) {
            Some(Ok(chunk)) => {
                *this.bytes += chunk.len() as u64;

                let receiver_gone = match this.chunk_tx.as_ref() {
                    Some(tx) => match tx.try_send(chunk.clone()) {
                        Ok(()) => false,
                        Err(TrySendError::Full(_)) => {
                            *this.dropped_chunks += 1;
                            false
                        }
                        Err(TrySendError::Closed(_)) => true,
                    },
                    None => false,
                };
                if receiver_gone {
                    this.chunk_tx.take();
                }

                let sized_body_done = this.expected_len.is_some_and(|len| *this.bytes >= len);
                if sized_body_done {
                    self.finish(StreamEnd::Completed);
                }

                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Err(e)) => {
                let reason = e.to_string();
                self.finish(StreamEnd::Failed(reason));
                Poll::Ready(Some(Err(e)))
            }
            None => {
                self.finish(StreamEnd::Completed);
                Poll::Ready(None)
            }
        }
    }
}

impl TeeReceiver {
    /// Feed every copied chunk to `on_chunk`, then wait for the end of the body
    pub async fn drain<F>(mut self, mut on_chunk: F) -> TeeOutcome
    where
        F: FnMut(&[u8]),
    {
        while let Some(chunk) = self.chunks.recv().await {
            on_chunk(&chunk);
        }

        match self.outcome.await {
            Ok(outcome) => outcome,
            // Unreachable while the tee's drop hook reports; treat as abort
            Err(_) => TeeOutcome {
                end: StreamEnd::Aborted,
                bytes: 0,
                dropped_chunks: 0,
                finished_at: Instant::now(),
            },
        }
    }
}
