/*!
Bounded in-memory byte pipe connecting a snapshot producer to its consumer.

[`pipe`] returns a writer/reader pair backed by a bounded channel of byte
chunks. A writer blocks once `capacity` chunks are in flight, so a slow
consumer throttles the producer.

End of stream is explicit. The reader reports a clean EOF only after the
writer called `shutdown`. A writer closed through
[`PipeWriter::close_with_error`] hands its error to the reader, and a writer
dropped without closing makes the reader fail with `UnexpectedEof`. A
truncated stream is never mistaken for a complete one. Dropping the reader
makes every later write fail with `BrokenPipe`.
*/

use bytes::Bytes;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc::{self, error::SendError, OwnedPermit};

/// Largest chunk a single write hands to the channel
pub const MAX_CHUNK_SIZE: usize = 64 * 1024;

/// Default number of chunks that may be in flight
pub const DEFAULT_CAPACITY: usize = 16;

type ReserveFuture =
    Pin<Box<dyn Future<Output = Result<OwnedPermit<Bytes>, SendError<()>>> + Send>>;

#[derive(Debug)]
enum PipeState {
    Open,
    Closed,
    Failed(Option<io::Error>),
}

type SharedState = Arc<Mutex<PipeState>>;

/// Create a pipe holding at most `capacity` chunks in flight
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let state = Arc::new(Mutex::new(PipeState::Open));
    (
        PipeWriter {
            sender: Some(sender),
            reserve: None,
            state: Arc::clone(&state),
        },
        PipeReader {
            receiver,
            current: Bytes::new(),
            state,
        },
    )
}

/// Write end of a [`pipe`]
pub struct PipeWriter {
    sender: Option<mpsc::Sender<Bytes>>,
    reserve: Option<ReserveFuture>,
    state: SharedState,
}

impl PipeWriter {
    /// Close the pipe so the reader fails with `err` once it drains the
    /// chunks already sent
    pub fn close_with_error(&mut self, err: io::Error) {
        self.finish(PipeState::Failed(Some(err)));
    }

    fn finish(&mut self, outcome: PipeState) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(*state, PipeState::Open) {
                *state = outcome;
            }
        }
        // The reader only observes end of channel once every sender is gone,
        // including the clone held by a pending reservation.
        self.reserve = None;
        self.sender = None;
    }
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let mut reserve = match this.reserve.take() {
            Some(reserve) => reserve,
            None => match &this.sender {
                Some(sender) => Box::pin(sender.clone().reserve_owned()),
                None => {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "write to a closed snapshot pipe",
                    )))
                }
            },
        };

        match reserve.as_mut().poll(cx) {
            Poll::Pending => {
                this.reserve = Some(reserve);
                Poll::Pending
            }
            Poll::Ready(Err(_)) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "snapshot pipe reader went away",
            ))),
            Poll::Ready(Ok(permit)) => {
                let n = buf.len().min(MAX_CHUNK_SIZE);
                permit.send(Bytes::copy_from_slice(&buf[..n]));
                Poll::Ready(Ok(n))
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().finish(PipeState::Closed);
        Poll::Ready(Ok(()))
    }
}

/// Read end of a [`pipe`]
pub struct PipeReader {
    receiver: mpsc::Receiver<Bytes>,
    current: Bytes,
    state: SharedState,
}

impl PipeReader {
    fn end_of_stream(&self) -> io::Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match &mut *state {
            PipeState::Closed => Ok(()),
            PipeState::Failed(err) => Err(err.take().unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::Other, "snapshot pipe writer failed")
            })),
            PipeState::Open => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "snapshot pipe writer dropped without closing",
            )),
        }
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.current.is_empty() {
                let n = this.current.len().min(buf.remaining());
                let chunk = this.current.split_to(n);
                buf.put_slice(&chunk);
                return Poll::Ready(Ok(()));
            }

            match ready!(this.receiver.poll_recv(cx)) {
                Some(chunk) => this.current = chunk,
                None => return Poll::Ready(this.end_of_stream()),
            }
        }
    }
}
