//! Buffered sink with a commit step that runs at shutdown.
//!
//! `AsyncWrite::poll_shutdown` is the only close hook a byte sink gets, so
//! work that must happen exactly once at close (committing a blob, pushing
//! bytes to a delegate, publishing a notification) is packaged as a
//! completion future, spawned on first shutdown poll, and awaited through a
//! oneshot channel.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;
use tokio::sync::oneshot;

type CompletionFuture = Pin<Box<dyn Future<Output = io::Result<()>> + Send>>;
type CompletionFn = Box<dyn FnOnce(Vec<u8>) -> CompletionFuture + Send>;

/// An in-memory write buffer whose contents are handed to a completion
/// closure when the caller shuts the sink down.
///
/// Dropping the sink without shutting it down discards the buffer and runs
/// nothing; the completion step is all-or-nothing.
pub struct BufferedSink {
    buffer: Vec<u8>,
    completion: Option<CompletionFn>,
    completion_rx: Option<oneshot::Receiver<io::Result<()>>>,
}

impl BufferedSink {
    pub fn new<F, Fut>(completion: F) -> Self
    where
        F: FnOnce(Vec<u8>) -> Fut + Send + 'static,
        Fut: Future<Output = io::Result<()>> + Send + 'static,
    {
        Self {
            buffer: Vec::new(),
            completion: Some(Box::new(move |bytes| Box::pin(completion(bytes)))),
            completion_rx: None,
        }
    }

    /// Pre-seed the buffer, e.g. with a byte-order mark that must precede
    /// caller-supplied bytes.
    pub fn with_prefix(mut self, prefix: &[u8]) -> Self {
        self.buffer.extend_from_slice(prefix);
        self
    }
}

impl AsyncWrite for BufferedSink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        this.buffer.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.completion_rx.is_none() {
            match this.completion.take() {
                Some(completion) => {
                    let buffer = std::mem::take(&mut this.buffer);
                    let (tx, rx) = oneshot::channel();
                    this.completion_rx = Some(rx);
                    tokio::spawn(async move {
                        let result = completion(buffer).await;
                        let _ = tx.send(result);
                    });
                }
                // Shutdown already completed earlier.
                None => return Poll::Ready(Ok(())),
            }
        }

        let Some(rx) = this.completion_rx.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        match Pin::new(rx).poll(cx) {
            Poll::Ready(Ok(result)) => {
                this.completion_rx = None;
                Poll::Ready(result)
            }
            Poll::Ready(Err(_)) => {
                this.completion_rx = None;
                Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::Other,
                    "completion task was cancelled",
                )))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Unpin for BufferedSink {}
