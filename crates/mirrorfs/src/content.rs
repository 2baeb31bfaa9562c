//! Content streams.
//!
//! Reads are served from the cache attribute when it is trusted, otherwise
//! from the delegate through a tee that fills the cache as the caller
//! drains. Writes buffer in memory and duplicate into the delegate and the
//! cache at shutdown, bracketed by the before/after content-change
//! notifications.

use std::future::Future;
use std::io::{self, Cursor};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use diagnostics::log_warn;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::oneshot;

use crate::error::Result;
use crate::events::{ChangeListener, VfsEvent};
use crate::fs::MirrorFs;
use crate::node::NodeRef;
use crate::record::{Attribute, FILE_CONTENT, RecordFlags};
use crate::sink::BufferedSink;
use crate::store::{AttrReader, AttrWriter};

type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;
type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;
type FinalizeFuture = Pin<Box<dyn Future<Output = io::Result<()>> + Send>>;
type FinalizeFn = Box<dyn FnOnce(u64) -> FinalizeFuture + Send>;

fn to_io(error: crate::error::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, error.to_string())
}

impl MirrorFs {
    /// Streamed read over a named attribute blob, if present.
    pub async fn read_attribute(
        &self,
        file: &NodeRef,
        attribute: &Attribute,
    ) -> Result<Option<AttrReader>> {
        let id = file.file_id().await;
        self.records.read_attribute(id, &attribute.key()).await
    }

    /// Buffered sink over a named attribute blob; commits at shutdown.
    pub async fn write_attribute(
        &self,
        file: &NodeRef,
        attribute: &Attribute,
    ) -> Result<AttrWriter> {
        let id = file.file_id().await;
        self.records.write_attribute(id, &attribute.key()).await
    }

    /// Open the file's content for reading.
    ///
    /// Payloads below the load-through-buffer threshold are fully
    /// materialized before returning, so no stream handle stays open.
    pub async fn read_content(&self, file: &NodeRef) -> Result<BoxedReader> {
        let id = file.file_id().await;
        let threshold = self.options.load_through_buffer_threshold as i64;

        let cached = self.records.read_attribute(id, &FILE_CONTENT.key()).await?;
        if let Some(reader) = cached {
            let must_reload = self.check_flag(id, RecordFlags::MUST_RELOAD_CONTENT).await?;
            let length = self.records.get_length(id).await?;
            if !must_reload && length >= 0 {
                let mut limited = reader.take(length as u64);
                if length < threshold {
                    let mut buffer = Vec::with_capacity(length as usize);
                    limited.read_to_end(&mut buffer).await?;
                    return Ok(Box::pin(Cursor::new(buffer)));
                }
                return Ok(Box::pin(limited));
            }
        }

        // No trusted cache: go to the delegate and fill the cache on the way
        // through.
        self.set_flag(id, RecordFlags::MUST_RELOAD_CONTENT, false).await?;

        let fs = file.filesystem().await;
        let path = file.path().await;
        let expected = fs.length(&path).await?;
        let delegate_stream = fs.input_stream(&path).await?;
        let cache_sink = self.records.write_attribute(id, &FILE_CONTENT.key()).await?;

        let this = self.clone();
        let display_path = path.display().to_string();
        let finalize: FinalizeFn = Box::new(move |bytes_read| {
            Box::pin(async move {
                this.records.set_length(id, expected).await.map_err(to_io)?;
                if bytes_read as i64 != expected {
                    log_warn!(
                        "delegate returned {bytes_read} bytes for {display_path}, expected {expected}; cache flagged for reload",
                        bytes_read,
                        display_path,
                        expected
                    );
                    this.set_flag(id, RecordFlags::MUST_RELOAD_CONTENT, true)
                        .await
                        .map_err(to_io)?;
                }
                Ok(())
            })
        });

        let tee = TeeReader::new(delegate_stream, cache_sink, finalize);
        if expected >= 0 && expected < threshold {
            let mut tee = tee;
            let mut buffer = Vec::with_capacity(expected as usize);
            tee.read_to_end(&mut buffer).await?;
            return Ok(Box::pin(Cursor::new(buffer)));
        }
        Ok(Box::pin(tee))
    }

    /// Open the file's content for writing.
    ///
    /// The `before` content-change notification is published here, ahead of
    /// any byte. The returned sink buffers everything (seeded with the
    /// file's byte-order mark when declared); shutting it down duplicates
    /// the bytes into the delegate and the cache, applies a touch, and
    /// publishes `after`. A sink dropped without shutdown changes nothing.
    pub async fn write_content(
        &self,
        file: &NodeRef,
        mod_stamp: i64,
        time_stamp: i64,
    ) -> Result<BoxedWriter> {
        let old_stamp = file.modification_stamp().await;
        let batch = vec![VfsEvent::ContentChange {
            file: file.clone(),
            old_stamp,
            new_stamp: mod_stamp,
            from_refresh: false,
        }];

        let listeners = self.listeners.lock().await.clone();
        for listener in &listeners {
            listener.before(&batch).await;
        }

        let bom = file.bom().await.unwrap_or_default();
        let this = self.clone();
        let file = file.clone();
        let sink = BufferedSink::new(move |bytes| async move {
            this.commit_content(&file, bytes, mod_stamp, time_stamp, batch, listeners)
                .await
        })
        .with_prefix(&bom);
        Ok(Box::pin(sink))
    }

    /// Write-path completion: delegate first, cache second, then the touch
    /// and the matching `after` notification. Runs once, at sink shutdown.
    async fn commit_content(
        &self,
        file: &NodeRef,
        bytes: Vec<u8>,
        mod_stamp: i64,
        time_stamp: i64,
        batch: Vec<VfsEvent>,
        listeners: Vec<Arc<dyn ChangeListener>>,
    ) -> io::Result<()> {
        let id = file.file_id().await;
        let fs = file.filesystem().await;
        let path = file.path().await;

        let mut delegate = fs.output_stream(&path).await.map_err(to_io)?;
        delegate.write_all(&bytes).await?;
        delegate.shutdown().await?;
        if time_stamp > 0 {
            fs.set_timestamp(&path, time_stamp).await.map_err(to_io)?;
        }

        let cache_write = async {
            let mut cache = self
                .records
                .write_attribute(id, &FILE_CONTENT.key())
                .await
                .map_err(to_io)?;
            cache.write_all(&bytes).await?;
            cache.shutdown().await
        };
        if let Err(error) = cache_write.await {
            // The delegate already has the new bytes; make sure the stale
            // cached copy is not trusted again.
            let _ = self
                .set_flag(id, RecordFlags::MUST_RELOAD_CONTENT, true)
                .await;
            return Err(error);
        }

        self.execute_touch(file, false, mod_stamp)
            .await
            .map_err(to_io)?;
        for listener in &listeners {
            listener.after(&batch).await;
        }
        Ok(())
    }
}

enum TeeState {
    Streaming,
    ShuttingDown,
    Finalizing(oneshot::Receiver<io::Result<()>>),
    Done,
}

/// Forwards bytes from the delegate to the caller while copying them into
/// the cache attribute sink.
///
/// When the delegate stream ends, the sink is shut down (committing the
/// blob) and the finalize step records the observed byte count before EOF is
/// reported to the caller. Dropping the tee early commits nothing.
struct TeeReader {
    inner: BoxedReader,
    sink: BoxedWriter,
    /// Bytes already handed to the caller but not yet accepted by the sink.
    pending: Vec<u8>,
    bytes_read: u64,
    finalize: Option<FinalizeFn>,
    state: TeeState,
}

impl TeeReader {
    fn new(inner: BoxedReader, sink: BoxedWriter, finalize: FinalizeFn) -> Self {
        Self {
            inner,
            sink,
            pending: Vec::new(),
            bytes_read: 0,
            finalize: Some(finalize),
            state: TeeState::Streaming,
        }
    }

    /// Push pending bytes into the sink. Ok(true) means drained.
    fn flush_pending(&mut self, cx: &mut Context<'_>) -> io::Result<bool> {
        while !self.pending.is_empty() {
            match self.sink.as_mut().poll_write(cx, &self.pending) {
                Poll::Ready(Ok(written)) => {
                    let _ = self.pending.drain(..written);
                }
                Poll::Ready(Err(error)) => return Err(error),
                Poll::Pending => return Ok(false),
            }
        }
        Ok(true)
    }
}

impl AsyncRead for TeeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                TeeState::Done => return Poll::Ready(Ok(())),

                TeeState::Finalizing(rx) => match Pin::new(rx).poll(cx) {
                    Poll::Ready(Ok(result)) => {
                        this.state = TeeState::Done;
                        return Poll::Ready(result);
                    }
                    Poll::Ready(Err(_)) => {
                        this.state = TeeState::Done;
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::Other,
                            "finalize task was cancelled",
                        )));
                    }
                    Poll::Pending => return Poll::Pending,
                },

                TeeState::ShuttingDown => {
                    // `pending` is empty here: Streaming never reaches EOF
                    // with unflushed bytes.
                    match this.sink.as_mut().poll_shutdown(cx) {
                        Poll::Ready(Ok(())) => match this.finalize.take() {
                            Some(finalize) => {
                                let future = finalize(this.bytes_read);
                                let (tx, rx) = oneshot::channel();
                                tokio::spawn(async move {
                                    let _ = tx.send(future.await);
                                });
                                this.state = TeeState::Finalizing(rx);
                            }
                            None => {
                                this.state = TeeState::Done;
                                return Poll::Ready(Ok(()));
                            }
                        },
                        Poll::Ready(Err(error)) => {
                            this.state = TeeState::Done;
                            return Poll::Ready(Err(error));
                        }
                        Poll::Pending => return Poll::Pending,
                    }
                }

                TeeState::Streaming => {
                    match this.flush_pending(cx) {
                        Ok(true) => {}
                        Ok(false) => return Poll::Pending,
                        Err(error) => {
                            this.state = TeeState::Done;
                            return Poll::Ready(Err(error));
                        }
                    }

                    let before = buf.filled().len();
                    match this.inner.as_mut().poll_read(cx, buf) {
                        Poll::Ready(Ok(())) => {
                            let read = buf.filled().len() - before;
                            if read == 0 {
                                this.state = TeeState::ShuttingDown;
                                continue;
                            }
                            this.bytes_read += read as u64;
                            this.pending.extend_from_slice(&buf.filled()[before..]);
                            match this.flush_pending(cx) {
                                // Leftovers are retried on the next poll;
                                // the caller gets its bytes either way.
                                Ok(_) => return Poll::Ready(Ok(())),
                                Err(error) => {
                                    this.state = TeeState::Done;
                                    return Poll::Ready(Err(error));
                                }
                            }
                        }
                        Poll::Ready(Err(error)) => {
                            this.state = TeeState::Done;
                            return Poll::Ready(Err(error));
                        }
                        Poll::Pending => return Poll::Pending,
                    }
                }
            }
        }
    }
}

impl Unpin for TeeReader {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn counting_finalize(
        slot: Arc<Mutex<Option<u64>>>,
    ) -> FinalizeFn {
        Box::new(move |bytes_read| {
            Box::pin(async move {
                *slot.lock().unwrap() = Some(bytes_read);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn test_tee_forwards_and_caches() {
        let committed: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
        let target = committed.clone();
        let sink = BufferedSink::new(move |bytes| async move {
            *target.lock().unwrap() = Some(bytes);
            Ok(())
        });

        let finalized: Arc<Mutex<Option<u64>>> = Arc::new(Mutex::new(None));
        let mut tee = TeeReader::new(
            Box::pin(Cursor::new(b"mirror me".to_vec())),
            Box::pin(sink),
            counting_finalize(finalized.clone()),
        );

        let mut out = Vec::new();
        tee.read_to_end(&mut out).await.unwrap();

        assert_eq!(out, b"mirror me");
        assert_eq!(committed.lock().unwrap().as_deref(), Some(&b"mirror me"[..]));
        assert_eq!(*finalized.lock().unwrap(), Some(9));
    }

    #[tokio::test]
    async fn test_tee_dropped_early_commits_nothing() {
        let committed: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
        let target = committed.clone();
        let sink = BufferedSink::new(move |bytes| async move {
            *target.lock().unwrap() = Some(bytes);
            Ok(())
        });

        let finalized: Arc<Mutex<Option<u64>>> = Arc::new(Mutex::new(None));
        {
            let mut tee = TeeReader::new(
                Box::pin(Cursor::new(vec![7u8; 4096])),
                Box::pin(sink),
                counting_finalize(finalized.clone()),
            );
            let mut partial = [0u8; 16];
            let _ = tee.read(&mut partial).await.unwrap();
        }

        assert!(committed.lock().unwrap().is_none());
        assert!(finalized.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tee_reports_finalize_error_at_eof() {
        let sink = BufferedSink::new(|_bytes| async move { Ok(()) });
        let finalize: FinalizeFn = Box::new(|_bytes_read| {
            Box::pin(async move {
                Err(io::Error::new(io::ErrorKind::Other, "bookkeeping failed"))
            })
        });
        let mut tee = TeeReader::new(
            Box::pin(Cursor::new(b"x".to_vec())),
            Box::pin(sink),
            finalize,
        );

        let mut out = Vec::new();
        let error = tee.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(error.to_string(), "bookkeeping failed");
    }
}
