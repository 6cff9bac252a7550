use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::body::BodyError;

#[derive(Debug)]
enum TeeFrame {
    Chunk(Bytes),
    End,
    Error(String),
}

/// Split one upstream byte source into a fast view for the application and
/// a slow view for cache capture.
///
/// Every pull on the fast view reads the source once; the chunk is handed
/// to the fast consumer and a distinct copy is queued for the slow view.
/// Dropping the fast view drops the source and cuts the slow view off
/// mid-stream (its capture aborts). Dropping the slow view latches: the
/// fast view keeps flowing, copies stop. A capture whose buffered bytes
/// would exceed `max_capture_bytes` is cancelled outright, never
/// truncated.
pub fn tee(
    reader: impl AsyncRead + Send + Unpin + 'static,
    max_capture_bytes: u64,
) -> (FastBody, SlowBody) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        FastBody {
            inner: Box::new(reader),
            capture: Some(tx),
            budget: max_capture_bytes,
        },
        SlowBody {
            frames: rx,
            started: false,
        },
    )
}

/// The application-facing half of a [`tee`].
pub struct FastBody {
    inner: Box<dyn AsyncRead + Send + Unpin>,
    capture: Option<mpsc::UnboundedSender<TeeFrame>>,
    budget: u64,
}

impl std::fmt::Debug for FastBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastBody")
            .field("capturing", &self.capture.is_some())
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

impl FastBody {
    fn forward_chunk(&mut self, chunk: &[u8]) {
        let Some(capture) = self.capture.take() else {
            return;
        };
        if capture.is_closed() {
            trace!("cache capture cancelled; forwarding without copy");
            return;
        }
        if chunk.len() as u64 > self.budget {
            warn!(
                remaining = self.budget,
                chunk = chunk.len(),
                "cache capture exceeds configured limit; abandoning capture"
            );
            return;
        }
        // A distinct copy, so later mutation of the fast buffer cannot
        // reach the capture.
        let copy = Bytes::copy_from_slice(chunk);
        if capture.send(TeeFrame::Chunk(copy)).is_err() {
            return;
        }
        self.budget -= chunk.len() as u64;
        self.capture = Some(capture);
    }

    fn forward_end(&mut self) {
        if let Some(capture) = self.capture.take() {
            let _ = capture.send(TeeFrame::End);
        }
    }

    fn forward_error(&mut self, error: &std::io::Error) {
        if let Some(capture) = self.capture.take() {
            let _ = capture.send(TeeFrame::Error(error.to_string()));
        }
    }
}

impl AsyncRead for FastBody {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let filled = &buf.filled()[before..];
                if filled.is_empty() {
                    this.forward_end();
                } else {
                    this.forward_chunk(filled);
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(err)) => {
                this.forward_error(&err);
                Poll::Ready(Err(err))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// The cache-facing half of a [`tee`]. Collected by the insertion path.
#[derive(Debug)]
pub struct SlowBody {
    frames: mpsc::UnboundedReceiver<TeeFrame>,
    started: bool,
}

impl SlowBody {
    pub(crate) fn consumed(&self) -> bool {
        self.started
    }

    /// Collect the captured body. Succeeds only when the end-of-stream
    /// marker was seen; a capture cut off mid-stream reads as cancelled,
    /// never as a shorter body.
    pub async fn collect(mut self) -> Result<Bytes, BodyError> {
        self.started = true;
        let mut collected = BytesMut::new();
        loop {
            match self.frames.recv().await {
                Some(TeeFrame::Chunk(chunk)) => collected.extend_from_slice(&chunk),
                Some(TeeFrame::End) => return Ok(collected.freeze()),
                Some(TeeFrame::Error(message)) => {
                    return Err(BodyError::Io(std::io::Error::other(message)));
                }
                None => return Err(BodyError::CaptureCancelled),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn both_halves_see_all_bytes() -> anyhow::Result<()> {
        let source = std::io::Cursor::new(Bytes::from_static(b"the quick brown fox"));
        let (mut fast, slow) = tee(source, 1024);

        let capture = tokio::spawn(slow.collect());

        let mut consumed = Vec::new();
        fast.read_to_end(&mut consumed).await?;
        assert_eq!(consumed, b"the quick brown fox");

        let captured = capture.await??;
        assert_eq!(&captured[..], b"the quick brown fox");
        Ok(())
    }

    #[tokio::test]
    async fn dropping_the_slow_half_does_not_disturb_the_fast_half() -> anyhow::Result<()> {
        let source = std::io::Cursor::new(Bytes::from_static(b"payload"));
        let (mut fast, slow) = tee(source, 1024);
        drop(slow);

        let mut consumed = Vec::new();
        fast.read_to_end(&mut consumed).await?;
        assert_eq!(consumed, b"payload");
        Ok(())
    }

    #[tokio::test]
    async fn dropping_the_fast_half_aborts_the_capture() {
        let source = std::io::Cursor::new(Bytes::from_static(b"payload"));
        let (fast, slow) = tee(source, 1024);
        drop(fast);

        let err = slow.collect().await.unwrap_err();
        assert!(matches!(err, BodyError::CaptureCancelled));
    }

    #[tokio::test]
    async fn partial_read_then_fast_drop_is_not_a_valid_capture() -> anyhow::Result<()> {
        let source = std::io::Cursor::new(Bytes::from(vec![7u8; 64 * 1024]));
        let (mut fast, slow) = tee(source, u64::MAX);

        let mut first = vec![0u8; 1024];
        fast.read_exact(&mut first).await?;
        drop(fast);

        let err = slow.collect().await.unwrap_err();
        assert!(matches!(err, BodyError::CaptureCancelled));
        Ok(())
    }

    #[tokio::test]
    async fn capture_over_budget_is_cancelled_not_truncated() -> anyhow::Result<()> {
        let source = std::io::Cursor::new(Bytes::from(vec![1u8; 4096]));
        let (mut fast, slow) = tee(source, 100);

        let mut consumed = Vec::new();
        fast.read_to_end(&mut consumed).await?;
        assert_eq!(consumed.len(), 4096);
        drop(fast);

        let err = slow.collect().await.unwrap_err();
        assert!(matches!(err, BodyError::CaptureCancelled));
        Ok(())
    }

    #[tokio::test]
    async fn source_errors_reach_the_slow_half() {
        struct FailingReader;
        impl AsyncRead for FailingReader {
            fn poll_read(
                self: Pin<&mut Self>,
                _cx: &mut Context<'_>,
                _buf: &mut ReadBuf<'_>,
            ) -> Poll<std::io::Result<()>> {
                Poll::Ready(Err(std::io::Error::other("upstream reset")))
            }
        }

        let (mut fast, slow) = tee(FailingReader, 1024);
        let mut consumed = Vec::new();
        let fast_err = fast.read_to_end(&mut consumed).await.unwrap_err();
        assert_eq!(fast_err.to_string(), "upstream reset");

        let err = slow.collect().await.unwrap_err();
        assert!(matches!(err, BodyError::Io(_)));
    }
}
