use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::tee::SlowBody;

#[derive(Debug, Error)]
pub enum BodyError {
    #[error("body source was already consumed")]
    AlreadyConsumed,
    #[error("body exceeds the configured capture limit")]
    TooLarge { bytes_read: u64 },
    #[error("body capture ended before the source did")]
    CaptureCancelled,
    #[error("failed to read body source")]
    Io(#[from] std::io::Error),
}

/// An upstream response body the insertion path may drain. Wraps any byte
/// reader; callers that already pulled from the underlying source must say
/// so via [`BodyReader::mark_consumed`], and the engine refuses such a
/// source rather than silently discarding the missing bytes.
pub struct BodyReader {
    inner: Box<dyn AsyncRead + Send + Unpin>,
    consumed: bool,
}

impl std::fmt::Debug for BodyReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyReader")
            .field("consumed", &self.consumed)
            .finish_non_exhaustive()
    }
}

impl BodyReader {
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            inner: Box::new(reader),
            consumed: false,
        }
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::new(std::io::Cursor::new(bytes.into()))
    }

    pub fn mark_consumed(&mut self) {
        self.consumed = true;
    }

    pub fn consumed(&self) -> bool {
        self.consumed
    }

    async fn drain(mut self, max_bytes: u64) -> Result<Bytes, BodyError> {
        if self.consumed {
            return Err(BodyError::AlreadyConsumed);
        }
        self.consumed = true;

        let mut collected = BytesMut::new();
        let mut buffer = [0u8; 8192];
        loop {
            let read = self.inner.read(&mut buffer).await?;
            if read == 0 {
                return Ok(collected.freeze());
            }
            if collected.len() as u64 + read as u64 > max_bytes {
                return Err(BodyError::TooLarge {
                    bytes_read: collected.len() as u64 + read as u64,
                });
            }
            collected.extend_from_slice(&buffer[..read]);
        }
    }
}

/// Either kind of body the insertion path accepts: a plain reader, or the
/// slow half of a [`crate::tee::tee`] capturing a response the application
/// is consuming concurrently.
#[derive(Debug)]
pub enum ResponseBody {
    Reader(BodyReader),
    Captured(SlowBody),
}

impl From<BodyReader> for ResponseBody {
    fn from(reader: BodyReader) -> Self {
        Self::Reader(reader)
    }
}

impl From<SlowBody> for ResponseBody {
    fn from(slow: SlowBody) -> Self {
        Self::Captured(slow)
    }
}

impl ResponseBody {
    pub fn consumed(&self) -> bool {
        match self {
            Self::Reader(reader) => reader.consumed(),
            Self::Captured(slow) => slow.consumed(),
        }
    }

    /// Collect the whole body into one buffer, or fail without a partial
    /// result.
    pub async fn drain(self, max_bytes: u64) -> Result<Bytes, BodyError> {
        match self {
            Self::Reader(reader) => reader.drain(max_bytes).await,
            Self::Captured(slow) => slow.collect().await,
        }
    }
}
