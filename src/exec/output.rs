// src/exec/output.rs

//! Size-bounded capture of a child's output streams.
//!
//! Each stream is drained to EOF so the child never blocks on a full pipe,
//! but only the first `limit` bytes are kept. The buffer is shared so the
//! runner can read whatever arrived even if the drain task has to be
//! abandoned (e.g. an escaped descendant still holds the pipe open).

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Default)]
struct BoundedBuffer {
    data: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl BoundedBuffer {
    fn push(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.data.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.data.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
}

/// A stream being drained in the background.
#[derive(Debug)]
pub struct StreamCapture {
    buffer: Arc<Mutex<BoundedBuffer>>,
    handle: JoinHandle<()>,
}

impl StreamCapture {
    pub fn spawn<R>(mut reader: R, limit: usize, stream: &'static str) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(BoundedBuffer {
            data: Vec::new(),
            limit,
            truncated: false,
        }));
        let shared = Arc::clone(&buffer);

        let handle = tokio::spawn(async move {
            let mut chunk = [0u8; 8192];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Ok(mut buf) = shared.lock() {
                            buf.push(&chunk[..n]);
                        }
                    }
                    Err(e) => {
                        debug!(stream, error = %e, "output stream read error");
                        break;
                    }
                }
            }
        });

        Self { buffer, handle }
    }

    /// Wait up to `grace` for EOF, then return what was captured.
    pub async fn finish(self, grace: std::time::Duration) -> (String, bool) {
        let StreamCapture { buffer, mut handle } = self;
        if tokio::time::timeout(grace, &mut handle).await.is_err() {
            debug!("output drain did not reach EOF in time; keeping partial capture");
            handle.abort();
        }
        snapshot(&buffer)
    }
}

fn snapshot(buffer: &Arc<Mutex<BoundedBuffer>>) -> (String, bool) {
    match buffer.lock() {
        Ok(buf) => (String::from_utf8_lossy(&buf.data).into_owned(), buf.truncated),
        Err(poisoned) => {
            let buf = poisoned.into_inner();
            (String::from_utf8_lossy(&buf.data).into_owned(), buf.truncated)
        }
    }
}

/// Collect an optional capture; a missing pipe yields empty output.
pub async fn finish_optional(
    capture: Option<StreamCapture>,
    grace: std::time::Duration,
) -> (String, bool) {
    match capture {
        Some(c) => c.finish(grace).await,
        None => (String::new(), false),
    }
}
