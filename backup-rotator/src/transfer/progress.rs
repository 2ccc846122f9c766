//! Byte-level progress reporting for uploads.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::{Duration, Instant};

/// Callback for progress updates, called with the total bytes read so far
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Reader wrapper that counts bytes and reports them at most once per interval,
/// plus once more at end of input.
pub struct ProgressReader<R> {
    inner: R,
    bytes_read: u64,
    last_update: Instant,
    update_interval: Duration,
    finished: bool,
    callback: ProgressCallback,
}

impl<R> ProgressReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R, update_interval: Duration, callback: ProgressCallback) -> Self {
        Self {
            inner,
            bytes_read: 0,
            last_update: Instant::now(),
            update_interval,
            finished: false,
            callback,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

impl<R> AsyncRead for ProgressReader<R>
where
    R: AsyncRead + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();

        match Pin::new(&mut self.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let read = (buf.filled().len() - before) as u64;

                if read == 0 {
                    // EOF
                    if !self.finished {
                        self.finished = true;
                        (self.callback)(self.bytes_read);
                    }
                } else {
                    self.bytes_read += read;

                    let now = Instant::now();
                    if now.duration_since(self.last_update) >= self.update_interval {
                        (self.callback)(self.bytes_read);
                        self.last_update = now;
                    }
                }

                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format speed as human-readable string
pub fn format_speed(bytes: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    let bytes_per_second = if secs > 0.0 {
        (bytes as f64 / secs) as u64
    } else {
        0
    };
    format!("{}/s", format_bytes(bytes_per_second))
}
