//! Drains ffmpeg's stderr, which is where it reports progress and errors.

use hlsbridge_core::types::DiagnosticEvent;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const CHUNK_SIZE: usize = 4096;

/// Turns raw pipe reads into text.
///
/// A multi-byte character cut off at the end of one read is held back and
/// completed by the next. Bytes that can never form valid UTF-8 become a
/// placeholder line naming how many bytes were dropped.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    pending: Vec<u8>,
}

impl ChunkDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(bytes);
        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                let text = text.to_string();
                self.pending.clear();
                (!text.is_empty()).then_some(text)
            }
            // Incomplete trailing character: emit the valid prefix, keep the tail
            Err(e) if e.error_len().is_none() => {
                let tail = self.pending.split_off(e.valid_up_to());
                let text = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending = tail;
                (!text.is_empty()).then_some(text)
            }
            Err(_) => Some(placeholder(std::mem::take(&mut self.pending).len())),
        }
    }

    /// Whatever is still held back once the pipe has closed.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        Some(placeholder(std::mem::take(&mut self.pending).len()))
    }
}

fn placeholder(len: usize) -> String {
    format!("<unexpected {len} bytes of diagnostic data>\n")
}

/// Read `pipe` until end-of-stream, forwarding each chunk in arrival order.
///
/// Sends [`DiagnosticEvent::ProcessExited`] last, then returns. Never blocks the
/// caller; all reading happens on the spawned task.
pub fn attach<R>(mut pipe: R, events: UnboundedSender<DiagnosticEvent>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut decoder = ChunkDecoder::default();
        loop {
            match pipe.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let Some(text) = decoder.push(&buf[..n]) else {
                        continue;
                    };
                    if events.send(DiagnosticEvent::TextChunk(text)).is_err() {
                        debug!("diagnostic consumer gone, stop reading");
                        return;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "diagnostic pipe read failed");
                    break;
                }
            }
        }
        if let Some(text) = decoder.finish() {
            let _ = events.send(DiagnosticEvent::TextChunk(text));
        }
        let _ = events.send(DiagnosticEvent::ProcessExited);
    })
}
