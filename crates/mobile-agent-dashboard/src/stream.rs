//! Reader side of the task stream: chunk reassembly, line decoding, and the
//! consumer task that forwards decoded lines to the controller.

use std::sync::Arc;

use futures::StreamExt;
use mobile_agent_client::{ClientError, TaskEventStream};
use tokio::sync::mpsc;

use crate::events::{DecodedLine, decode_line};
use crate::transport::DashboardTransport;

/// Splits a byte stream into `\n`-terminated lines, carrying incomplete
/// trailing fragments over to the next chunk.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let scan_from = self.pending.len();
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut line_start = 0;
        let mut cursor = scan_from;
        while let Some(offset) = self.pending[cursor..].iter().position(|byte| *byte == b'\n') {
            let line_end = cursor + offset;
            lines.push(decode_utf8_line(&self.pending[line_start..line_end]));
            line_start = line_end + 1;
            cursor = line_start;
        }
        self.pending.drain(..line_start);
        lines
    }

    /// Flushes whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let tail = decode_utf8_line(&self.pending);
        self.pending.clear();
        if tail.trim().is_empty() {
            None
        } else {
            Some(tail)
        }
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn decode_utf8_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// [`LineSplitter`] followed by [`decode_line`].
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    lines: LineSplitter,
}

impl EventStreamDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<DecodedLine> {
        self.lines
            .push(chunk)
            .iter()
            .filter_map(|line| decode_line(line))
            .collect()
    }

    pub fn finish(&mut self) -> Option<DecodedLine> {
        self.lines.finish().and_then(|line| decode_line(&line))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamUpdate {
    Line(DecodedLine),
    Failed(String),
    Ended,
}

/// Update tagged with the run that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct RunUpdate {
    pub run_id: u64,
    pub update: StreamUpdate,
}

/// Opens the task stream and forwards every decoded line until the server
/// closes the response. Never retries.
pub async fn consume_task_stream<T>(
    transport: Arc<T>,
    instruction: String,
    run_id: u64,
    updates: mpsc::Sender<RunUpdate>,
) where
    T: DashboardTransport + ?Sized,
{
    let stream = match transport.execute_task(&instruction).await {
        Ok(stream) => stream,
        Err(error) => {
            tracing::warn!(run_id, error = %error, "task request failed");
            let _ = updates
                .send(RunUpdate {
                    run_id,
                    update: StreamUpdate::Failed(error.to_string()),
                })
                .await;
            return;
        }
    };

    let update = match forward_stream(stream, run_id, &updates).await {
        Ok(lines) => {
            tracing::info!(run_id, lines, "task stream ended");
            StreamUpdate::Ended
        }
        Err(error) => {
            tracing::warn!(run_id, error = %error, "task stream read failed");
            StreamUpdate::Failed(error.to_string())
        }
    };
    let _ = updates.send(RunUpdate { run_id, update }).await;
}

async fn forward_stream(
    mut stream: TaskEventStream,
    run_id: u64,
    updates: &mpsc::Sender<RunUpdate>,
) -> Result<usize, ClientError> {
    let mut decoder = EventStreamDecoder::new();
    let mut forwarded = 0usize;

    while let Some(chunk) = stream.next().await {
        for line in decoder.push(&chunk?) {
            forwarded += 1;
            if updates
                .send(RunUpdate {
                    run_id,
                    update: StreamUpdate::Line(line),
                })
                .await
                .is_err()
            {
                // Controller is gone; nobody is left to render.
                return Ok(forwarded);
            }
        }
    }

    if let Some(line) = decoder.finish() {
        forwarded += 1;
        let _ = updates
            .send(RunUpdate {
                run_id,
                update: StreamUpdate::Line(line),
            })
            .await;
    }
    Ok(forwarded)
}
