//! Server-sent events decoding for streamed chat completions.

use futures_core::Stream;
use serde::Deserialize;
use tokio_stream::StreamExt;

use crate::errors::AppError;

/// Splits a byte stream into SSE `data:` payloads.
///
/// Frames are cut on blank lines at the byte level, so multi-byte characters
/// split across network chunks are only decoded once the frame is complete.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds bytes and returns the data payloads of every completed event.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some((end, sep_len)) = find_event_boundary(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..end + sep_len).take(end).collect();
            if let Some(data) = frame_data(&String::from_utf8_lossy(&frame)) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Returns a trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let frame = std::mem::take(&mut self.buffer);
        frame_data(&String::from_utf8_lossy(&frame))
    }
}

fn find_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Joins the `data:` lines of one event; comments and other fields are ignored.
fn frame_data(frame: &str) -> Option<String> {
    let lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| {
            let line = line.trim_end_matches('\r');
            line.strip_prefix("data:")
                .map(|data| data.strip_prefix(' ').unwrap_or(data))
        })
        .collect();

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

#[derive(Debug, Deserialize)]
struct ChunkEnvelope {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Decodes one `chat.completion.chunk` payload into its text fragment.
pub fn chunk_content(data: &str) -> Result<Option<String>, AppError> {
    let envelope: ChunkEnvelope = serde_json::from_str(data).map_err(|e| {
        AppError::ExternalApiError(format!("invalid stream event payload: {}", e))
    })?;

    if let Some(error) = envelope.error {
        return Err(AppError::ExternalApiError(format!(
            "provider reported an error mid-stream: {}",
            error
        )));
    }

    Ok(envelope
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty()))
}

/// Turns a streamed completion body into its content fragments.
///
/// Ends at `data: [DONE]` or when the body closes.
pub fn content_deltas(
    byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
) -> impl Stream<Item = Result<String, AppError>> + Send {
    async_stream::stream! {
        tokio::pin!(byte_stream);
        let mut decoder = SseDecoder::new();

        while let Some(chunk) = byte_stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    yield Err(AppError::ExternalApiError(format!("stream error: {}", e)));
                    return;
                }
            };

            for data in decoder.push(&bytes) {
                if data.trim() == "[DONE]" {
                    return;
                }
                match chunk_content(&data) {
                    Ok(Some(content)) => yield Ok(content),
                    Ok(None) => {}
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }

        if let Some(data) = decoder.finish() {
            if data.trim() != "[DONE]" {
                match chunk_content(&data) {
                    Ok(Some(content)) => yield Ok(content),
                    Ok(None) => {}
                    Err(e) => yield Err(e),
                }
            }
        }
    }
}
