//! Generic SSE (Server-Sent Events) line parser.
//!
//! Converts an HTTP body byte stream into a `Stream<Item = SseEvent>`.

use std::fmt::Display;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use tokio_stream::StreamExt;

use crate::ProviderError;

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Parse a reqwest response body as an SSE stream.
pub fn parse_sse_response(
    response: reqwest::Response,
) -> impl Stream<Item = Result<SseEvent, ProviderError>> + Send {
    parse_sse_stream(response.bytes_stream())
}

/// Parse any chunked byte stream as SSE.
///
/// Lines may be split across chunks at arbitrary byte offsets, including the
/// middle of a UTF-8 sequence; bytes are buffered until a full line arrives.
pub fn parse_sse_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<SseEvent, ProviderError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    futures::stream::unfold(
        SseState {
            byte_stream: Box::pin(byte_stream),
            buffer: Vec::new(),
            current_event: None,
            current_data: Vec::new(),
            current_id: None,
            finished: false,
        },
        |mut state| async move {
            loop {
                if let Some(newline_pos) = state.buffer.iter().position(|b| *b == b'\n') {
                    let raw: Vec<u8> = state.buffer.drain(..=newline_pos).collect();
                    let line = String::from_utf8_lossy(&raw[..newline_pos]);
                    let line = line.trim_end_matches('\r');

                    if line.is_empty() {
                        // Empty line = dispatch event
                        if let Some(event) = state.dispatch() {
                            return Some((Ok(event), state));
                        }
                        continue;
                    }

                    if line.starts_with(':') {
                        continue;
                    }

                    if let Some(value) = line.strip_prefix("event:") {
                        state.current_event = Some(value.trim_start().to_string());
                    } else if let Some(value) = line.strip_prefix("data:") {
                        state.current_data.push(value.trim_start().to_string());
                    } else if let Some(value) = line.strip_prefix("id:") {
                        state.current_id = Some(value.trim_start().to_string());
                    }
                    continue;
                }

                // Whatever is still pending once the body ends is the last event.
                if state.finished {
                    return state.dispatch().map(|event| (Ok(event), state));
                }

                match state.byte_stream.next().await {
                    Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        state.finished = true;
                        state.buffer.clear();
                        state.current_data.clear();
                        return Some((
                            Err(ProviderError::Stream(format!("SSE stream error: {e}"))),
                            state,
                        ));
                    }
                    None => {
                        state.finished = true;
                        // A final line without a trailing newline still counts.
                        if !state.buffer.is_empty() {
                            state.buffer.push(b'\n');
                        }
                    }
                }
            }
        },
    )
}

type ByteStream<E> = Pin<Box<dyn Stream<Item = Result<Bytes, E>> + Send>>;

struct SseState<E> {
    byte_stream: ByteStream<E>,
    buffer: Vec<u8>,
    current_event: Option<String>,
    current_data: Vec<String>,
    current_id: Option<String>,
    finished: bool,
}

impl<E> SseState<E> {
    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.current_data.is_empty() {
            self.current_event = None;
            return None;
        }
        let event = SseEvent {
            event: self.current_event.take(),
            data: self.current_data.join("\n"),
            id: self.current_id.take(),
        };
        self.current_data.clear();
        Some(event)
    }
}
