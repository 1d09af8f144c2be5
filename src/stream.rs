//! Provider-agnostic stream framer (§4.7).
//!
//! Wraps a transport byte stream — SSE for Anthropic/OpenAI, NDJSON for
//! Gemini — into one `Stream<Item = Result<Frame, Error>>` so every
//! generator reduces over the same typed-event shape instead of
//! re-implementing wire framing.

use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use std::pin::Pin;

use crate::error::Error;

/// One framed unit handed to a generator's streaming accumulator.
#[derive(Debug, Clone)]
pub enum Frame {
    /// One complete SSE event (`event:`/`data:` pair) or one NDJSON line,
    /// wrapped in a synthetic `chunk` event per §4.7.
    Event { name: String, data: String },
    /// `data: [DONE]` (OpenAI) or a clean end of the byte stream.
    Done,
}

/// Frame a `reqwest` byte stream of SSE events (Anthropic, OpenAI) into
/// [`Frame`]s, ignoring blank keepalive pings and closing cleanly on
/// `data: [DONE]` or stream end.
pub fn frame_sse(
    bytes: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
) -> Pin<Box<dyn Stream<Item = Result<Frame, Error>> + Send>> {
    let events = bytes.eventsource();
    Box::pin(async_stream::stream! {
        futures::pin_mut!(events);
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(e) => e,
                Err(e) => {
                    yield Err(Error::internal(format!("sse transport error: {e}")));
                    return;
                }
            };
            if event.data.trim().is_empty() {
                continue;
            }
            if event.data.trim() == "[DONE]" {
                yield Ok(Frame::Done);
                return;
            }
            let name = if event.event.is_empty() {
                "message".to_string()
            } else {
                event.event
            };
            if name == "error" {
                yield Err(Error::internal(format!("provider stream error event: {}", event.data)));
                return;
            }
            yield Ok(Frame::Event { name, data: event.data });
        }
        yield Ok(Frame::Done);
    })
}

/// Frame a newline-delimited-JSON byte stream (Gemini) into [`Frame`]s. Each
/// complete line becomes a synthetic `chunk` event; a trailing partial line
/// at stream end is dropped rather than yielded malformed.
pub fn frame_ndjson(
    bytes: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
) -> Pin<Box<dyn Stream<Item = Result<Frame, Error>> + Send>> {
    Box::pin(async_stream::stream! {
        futures::pin_mut!(bytes);
        let mut buf = Vec::new();
        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    yield Err(Error::internal(format!("ndjson transport error: {e}")));
                    return;
                }
            };
            buf.extend_from_slice(&chunk);
            while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                yield Ok(Frame::Event { name: "chunk".to_string(), data: line.to_string() });
            }
        }
        yield Ok(Frame::Done);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn byte_ok(s: &str) -> Result<Bytes, reqwest::Error> {
        Ok(Bytes::from(s.to_string()))
    }

    #[tokio::test]
    async fn sse_stream_splits_named_events_and_stops_on_done() {
        let raw = "event: content_block_delta\ndata: {\"a\":1}\n\n\
                    event: message_stop\ndata: {}\n\n\
                    data: [DONE]\n\n";
        let src = stream::iter(vec![byte_ok(raw)]);
        let framed = frame_sse(src);
        futures::pin_mut!(framed);
        let mut events = Vec::new();
        while let Some(f) = framed.next().await {
            events.push(f.unwrap());
        }
        assert!(matches!(&events[0], Frame::Event { name, .. } if name == "content_block_delta"));
        assert!(matches!(&events[1], Frame::Event { name, .. } if name == "message_stop"));
        assert!(matches!(events.last(), Some(Frame::Done)));
    }

    #[tokio::test]
    async fn sse_error_event_surfaces_as_terminal_error() {
        let raw = "event: error\ndata: {\"message\":\"overloaded\"}\n\n";
        let src = stream::iter(vec![byte_ok(raw)]);
        let framed = frame_sse(src);
        futures::pin_mut!(framed);
        let first = framed.next().await.unwrap();
        assert!(first.is_err());
    }

    #[tokio::test]
    async fn ndjson_stream_yields_one_chunk_per_line() {
        let raw = "{\"text\":\"a\"}\n{\"text\":\"b\"}\n";
        let src = stream::iter(vec![byte_ok(raw)]);
        let framed = frame_ndjson(src);
        futures::pin_mut!(framed);
        let mut lines = Vec::new();
        while let Some(f) = framed.next().await {
            if let Frame::Event { data, .. } = f.unwrap() {
                lines.push(data);
            }
        }
        assert_eq!(lines, vec!["{\"text\":\"a\"}", "{\"text\":\"b\"}"]);
    }
}
