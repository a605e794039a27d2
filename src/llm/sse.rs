//! Incremental server-sent-event decoding shared by all adapters.
//!
//! Network reads do not respect line boundaries, so bytes are buffered until
//! a newline arrives. Each complete `data:` line is handed to a
//! family-specific [`EventParser`]. Malformed payloads are logged and
//! skipped; they never end the stream.

use std::collections::VecDeque;
use std::fmt::Display;

use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::error::LlmError;
use crate::llm::{ChunkStream, Provider, StreamChunk};

/// What one `data:` payload means for the stream.
#[derive(Debug, PartialEq)]
pub(crate) enum LineEvent {
    Chunks(Vec<StreamChunk>),
    /// End-of-stream sentinel; anything after it is ignored.
    Done,
    Skip,
}

impl LineEvent {
    pub(crate) fn one(chunk: StreamChunk) -> Self {
        Self::Chunks(vec![chunk])
    }
}

/// Interprets the payload of `data:` lines for one protocol family.
pub(crate) trait EventParser: Send + 'static {
    fn parse_data(&mut self, data: &str) -> Result<LineEvent, serde_json::Error>;
}

/// Splits a byte stream into lines, carrying partial lines across reads.
#[derive(Debug, Default)]
pub(crate) struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    /// Feed bytes and return every line completed by them.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            lines.push(Self::to_line(&raw[..raw.len() - 1]));
        }
        lines
    }

    /// Flush a trailing line that had no newline.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.buffer);
        Some(Self::to_line(&raw))
    }

    fn to_line(raw: &[u8]) -> String {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        String::from_utf8_lossy(raw).into_owned()
    }
}

/// Payload of a `data:` line, or `None` for any other line.
pub(crate) fn data_payload(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    let rest = rest.strip_prefix(' ').unwrap_or(rest);
    let rest = rest.trim_end();
    (!rest.is_empty()).then_some(rest)
}

struct SseState<S, P> {
    body: S,
    decoder: LineDecoder,
    parser: P,
    pending: VecDeque<StreamChunk>,
    finished: bool,
    provider: Provider,
}

impl<S, P: EventParser> SseState<S, P> {
    fn handle_line(&mut self, line: &str) {
        if self.finished {
            return;
        }
        let Some(data) = data_payload(line) else {
            return;
        };
        match self.parser.parse_data(data) {
            Ok(LineEvent::Chunks(chunks)) => self.pending.extend(chunks),
            Ok(LineEvent::Done) => self.finished = true,
            Ok(LineEvent::Skip) => {}
            Err(e) => {
                tracing::warn!(
                    provider = %self.provider,
                    error = %e,
                    "Skipping malformed stream chunk"
                );
            }
        }
    }
}

/// Turn a body byte stream into a [`ChunkStream`].
pub(crate) fn chunk_stream<S, E, P>(provider: Provider, body: S, parser: P) -> ChunkStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: Display,
    P: EventParser,
{
    let state = SseState {
        body,
        decoder: LineDecoder::default(),
        parser,
        pending: VecDeque::new(),
        finished: false,
        provider,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(chunk) = state.pending.pop_front() {
                return Some((Ok(chunk), state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => {
                    for line in state.decoder.push(&bytes) {
                        state.handle_line(&line);
                    }
                }
                Some(Err(e)) => {
                    state.finished = true;
                    let err = LlmError::RequestFailed {
                        provider: state.provider.name().to_string(),
                        reason: format!("stream interrupted: {}", e),
                    };
                    return Some((Err(err), state));
                }
                None => {
                    if let Some(line) = state.decoder.finish() {
                        state.handle_line(&line);
                    }
                    state.finished = true;
                }
            }
        }
    }))
}

/// Read an SSE response body into a [`ChunkStream`].
pub(crate) fn response_chunks<P: EventParser>(
    provider: Provider,
    response: reqwest::Response,
    parser: P,
) -> ChunkStream {
    chunk_stream(provider, Box::pin(response.bytes_stream()), parser)
}


#[cfg(test)]
mod tests {
    use super::test_support::collect;
    use super::*;

    /// Treats every payload as literal text; `END` terminates.
    struct EchoParser;

    impl EventParser for EchoParser {
        fn parse_data(&mut self, data: &str) -> Result<LineEvent, serde_json::Error> {
            if data == "END" {
                return Ok(LineEvent::Done);
            }
            if data == "BAD" {
                return serde_json::from_str::<serde_json::Value>("{").map(|_| LineEvent::Skip);
            }
            Ok(LineEvent::one(StreamChunk::text(data)))
        }
    }

    fn texts(results: &[Result<StreamChunk, LlmError>]) -> Vec<String> {
        results
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .filter_map(|c| c.text.clone())
            .collect()
    }

    #[test]
    fn test_line_decoder_carries_partial_lines() {
        let mut decoder = LineDecoder::default();
        assert!(decoder.push(b"data: hel").is_empty());
        assert_eq!(decoder.push(b"lo\r\ndata: x\n"), vec!["data: hello", "data: x"]);
        assert_eq!(decoder.push(b"tail"), Vec::<String>::new());
        assert_eq!(decoder.finish().as_deref(), Some("tail"));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_line_decoder_handles_split_utf8() {
        let mut decoder = LineDecoder::default();
        let bytes = "data: café\n".as_bytes();
        // Split inside the two-byte 'é'.
        let split = bytes.len() - 2;
        assert!(decoder.push(&bytes[..split]).is_empty());
        assert_eq!(decoder.push(&bytes[split..]), vec!["data: café"]);
    }

    #[test]
    fn test_data_payload() {
        assert_eq!(data_payload("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(data_payload("data:[DONE]"), Some("[DONE]"));
        assert_eq!(data_payload("event: message_start"), None);
        assert_eq!(data_payload(": keep-alive"), None);
        assert_eq!(data_payload("data: "), None);
    }

    #[tokio::test]
    async fn test_chunks_across_reads_in_order() {
        let results = collect(EchoParser, &["data: a\nda", "ta: b\n\ndata: c\n"]).await;
        assert_eq!(texts(&results), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_done_sentinel_stops_stream() {
        let results = collect(EchoParser, &["data: a\ndata: END\ndata: never\n"]).await;
        assert_eq!(texts(&results), vec!["a"]);
    }

    #[tokio::test]
    async fn test_malformed_line_is_skipped() {
        let results = collect(EchoParser, &["data: a\ndata: BAD\ndata: b\n"]).await;
        assert_eq!(results.len(), 2);
        assert_eq!(texts(&results), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline_is_flushed() {
        let results = collect(EchoParser, &["data: a\ndata: b"]).await;
        assert_eq!(texts(&results), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_read_error_ends_stream_with_error() {
        let body = futures::stream::iter(vec![
            Ok(Bytes::from("data: a\n")),
            Err(std::io::Error::other("connection reset")),
            Ok(Bytes::from("data: b\n")),
        ]);
        let results: Vec<_> = chunk_stream(Provider::Groq, body, EchoParser).collect().await;
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        let err = results[1].as_ref().unwrap_err().to_string();
        assert!(err.contains("Groq"));
        assert!(err.contains("connection reset"));
    }
}
