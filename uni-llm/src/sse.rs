//! `text/event-stream` reader.
//!
//! Turns the body of one HTTP response into a lazy sequence of [`SseEvent`]s. Lines may end
//! with LF or CRLF and may be split arbitrarily across network chunks.

use crate::error::{LlmError, Result};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

impl SseEvent {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    /// Frame the event for the wire, terminated by a blank line.
    pub fn to_wire(&self) -> String {
        let mut out = String::new();
        if let Some(event) = &self.event {
            out.push_str("event: ");
            out.push_str(event);
            out.push('\n');
        }
        if let Some(id) = &self.id {
            out.push_str("id: ");
            out.push_str(id);
            out.push('\n');
        }
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

/// Incremental field parser. Feed it one line at a time (terminator removed).
#[derive(Debug, Default)]
pub struct SseParser {
    event: Option<String>,
    data: String,
    has_data: bool,
    id: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an event when `line` is blank and at least one `data` field was buffered,
    /// even an empty one.
    pub fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.has_data = true;
                self.data.push_str(value);
            }
            "id" => self.id = Some(value.to_string()),
            other => tracing::trace!(field = other, "ignoring unrecognized sse field"),
        }
        None
    }

    /// Flush whatever is buffered at end of stream.
    pub fn finish(&mut self) -> Option<SseEvent> {
        self.dispatch()
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let pending = std::mem::take(self);
        if !pending.has_data {
            return None;
        }
        Some(SseEvent {
            event: pending.event,
            data: pending.data,
            id: pending.id,
        })
    }
}

struct ReaderState<S> {
    body: S,
    buffer: Vec<u8>,
    parser: SseParser,
    cancel: CancellationToken,
    eof: bool,
    done: bool,
}

/// Read events from a response body.
///
/// Cancellation is checked before every line and while waiting on the network; once
/// observed, the sequence simply ends. Transport errors are yielded once as
/// [`LlmError::Http`], after which the sequence ends.
pub fn read_events<S, E>(
    body: S,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<SseEvent>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = ReaderState {
        body,
        buffer: Vec::new(),
        parser: SseParser::new(),
        cancel,
        eof: false,
        done: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if state.done {
                return None;
            }
            if state.cancel.is_cancelled() {
                tracing::debug!("sse reader observed cancellation");
                state.done = true;
                return None;
            }

            if let Some(pos) = state.buffer.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = state.buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw[..pos]);
                if let Some(event) = state.parser.push_line(&line) {
                    return Some((Ok(event), state));
                }
                continue;
            }

            if state.eof {
                state.done = true;
                if !state.buffer.is_empty() {
                    let raw = std::mem::take(&mut state.buffer);
                    let line = String::from_utf8_lossy(&raw);
                    if let Some(event) = state.parser.push_line(&line) {
                        return Some((Ok(event), state));
                    }
                }
                return state.parser.finish().map(|event| (Ok(event), state));
            }

            let next = tokio::select! {
                biased;
                _ = state.cancel.cancelled() => continue,
                next = state.body.next() => next,
            };
            match next {
                Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(LlmError::Http(e.to_string())), state));
                }
                None => state.eof = true,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    type Body = futures_util::stream::Iter<std::vec::IntoIter<std::result::Result<Bytes, Infallible>>>;

    fn body(parts: &[&[u8]]) -> Body {
        let owned: Vec<std::result::Result<Bytes, Infallible>> = parts
            .iter()
            .map(|p| Ok(Bytes::copy_from_slice(p)))
            .collect();
        futures_util::stream::iter(owned)
    }

    async fn collect(parts: &[&[u8]]) -> Vec<SseEvent> {
        read_events(body(parts), CancellationToken::new())
            .map(|r| r.expect("event"))
            .collect()
            .await
    }

    #[tokio::test]
    async fn data_lines_join_and_last_event_and_id_win() {
        let events = collect(&[
            b"event: first\nid: 1\ndata: one\ndata: two\nevent: second\nid: 2\ndata: three\n\n".as_slice(),
        ])
        .await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "one\ntwo\nthree");
        assert_eq!(events[0].event.as_deref(), Some("second"));
        assert_eq!(events[0].id.as_deref(), Some("2"));
    }

    #[test]
    fn comments_bare_fields_and_unknown_fields() {
        let mut parser = SseParser::new();
        assert!(parser.push_line(": keep-alive").is_none());
        assert!(parser.push_line("retry: 1000").is_none());
        assert!(parser.push_line("data:  two spaces").is_none());
        assert!(parser.push_line("data").is_none());
        let event = parser.push_line("").expect("dispatch");
        assert_eq!(event.data, " two spaces\n");
        assert_eq!(event.event, None);

        // A blank line without data dispatches nothing and resets the buffer.
        assert!(parser.push_line("event: ping").is_none());
        assert!(parser.push_line("").is_none());
        assert!(parser.push_line("data:x").is_none());
        let event = parser.push_line("").expect("dispatch");
        assert_eq!(event.event, None);
        assert_eq!(event.data, "x");
    }

    #[tokio::test]
    async fn crlf_lines_split_across_chunks() {
        let events = collect(&[
            b"data: {\"a\"".as_slice(),
            b":1}\r".as_slice(),
            b"\n\r\nevent: done\r\ndata: \xC3".as_slice(),
            b"\xA9\r\n\r\n".as_slice(),
        ])
        .await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "{\"a\":1}");
        assert_eq!(events[1].event.as_deref(), Some("done"));
        assert_eq!(events[1].data, "é");
    }

    #[tokio::test]
    async fn flushes_pending_event_at_end_of_stream() {
        let events = collect(&[b"data: first\n\ndata: tail".as_slice()]).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].data, "tail");

        let events = collect(&[b"data: tail\n".as_slice()]).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "tail");
    }

    #[tokio::test]
    async fn encoded_events_reparse_identically() {
        let originals = vec![
            SseEvent {
                event: Some("message_start".to_string()),
                data: "{\"type\":\"message_start\"}".to_string(),
                id: Some("7".to_string()),
            },
            SseEvent::data("line one\nline two"),
            SseEvent {
                event: None,
                data: " leading space".to_string(),
                id: Some("8".to_string()),
            },
            SseEvent::data("[DONE]"),
        ];
        let wire: String = originals.iter().map(SseEvent::to_wire).collect();
        let parsed = collect(&[wire.as_bytes()]).await;
        assert_eq!(parsed, originals);
    }

    #[tokio::test]
    async fn empty_data_lines_are_kept() {
        let events = collect(&[b"data: \ndata: foo\n\ndata:\n\n".as_slice()]).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "\nfoo");
        assert_eq!(events[1].data, "");

        let originals = vec![SseEvent::data("\nfoo"), SseEvent::data(""), SseEvent::data("a\n")];
        let wire: String = originals.iter().map(SseEvent::to_wire).collect();
        let parsed = collect(&[wire.as_bytes()]).await;
        assert_eq!(parsed, originals);
    }

    #[tokio::test]
    async fn cancellation_ends_enumeration_without_error() {
        let cancel = CancellationToken::new();
        let mut events = Box::pin(read_events(
            body(&[b"data: one\n\n".as_slice(), b"data: two\n\n".as_slice()]),
            cancel.clone(),
        ));
        let first = events.next().await.expect("first").expect("ok");
        assert_eq!(first.data, "one");
        cancel.cancel();
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn transport_error_is_surfaced_once() {
        let parts: Vec<std::result::Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data: one\n\n")),
            Err(std::io::Error::other("connection reset")),
            Ok(Bytes::from_static(b"data: never\n\n")),
        ];
        let results: Vec<Result<SseEvent>> =
            read_events(futures_util::stream::iter(parts), CancellationToken::new())
                .collect()
                .await;
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        let err = results[1].as_ref().expect_err("transport error");
        assert!(err.to_string().contains("connection reset"));
    }
}
