//! Canonical chunk sequence.
//!
//! A provider supplies a [`StreamDecoder`] that maps one SSE payload to at most one
//! [`StreamChunk`]. Everything after that (ordering, termination, merging tool-call
//! fragments) happens here and is identical for every provider.

use crate::error::{LlmError, Result};
use crate::sse::SseEvent;
use crate::types::{ChunkError, FinishReason, StreamChunk, ToolCall, Usage};
use futures_util::{Stream, StreamExt};
use std::collections::BTreeMap;
use std::pin::Pin;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Maps one event payload to zero or one canonical chunks.
///
/// A decoder instance serves exactly one response, so it may keep state between payloads
/// (for example a finish reason that arrives before the usage report).
pub trait StreamDecoder: Send {
    fn decode(&mut self, payload: &str) -> Result<Option<StreamChunk>>;

    /// Chunks held back because one payload carried more than one. Called after every
    /// `decode` until it returns `None`.
    fn drain(&mut self) -> Option<StreamChunk> {
        None
    }
}

impl<F> StreamDecoder for F
where
    F: FnMut(&str) -> Result<Option<StreamChunk>> + Send,
{
    fn decode(&mut self, payload: &str) -> Result<Option<StreamChunk>> {
        self(payload)
    }
}

struct DecodeState<S> {
    events: Pin<Box<S>>,
    decoder: Box<dyn StreamDecoder>,
    cancel: CancellationToken,
    finished: bool,
}

/// Compose an event sequence with a decoder.
///
/// Payloads the decoder rejects are logged and skipped. The sequence ends right after the
/// first terminal chunk. If the events run out first (and the run was not cancelled) a
/// single `Error` chunk is emitted so that every sequence ends with exactly one terminal.
pub fn decode_chunks<S>(
    events: S,
    decoder: Box<dyn StreamDecoder>,
    cancel: CancellationToken,
) -> ChunkStream
where
    S: Stream<Item = Result<SseEvent>> + Send + 'static,
{
    let state = DecodeState {
        events: Box::pin(events),
        decoder,
        cancel,
        finished: false,
    };

    Box::pin(futures_util::stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }
        loop {
            if let Some(chunk) = state.decoder.drain() {
                if chunk.is_terminal() {
                    state.finished = true;
                }
                return Some((Ok(chunk), state));
            }

            let Some(next) = state.events.as_mut().next().await else {
                state.finished = true;
                if state.cancel.is_cancelled() {
                    return None;
                }
                tracing::warn!("event stream ended before a terminal chunk");
                let chunk = StreamChunk::Error {
                    error: ChunkError::new("stream ended before a finish event"),
                };
                return Some((Ok(chunk), state));
            };

            let event = match next {
                Ok(event) => event,
                Err(e) => {
                    state.finished = true;
                    return Some((Err(e), state));
                }
            };

            match state.decoder.decode(&event.data) {
                Ok(Some(chunk)) => {
                    if chunk.is_terminal() {
                        state.finished = true;
                    }
                    return Some((Ok(chunk), state));
                }
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        event = ?event.event,
                        payload_len = event.data.len(),
                        "skipping undecodable stream payload"
                    );
                    continue;
                }
            }
        }
    }))
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid arguments for tool call {id} ({name}): {message}")]
pub struct ToolCallParseError {
    pub id: String,
    pub name: String,
    pub raw_arguments: String,
    pub message: String,
}

#[derive(Debug, Default)]
struct PendingToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Merges `ToolCallDelta` fragments by index.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<u32, PendingToolCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Record one fragment. The first non-empty id and name for an index win.
    pub fn push(
        &mut self,
        index: u32,
        id: Option<String>,
        name: Option<String>,
        fragment: Option<String>,
    ) {
        let entry = self.calls.entry(index).or_default();
        if entry.id.is_none() {
            entry.id = id.filter(|s| !s.is_empty());
        }
        if entry.name.is_none() {
            entry.name = name.filter(|s| !s.is_empty());
        }
        if let Some(fragment) = fragment {
            entry.arguments.push_str(&fragment);
        }
    }

    /// Finalize every call in ascending index order.
    pub fn finalize(self) -> Vec<std::result::Result<ToolCall, ToolCallParseError>> {
        self.calls
            .into_iter()
            .map(|(index, pending)| {
                let id = pending.id.unwrap_or_else(|| format!("call_{index}"));
                let name = pending.name.unwrap_or_default();
                let raw = pending.arguments;
                if raw.trim().is_empty() {
                    return Ok(ToolCall {
                        id,
                        name,
                        arguments: serde_json::json!({}),
                    });
                }
                match serde_json::from_str(&raw) {
                    Ok(arguments) => Ok(ToolCall {
                        id,
                        name,
                        arguments,
                    }),
                    Err(e) => Err(ToolCallParseError {
                        id,
                        name,
                        raw_arguments: raw,
                        message: e.to_string(),
                    }),
                }
            })
            .collect()
    }
}

/// Everything one streamed model call produced.
#[derive(Debug)]
pub struct StreamedTurn {
    pub text: String,
    pub finish_reason: FinishReason,
    pub usage: Usage,
    pub tool_calls: Vec<std::result::Result<ToolCall, ToolCallParseError>>,
    pub error: Option<ChunkError>,
}

/// Consume a chunk sequence to its terminal chunk.
///
/// `on_chunk` sees every chunk in arrival order before it is merged. Cancellation is
/// checked before each pull and reported as [`LlmError::Cancelled`]; nothing accumulated
/// so far is returned in that case.
pub async fn collect_stream<F>(
    mut stream: ChunkStream,
    cancel: &CancellationToken,
    mut on_chunk: F,
) -> Result<StreamedTurn>
where
    F: FnMut(&StreamChunk),
{
    let mut text = String::new();
    let mut accumulator = ToolCallAccumulator::new();

    loop {
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            next = stream.next() => next,
        };
        let Some(chunk) = next else {
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }
            return Ok(StreamedTurn {
                text,
                finish_reason: FinishReason::Error,
                usage: Usage::default(),
                tool_calls: Vec::new(),
                error: Some(ChunkError::new("stream ended before a finish event")),
            });
        };
        let chunk = chunk?;
        on_chunk(&chunk);

        match chunk {
            StreamChunk::TextDelta { text: delta } => text.push_str(&delta),
            StreamChunk::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => accumulator.push(index, id, name, arguments),
            StreamChunk::Finish { reason, usage } => {
                let tool_calls = if reason == FinishReason::ToolCalls {
                    accumulator.finalize()
                } else {
                    if !accumulator.is_empty() {
                        tracing::warn!(
                            finish_reason = ?reason,
                            pending_tool_calls = accumulator.len(),
                            "discarding tool call fragments without a tool_calls finish"
                        );
                    }
                    Vec::new()
                };
                return Ok(StreamedTurn {
                    text,
                    finish_reason: reason,
                    usage: usage.unwrap_or_default(),
                    tool_calls,
                    error: None,
                });
            }
            StreamChunk::Error { error } => {
                return Ok(StreamedTurn {
                    text,
                    finish_reason: FinishReason::Error,
                    usage: Usage::default(),
                    tool_calls: Vec::new(),
                    error: Some(error),
                });
            }
        }
    }
}
