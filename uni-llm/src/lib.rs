//! Provider-neutral LLM contract for unillm.
//!
//! Owns the canonical data model, the `text/event-stream` reader, the canonical chunk
//! sequence with tool-call merging, and the language-model capability. Provider wire
//! formats live behind [`ProviderAdapter`]; OpenAI and Anthropic ship as references.

mod anthropic;
mod client;
mod error;
mod model;
mod openai;
mod provider;
mod sse;
mod stream;
mod types;

pub use anthropic::{AnthropicAdapter, AnthropicStreamDecoder, finish_reason_from_anthropic};
pub use client::{ClientConfig, Provider, connect};
pub use error::{LlmError, LlmErrorKind, Result};
pub use model::{CallOptions, CallSettings, GenerateResult, LanguageModel};
pub use openai::{OpenAiAdapter, OpenAiStreamDecoder, finish_reason_from_openai};
pub use provider::{HttpModel, ProviderAdapter};
pub use sse::{SseEvent, SseParser, read_events};
pub use stream::{
    ChunkStream, StreamDecoder, StreamedTurn, ToolCallAccumulator, ToolCallParseError,
    collect_stream, decode_chunks,
};
pub use types::{
    ChunkError, FinishReason, Message, Role, StreamChunk, ToolCall, ToolDefinition, ToolResult,
    Usage,
};
