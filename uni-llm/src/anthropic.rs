use crate::error::{LlmError, Result};
use crate::model::{CallOptions, GenerateResult};
use crate::provider::ProviderAdapter;
use crate::stream::StreamDecoder;
use crate::types::{
    ChunkError, FinishReason, Message, Role, StreamChunk, ToolCall, ToolDefinition, Usage,
};
use serde::{Deserialize, Serialize};

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    base_url: String,
}

impl AnthropicAdapter {
    pub fn new(base_url: Option<&str>) -> Self {
        let base_url = base_url
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(ANTHROPIC_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        Self { base_url }
    }
}

impl Default for AnthropicAdapter {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn endpoint(&self) -> String {
        format!("{}/messages", self.base_url)
    }

    fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        api_key: &str,
    ) -> reqwest::RequestBuilder {
        request
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
    }

    fn build_request(
        &self,
        model: &str,
        options: &CallOptions,
        stream: bool,
    ) -> Result<serde_json::Value> {
        let req = AnthropicRequest::new(model, options, stream)?;
        Ok(serde_json::to_value(req)?)
    }

    fn parse_response(&self, body: &str) -> Result<GenerateResult> {
        let parsed: AnthropicResponse = serde_json::from_str(body)?;
        parsed.try_into()
    }

    fn stream_decoder(&self) -> Box<dyn StreamDecoder> {
        Box::new(AnthropicStreamDecoder::default())
    }
}

pub fn finish_reason_from_anthropic(reason: &str) -> FinishReason {
    match reason {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCalls,
        "refusal" => FinishReason::ContentFilter,
        _ => FinishReason::Other,
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    system: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

impl AnthropicRequest {
    fn new(model: &str, options: &CallOptions, stream: bool) -> Result<Self> {
        let mut system = String::new();
        let mut out_messages: Vec<AnthropicMessage> = Vec::new();

        for m in &options.messages {
            match m.role {
                Role::System => {
                    if !system.is_empty() {
                        system.push('\n');
                    }
                    system.push_str(m.content.trim());
                }
                Role::User => out_messages.push(to_anthropic_user_message(m)),
                Role::Assistant => out_messages.push(to_anthropic_assistant_message(m)),
                Role::Tool => {
                    let block = to_anthropic_tool_result(m);
                    // Results for one assistant turn must share a single user message.
                    match out_messages.last_mut() {
                        Some(last)
                            if last.role == "user"
                                && last.content.iter().all(|b| {
                                    matches!(b, AnthropicContentBlock::ToolResult { .. })
                                }) =>
                        {
                            last.content.push(block)
                        }
                        _ => out_messages.push(AnthropicMessage {
                            role: "user".to_string(),
                            content: vec![block],
                        }),
                    }
                }
            }
        }

        if out_messages.is_empty() {
            return Err(LlmError::InvalidInput(
                "anthropic requests need at least one non-system message".to_string(),
            ));
        }

        Ok(Self {
            model: model.to_string(),
            max_tokens: options.settings.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system,
            messages: out_messages,
            tools: options.tools.iter().map(to_anthropic_tool).collect(),
            temperature: options.settings.temperature,
            top_p: options.settings.top_p,
            stop_sequences: options.settings.stop_sequences.clone(),
            stream: if stream { Some(true) } else { None },
        })
    }
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

fn to_anthropic_tool(t: &ToolDefinition) -> AnthropicTool {
    AnthropicTool {
        name: t.name.clone(),
        description: t.description.clone(),
        input_schema: t.parameters.clone(),
    }
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    #[serde(other)]
    Unsupported,
}

fn to_anthropic_user_message(m: &Message) -> AnthropicMessage {
    AnthropicMessage {
        role: "user".to_string(),
        content: vec![AnthropicContentBlock::Text {
            text: m.content.clone(),
        }],
    }
}

fn to_anthropic_tool_result(m: &Message) -> AnthropicContentBlock {
    let is_error = m
        .metadata
        .as_ref()
        .and_then(|meta| meta.get("is_error"))
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);
    AnthropicContentBlock::ToolResult {
        tool_use_id: m.tool_call_id.clone().unwrap_or_default(),
        content: m.content.clone(),
        is_error,
    }
}

fn to_anthropic_assistant_message(m: &Message) -> AnthropicMessage {
    let mut blocks = Vec::new();
    if !m.content.trim().is_empty() {
        blocks.push(AnthropicContentBlock::Text {
            text: m.content.clone(),
        });
    }
    for tc in &m.tool_calls {
        let input = match &tc.arguments {
            serde_json::Value::Object(_) => tc.arguments.clone(),
            _ => serde_json::json!({}),
        };
        blocks.push(AnthropicContentBlock::ToolUse {
            id: tc.id.clone(),
            name: tc.name.clone(),
            input,
        });
    }
    AnthropicMessage {
        role: "assistant".to_string(),
        content: blocks,
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl TryFrom<AnthropicResponse> for GenerateResult {
    type Error = LlmError;

    fn try_from(v: AnthropicResponse) -> Result<Self> {
        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for block in v.content {
            match block {
                AnthropicContentBlock::Text { text: t } => text.push_str(&t),
                AnthropicContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall {
                        id,
                        name,
                        arguments: input,
                    });
                }
                AnthropicContentBlock::ToolResult { .. } | AnthropicContentBlock::Unsupported => {}
            }
        }

        Ok(GenerateResult {
            text,
            tool_calls,
            finish_reason: v
                .stop_reason
                .as_deref()
                .map(finish_reason_from_anthropic)
                .unwrap_or(FinishReason::Other),
            usage: Usage::new(v.usage.input_tokens, v.usage.output_tokens),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicStreamEvent {
    MessageStart {
        message: AnthropicMessageStartMessage,
    },
    ContentBlockStart {
        index: u32,
        content_block: AnthropicContentBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: AnthropicDelta,
    },
    MessageDelta {
        #[serde(default)]
        delta: AnthropicMessageDeltaBody,
        #[serde(default)]
        usage: Option<AnthropicUsage>,
    },
    MessageStop,
    Error {
        error: AnthropicErrorBody,
    },
    #[serde(other)]
    Ignored,
}

#[derive(Debug, Deserialize)]
struct AnthropicMessageStartMessage {
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicDelta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Ignored,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicMessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    message: String,
}

/// Input tokens are reported by `message_start`, output tokens and the stop reason by
/// `message_delta`; the decoder joins them into one `Finish`.
#[derive(Debug, Default)]
pub struct AnthropicStreamDecoder {
    usage: AnthropicUsage,
    stop_reason: Option<FinishReason>,
}

impl AnthropicStreamDecoder {
    fn finish(&self) -> StreamChunk {
        StreamChunk::Finish {
            reason: self.stop_reason.unwrap_or(FinishReason::Stop),
            usage: Some(Usage::new(self.usage.input_tokens, self.usage.output_tokens)),
        }
    }
}

impl StreamDecoder for AnthropicStreamDecoder {
    fn decode(&mut self, payload: &str) -> Result<Option<StreamChunk>> {
        if payload.trim().is_empty() {
            return Ok(None);
        }
        let event: AnthropicStreamEvent = serde_json::from_str(payload).map_err(|e| {
            LlmError::StreamParse(format!("anthropic event json error={e} data={payload}"))
        })?;

        let chunk = match event {
            AnthropicStreamEvent::MessageStart { message } => {
                self.usage = message.usage;
                None
            }
            AnthropicStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                AnthropicContentBlock::ToolUse { id, name, .. } => {
                    Some(StreamChunk::ToolCallDelta {
                        index,
                        id: Some(id),
                        name: Some(name),
                        arguments: None,
                    })
                }
                AnthropicContentBlock::Text { text } if !text.is_empty() => {
                    Some(StreamChunk::TextDelta { text })
                }
                _ => None,
            },
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
                AnthropicDelta::TextDelta { text } if !text.is_empty() => {
                    Some(StreamChunk::TextDelta { text })
                }
                AnthropicDelta::InputJsonDelta { partial_json } if !partial_json.is_empty() => {
                    Some(StreamChunk::ToolCallDelta {
                        index,
                        id: None,
                        name: None,
                        arguments: Some(partial_json),
                    })
                }
                _ => None,
            },
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                if let Some(u) = usage {
                    if u.input_tokens > 0 {
                        self.usage.input_tokens = u.input_tokens;
                    }
                    self.usage.output_tokens = u.output_tokens;
                }
                match delta.stop_reason.as_deref() {
                    Some(reason) => {
                        self.stop_reason = Some(finish_reason_from_anthropic(reason));
                        Some(self.finish())
                    }
                    None => None,
                }
            }
            AnthropicStreamEvent::MessageStop => Some(self.finish()),
            AnthropicStreamEvent::Error { error } => Some(StreamChunk::Error {
                error: ChunkError {
                    message: error.message,
                    code: error.kind,
                },
            }),
            AnthropicStreamEvent::Ignored => None,
        };
        Ok(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolResult;
    use serde_json::json;

    #[test]
    fn request_folds_system_and_groups_tool_results() {
        let calls = vec![
            ToolCall {
                id: "t1".to_string(),
                name: "a".to_string(),
                arguments: json!({}),
            },
            ToolCall {
                id: "t2".to_string(),
                name: "b".to_string(),
                arguments: json!({"x": 1}),
            },
        ];
        let result = |id: &str, name: &str| ToolResult {
            tool_call_id: id.to_string(),
            tool_name: name.to_string(),
            result: "ok".to_string(),
            is_error: false,
        };
        let options = CallOptions {
            messages: vec![
                Message::system("one"),
                Message::system("two"),
                Message::user("go"),
                Message::assistant_tool_calls("working", calls),
                Message::tool(&result("t1", "a")),
                Message::tool(&result("t2", "b")),
            ],
            ..CallOptions::default()
        };
        let body = AnthropicAdapter::default()
            .build_request("claude-sonnet-4-5", &options, false)
            .expect("build request");

        assert_eq!(body["system"], "one\ntwo");
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        let messages = body["messages"].as_array().expect("messages");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["content"][0]["type"], "text");
        assert_eq!(messages[1]["content"][2]["input"], json!({"x": 1}));
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(messages[2]["content"].as_array().map(Vec::len), Some(2));
        assert_eq!(messages[2]["content"][1]["tool_use_id"], "t2");
    }

    #[test]
    fn request_without_conversation_is_rejected() {
        let options = CallOptions {
            messages: vec![Message::system("only system")],
            ..CallOptions::default()
        };
        let err = AnthropicAdapter::default()
            .build_request("claude-sonnet-4-5", &options, true)
            .expect_err("no user turn");
        assert!(err.to_string().contains("non-system"));
    }

    #[test]
    fn parse_response_collects_text_and_tool_use() {
        let body = json!({
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "toolu_1", "name": "clock", "input": {"tz": "UTC"}},
                {"type": "thinking", "thinking": "hmm"}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 20, "output_tokens": 9}
        })
        .to_string();
        let result = AnthropicAdapter::default()
            .parse_response(&body)
            .expect("parse");
        assert_eq!(result.text, "Let me check.");
        assert_eq!(result.finish_reason, FinishReason::ToolCalls);
        assert_eq!(result.tool_calls[0].arguments, json!({"tz": "UTC"}));
        assert_eq!(result.usage, Usage::new(20, 9));
    }

    #[test]
    fn decoder_maps_event_sequence() {
        let mut decoder = AnthropicStreamDecoder::default();
        let payloads = [
            r#"{"type":"message_start","message":{"usage":{"input_tokens":11,"output_tokens":1}}}"#,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"{"type":"ping"}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"clock","input":{}}}"#,
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"tz\":"}}"#,
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"\"UTC\"}"}}"#,
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":7}}"#,
        ];
        let chunks: Vec<StreamChunk> = payloads
            .iter()
            .filter_map(|p| decoder.decode(p).expect("decode"))
            .collect();

        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[0], StreamChunk::TextDelta { text: "Hi".into() });
        assert_eq!(
            chunks[1],
            StreamChunk::ToolCallDelta {
                index: 1,
                id: Some("toolu_1".into()),
                name: Some("clock".into()),
                arguments: None,
            }
        );
        assert_eq!(
            chunks[4],
            StreamChunk::Finish {
                reason: FinishReason::ToolCalls,
                usage: Some(Usage::new(11, 7)),
            }
        );
    }

    #[test]
    fn decoder_surfaces_error_events() {
        let mut decoder = AnthropicStreamDecoder::default();
        let chunk = decoder
            .decode(r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#)
            .expect("decode");
        assert_eq!(
            chunk,
            Some(StreamChunk::Error {
                error: ChunkError {
                    message: "Overloaded".into(),
                    code: Some("overloaded_error".into()),
                },
            })
        );
        assert!(decoder.decode("garbage").is_err());
    }
}
