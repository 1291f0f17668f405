use crate::error::{LlmError, Result};
use crate::model::{CallOptions, GenerateResult};
use crate::provider::ProviderAdapter;
use crate::stream::StreamDecoder;
use crate::types::{
    ChunkError, FinishReason, Message, Role, StreamChunk, ToolCall, ToolDefinition, Usage,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Chat-completions adapter. Also fits the many OpenAI-compatible servers via `base_url`.
#[derive(Debug, Clone)]
pub struct OpenAiAdapter {
    base_url: String,
}

impl OpenAiAdapter {
    pub fn new(base_url: Option<&str>) -> Self {
        let base_url = base_url
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(OPENAI_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        Self { base_url }
    }
}

impl Default for OpenAiAdapter {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        api_key: &str,
    ) -> reqwest::RequestBuilder {
        request.bearer_auth(api_key)
    }

    fn build_request(
        &self,
        model: &str,
        options: &CallOptions,
        stream: bool,
    ) -> Result<serde_json::Value> {
        let req = OpenAiChatRequest::new(model, options, stream)?;
        Ok(serde_json::to_value(req)?)
    }

    fn parse_response(&self, body: &str) -> Result<GenerateResult> {
        let parsed: OpenAiChatResponse = serde_json::from_str(body)?;
        parsed.try_into()
    }

    fn stream_decoder(&self) -> Box<dyn StreamDecoder> {
        Box::new(OpenAiStreamDecoder::default())
    }
}

pub fn finish_reason_from_openai(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "content_filter" => FinishReason::ContentFilter,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        _ => FinishReason::Other,
    }
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OpenAiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<OpenAiStreamOptions>,
}

#[derive(Debug, Serialize)]
struct OpenAiStreamOptions {
    include_usage: bool,
}

impl OpenAiChatRequest {
    fn new(model: &str, options: &CallOptions, stream: bool) -> Result<Self> {
        let messages = options
            .messages
            .iter()
            .map(to_openai_message)
            .collect::<Result<Vec<_>>>()?;
        let mut out = Self {
            model: model.to_string(),
            messages,
            tools: options.tools.iter().map(to_openai_tool).collect(),
            tool_choice: None,
            max_tokens: options.settings.max_tokens,
            temperature: options.settings.temperature,
            top_p: options.settings.top_p,
            stop: options.settings.stop_sequences.clone(),
            stream: None,
            stream_options: None,
        };

        if !out.tools.is_empty() {
            out.tool_choice = Some("auto".to_string());
        }

        if stream {
            out.stream = Some(true);
            out.stream_options = Some(OpenAiStreamOptions {
                include_usage: true,
            });
        }

        Ok(out)
    }
}

#[derive(Debug, Serialize)]
struct OpenAiTool {
    r#type: String,
    function: OpenAiToolFunction,
}

#[derive(Debug, Serialize)]
struct OpenAiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

fn to_openai_tool(t: &ToolDefinition) -> OpenAiTool {
    OpenAiTool {
        r#type: "function".to_string(),
        function: OpenAiToolFunction {
            name: t.name.clone(),
            description: t.description.clone(),
            parameters: t.parameters.clone(),
        },
    }
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OpenAiToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenAiToolCall {
    id: String,
    r#type: String,
    function: OpenAiToolFunctionCall,
}

#[derive(Debug, Serialize)]
struct OpenAiToolFunctionCall {
    name: String,
    /// JSON string.
    arguments: String,
}

fn to_openai_message(m: &Message) -> Result<OpenAiMessage> {
    let role = match m.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    let tool_calls = m
        .tool_calls
        .iter()
        .map(|tc| -> Result<OpenAiToolCall> {
            Ok(OpenAiToolCall {
                id: tc.id.clone(),
                r#type: "function".to_string(),
                function: OpenAiToolFunctionCall {
                    name: tc.name.clone(),
                    arguments: serde_json::to_string(&tc.arguments)?,
                },
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let content = match m.role {
        Role::Tool => Some(m.content.clone()),
        _ => Some(m.content.clone()).filter(|s| !s.is_empty()),
    };
    Ok(OpenAiMessage {
        role: role.to_string(),
        content,
        name: if m.role == Role::Tool { None } else { m.name.clone() },
        tool_calls,
        tool_call_id: m.tool_call_id.clone(),
    })
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OpenAiChoiceToolCall>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceToolCall {
    id: String,
    #[serde(default)]
    function: OpenAiChoiceToolCallFunction,
}

#[derive(Debug, Deserialize, Default)]
struct OpenAiChoiceToolCallFunction {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: Option<u64>,
}

impl From<&OpenAiUsage> for Usage {
    fn from(u: &OpenAiUsage) -> Self {
        let mut usage = Usage::new(u.prompt_tokens, u.completion_tokens);
        if let Some(total) = u.total_tokens {
            usage.total_tokens = total;
        }
        usage
    }
}

impl TryFrom<OpenAiChatResponse> for GenerateResult {
    type Error = LlmError;

    fn try_from(v: OpenAiChatResponse) -> Result<Self> {
        let choice = v.choices.into_iter().next().ok_or_else(|| {
            LlmError::ResponseFormat("openai response missing choices".to_string())
        })?;

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|tc| {
                let arguments = parse_arguments(&tc.function.name, &tc.function.arguments);
                ToolCall {
                    id: tc.id,
                    name: tc.function.name,
                    arguments,
                }
            })
            .collect();

        Ok(GenerateResult {
            text: choice.message.content.unwrap_or_default(),
            tool_calls,
            finish_reason: choice
                .finish_reason
                .as_deref()
                .map(finish_reason_from_openai)
                .unwrap_or(FinishReason::Other),
            usage: v.usage.as_ref().map(Usage::from).unwrap_or_default(),
        })
    }
}

// Malformed arguments are kept verbatim as a JSON string so the tool adapter reports them.
fn parse_arguments(tool_name: &str, raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(tool_name, error = %e, "openai returned malformed tool arguments");
            serde_json::Value::String(raw.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamResponseChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
    #[serde(default)]
    error: Option<OpenAiStreamError>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: OpenAiStreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiStreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiStreamDeltaToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamDeltaToolCall {
    #[serde(default)]
    index: Option<u32>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<OpenAiStreamDeltaToolFunction>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamDeltaToolFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Finish reason and usage arrive in separate payloads when `include_usage` is on; the
/// decoder holds the finish back until usage (or `[DONE]`) shows up.
#[derive(Debug, Default)]
pub struct OpenAiStreamDecoder {
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
    pending: VecDeque<StreamChunk>,
}

impl OpenAiStreamDecoder {
    fn finish(&self) -> StreamChunk {
        StreamChunk::Finish {
            reason: self.finish_reason.unwrap_or(FinishReason::Stop),
            usage: self.usage,
        }
    }
}

impl StreamDecoder for OpenAiStreamDecoder {
    fn decode(&mut self, payload: &str) -> Result<Option<StreamChunk>> {
        let payload = payload.trim();
        if payload.is_empty() {
            return Ok(None);
        }
        if payload == "[DONE]" {
            return Ok(Some(self.finish()));
        }

        let chunk: OpenAiStreamResponseChunk = serde_json::from_str(payload).map_err(|e| {
            LlmError::StreamParse(format!("openai chunk json error={e} data={payload}"))
        })?;

        if let Some(err) = chunk.error {
            return Ok(Some(StreamChunk::Error {
                error: ChunkError {
                    message: err.message,
                    code: err.code.map(|c| match c {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    }),
                },
            }));
        }

        if let Some(u) = chunk.usage.as_ref() {
            self.usage = Some(Usage::from(u));
        }

        if let Some(choice) = chunk.choices.into_iter().next() {
            if let Some(reason) = choice.finish_reason.as_deref() {
                self.finish_reason = Some(finish_reason_from_openai(reason));
            }

            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                self.pending.push_back(StreamChunk::TextDelta { text: content });
            }

            // Some servers send the whole tool_calls array in one payload.
            for tc in choice.delta.tool_calls.unwrap_or_default() {
                let (name, arguments) = match tc.function {
                    Some(f) => (f.name, f.arguments.filter(|a| !a.is_empty())),
                    None => (None, None),
                };
                self.pending.push_back(StreamChunk::ToolCallDelta {
                    index: tc.index.unwrap_or(0),
                    id: tc.id,
                    name,
                    arguments,
                });
            }
        }

        if self.finish_reason.is_some() && self.usage.is_some() {
            let finish = self.finish();
            self.pending.push_back(finish);
        }
        Ok(self.pending.pop_front())
    }

    fn drain(&mut self) -> Option<StreamChunk> {
        self.pending.pop_front()
    }
}
