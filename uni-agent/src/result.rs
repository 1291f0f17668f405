use serde::Serialize;
use uni_llm::{ChunkError, FinishReason, Message, ToolCall, ToolResult, Usage};

/// One model call plus whatever tool execution it triggered. Never revised once pushed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub step_number: usize,
    pub text: Option<String>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ChunkError>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateTextResult {
    pub text: Option<String>,
    pub finish_reason: FinishReason,
    /// Sum over `steps`.
    pub usage: Usage,
    pub tool_calls: Vec<ToolCall>,
    pub steps: Vec<StepResult>,
    pub messages: Vec<Message>,
}

impl GenerateTextResult {
    pub(crate) fn from_steps(steps: Vec<StepResult>, messages: Vec<Message>) -> Option<Self> {
        let last = steps.last()?;
        Some(Self {
            text: last.text.clone(),
            finish_reason: last.finish_reason,
            usage: steps.iter().map(|s| &s.usage).sum(),
            tool_calls: last.tool_calls.clone(),
            steps,
            messages,
        })
    }
}
