use crate::error::Result;
use crate::stream::ChunkStream;
use crate::types::{FinishReason, Message, ToolCall, ToolDefinition, Usage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Sampling knobs forwarded to the provider unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallSettings {
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub settings: CallSettings,
}

/// Result of one non-streaming model call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateResult {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn provider(&self) -> &str;

    fn model_id(&self) -> &str;

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn generate(
        &self,
        options: &CallOptions,
        cancel: &CancellationToken,
    ) -> Result<GenerateResult>;

    /// Open a canonical chunk sequence for one call.
    async fn stream(&self, options: &CallOptions, cancel: &CancellationToken)
    -> Result<ChunkStream>;
}
