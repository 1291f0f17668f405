use crate::error::{AgentError, RunSnapshot};
use crate::result::{GenerateTextResult, StepResult};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use uni_llm::{
    CallOptions, CallSettings, ChunkError, FinishReason, LanguageModel, LlmError, Message,
    StreamChunk, ToolCall, ToolCallParseError, ToolResult, Usage, collect_stream,
};
use uni_tools::{ToolRegistry, failure_result};

#[derive(Debug, Clone, PartialEq)]
pub struct AgentSettings {
    /// Upper bound on model calls per run.
    pub max_steps: usize,
    /// Use the model's chunk stream when it supports one.
    pub streaming: bool,
    pub call: CallSettings,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: 8,
            streaming: true,
            call: CallSettings::default(),
        }
    }
}

/// What one model call produced, before the loop decides what to do with it.
struct ModelTurn {
    text: String,
    finish_reason: FinishReason,
    usage: Usage,
    tool_calls: Vec<Result<ToolCall, ToolCallParseError>>,
    error: Option<ChunkError>,
}

/// Multi-step generate/tool loop over one model and one tool registry.
pub struct Agent {
    model: Arc<dyn LanguageModel>,
    tools: ToolRegistry,
    settings: AgentSettings,
}

impl Agent {
    pub fn new(model: Arc<dyn LanguageModel>, tools: ToolRegistry, settings: AgentSettings) -> Self {
        Self {
            model,
            tools,
            settings,
        }
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run the loop until the model stops asking for tools or `max_steps` is reached.
    ///
    /// When `stream_tx` is set and the run streams, every chunk of every step is forwarded
    /// as it arrives. Only whole steps are ever appended to the conversation: on
    /// cancellation or a failed model call the error carries the state committed so far.
    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(model = %self.model.model_id(), max_steps = self.settings.max_steps)
    )]
    pub async fn generate_text(
        &self,
        messages: Vec<Message>,
        cancel: &CancellationToken,
        stream_tx: Option<UnboundedSender<StreamChunk>>,
    ) -> Result<GenerateTextResult, AgentError> {
        self.validate(&messages)?;

        let streaming = self.settings.streaming && self.model.supports_streaming();
        let definitions = self.tools.definitions();
        tracing::info!(
            prior_messages = messages.len(),
            tools_registered = definitions.len(),
            streaming,
            stream_forwarding = stream_tx.is_some(),
            "agent run started"
        );

        let mut messages = messages;
        let mut steps: Vec<StepResult> = Vec::new();
        let mut step_number = 0usize;

        loop {
            if cancel.is_cancelled() {
                tracing::info!(step = step_number, "agent run cancelled before step");
                return Err(AgentError::Cancelled {
                    snapshot: RunSnapshot { steps, messages },
                });
            }

            let options = CallOptions {
                messages: messages.clone(),
                tools: definitions.clone(),
                settings: self.settings.call.clone(),
            };
            let started = Instant::now();
            let turn = match self
                .request(&options, streaming, cancel, stream_tx.as_ref())
                .await
            {
                Ok(turn) => turn,
                Err(e) if e.is_cancelled() || cancel.is_cancelled() => {
                    tracing::info!(step = step_number, "agent run cancelled during model call");
                    return Err(AgentError::Cancelled {
                        snapshot: RunSnapshot { steps, messages },
                    });
                }
                Err(source) => {
                    tracing::error!(step = step_number, error = %source, "model call failed");
                    return Err(AgentError::Generation {
                        source,
                        snapshot: RunSnapshot { steps, messages },
                    });
                }
            };
            tracing::info!(
                step = step_number,
                latency_ms = started.elapsed().as_millis() as u64,
                finish_reason = ?turn.finish_reason,
                input_tokens = turn.usage.input_tokens,
                output_tokens = turn.usage.output_tokens,
                tool_calls = turn.tool_calls.len(),
                text_len = turn.text.len(),
                "model call completed"
            );

            let calls: Vec<ToolCall> = turn.tool_calls.iter().map(surfaced_call).collect();
            let dispatch = turn.finish_reason == FinishReason::ToolCalls
                && !calls.is_empty()
                && step_number + 1 < self.settings.max_steps;

            if !dispatch {
                if turn.finish_reason == FinishReason::ToolCalls && !calls.is_empty() {
                    tracing::warn!(
                        step = step_number,
                        tool_calls = calls.len(),
                        "step limit reached; returning tool calls undispatched"
                    );
                }
                if !turn.finish_reason.is_terminal_error() {
                    messages.push(Message::assistant_tool_calls(
                        turn.text.clone(),
                        calls.clone(),
                    ));
                }
                steps.push(StepResult {
                    step_number,
                    text: non_empty(turn.text),
                    finish_reason: turn.finish_reason,
                    usage: turn.usage,
                    tool_calls: calls,
                    tool_results: Vec::new(),
                    error: turn.error,
                });
                let result = GenerateTextResult::from_steps(steps, messages).ok_or_else(|| {
                    AgentError::Configuration("run finished without a step".to_string())
                })?;
                tracing::info!(
                    steps = result.steps.len(),
                    finish_reason = ?result.finish_reason,
                    total_tokens = result.usage.total_tokens,
                    messages = result.messages.len(),
                    "agent run completed"
                );
                return Ok(result);
            }

            let mut results: Vec<ToolResult> = Vec::with_capacity(turn.tool_calls.len());
            for call in &turn.tool_calls {
                if cancel.is_cancelled() {
                    tracing::info!(step = step_number, "agent run cancelled before tool call");
                    return Err(AgentError::Cancelled {
                        snapshot: RunSnapshot { steps, messages },
                    });
                }
                let result = match call {
                    Ok(call) => match self.tools.dispatch(call, cancel).await {
                        Ok(result) => result,
                        Err(cancelled) => {
                            tracing::info!(
                                step = step_number,
                                tool_call_id = %cancelled.tool_call_id,
                                "agent run cancelled during tool call"
                            );
                            return Err(AgentError::Cancelled {
                                snapshot: RunSnapshot { steps, messages },
                            });
                        }
                    },
                    Err(parse) => {
                        tracing::warn!(
                            step = step_number,
                            tool_call_id = %parse.id,
                            tool_name = %parse.name,
                            error = %parse.message,
                            "tool call arguments did not parse; not executed"
                        );
                        failure_result(&parse.id, &parse.name, &parse.to_string())
                    }
                };
                results.push(result);
            }

            messages.push(Message::assistant_tool_calls(turn.text.clone(), calls.clone()));
            messages.extend(results.iter().map(Message::tool));
            tracing::debug!(
                step = step_number,
                tool_results = results.len(),
                failed = results.iter().filter(|r| r.is_error).count(),
                messages = messages.len(),
                "tool step committed"
            );
            steps.push(StepResult {
                step_number,
                text: non_empty(turn.text),
                finish_reason: turn.finish_reason,
                usage: turn.usage,
                tool_calls: calls,
                tool_results: results,
                error: turn.error,
            });
            step_number += 1;
        }
    }

    fn validate(&self, messages: &[Message]) -> Result<(), AgentError> {
        if self.settings.max_steps < 1 {
            return Err(AgentError::Configuration(
                "max_steps must be at least 1".to_string(),
            ));
        }
        if self.model.model_id().trim().is_empty() {
            return Err(AgentError::Configuration("model id is empty".to_string()));
        }
        if messages.is_empty() {
            return Err(AgentError::Configuration(
                "at least one message is required".to_string(),
            ));
        }
        Ok(())
    }

    async fn request(
        &self,
        options: &CallOptions,
        streaming: bool,
        cancel: &CancellationToken,
        stream_tx: Option<&UnboundedSender<StreamChunk>>,
    ) -> Result<ModelTurn, LlmError> {
        if !streaming {
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                response = self.model.generate(options, cancel) => response?,
            };
            return Ok(ModelTurn {
                text: response.text,
                finish_reason: response.finish_reason,
                usage: response.usage,
                tool_calls: response.tool_calls.into_iter().map(Ok).collect(),
                error: None,
            });
        }

        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            stream = self.model.stream(options, cancel) => stream?,
        };
        let mut receiver_open = stream_tx.is_some();
        let turn = collect_stream(stream, cancel, |chunk| {
            let Some(tx) = stream_tx else { return };
            if receiver_open && tx.send(chunk.clone()).is_err() {
                tracing::debug!("stream receiver dropped; no longer forwarding chunks");
                receiver_open = false;
            }
        })
        .await?;
        Ok(ModelTurn {
            text: turn.text,
            finish_reason: turn.finish_reason,
            usage: turn.usage,
            tool_calls: turn.tool_calls,
            error: turn.error,
        })
    }
}

/// The call as recorded in the conversation. Unparseable arguments are kept as raw text.
fn surfaced_call(call: &Result<ToolCall, ToolCallParseError>) -> ToolCall {
    match call {
        Ok(call) => call.clone(),
        Err(parse) => ToolCall {
            id: parse.id.clone(),
            name: parse.name.clone(),
            arguments: serde_json::Value::String(parse.raw_arguments.clone()),
        },
    }
}

fn non_empty(text: String) -> Option<String> {
    (!text.is_empty()).then_some(text)
}
