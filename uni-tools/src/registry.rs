use crate::error::{Result, ToolError};
use crate::traits::{Tool, to_llm_tool_def};
use futures_util::FutureExt;
use serde_json::json;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uni_llm::{ToolCall, ToolDefinition, ToolResult};

/// Raised by [`ToolRegistry::dispatch`] only when the caller's cancellation fired.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("tool call {tool_call_id} ({tool_name}) cancelled")]
pub struct DispatchCancelled {
    pub tool_call_id: String,
    pub tool_name: String,
}

/// Name → tool map, read-only while a run is using it.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.spec().name;
        if name.trim().is_empty() {
            return Err(ToolError::InvalidArguments(
                "tool name must not be empty".to_string(),
            ));
        }
        if self.tools.contains_key(&name) {
            return Err(ToolError::DuplicateTool(name));
        }
        tracing::debug!(tool_name = %name, "tool registered");
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions sent to the model, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|t| to_llm_tool_def(t.as_ref()))
            .collect()
    }

    /// Run a tool by name. Panics inside the tool are reported as execution failures.
    pub async fn execute(
        &self,
        tool_name: &str,
        arguments: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let Some(tool) = self.tools.get(tool_name) else {
            return Err(ToolError::UnknownTool(tool_name.to_string()));
        };
        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }

        let run = AssertUnwindSafe(tool.execute(arguments, cancel)).catch_unwind();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ToolError::Cancelled),
            outcome = run => outcome,
        };
        match outcome {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(ToolError::ExecutionFailed(format!("tool panicked: {message}")))
            }
        }
    }

    /// Execute one tool call and always produce a [`ToolResult`], except on cancellation.
    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(tool_call_id = %call.id, tool_name = %call.name)
    )]
    pub async fn dispatch(
        &self,
        call: &ToolCall,
        cancel: &CancellationToken,
    ) -> std::result::Result<ToolResult, DispatchCancelled> {
        let cancelled = || DispatchCancelled {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
        };
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        let started = Instant::now();
        match self.execute(&call.name, &call.arguments, cancel).await {
            Ok(output) => {
                tracing::info!(
                    latency_ms = started.elapsed().as_millis() as u64,
                    output_len = output.len(),
                    "tool call executed"
                );
                Ok(ToolResult {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    result: output,
                    is_error: false,
                })
            }
            Err(ToolError::Cancelled) => Err(cancelled()),
            Err(_) if cancel.is_cancelled() => Err(cancelled()),
            Err(e) => {
                tracing::warn!(
                    latency_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "tool call failed"
                );
                Ok(failure_result(&call.id, &call.name, &e.to_string()))
            }
        }
    }
}

/// A failed tool call as the model sees it.
pub fn failure_result(tool_call_id: &str, tool_name: &str, message: &str) -> ToolResult {
    ToolResult {
        tool_call_id: tool_call_id.to_string(),
        tool_name: tool_name.to_string(),
        result: json!({ "error": message }).to_string(),
        is_error: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ToolSpec;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for Echo {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "echo".to_string(),
                description: "Echo arguments back.".to_string(),
                parameters_schema: json!({ "type": "object" }),
            }
        }

        async fn execute(
            &self,
            arguments: &serde_json::Value,
            _cancel: &CancellationToken,
        ) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(arguments.to_string())
        }
    }

    struct Failing;

    #[async_trait]
    impl Tool for Failing {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "failing".to_string(),
                description: "Always fails.".to_string(),
                parameters_schema: json!({ "type": "object" }),
            }
        }

        async fn execute(
            &self,
            _arguments: &serde_json::Value,
            _cancel: &CancellationToken,
        ) -> Result<String> {
            Err(ToolError::ExecutionFailed("disk on fire".to_string()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl Tool for Panicking {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "panicking".to_string(),
                description: "Panics.".to_string(),
                parameters_schema: json!({ "type": "object" }),
            }
        }

        async fn execute(
            &self,
            _arguments: &serde_json::Value,
            _cancel: &CancellationToken,
        ) -> Result<String> {
            panic!("boom");
        }
    }

    struct Blocking;

    #[async_trait]
    impl Tool for Blocking {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "blocking".to_string(),
                description: "Never finishes on its own.".to_string(),
                parameters_schema: json!({ "type": "object" }),
            }
        }

        async fn execute(
            &self,
            _arguments: &serde_json::Value,
            _cancel: &CancellationToken,
        ) -> Result<String> {
            std::future::pending::<()>().await;
            Ok(String::new())
        }
    }

    fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: format!("call_{name}"),
            name: name.to_string(),
            arguments,
        }
    }

    fn registry(calls: Arc<AtomicUsize>) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Echo { calls }).expect("register echo");
        registry.register(Failing).expect("register failing");
        registry.register(Panicking).expect("register panicking");
        registry.register(Blocking).expect("register blocking");
        registry
    }

    #[test]
    fn duplicate_names_are_rejected_and_definitions_sorted() {
        let mut reg = registry(Arc::new(AtomicUsize::new(0)));
        let err = reg
            .register(Echo {
                calls: Arc::new(AtomicUsize::new(0)),
            })
            .expect_err("duplicate");
        assert!(matches!(err, ToolError::DuplicateTool(name) if name == "echo"));

        let names: Vec<String> = reg.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["blocking", "echo", "failing", "panicking"]);
    }

    #[tokio::test]
    async fn dispatch_runs_known_tool_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reg = registry(calls.clone());
        let result = reg
            .dispatch(&call("echo", json!({"a": 1})), &CancellationToken::new())
            .await
            .expect("not cancelled");
        assert!(!result.is_error);
        assert_eq!(result.result, "{\"a\":1}");
        assert_eq!(result.tool_call_id, "call_echo");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_failing_and_panicking_tools_become_failure_results() {
        let reg = registry(Arc::new(AtomicUsize::new(0)));
        let cancel = CancellationToken::new();

        let unknown = reg
            .dispatch(&call("missing", json!({})), &cancel)
            .await
            .expect("not cancelled");
        assert!(unknown.is_error);
        assert!(unknown.result.contains("unknown tool: missing"));

        let failed = reg
            .dispatch(&call("failing", json!({})), &cancel)
            .await
            .expect("not cancelled");
        assert!(failed.is_error);
        let body: serde_json::Value = serde_json::from_str(&failed.result).expect("json");
        assert_eq!(body["error"], "execution failed: disk on fire");

        let panicked = reg
            .dispatch(&call("panicking", json!({})), &cancel)
            .await
            .expect("not cancelled");
        assert!(panicked.is_error);
        assert!(panicked.result.contains("boom"));
    }

    #[tokio::test]
    async fn cancellation_during_execution_propagates() {
        let reg = registry(Arc::new(AtomicUsize::new(0)));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = reg
            .dispatch(&call("blocking", json!({})), &cancel)
            .await
            .expect_err("cancelled");
        assert_eq!(err.tool_name, "blocking");
    }

    #[tokio::test]
    async fn cancelled_token_prevents_execution() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reg = registry(calls.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(reg.dispatch(&call("echo", json!({})), &cancel).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
