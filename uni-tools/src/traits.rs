use crate::error::{Result, ToolError};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// Type-erased tool capability: raw JSON arguments in, text out.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    async fn execute(
        &self,
        arguments: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<String>;
}

pub fn to_llm_tool_def(tool: &dyn Tool) -> uni_llm::ToolDefinition {
    let spec = tool.spec();
    uni_llm::ToolDefinition {
        name: spec.name,
        description: spec.description,
        parameters: spec.parameters_schema,
    }
}

/// A tool with concrete input and output types.
///
/// Register it through [`TypedToolAdapter`], which owns argument decoding and result
/// encoding so the dispatcher only ever sees [`Tool`].
#[async_trait]
pub trait TypedTool: Send + Sync {
    type Input: DeserializeOwned + Send;
    type Output: Serialize + Send;

    fn spec(&self) -> ToolSpec;

    async fn call(&self, input: Self::Input, cancel: &CancellationToken) -> Result<Self::Output>;
}

pub struct TypedToolAdapter<T> {
    inner: T,
}

impl<T: TypedTool> TypedToolAdapter<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: TypedTool> Tool for TypedToolAdapter<T> {
    fn spec(&self) -> ToolSpec {
        self.inner.spec()
    }

    async fn execute(
        &self,
        arguments: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let input: T::Input = serde_json::from_value(arguments.clone())
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let output = self.inner.call(input, cancel).await?;
        // Plain strings go out as-is; everything else as compact JSON.
        match serde_json::to_value(&output) {
            Ok(serde_json::Value::String(s)) => Ok(s),
            Ok(v) => Ok(v.to_string()),
            Err(e) => Err(ToolError::Serialization(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    struct Adder;

    #[derive(Deserialize)]
    struct AddInput {
        a: i64,
        b: i64,
    }

    #[derive(Serialize)]
    struct AddOutput {
        sum: i64,
    }

    #[async_trait]
    impl TypedTool for Adder {
        type Input = AddInput;
        type Output = AddOutput;

        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "add".to_string(),
                description: "Add two integers.".to_string(),
                parameters_schema: json!({
                    "type": "object",
                    "properties": {
                        "a": { "type": "integer" },
                        "b": { "type": "integer" }
                    },
                    "required": ["a", "b"]
                }),
            }
        }

        async fn call(&self, input: AddInput, _cancel: &CancellationToken) -> Result<AddOutput> {
            Ok(AddOutput {
                sum: input.a + input.b,
            })
        }
    }

    struct Shout;

    #[async_trait]
    impl TypedTool for Shout {
        type Input = String;
        type Output = String;

        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "shout".to_string(),
                description: "Uppercase text.".to_string(),
                parameters_schema: json!({ "type": "string" }),
            }
        }

        async fn call(&self, input: String, _cancel: &CancellationToken) -> Result<String> {
            Ok(input.to_uppercase())
        }
    }

    #[tokio::test]
    async fn adapter_decodes_arguments_and_encodes_result() {
        let tool = TypedToolAdapter::new(Adder);
        let out = tool
            .execute(&json!({"a": 2, "b": 40}), &CancellationToken::new())
            .await
            .expect("execute");
        assert_eq!(out, "{\"sum\":42}");

        let def = to_llm_tool_def(&tool);
        assert_eq!(def.name, "add");
        assert_eq!(def.parameters["required"], json!(["a", "b"]));
    }

    #[tokio::test]
    async fn adapter_passes_string_output_through() {
        let tool = TypedToolAdapter::new(Shout);
        let out = tool
            .execute(&json!("hey"), &CancellationToken::new())
            .await
            .expect("execute");
        assert_eq!(out, "HEY");
    }

    #[tokio::test]
    async fn adapter_rejects_mismatched_arguments() {
        let tool = TypedToolAdapter::new(Adder);
        let err = tool
            .execute(&json!({"a": "two"}), &CancellationToken::new())
            .await
            .expect_err("bad args");
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
