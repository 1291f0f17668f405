use thiserror::Error;

pub type Result<T> = std::result::Result<T, ToolError>;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("duplicate tool name: {0}")]
    DuplicateTool(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("result serialization failed: {0}")]
    Serialization(String),

    #[error("tool execution cancelled")]
    Cancelled,
}
