//! Tool capability and dispatch for unillm.
//!
//! A [`ToolRegistry`] maps names to [`Tool`]s and turns every [`uni_llm::ToolCall`] into a
//! [`uni_llm::ToolResult`]. Failures become error results the model can read; only
//! cancellation escapes dispatch.

mod clock;
mod error;
mod registry;
mod traits;

pub use clock::{ClockInput, ClockOutput, ClockTool};
pub use error::{Result, ToolError};
pub use registry::{DispatchCancelled, ToolRegistry, failure_result};
pub use traits::{Tool, ToolSpec, TypedTool, TypedToolAdapter, to_llm_tool_def};
