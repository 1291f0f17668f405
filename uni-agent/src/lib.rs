//! Agent loop for unillm: request, decode, decide, dispatch tools, repeat.

mod agent;
mod error;
mod result;

pub use agent::{Agent, AgentSettings};
pub use error::{AgentError, RunSnapshot};
pub use result::{GenerateTextResult, StepResult};
