//! Tool registration and execution: the name → definition registry the
//! LLM sees, the timeout-bounded executor, and the built-in tools.

pub mod builtin;
pub mod executor;
pub mod registry;

pub use executor::{ToolExecutor, ToolResult};
pub use registry::{ToolContext, ToolHandler, ToolRegistry, ToolSpec};
