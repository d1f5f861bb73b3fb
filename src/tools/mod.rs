//! Tools exposed to the model.
//!
//! Tools are grouped by capability. Each group implements [`ToolGroup`]; the
//! [`ToolRegistry`] routes a call to the first group that exposes its name.
//!
//! | Group          | Tools                                                        |
//! |----------------|--------------------------------------------------------------|
//! | `sandbox`      | `run_command`                                                |
//! | `coordination` | pull requests, reviews, votes, status updates, problem text  |
//! | `user`         | `ask_user_question`                                          |

pub mod coordination;
pub mod registry;
pub mod sandbox;
pub mod user;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ToolError;
use crate::store::DbHandle;

pub use coordination::CoordinationTools;
pub use registry::ToolRegistry;
pub use sandbox::{ExecOutput, ExecRequest, LocalSandbox, Sandbox, SandboxTools};
pub use user::UserTools;

/// Name, description and JSON Schema of one tool, as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolSchema {
    pub fn new(name: &str, description: &str, input_schema: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

/// Who is calling, and where shared records live.
#[derive(Clone)]
pub struct ToolContext {
    pub experiment_id: i64,
    pub agent_index: i64,
    pub repository_id: i64,
    pub db: DbHandle,
}

/// A set of related tools.
#[async_trait]
pub trait ToolGroup: Send + Sync {
    /// Short group name for logs.
    fn name(&self) -> &'static str;

    fn schemas(&self) -> Vec<ToolSchema>;

    /// Execute `tool`. Only called with names this group advertised.
    async fn call(
        &self,
        ctx: &ToolContext,
        tool: &str,
        arguments: Value,
    ) -> Result<String, ToolError>;
}

/// Deserialize tool arguments, treating a missing payload as `{}`.
pub fn parse_args<T: DeserializeOwned>(arguments: Value) -> Result<T, ToolError> {
    let arguments = if arguments.is_null() {
        Value::Object(Default::default())
    } else {
        arguments
    };
    Ok(serde_json::from_value(arguments)?)
}
