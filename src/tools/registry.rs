//! Tool dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{ToolContext, ToolGroup, ToolSchema};
use crate::conversation::{ToolCall, ToolResult};
use crate::errors::ToolError;

/// Name → group routing table, built once per agent session.
pub struct ToolRegistry {
    groups: Vec<Arc<dyn ToolGroup>>,
    routes: HashMap<String, usize>,
    context: Arc<ToolContext>,
}

impl ToolRegistry {
    pub fn new(context: ToolContext) -> Self {
        Self {
            groups: Vec::new(),
            routes: HashMap::new(),
            context: Arc::new(context),
        }
    }

    /// Append a group. Names already claimed by an earlier group stay with it.
    pub fn with_group(mut self, group: impl ToolGroup + 'static) -> Self {
        let index = self.groups.len();
        for schema in group.schemas() {
            self.routes.entry(schema.name).or_insert(index);
        }
        self.groups.push(Arc::new(group));
        self
    }

    pub fn context(&self) -> &ToolContext {
        &self.context
    }

    /// Every routable tool, in group order.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.groups
            .iter()
            .enumerate()
            .flat_map(|(index, group)| {
                group
                    .schemas()
                    .into_iter()
                    .filter(move |schema| self.routes.get(&schema.name) == Some(&index))
            })
            .collect()
    }

    /// Execute one call. Never fails: every error, including a panic inside
    /// the handler, comes back as an error-flagged result carrying the call's
    /// id and tool name.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let Some(&index) = self.routes.get(&call.name) else {
            warn!(tool = %call.name, "Unknown tool requested");
            return ToolResult::error(call, ToolError::UnknownTool(call.name.clone()).to_string());
        };
        let group = self.groups[index].clone();
        let context = self.context.clone();
        let tool = call.name.clone();
        let arguments = call.arguments.clone();

        debug!(tool = %call.name, group = group.name(), id = %call.id, "Dispatching tool call");
        // Spawned so a panicking handler is contained to this call.
        let handle =
            tokio::spawn(async move { group.call(&context, &tool, arguments).await });

        match handle.await {
            Ok(Ok(content)) => ToolResult::success(call, content),
            Ok(Err(err)) => {
                warn!(tool = %call.name, id = %call.id, error = %err, "Tool call failed");
                ToolResult::error(call, err.to_string())
            }
            Err(join_err) => {
                warn!(tool = %call.name, id = %call.id, error = %join_err, "Tool call aborted");
                let reason = if join_err.is_panic() {
                    "handler panicked"
                } else {
                    "handler was cancelled"
                };
                ToolResult::error(
                    call,
                    ToolError::Execution(format!("{} ({})", reason, call.name)).to_string(),
                )
            }
        }
    }
}
