//! Model client seam.
//!
//! Provider HTTP clients live outside this crate. Quorum talks to a model
//! through [`ModelClient`]; the default [`ProcessModel`] shells out to a
//! bridge command that reads one JSON [`ModelRequest`] on stdin and prints
//! one JSON [`ModelResponse`] on stdout.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::context::estimate_json_tokens;
use crate::conversation::{ContentPart, Message, Role, Usage};
use crate::errors::ModelError;
use crate::tools::ToolSchema;

/// One message as sent to the model: role and content only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMessage {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl From<&Message> for RequestMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<RequestMessage>,
    pub tools: Vec<ToolSchema>,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    #[serde(default)]
    pub content: Vec<ContentPart>,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

/// Abstraction over a language model for testability.
/// Real implementation: `ProcessModel`. Test double: `ScriptedModel` in the engine tests.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError>;

    /// Tokens the request would consume. Defaults to a 4-chars-per-token estimate.
    fn count_tokens(&self, request: &ModelRequest) -> usize {
        estimate_json_tokens(request)
    }
}

/// Runs an external bridge command per request.
pub struct ProcessModel {
    command: String,
    timeout: Duration,
    working_dir: Option<PathBuf>,
}

impl ProcessModel {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl ModelClient for ProcessModel {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| ModelError::Fatal(format!("Failed to serialize request: {}", e)))?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            ModelError::Fatal(format!("Failed to spawn model command '{}': {}", self.command, e))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| ModelError::Transient(format!("Failed to write request: {}", e)))?;
            // stdin is dropped here, closing the pipe
        }

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result
                .map_err(|e| ModelError::Transient(format!("Failed to wait for model: {}", e)))?,
            Err(_) => {
                return Err(ModelError::Transient(format!(
                    "Model call timed out after {} seconds",
                    self.timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ModelError::Transient(format!(
                "Model command exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!(bytes = output.stdout.len(), "Model response received");
        serde_json::from_str(stdout.trim())
            .map_err(|e| ModelError::Fatal(format!("Unparsable model response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> ModelRequest {
        ModelRequest {
            model: "test".into(),
            system: "be brief".into(),
            messages: vec![RequestMessage {
                role: Role::User,
                content: vec![ContentPart::text("hi")],
            }],
            tools: vec![],
            max_output_tokens: 128,
        }
    }

    #[tokio::test]
    async fn test_process_model_parses_stdout() {
        let model = ProcessModel::new(
            r#"cat > /dev/null; echo '{"content":[{"type":"text","text":"hello"}],"usage":{"input_tokens":3,"output_tokens":1}}'"#,
            Duration::from_secs(10),
        );
        let response = model.complete(&request()).await.unwrap();
        assert_eq!(response.content, vec![ContentPart::text("hello")]);
        assert_eq!(response.usage.input_tokens, 3);
    }

    #[tokio::test]
    async fn test_process_model_sees_request_on_stdin() {
        // Only answers if the serialized request arrived on stdin.
        let model = ProcessModel::new(
            r#"grep -q '"system":"be brief"' && echo '{"content":[{"type":"text","text":"ok"}]}'"#,
            Duration::from_secs(10),
        );
        let response = model.complete(&request()).await.unwrap();
        assert_eq!(response.content, vec![ContentPart::text("ok")]);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_transient() {
        let model = ProcessModel::new("cat > /dev/null; echo overloaded >&2; exit 3", Duration::from_secs(10));
        let err = model.complete(&request()).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("overloaded"));
    }

    #[tokio::test]
    async fn test_garbage_output_is_fatal() {
        let model = ProcessModel::new("cat > /dev/null; echo not-json", Duration::from_secs(10));
        let err = model.complete(&request()).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let model = ProcessModel::new("sleep 5", Duration::from_millis(200));
        let err = model.complete(&request()).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_default_token_count_tracks_request_size() {
        struct Null;
        #[async_trait]
        impl ModelClient for Null {
            async fn complete(&self, _: &ModelRequest) -> Result<ModelResponse, ModelError> {
                Ok(ModelResponse::default())
            }
        }
        let small = Null.count_tokens(&request());
        let mut big = request();
        big.messages.push(RequestMessage {
            role: Role::Agent,
            content: vec![ContentPart::text("x".repeat(4000))],
        });
        assert!(Null.count_tokens(&big) >= small + 1000);
    }

    #[test]
    fn test_response_defaults_missing_fields() {
        let parsed: ModelResponse = serde_json::from_value(json!({})).unwrap();
        assert!(parsed.content.is_empty());
        assert_eq!(parsed.usage, Usage::default());
    }
}
