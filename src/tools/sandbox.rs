//! Sandboxed shell execution.
//!
//! The isolation mechanism itself (container, worktree) sits behind the
//! [`Sandbox`] trait. [`LocalSandbox`] runs commands with `sh -c` inside a
//! per-agent directory and is what the CLI uses.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{ToolContext, ToolGroup, ToolSchema, parse_args};
use crate::errors::ToolError;

/// Output beyond this many characters per stream is cut.
const MAX_STREAM_CHARS: usize = 20_000;

#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub command: String,
    /// Relative paths resolve against the sandbox root.
    pub working_dir: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed or timed out.
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl ExecOutput {
    /// Text handed back to the model.
    pub fn render(&self) -> String {
        let exit = match (self.timed_out, self.exit_code) {
            (true, _) => "timed out".to_string(),
            (false, Some(code)) => code.to_string(),
            (false, None) => "killed".to_string(),
        };
        format!(
            "exit_code: {}\nduration_ms: {}\nstdout:\n{}\nstderr:\n{}",
            exit,
            self.duration_ms,
            truncate_stream(&self.stdout),
            truncate_stream(&self.stderr)
        )
    }
}

fn truncate_stream(text: &str) -> String {
    let count = text.chars().count();
    if count <= MAX_STREAM_CHARS {
        return text.to_string();
    }
    let kept: String = text.chars().take(MAX_STREAM_CHARS).collect();
    format!("{}\n[... {} more characters truncated]", kept, count - MAX_STREAM_CHARS)
}

/// Executes shell commands somewhere isolated.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Run a command. A non-zero exit is a normal output, not an error.
    async fn exec(&self, request: ExecRequest) -> Result<ExecOutput>;
}

/// Runs commands as local child processes rooted in one directory.
pub struct LocalSandbox {
    root: PathBuf,
}

impl LocalSandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, dir: Option<&Path>) -> PathBuf {
        match dir {
            Some(p) if p.is_absolute() => p.to_path_buf(),
            Some(p) => self.root.join(p),
            None => self.root.clone(),
        }
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    async fn exec(&self, request: ExecRequest) -> Result<ExecOutput> {
        let working_dir = self.resolve(request.working_dir.as_deref());
        tokio::fs::create_dir_all(&working_dir).await.with_context(|| {
            format!("Failed to create working directory {}", working_dir.display())
        })?;

        let started = Instant::now();
        let child = Command::new("sh")
            .arg("-c")
            .arg(&request.command)
            .current_dir(&working_dir)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn command: {}", request.command))?;

        let result = timeout(request.timeout, child.wait_with_output()).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                let output = output.context("Failed to wait for command")?;
                debug!(
                    command = %request.command,
                    exit_code = ?output.status.code(),
                    duration_ms,
                    "Command finished"
                );
                Ok(ExecOutput {
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                    exit_code: output.status.code(),
                    duration_ms,
                    timed_out: false,
                })
            }
            // The child is killed when its handle drops with the timed-out future.
            Err(_) => Ok(ExecOutput {
                stdout: String::new(),
                stderr: format!(
                    "Command timed out after {} seconds",
                    request.timeout.as_secs_f64()
                ),
                exit_code: None,
                duration_ms,
                timed_out: true,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RunCommandArgs {
    command: String,
    #[serde(default)]
    working_dir: Option<PathBuf>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    timeout_seconds: Option<u64>,
}

/// The `run_command` tool.
pub struct SandboxTools {
    sandbox: Arc<dyn Sandbox>,
    default_timeout: Duration,
}

impl SandboxTools {
    pub fn new(sandbox: Arc<dyn Sandbox>, default_timeout: Duration) -> Self {
        Self {
            sandbox,
            default_timeout,
        }
    }
}

#[async_trait]
impl ToolGroup for SandboxTools {
    fn name(&self) -> &'static str {
        "sandbox"
    }

    fn schemas(&self) -> Vec<ToolSchema> {
        vec![ToolSchema::new(
            "run_command",
            "Run a shell command in your workspace. Returns exit code, duration, stdout and stderr. \
             A non-zero exit code is reported, not treated as a failure.",
            json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "Shell command, run with sh -c"},
                    "working_dir": {"type": "string", "description": "Directory relative to your workspace"},
                    "env": {
                        "type": "object",
                        "additionalProperties": {"type": "string"},
                        "description": "Extra environment variables"
                    },
                    "timeout_seconds": {"type": "integer", "minimum": 1}
                },
                "required": ["command"]
            }),
        )]
    }

    async fn call(&self, _ctx: &ToolContext, tool: &str, arguments: Value) -> Result<String, ToolError> {
        if tool != "run_command" {
            return Err(ToolError::UnknownTool(tool.to_string()));
        }
        let args: RunCommandArgs = parse_args(arguments)?;
        if args.command.trim().is_empty() {
            return Err(ToolError::InvalidArguments("command must not be empty".into()));
        }
        let timeout = args
            .timeout_seconds
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let output = self
            .sandbox
            .exec(ExecRequest {
                command: args.command,
                working_dir: args.working_dir,
                env: args.env,
                timeout,
            })
            .await
            .map_err(|e| ToolError::Execution(format!("{:#}", e)))?;
        Ok(output.render())
    }
}
