//! Configuration file for quorum.
//!
//! Reads `.quorum/quorum.toml`. Every key is optional; settings are layered
//! file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [experiment]
//! name = "parser-rewrite"
//! model = "claude-sonnet-4"
//! agent_count = 3
//! problem_file = "PROBLEM.md"
//!
//! [model]
//! command = "quorum-model"
//! context_budget = 150000
//! max_output_tokens = 8192
//! request_timeout_secs = 600
//!
//! [retry]
//! max_attempts = 5
//! base_delay_ms = 1000
//! max_delay_ms = 30000
//!
//! [tools]
//! max_parallel = 4
//! command_timeout_secs = 120
//! question_poll_interval_ms = 1000
//! question_default_timeout_secs = 300
//!
//! [turn_start]
//! status_update_count = 10
//! status_update_char_cap = 500
//!
//! [repository]
//! path = "."
//! remote_url = ""
//! main_branch = "main"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Experiment identity and team size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentSection {
    /// Experiment name (defaults to the project directory name)
    #[serde(default)]
    pub name: Option<String>,
    /// Model id passed through to the model command
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_agent_count")]
    pub agent_count: i64,
    /// Problem statement, relative to the project directory
    #[serde(default = "default_problem_file")]
    pub problem_file: PathBuf,
}

fn default_model() -> String {
    "claude-sonnet-4".to_string()
}

fn default_agent_count() -> i64 {
    3
}

fn default_problem_file() -> PathBuf {
    PathBuf::from("PROBLEM.md")
}

impl Default for ExperimentSection {
    fn default() -> Self {
        Self {
            name: None,
            model: default_model(),
            agent_count: default_agent_count(),
            problem_file: default_problem_file(),
        }
    }
}

/// How to reach the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSection {
    /// Bridge command (default: "quorum-model")
    #[serde(default)]
    pub command: Option<String>,
    /// Token budget for one rendered request
    #[serde(default = "default_context_budget")]
    pub context_budget: usize,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_context_budget() -> usize {
    150_000
}

fn default_max_output_tokens() -> u32 {
    8192
}

fn default_request_timeout_secs() -> u64 {
    600
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            command: None,
            context_budget: default_context_budget(),
            max_output_tokens: default_max_output_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Tool execution limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSettings {
    /// Concurrent tool calls per model response
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_question_poll_interval_ms")]
    pub question_poll_interval_ms: u64,
    #[serde(default = "default_question_timeout_secs")]
    pub question_default_timeout_secs: u64,
}

fn default_max_parallel() -> usize {
    4
}

fn default_command_timeout_secs() -> u64 {
    120
}

fn default_question_poll_interval_ms() -> u64 {
    1000
}

fn default_question_timeout_secs() -> u64 {
    300
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            command_timeout_secs: default_command_timeout_secs(),
            question_poll_interval_ms: default_question_poll_interval_ms(),
            question_default_timeout_secs: default_question_timeout_secs(),
        }
    }
}

/// Shape of the synthetic turn-start message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnStartSettings {
    #[serde(default = "default_status_update_count")]
    pub status_update_count: usize,
    #[serde(default = "default_status_update_char_cap")]
    pub status_update_char_cap: usize,
}

fn default_status_update_count() -> usize {
    10
}

fn default_status_update_char_cap() -> usize {
    500
}

impl Default for TurnStartSettings {
    fn default() -> Self {
        Self {
            status_update_count: default_status_update_count(),
            status_update_char_cap: default_status_update_char_cap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositorySection {
    /// Repository path, relative to the project directory
    #[serde(default = "default_repository_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub remote_url: String,
    #[serde(default = "default_main_branch")]
    pub main_branch: String,
}

fn default_repository_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_main_branch() -> String {
    "main".to_string()
}

impl Default for RepositorySection {
    fn default() -> Self {
        Self {
            path: default_repository_path(),
            remote_url: String::new(),
            main_branch: default_main_branch(),
        }
    }
}

/// The complete quorum.toml configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QuorumToml {
    #[serde(default)]
    pub experiment: ExperimentSection,
    #[serde(default)]
    pub model: ModelSection,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub tools: ToolSettings,
    #[serde(default)]
    pub turn_start: TurnStartSettings,
    #[serde(default)]
    pub repository: RepositorySection,
}

impl QuorumToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse quorum.toml")
    }

    /// Load `.quorum/quorum.toml`, or defaults if it doesn't exist.
    pub fn load_or_default(quorum_dir: &Path) -> Result<Self> {
        let config_path = quorum_dir.join("quorum.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize quorum.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Model bridge command (env → file → default).
    pub fn model_command(&self) -> String {
        std::env::var("QUORUM_MODEL_CMD")
            .ok()
            .or_else(|| self.model.command.clone())
            .unwrap_or_else(|| "quorum-model".to_string())
    }

    /// Context budget in tokens (env → file).
    pub fn context_budget(&self) -> usize {
        env_number("QUORUM_CONTEXT_BUDGET").unwrap_or(self.model.context_budget)
    }

    /// Team size (env → file).
    pub fn agent_count(&self) -> i64 {
        env_number("QUORUM_AGENT_COUNT").unwrap_or(self.experiment.agent_count)
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.agent_count() < 1 {
            warnings.push(format!(
                "agent_count must be at least 1, got {}",
                self.agent_count()
            ));
        }
        if self.context_budget() == 0 {
            warnings.push("context_budget is 0: no request can ever fit".to_string());
        }
        if self.tools.max_parallel == 0 {
            warnings.push("tools.max_parallel is 0: tool calls would never run".to_string());
        }
        if self.retry.max_attempts == 0 {
            warnings.push("retry.max_attempts is 0: treated as a single attempt".to_string());
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            warnings.push(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            ));
        }
        if self.tools.question_poll_interval_ms > self.tools.question_default_timeout_secs * 1000 {
            warnings.push(format!(
                "tools.question_poll_interval_ms ({}) is longer than the default question timeout ({}s)",
                self.tools.question_poll_interval_ms, self.tools.question_default_timeout_secs
            ));
        }
        if self.repository.main_branch.trim().is_empty() {
            warnings.push("repository.main_branch is empty".to_string());
        }

        warnings
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Configuration file plus CLI overrides for one project directory.
#[derive(Debug, Clone)]
pub struct QuorumConfig {
    /// Path to the project directory
    pub project_dir: PathBuf,
    /// Path to the .quorum directory
    pub quorum_dir: PathBuf,
    pub toml: QuorumToml,
    /// CLI override: verbose mode
    pub verbose: bool,
}

impl QuorumConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let quorum_dir = project_dir.join(".quorum");
        let toml = QuorumToml::load_or_default(&quorum_dir)?;

        Ok(Self {
            project_dir,
            quorum_dir,
            toml,
            verbose: false,
        })
    }

    pub fn with_cli_args(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        Ok(config)
    }

    pub fn config_file(&self) -> PathBuf {
        self.quorum_dir.join("quorum.toml")
    }

    pub fn db_path(&self) -> PathBuf {
        self.quorum_dir.join("quorum.db")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.quorum_dir.join("logs")
    }

    /// Per-agent scratch directories for the sandbox.
    pub fn agents_dir(&self) -> PathBuf {
        self.quorum_dir.join("agents")
    }

    pub fn problem_file(&self) -> PathBuf {
        self.project_dir.join(&self.toml.experiment.problem_file)
    }

    pub fn repository_path(&self) -> PathBuf {
        self.project_dir.join(&self.toml.repository.path)
    }

    /// Experiment name, falling back to the project directory name.
    pub fn experiment_name(&self) -> String {
        self.toml.experiment.name.clone().unwrap_or_else(|| {
            self.project_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "quorum".to_string())
        })
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}
